use std::collections::BTreeMap;

#[derive(Debug)]
pub(crate) struct RunnerSpec {
    cases: Vec<CaseSpec>,
    include: Option<Vec<String>>,
    defaults: crate::schema::SuiteConfig,
}

impl RunnerSpec {
    pub(crate) fn new() -> Self {
        Self {
            cases: Default::default(),
            include: None,
            defaults: Default::default(),
        }
    }

    pub(crate) fn case(&mut self, glob: &std::path::Path, expected: Option<crate::Expected>) {
        self.cases.push(CaseSpec {
            glob: glob.into(),
            #[cfg(not(miri))]
            expected,
            #[cfg(miri)]
            expected: Some(crate::Expected::Skipped),
        });
    }

    pub(crate) fn include(&mut self, include: Option<Vec<String>>) {
        self.include = include;
    }

    pub(crate) fn defaults(&mut self) -> &mut crate::schema::SuiteConfig {
        &mut self.defaults
    }

    pub(crate) fn prepare(&mut self) -> crate::Runner {
        let mut runner = crate::Runner::new();

        // Both sort and let the last writer win to allow overriding specific suites within a glob
        let mut suites: BTreeMap<std::path::PathBuf, crate::Suite> = BTreeMap::new();

        for spec in &self.cases {
            if let Some(glob) = get_glob(&spec.glob) {
                match ::glob::glob(glob) {
                    Ok(paths) => {
                        for path in paths {
                            match path {
                                Ok(path) => {
                                    suites.insert(
                                        path.clone(),
                                        crate::Suite {
                                            path,
                                            expected: spec.expected,
                                            defaults: self.defaults.clone(),
                                            error: None,
                                        },
                                    );
                                }
                                Err(err) => {
                                    let path = err.path().to_owned();
                                    let err = crate::Error::new(err.into_error().to_string());
                                    suites.insert(path.clone(), crate::Suite::with_error(path, err));
                                }
                            }
                        }
                    }
                    Err(err) => {
                        let err = crate::Error::new(err.to_string());
                        suites.insert(
                            spec.glob.clone(),
                            crate::Suite::with_error(spec.glob.clone(), err),
                        );
                    }
                }
            } else {
                let path = spec.glob.as_path();
                suites.insert(
                    path.into(),
                    crate::Suite {
                        path: path.into(),
                        expected: spec.expected,
                        defaults: self.defaults.clone(),
                        error: None,
                    },
                );
            }
        }

        for suite in suites.into_values() {
            if self.is_included(&suite) {
                runner.suite(suite);
            }
        }

        runner
    }

    fn is_included(&self, suite: &crate::Suite) -> bool {
        if let Some(include) = self.include.as_deref() {
            include
                .iter()
                .any(|i| suite.path.to_string_lossy().contains(i))
        } else {
            true
        }
    }
}

impl Default for RunnerSpec {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
struct CaseSpec {
    glob: std::path::PathBuf,
    expected: Option<crate::Expected>,
}

fn get_glob(path: &std::path::Path) -> Option<&str> {
    if let Some(utf8) = path.to_str() {
        if utf8.contains('*') {
            return Some(utf8);
        }
    }

    None
}

#[cfg(test)]
mod test {
    use super::*;

    fn paths(runner: &crate::Runner) -> Vec<(String, Option<crate::Expected>)> {
        runner
            .suites()
            .iter()
            .map(|s| {
                (
                    s.path.file_name().unwrap().to_string_lossy().into_owned(),
                    s.expected,
                )
            })
            .collect()
    }

    fn fixture() -> tempfile::TempDir {
        let root = tempfile::tempdir().unwrap();
        for name in ["check-a.test", "check-b.test", "other.txt"] {
            std::fs::write(root.path().join(name), "").unwrap();
        }
        root
    }

    #[test]
    fn last_writer_wins() {
        let root = fixture();
        let mut spec = RunnerSpec::new();
        spec.case(&root.path().join("*.test"), None);
        spec.case(
            &root.path().join("check-b.test"),
            Some(crate::Expected::Skipped),
        );
        let runner = spec.prepare();
        assert_eq!(
            paths(&runner),
            vec![
                ("check-a.test".to_owned(), None),
                ("check-b.test".to_owned(), Some(crate::Expected::Skipped)),
            ]
        );
    }

    #[test]
    fn include_filters_paths() {
        let root = fixture();
        let mut spec = RunnerSpec::new();
        spec.case(&root.path().join("*.test"), None);
        spec.include(Some(vec!["check-b".into()]));
        let runner = spec.prepare();
        assert_eq!(paths(&runner), vec![("check-b.test".to_owned(), None)]);
    }

    #[test]
    fn literal_paths_are_kept() {
        let mut spec = RunnerSpec::new();
        spec.case(std::path::Path::new("tests/data/missing.test"), None);
        let runner = spec.prepare();
        assert_eq!(runner.suites().len(), 1);
    }
}
