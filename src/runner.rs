use std::io::prelude::*;

#[cfg(feature = "color")]
use anstream::eprintln;
#[cfg(feature = "color")]
use anstream::stderr;
#[cfg(not(feature = "color"))]
use std::eprintln;
#[cfg(not(feature = "color"))]
use std::io::stderr;

use rayon::prelude::*;

use crate::controller::Controller;

#[derive(Debug)]
pub(crate) struct Runner {
    suites: Vec<Suite>,
}

impl Runner {
    pub(crate) fn new() -> Self {
        Self {
            suites: Default::default(),
        }
    }

    pub(crate) fn suite(&mut self, suite: Suite) {
        self.suites.push(suite);
    }

    #[cfg(test)]
    pub(crate) fn suites(&self) -> &[Suite] {
        &self.suites
    }

    /// Run every suite, reporting progress on stderr
    pub(crate) fn run(&self, mode: &Mode, bins: &crate::BinRegistry) -> Result<(), crate::Error> {
        #![allow(unexpected_cfgs)] // HACK: until we upgrade the minimum anstream
        let palette = snapbox::report::Palette::color();

        if self.suites.is_empty() {
            eprintln!("{}", palette.warn("There are no trydata suites enabled yet"));
            return Ok(());
        }

        let failures: Vec<_> = self
            .suites
            .par_iter()
            .filter_map(|s| {
                let result = s.run(mode, bins);
                snapbox::debug!("Suite: {:#?}", result);

                let stderr = stderr();
                let mut stderr = stderr.lock();
                let (report, failed) = match result {
                    Ok(report) => (report, false),
                    Err(report) => (report, true),
                };
                let _ = write!(
                    stderr,
                    "{} {} ... {}",
                    palette.hint("Testing"),
                    report.path.display(),
                    report.status.summary(),
                );
                if let Some(duration) = report.duration {
                    let _ = write!(
                        stderr,
                        " {}",
                        palette.hint(humantime::format_duration(duration)),
                    );
                }
                let _ = writeln!(stderr);
                if failed {
                    // Assuming `report` will print the newline
                    let _ = write!(stderr, "{}", &report);
                    Some(report)
                } else {
                    None
                }
            })
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            let stderr = stderr();
            let mut stderr = stderr.lock();
            let _ = writeln!(
                stderr,
                "{}",
                palette.hint("Update expectations with `TRYDATA=overwrite`"),
            );
            let _ = writeln!(
                stderr,
                "{}",
                palette.hint("Debug output with `TRYDATA=dump`"),
            );
            Err(crate::Error::new(format!(
                "{} of {} suites failed",
                failures.len(),
                self.suites.len()
            )))
        }
    }
}

impl Default for Runner {
    fn default() -> Self {
        Self::new()
    }
}

/// How a suite is expected to end up
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Expected {
    Converged,
    Failed,
    Skipped,
}

#[derive(Debug)]
pub(crate) struct Suite {
    pub(crate) path: std::path::PathBuf,
    pub(crate) expected: Option<Expected>,
    pub(crate) defaults: crate::schema::SuiteConfig,
    pub(crate) error: Option<crate::Error>,
}

impl Suite {
    pub(crate) fn with_error(path: std::path::PathBuf, error: crate::Error) -> Self {
        Self {
            path,
            expected: None,
            defaults: Default::default(),
            error: Some(error),
        }
    }

    pub(crate) fn run(&self, mode: &Mode, bins: &crate::BinRegistry) -> Result<Report, Report> {
        let report = Report::new(self.path.clone());
        let expected = self.expected.unwrap_or(Expected::Converged);
        if expected == Expected::Skipped {
            return Ok(report.status(SuiteStatus::Skipped));
        }
        if let Some(err) = self.error.clone() {
            return Err(report.error(err));
        }

        let config = match self.config() {
            Ok(config) => config,
            Err(err) => return Err(report.error(err)),
        };
        let driver = match config.to_driver(bins) {
            Ok(driver) => driver,
            Err(err) => return Err(report.error(err)),
        };
        let text = match crate::storage::read(&self.path) {
            Ok(text) => text,
            Err(err) => return Err(report.error(err)),
        };

        let attempts = match mode {
            Mode::Verify => 1,
            Mode::Overwrite | Mode::Dump(_) => config.attempts(),
        };
        let timer = std::time::Instant::now();
        let outcome = match Controller::new(&driver).attempts(attempts).run(&text) {
            Ok(outcome) => outcome,
            Err(err) => return Err(report.duration(timer.elapsed()).error(err.into())),
        };
        let mut report = report.duration(timer.elapsed());

        let converged = outcome.is_converged();
        let ok = match expected {
            Expected::Converged => converged,
            Expected::Failed => !converged,
            Expected::Skipped => unreachable!("handled earlier"),
        };

        if expected == Expected::Converged && outcome.text != text {
            let written = match mode {
                Mode::Verify => Ok(false),
                Mode::Overwrite => crate::storage::write_atomic(&self.path, &outcome.text),
                Mode::Dump(root) => match self.path.file_name() {
                    Some(name) => crate::storage::write_atomic(&root.join(name), &outcome.text),
                    None => Err(crate::Error::new("Suite path has no file name")),
                },
            };
            match written {
                Ok(true) => report.status = SuiteStatus::Updated,
                Ok(false) => {}
                Err(err) => {
                    report.outcome = Some(outcome);
                    return Err(report.error(err));
                }
            }
        }

        if !ok {
            report.status = match expected {
                Expected::Failed => SuiteStatus::Expected("failure".into()),
                Expected::Converged | Expected::Skipped => SuiteStatus::Failed,
            };
        }
        report.outcome = Some(outcome);

        if ok {
            Ok(report)
        } else {
            Err(report)
        }
    }

    /// Builder defaults overlaid by the suite's sidecar file
    fn config(&self) -> Result<crate::schema::SuiteConfig, crate::Error> {
        let mut config = crate::schema::SuiteConfig::sidecar(&self.path)?.unwrap_or_default();
        config.update(&self.defaults);
        Ok(config)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Report {
    path: std::path::PathBuf,
    status: SuiteStatus,
    outcome: Option<crate::controller::Outcome>,
    duration: Option<std::time::Duration>,
}

impl Report {
    fn new(path: std::path::PathBuf) -> Self {
        Self {
            path,
            status: SuiteStatus::Ok,
            outcome: None,
            duration: None,
        }
    }

    fn status(mut self, status: SuiteStatus) -> Self {
        self.status = status;
        self
    }

    fn error(self, msg: crate::Error) -> Self {
        self.status(SuiteStatus::Failure(msg))
    }

    fn duration(mut self, duration: std::time::Duration) -> Self {
        self.duration = Some(duration);
        self
    }
}

impl std::fmt::Display for Report {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let palette = snapbox::report::Palette::color();

        match &self.status {
            SuiteStatus::Failure(msg) => writeln!(f, "Failed: {}", palette.error(msg))?,
            SuiteStatus::Expected(expected) => writeln!(f, "Expected {}", palette.info(expected))?,
            SuiteStatus::Ok | SuiteStatus::Updated | SuiteStatus::Skipped | SuiteStatus::Failed => {}
        }
        if let Some(outcome) = &self.outcome {
            outcome.fmt(f)?;
        }

        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum SuiteStatus {
    Ok,
    Updated,
    Skipped,
    Failed,
    Failure(crate::Error),
    Expected(String),
}

impl SuiteStatus {
    fn summary(&self) -> impl std::fmt::Display {
        let palette = snapbox::report::Palette::color();
        match self {
            Self::Ok => palette.info("ok"),
            Self::Updated => palette.warn("updated"),
            Self::Skipped => palette.warn("ignored"),
            Self::Failed | Self::Failure(_) | Self::Expected(_) => palette.error("failed"),
        }
    }
}

/// What to do with the document once the retry loop is done
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Check once, never write
    Verify,
    /// Replace each suite with its converged document
    Overwrite,
    /// Write converged documents under the given directory
    Dump(std::path::PathBuf),
}

impl Mode {
    pub(crate) fn initialize(&self) -> Result<(), std::io::Error> {
        match self {
            Self::Verify => {}
            Self::Overwrite => {}
            Self::Dump(root) => {
                std::fs::create_dir_all(root)?;
                let gitignore_path = root.join(".gitignore");
                std::fs::write(gitignore_path, "*\n")?;
            }
        }

        Ok(())
    }
}

impl std::str::FromStr for Mode {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "verify" => Ok(Self::Verify),
            "overwrite" => Ok(Self::Overwrite),
            "dump" => Ok(Self::Dump("dump".into())),
            _ => Err(crate::Error::new(format!(
                "Unknown mode `{s}`, expected `verify`, `overwrite` or `dump`"
            ))),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn skipped_suite_is_ok() {
        let suite = Suite {
            path: "missing.test".into(),
            expected: Some(Expected::Skipped),
            defaults: Default::default(),
            error: None,
        };
        let report = suite.run(&Mode::Verify, &crate::BinRegistry::new()).unwrap();
        assert_eq!(report.status, SuiteStatus::Skipped);
    }

    #[test]
    fn setup_error_fails() {
        let suite = Suite::with_error("bad[.test".into(), crate::Error::new("bad glob"));
        let report = suite
            .run(&Mode::Verify, &crate::BinRegistry::new())
            .unwrap_err();
        assert_eq!(report.status, SuiteStatus::Failure(crate::Error::new("bad glob")));
    }

    #[test]
    fn missing_checker_fails() {
        let root = tempfile::tempdir().unwrap();
        let path = root.path().join("check.test");
        std::fs::write(&path, "[case a]\nx = 1\n").unwrap();
        let suite = Suite {
            path,
            expected: None,
            defaults: Default::default(),
            error: None,
        };
        let report = suite
            .run(&Mode::Verify, &crate::BinRegistry::new())
            .unwrap_err();
        assert!(
            matches!(&report.status, SuiteStatus::Failure(err) if err.to_string().contains("No checker")),
            "{report}"
        );
    }

    #[test]
    fn parse_mode() {
        assert_eq!("verify".parse::<Mode>().unwrap(), Mode::Verify);
        assert_eq!("overwrite".parse::<Mode>().unwrap(), Mode::Overwrite);
        assert_eq!("dump".parse::<Mode>().unwrap(), Mode::Dump("dump".into()));
        assert!("fail".parse::<Mode>().is_err());
    }

    #[test]
    fn dump_initializes_root() {
        let root = tempfile::tempdir().unwrap();
        let dump = root.path().join("dump");
        Mode::Dump(dump.clone()).initialize().unwrap();
        assert_eq!(
            std::fs::read_to_string(dump.join(".gitignore")).unwrap(),
            "*\n"
        );
    }
}
