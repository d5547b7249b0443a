/// Entry point for running suites
#[derive(Debug, Default)]
pub struct SuiteCases {
    runner: std::cell::RefCell<crate::RunnerSpec>,
    bins: std::cell::RefCell<crate::BinRegistry>,
    mode: std::cell::RefCell<Option<crate::Mode>>,
    has_run: std::cell::Cell<bool>,
}

impl SuiteCases {
    pub fn new() -> Self {
        let s = Self::default();
        s.runner
            .borrow_mut()
            .include(parse_include(std::env::args_os()));
        s
    }

    /// Load suites from `glob`
    pub fn case(&self, glob: impl AsRef<std::path::Path>) -> &Self {
        self.runner.borrow_mut().case(glob.as_ref(), None);
        self
    }

    /// Suites expected to not converge; these are never written back
    pub fn xfail(&self, glob: impl AsRef<std::path::Path>) -> &Self {
        self.runner
            .borrow_mut()
            .case(glob.as_ref(), Some(crate::Expected::Failed));
        self
    }

    /// Suites to leave alone
    pub fn skip(&self, glob: impl AsRef<std::path::Path>) -> &Self {
        self.runner
            .borrow_mut()
            .case(glob.as_ref(), Some(crate::Expected::Skipped));
        self
    }

    /// Set default checker, by path
    pub fn checker_path(&self, path: impl AsRef<std::path::Path>) -> &Self {
        self.runner.borrow_mut().defaults().bin =
            Some(crate::schema::Bin::Path(path.as_ref().into()));
        self
    }

    /// Set default checker, by name
    pub fn checker_name(&self, name: impl AsRef<str>) -> &Self {
        self.runner.borrow_mut().defaults().bin =
            Some(crate::schema::Bin::Name(name.as_ref().into()));
        self
    }

    /// Add a default argument for the checker
    pub fn arg(&self, arg: impl Into<String>) -> &Self {
        self.runner.borrow_mut().defaults().push_arg(arg.into());
        self
    }

    /// Set default environment variable
    pub fn env(&self, key: impl Into<String>, value: impl Into<String>) -> &Self {
        self.runner.borrow_mut().defaults().env.add(key, value);
        self
    }

    /// Set default timeout for each checker invocation
    pub fn timeout(&self, time: std::time::Duration) -> &Self {
        self.runner.borrow_mut().defaults().timeout = Some(time);
        self
    }

    /// Set default attempt budget of the retry loop
    pub fn attempts(&self, attempts: usize) -> &Self {
        self.runner.borrow_mut().defaults().attempts = Some(attempts);
        self
    }

    /// Set default file name for the primary source of each case
    pub fn main_file(&self, name: impl Into<String>) -> &Self {
        self.runner.borrow_mut().defaults().main = Some(name.into());
        self
    }

    /// Add a checker for suites to refer to by name
    pub fn register_bin(
        &self,
        name: impl Into<String>,
        path: impl Into<crate::schema::Bin>,
    ) -> &Self {
        self.bins
            .borrow_mut()
            .register_bin(name.into(), path.into());
        self
    }

    /// Add a series of checkers for suites to refer to by name
    pub fn register_bins<N: Into<String>, B: Into<crate::schema::Bin>>(
        &self,
        bins: impl IntoIterator<Item = (N, B)>,
    ) -> &Self {
        self.bins
            .borrow_mut()
            .register_bins(bins.into_iter().map(|(n, b)| (n.into(), b.into())));
        self
    }

    /// Override the mode otherwise read from `TRYDATA`
    pub fn mode(&self, mode: crate::Mode) -> &Self {
        *self.mode.borrow_mut() = Some(mode);
        self
    }

    /// Run suites, returning an error summarizing failures
    pub fn try_run(&self) -> Result<(), crate::Error> {
        self.has_run.set(true);

        let mode = self
            .mode
            .borrow()
            .clone()
            .unwrap_or_else(|| parse_mode(std::env::var_os("TRYDATA").as_deref()));
        mode.initialize()
            .map_err(|e| format!("Failed to initialize {mode:?}: {e}"))?;

        let runner = self.runner.borrow_mut().prepare();
        runner.run(&mode, &self.bins.borrow())
    }

    /// Run suites
    ///
    /// This will happen on `drop` if not done explicitly
    pub fn run(&self) {
        #[cfg(feature = "color")]
        use anstream::panic;

        if let Err(err) = self.try_run() {
            panic!("{err}");
        }
    }
}

impl std::panic::RefUnwindSafe for SuiteCases {}

#[doc(hidden)]
impl Drop for SuiteCases {
    fn drop(&mut self) {
        if !self.has_run.get() && !std::thread::panicking() {
            self.run();
        }
    }
}

// Filter which suites are run.
//
//     $ cargo test -- data trydata=check-basic
//
// The first argument after `--` must be the test name i.e. the name of the function that has the
// #[test] attribute and calls trydata. The next argument starting with `trydata=` provides a
// path filter. Only suites whose path contains the filter string will be run.
#[allow(clippy::needless_collect)] // false positive https://github.com/rust-lang/rust-clippy/issues/5991
fn parse_include(args: impl IntoIterator<Item = std::ffi::OsString>) -> Option<Vec<String>> {
    let filters = args
        .into_iter()
        .flat_map(std::ffi::OsString::into_string)
        .filter_map(|arg| {
            const PREFIX: &str = "trydata=";
            arg.strip_prefix(PREFIX)
                .filter(|remainder| !remainder.is_empty())
                .map(ToOwned::to_owned)
        })
        .collect::<Vec<String>>();

    if filters.is_empty() {
        None
    } else {
        Some(filters)
    }
}

fn parse_mode(var: Option<&std::ffi::OsStr>) -> crate::Mode {
    if var == Some(std::ffi::OsStr::new("overwrite")) {
        crate::Mode::Overwrite
    } else if var == Some(std::ffi::OsStr::new("dump")) {
        crate::Mode::Dump("dump".into())
    } else {
        crate::Mode::Verify
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn include_filters() {
        let args = ["data", "trydata=check-a", "trydata=", "--nocapture", "trydata=b"]
            .into_iter()
            .map(std::ffi::OsString::from);
        assert_eq!(
            parse_include(args),
            Some(vec!["check-a".to_owned(), "b".to_owned()])
        );
        assert_eq!(parse_include(std::iter::empty()), None);
    }

    #[test]
    fn mode_from_env() {
        assert_eq!(parse_mode(None), crate::Mode::Verify);
        assert_eq!(
            parse_mode(Some(std::ffi::OsStr::new("overwrite"))),
            crate::Mode::Overwrite
        );
        assert_eq!(
            parse_mode(Some(std::ffi::OsStr::new("dump"))),
            crate::Mode::Dump("dump".into())
        );
        assert_eq!(
            parse_mode(Some(std::ffi::OsStr::new("bogus"))),
            crate::Mode::Verify
        );
    }

    #[test]
    fn empty_run_is_ok() {
        let cases = SuiteCases::default();
        cases.mode(crate::Mode::Verify);
        assert!(cases.try_run().is_ok());
    }
}
