//! Run the external checker against a materialized case

use crate::document::{Case, Document};
use crate::Diagnostic;

/// File name the primary source is written under unless configured otherwise
pub const DEFAULT_MAIN: &str = "main";

/// Diagnostics observed for one execution pass of a case
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PassOutput {
    /// 1-based
    pub pass: usize,
    /// In the order the checker emitted them, not sorted by file or line
    pub diagnostics: Vec<Diagnostic>,
    /// Combined stdout/stderr of the checker, line endings normalized
    pub output: String,
}

impl PassOutput {
    pub fn new(pass: usize, output: String) -> Self {
        let diagnostics = crate::diagnostic::parse_stream(&output);
        Self {
            pass,
            diagnostics,
            output,
        }
    }
}

/// Why a case could not be driven to completion
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DriverFailure {
    /// The checker could not be run at all; retrying will not help
    Infrastructure(crate::Error),
    /// The checker exited unsuccessfully without reporting any diagnostic
    Crash {
        case: String,
        pass: usize,
        status: String,
        output: String,
    },
}

impl DriverFailure {
    pub fn is_crash(&self) -> bool {
        matches!(self, Self::Crash { .. })
    }
}

impl std::fmt::Display for DriverFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Infrastructure(err) => err.fmt(f),
            Self::Crash {
                case,
                pass,
                status,
                output,
            } => {
                writeln!(f, "Checker crashed on `{case}` (pass {pass}): {status}")?;
                for line in output.lines() {
                    writeln!(f, "  {line}")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for DriverFailure {}

impl From<crate::Error> for DriverFailure {
    fn from(other: crate::Error) -> Self {
        Self::Infrastructure(other)
    }
}

/// Produces diagnostics for every pass of a case
///
/// Implementations must be deterministic for a given document for the retry loop to converge.
pub trait Driver: Sync {
    /// Name diagnostics use for the primary source
    fn main_file(&self) -> &str {
        DEFAULT_MAIN
    }

    /// `attempt` is 1-based and only informational
    fn run(
        &self,
        document: &Document,
        case: &Case,
        attempt: usize,
    ) -> Result<Vec<PassOutput>, DriverFailure>;
}

impl<D: Driver + ?Sized> Driver for &D {
    fn main_file(&self) -> &str {
        (**self).main_file()
    }

    fn run(
        &self,
        document: &Document,
        case: &Case,
        attempt: usize,
    ) -> Result<Vec<PassOutput>, DriverFailure> {
        (**self).run(document, case, attempt)
    }
}

/// Drive an external checker process, one scratch directory per case
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandDriver {
    bin: std::path::PathBuf,
    args: Vec<String>,
    env: crate::schema::Env,
    timeout: Option<std::time::Duration>,
    main: String,
}

impl CommandDriver {
    pub fn new(bin: impl Into<std::path::PathBuf>) -> Self {
        Self {
            bin: bin.into(),
            args: Vec::new(),
            env: Default::default(),
            timeout: None,
            main: DEFAULT_MAIN.to_owned(),
        }
    }

    /// Arguments passed before the primary source's file name
    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, env: crate::schema::Env) -> Self {
        self.env = env;
        self
    }

    pub fn timeout(mut self, timeout: Option<std::time::Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// File name the primary source is written under
    pub fn main(mut self, main: impl Into<String>) -> Self {
        self.main = main.into();
        self
    }

    pub fn bin(&self) -> &std::path::Path {
        &self.bin
    }

    fn run_in(
        &self,
        root: &std::path::Path,
        document: &Document,
        case: &Case,
        attempt: usize,
    ) -> Result<Vec<PassOutput>, DriverFailure> {
        let mut outputs = Vec::with_capacity(case.passes());
        for pass in 1..=case.passes() {
            materialize(root, document, case, pass, &self.main)?;

            let mut cmd = snapbox::cmd::Command::new(&self.bin)
                .args(&self.args)
                .arg(&self.main)
                .current_dir(root);
            cmd = self.env.apply(cmd);
            cmd = cmd
                .env("TRYDATA_CASE", &case.name)
                .env("TRYDATA_PASS", pass.to_string())
                .env("TRYDATA_ATTEMPT", attempt.to_string());
            if let Some(builtins) = &case.builtins {
                cmd = cmd.env("TRYDATA_BUILTINS", builtins);
            }
            cmd = cmd.stderr_to_stdout();
            if let Some(timeout) = self.timeout {
                cmd = cmd.timeout(timeout);
            }

            let output = cmd.output().map_err(|e| {
                crate::Error::new(format!("Failed to run {}: {}", self.bin.display(), e))
            })?;
            let text = snapbox::filter::normalize_lines(&String::from_utf8_lossy(&output.stdout));
            let pass_output = PassOutput::new(pass, text);
            snapbox::debug!(
                "{} pass {}: {} diagnostics, {}",
                case.name,
                pass,
                pass_output.diagnostics.len(),
                snapbox::cmd::display_exit_status(output.status)
            );

            if !output.status.success() && pass_output.diagnostics.is_empty() {
                return Err(DriverFailure::Crash {
                    case: case.name.clone(),
                    pass,
                    status: snapbox::cmd::display_exit_status(output.status),
                    output: pass_output.output,
                });
            }
            outputs.push(pass_output);
        }
        Ok(outputs)
    }
}

impl Driver for CommandDriver {
    fn main_file(&self) -> &str {
        &self.main
    }

    fn run(
        &self,
        document: &Document,
        case: &Case,
        attempt: usize,
    ) -> Result<Vec<PassOutput>, DriverFailure> {
        if !self.bin.exists() {
            return Err(crate::Error::new(format!(
                "Checker doesn't exist: {}",
                self.bin.display()
            ))
            .into());
        }

        let root = snapbox::dir::DirRoot::mutable_temp()
            .map_err(|e| crate::Error::new(format!("Failed to initialize sandbox: {e}")))?;
        let result = match root.path() {
            Some(path) => self.run_in(path, document, case, attempt),
            None => Err(crate::Error::new("Sandbox has no path").into()),
        };
        if let Err(err) = root.close() {
            if result.is_ok() {
                return Err(
                    crate::Error::new(format!("Failed to cleanup sandbox: {err}")).into(),
                );
            }
        }
        result
    }
}

/// Bring `root` to the state the checker should see for `pass`
///
/// Pass 1 writes every non-overlay unit. Later passes only apply the overlays and deletions
/// declared for that pass on top of what is already there.
pub fn materialize(
    root: &std::path::Path,
    document: &Document,
    case: &Case,
    pass: usize,
    main: &str,
) -> Result<(), crate::Error> {
    if pass == 1 {
        write_unit(root, main, &document.unit_text(&case.main))?;
        for unit in case.files.iter().filter(|f| f.overlay.is_none()) {
            if let Some(path) = &unit.path {
                write_unit(root, path, &document.unit_text(unit))?;
            }
        }
        return Ok(());
    }

    for unit in case.files.iter().filter(|f| f.overlay == Some(pass)) {
        if let Some(path) = &unit.path {
            write_unit(root, path, &document.unit_text(unit))?;
        }
    }
    for delete in case.deletes.iter().filter(|d| d.pass == pass) {
        let path = root.join(&delete.path);
        std::fs::remove_file(&path)
            .map_err(|e| format!("Failed to delete {}: {}", path.display(), e))?;
    }
    Ok(())
}

fn write_unit(root: &std::path::Path, rel: &str, text: &str) -> Result<(), crate::Error> {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create {}: {}", parent.display(), e))?;
    }
    std::fs::write(&path, text).map_err(|e| format!("Failed to write {}: {}", path.display(), e))?;
    Ok(())
}
