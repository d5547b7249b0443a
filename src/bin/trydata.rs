//! Check suites against a checker and update their expectations
//!
//! ```console
//! $ trydata --mode overwrite --checker target/debug/my-checker 'tests/data/*.test' -- --strict
//! ```

use std::path::PathBuf;
use std::process;

use clap::{Parser, ValueEnum};

#[cfg(feature = "color")]
use anstream::eprint;

#[derive(Parser)]
#[command(name = "trydata")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Re-run checker test suites until their expectations are stable", long_about = None)]
struct Cli {
    /// What to do with the converged documents
    #[arg(long, value_enum, default_value_t = CliMode::Verify)]
    mode: CliMode,

    /// Directory `--mode dump` writes to
    #[arg(long, default_value = "dump")]
    dump_dir: PathBuf,

    /// Checker to run, unless a suite's `.toml` names one
    #[arg(long)]
    checker: Option<PathBuf>,

    /// Maximum check-and-rewrite attempts per suite
    #[arg(long)]
    attempts: Option<usize>,

    /// Time limit for each checker invocation, e.g. `5s`
    #[arg(long, value_parser = humantime::parse_duration)]
    timeout: Option<std::time::Duration>,

    /// File name for the primary source of each case
    #[arg(long)]
    main: Option<String>,

    /// Suite files or globs
    #[arg(required = true)]
    suites: Vec<PathBuf>,

    /// Arguments passed through to the checker
    #[arg(last = true)]
    args: Vec<String>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum CliMode {
    /// Check once, never write
    Verify,
    /// Rewrite suites in place
    Overwrite,
    /// Write updated suites under `--dump-dir`
    Dump,
}

fn run(cli: Cli) -> Result<(), trydata::Error> {
    let mode = match cli.mode {
        CliMode::Verify => trydata::Mode::Verify,
        CliMode::Overwrite => trydata::Mode::Overwrite,
        CliMode::Dump => trydata::Mode::Dump(cli.dump_dir),
    };

    let cases = trydata::SuiteCases::default();
    cases.mode(mode);
    if let Some(checker) = &cli.checker {
        cases.checker_path(checker);
    }
    if let Some(attempts) = cli.attempts {
        cases.attempts(attempts);
    }
    if let Some(timeout) = cli.timeout {
        cases.timeout(timeout);
    }
    if let Some(main) = cli.main {
        cases.main_file(main);
    }
    for arg in cli.args {
        cases.arg(arg);
    }
    for suite in &cli.suites {
        cases.case(suite);
    }
    cases.try_run()
}

fn main() {
    let cli = Cli::parse();
    let code = match run(cli) {
        Ok(()) => 0,
        Err(err) => {
            let palette = snapbox::report::Palette::color();
            // `Error` brings its own newline
            eprint!("{}", palette.error(err));
            1
        }
    };
    process::exit(code);
}
