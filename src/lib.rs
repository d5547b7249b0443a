//! # Self-updating expectations for checker test suites
//!
//! `trydata` runs suites of declarative test cases through an external checker (a type checker,
//! linter, compiler, ...), finds where the reported diagnostics disagree with the expectations
//! written in the suite, rewrites those expectations in place and repeats until the suite is
//! consistent or an attempt budget runs out.
//!
//! ## Suite format
//!
//! ```text
//! -- Comments and blank lines may precede the first case
//! [case testWrong]
//! s: str = 42  # E: Incompatible types in assignment
//!
//! [case testMultipleFiles]
//! import a
//! [file a.py]
//! s: str = 42;  i: int = 'x'  # E: first message \
//!                             # E: second message
//! [file a.py.2]
//! s: str = ''
//! [out2]
//! a.py:1: error: third message
//! ```
//!
//! - `[case <name>]` starts a case; a `-xfail` suffix keeps its expectations as-is, `-skip`
//!   leaves it out entirely
//! - Lines after the header up to the next section form the primary source, written as `main`
//! - `[file <path>]` adds an auxiliary file; `[file <path>.<N>]` replaces it before pass `N`
//! - `[delete <path>.<N>]` removes a file before pass `N`
//! - `[out]` / `[out<N>]` hold the expected diagnostics of a pass, in checker order
//! - `[builtins <path>]` is handed to the checker through `TRYDATA_BUILTINS`
//! - `# E: ...`, `# W: ...`, `# N: ...` annotate a source line with an expected error, warning
//!   or note; a trailing `\` continues the annotation onto the next line
//!
//! The checker runs in a scratch directory with the case's files and the primary source's name
//! as its last argument. It reports one `<file>:<line>: <error|warning|note>: <message>` line
//! per diagnostic.
//!
//! ## Getting Started
//!
//! To create a minimal setup, create a `tests/data_tests.rs` with
//! ```rust,no_run
//! #[test]
//! fn data_tests() {
//!     trydata::SuiteCases::new()
//!         .checker_name("my-checker")
//!         .case("tests/data/*.test");
//! }
//! ```
//!
//! Run this with `cargo test` like normal. [`SuiteCases`] will enumerate all suite files and check
//! each once against the checker, failing with a diff for every disagreement.
//!
//! Per-suite settings can be put in a `<suite>.toml` next to the suite, see
//! [`schema::SuiteConfig`].
//!
//! ## Workflow
//!
//! To update expectations, run
//! ```console
//! $ TRYDATA=overwrite cargo test --test data_tests
//! ```
//! Every suite goes through the retry loop and is atomically replaced by its converged document.
//!
//! To look at the result without touching the suites, run
//! ```console
//! $ TRYDATA=dump cargo test --test data_tests
//! ```
//! which writes the converged documents under `dump/`.
//!
//! Outside of `cargo test`, the `trydata` binary does the same for suites given on the command
//! line.
//!
//! ## Library
//!
//! The building blocks are usable on their own:
//! ```rust,no_run
//! let driver = trydata::driver::CommandDriver::new("target/debug/my-checker");
//! let text = trydata::storage::read("tests/data/check.test".as_ref()).unwrap();
//! let outcome = trydata::controller::Controller::new(&driver)
//!     .attempts(3)
//!     .run(&text)
//!     .unwrap();
//! if outcome.is_converged() {
//!     trydata::storage::write_atomic("tests/data/check.test".as_ref(), &outcome.text).unwrap();
//! } else {
//!     eprintln!("{outcome}");
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_auto_cfg))]
#![warn(clippy::print_stderr)]
#![warn(clippy::print_stdout)]

pub mod annotation;
pub mod controller;
pub mod diagnostic;
pub mod document;
pub mod driver;
pub mod reconcile;
pub mod schema;
pub mod storage;

mod cases;
mod registry;
mod runner;
mod spec;

pub use cases::SuiteCases;
pub use diagnostic::{Diagnostic, Severity};
pub use reconcile::Edit;
pub use runner::Mode;
pub use snapbox::assert::Error;

pub(crate) use registry::BinRegistry;
pub(crate) use runner::{Expected, Runner, Suite};
pub(crate) use spec::RunnerSpec;

#[doc = include_str!("../README.md")]
#[cfg(doctest)]
pub struct ReadmeDoctests;
