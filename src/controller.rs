//! Re-run a suite until its expectations stop changing
//!
//! Each attempt parses the current text, drives every case, reconciles the observed diagnostics
//! and applies all resulting [`Edit`][crate::Edit]s as one batch. The loop ends once an attempt
//! produces no edit ([`Status::Converged`]) or the attempt budget runs out
//! ([`Status::Exhausted`]).

use crate::document::{Document, ParseError};
use crate::driver::{Driver, DriverFailure};
use crate::reconcile::{Mismatch, Reconciler};

/// Attempts made when the caller does not say otherwise
pub const DEFAULT_ATTEMPTS: usize = 3;

/// Drives one suite document through the retry loop
#[derive(Debug)]
pub struct Controller<'d, D: Driver + ?Sized> {
    driver: &'d D,
    attempts: usize,
}

impl<'d, D: Driver + ?Sized> Controller<'d, D> {
    pub fn new(driver: &'d D) -> Self {
        Self {
            driver,
            attempts: DEFAULT_ATTEMPTS,
        }
    }

    /// Maximum number of attempts, including the one confirming convergence
    ///
    /// A budget of `1` checks without ever getting to confirm an edit.
    pub fn attempts(mut self, attempts: usize) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    pub fn run(&self, text: &str) -> Result<Outcome, RunError> {
        let mut state = State::Running {
            remaining: self.attempts,
            text: text.to_owned(),
        };
        let mut attempt = 0;
        loop {
            state = match state {
                State::Running { remaining, text } => {
                    attempt += 1;
                    let remaining = remaining - 1;
                    match self.attempt(&text, attempt)? {
                        Attempt::Stable { cases } => {
                            let status = if cases.iter().any(|c| c.unresolved().next().is_some()) {
                                Status::Exhausted
                            } else {
                                Status::Converged
                            };
                            State::Done(Outcome {
                                status,
                                text,
                                attempts: attempt,
                                cases,
                                crash: None,
                            })
                        }
                        Attempt::Edited { patched, cases } if remaining == 0 => {
                            State::Done(Outcome {
                                status: Status::Exhausted,
                                text: patched,
                                attempts: attempt,
                                cases,
                                crash: None,
                            })
                        }
                        Attempt::Edited { patched, .. } => State::Running {
                            remaining,
                            text: patched,
                        },
                        Attempt::Crashed { failure, cases } if remaining == 0 => {
                            State::Done(Outcome {
                                status: Status::Exhausted,
                                text,
                                attempts: attempt,
                                cases,
                                crash: Some(failure),
                            })
                        }
                        Attempt::Crashed { failure, .. } => {
                            snapbox::debug!("Retrying after crash: {}", failure);
                            State::Running { remaining, text }
                        }
                    }
                }
                State::Done(outcome) => return Ok(outcome),
            };
        }
    }

    fn attempt(&self, text: &str, attempt: usize) -> Result<Attempt, RunError> {
        let document = Document::parse(text)?;
        let reconciler = Reconciler::new(&document, self.driver.main_file());

        let mut edits = Vec::new();
        let mut cases = Vec::new();
        for case in document.cases() {
            if case.flags.skip {
                snapbox::debug!("Skipping {}", case.name);
                continue;
            }

            let passes = match self.driver.run(&document, case, attempt) {
                Ok(passes) => passes,
                Err(DriverFailure::Infrastructure(err)) => return Err(RunError::Driver(err)),
                Err(failure) => return Ok(Attempt::Crashed { failure, cases }),
            };
            let reconciliation = reconciler.reconcile(case, &passes);
            cases.push(CaseReport {
                name: case.name.clone(),
                edits: reconciliation.edits.len(),
                mismatches: reconciliation.mismatches,
                accepted: reconciliation.accepted,
            });
            edits.extend(reconciliation.edits);
        }

        snapbox::debug!("Attempt {}: {} edits", attempt, edits.len());
        if edits.is_empty() {
            Ok(Attempt::Stable { cases })
        } else {
            let patched = document.apply(&edits).map_err(RunError::Patch)?;
            Ok(Attempt::Edited { patched, cases })
        }
    }
}

enum State {
    Running { remaining: usize, text: String },
    Done(Outcome),
}

enum Attempt {
    Stable {
        cases: Vec<CaseReport>,
    },
    Edited {
        patched: String,
        cases: Vec<CaseReport>,
    },
    Crashed {
        failure: DriverFailure,
        cases: Vec<CaseReport>,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Status {
    /// The last attempt produced no edit and nothing was left unexplained
    Converged,
    /// The budget ran out, or disagreements remain that no edit can fix
    Exhausted,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Converged => "converged".fmt(f),
            Self::Exhausted => "exhausted".fmt(f),
        }
    }
}

/// Result of running a suite through the retry loop
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Outcome {
    pub status: Status,
    /// The document after the last applied batch of edits
    pub text: String,
    /// Attempts actually made
    pub attempts: usize,
    /// Per-case comparison from the last completed attempt
    pub cases: Vec<CaseReport>,
    /// Set when the final attempt was aborted by a checker crash
    pub crash: Option<DriverFailure>,
}

impl Outcome {
    pub fn is_converged(&self) -> bool {
        self.status == Status::Converged
    }

    /// Cases that still disagree with the checker, excluding accepted failures
    pub fn failing(&self) -> impl Iterator<Item = &CaseReport> {
        self.cases.iter().filter(|c| c.is_failing())
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let palette = snapbox::report::Palette::color();

        match self.status {
            Status::Converged => writeln!(
                f,
                "{} after {} attempt(s)",
                palette.info(self.status),
                self.attempts
            )?,
            Status::Exhausted => writeln!(
                f,
                "{} after {} attempt(s)",
                palette.error(self.status),
                self.attempts
            )?,
        }
        if let Some(crash) = &self.crash {
            write!(f, "{}", palette.error(crash))?;
        }
        for case in self.failing() {
            case.fmt(f)?;
        }
        Ok(())
    }
}

/// How one case compared against the checker in an attempt
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CaseReport {
    pub name: String,
    pub mismatches: Vec<Mismatch>,
    /// xfail case, mismatches are expected
    pub accepted: bool,
    /// Edits generated for the case
    pub edits: usize,
}

impl CaseReport {
    pub fn is_failing(&self) -> bool {
        !self.accepted && !self.mismatches.is_empty()
    }

    pub fn unresolved(&self) -> impl Iterator<Item = &Mismatch> {
        self.mismatches
            .iter()
            .filter(move |m| !self.accepted && !m.resolvable)
    }
}

impl std::fmt::Display for CaseReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let palette = snapbox::report::Palette::color();

        writeln!(f, "{} {}", palette.hint("Case"), self.name)?;
        for mismatch in &self.mismatches {
            let expected = snapbox::Data::text(mismatch.expected_text());
            let actual = snapbox::Data::text(mismatch.actual_text());
            let location = if mismatch.resolvable {
                mismatch.location.clone()
            } else {
                format!("{} (unresolved)", mismatch.location)
            };
            snapbox::report::write_diff(
                f,
                &expected,
                &actual,
                Some(&location),
                Some(&location),
                palette,
            )?;
        }
        Ok(())
    }
}

#[derive(Debug)]
pub enum RunError {
    Parse(ParseError),
    /// The checker could not be run
    Driver(crate::Error),
    /// Generated edits could not be applied
    Patch(crate::Error),
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse(err) => write!(f, "Invalid suite: {err}"),
            Self::Driver(err) => err.fmt(f),
            Self::Patch(err) => write!(f, "Failed to apply edits: {err}"),
        }
    }
}

impl std::error::Error for RunError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Parse(err) => Some(err),
            Self::Driver(err) | Self::Patch(err) => Some(err),
        }
    }
}

impl From<ParseError> for RunError {
    fn from(other: ParseError) -> Self {
        Self::Parse(other)
    }
}

impl From<RunError> for crate::Error {
    fn from(other: RunError) -> Self {
        crate::Error::new(other)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::document::Case;
    use crate::driver::PassOutput;
    use crate::{Diagnostic, Severity};

    const INCOMPATIBLE: &str = "Incompatible types in assignment (expression has type \"int\", variable has type \"str\")";

    type Script = Vec<(&'static str, Vec<Diagnostic>)>;

    /// Reports scripted diagnostics per attempt and case, counting invocations
    ///
    /// Attempts past the end of the script repeat its last entry.
    struct Scripted {
        attempts: Vec<Script>,
        runs: std::sync::atomic::AtomicUsize,
        crash_until: usize,
        infrastructure: bool,
    }

    impl Scripted {
        fn new(diagnostics: Script) -> Self {
            Self::sequence(vec![diagnostics])
        }

        fn sequence(attempts: Vec<Script>) -> Self {
            Self {
                attempts,
                runs: Default::default(),
                crash_until: 0,
                infrastructure: false,
            }
        }

        fn runs(&self) -> usize {
            self.runs.load(std::sync::atomic::Ordering::SeqCst)
        }
    }

    impl Driver for Scripted {
        fn run(
            &self,
            _document: &Document,
            case: &Case,
            attempt: usize,
        ) -> Result<Vec<PassOutput>, DriverFailure> {
            self.runs.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if self.infrastructure {
                return Err(DriverFailure::Infrastructure("no such checker".into()));
            }
            if attempt <= self.crash_until {
                return Err(DriverFailure::Crash {
                    case: case.name.clone(),
                    pass: 1,
                    status: "code=2".into(),
                    output: "Traceback".into(),
                });
            }
            let script = &self.attempts[(attempt - 1).min(self.attempts.len() - 1)];
            let diagnostics = script
                .iter()
                .find(|(name, _)| *name == case.name)
                .map(|(_, d)| d.clone())
                .unwrap_or_default();
            Ok(vec![PassOutput {
                pass: 1,
                diagnostics,
                output: String::new(),
            }])
        }
    }

    fn error(line: usize, message: &str) -> Diagnostic {
        Diagnostic::new("main", line, Severity::Error, message)
    }

    const STALE: &str = "\
[case testCorrect]
s: str = 42  # E: Incompatible types in assignment (expression has type \"int\", variable has type \"str\")

[case testWrong]
s: str = 42  # E: wrong error

[case testXfail-xfail]
s: str = 42  # E: wrong error

[case testSkip-skip]
s: str = 42  # E: wrong error
";

    const FIXED: &str = "\
[case testCorrect]
s: str = 42  # E: Incompatible types in assignment (expression has type \"int\", variable has type \"str\")

[case testWrong]
s: str = 42  # E: Incompatible types in assignment (expression has type \"int\", variable has type \"str\")

[case testXfail-xfail]
s: str = 42  # E: wrong error

[case testSkip-skip]
s: str = 42  # E: wrong error
";

    fn scripted() -> Scripted {
        Scripted::new(vec![
            ("testCorrect", vec![error(1, INCOMPATIBLE)]),
            ("testWrong", vec![error(1, INCOMPATIBLE)]),
            ("testXfail", vec![error(1, INCOMPATIBLE)]),
            ("testSkip", vec![error(1, INCOMPATIBLE)]),
        ])
    }

    #[test]
    fn converges_with_confirming_attempt() {
        let driver = scripted();
        let outcome = Controller::new(&driver).run(STALE).unwrap();
        assert_eq!(outcome.status, Status::Converged);
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.text, FIXED);
        assert_eq!(outcome.crash, None);
        // Skipped cases are never driven
        assert_eq!(driver.runs(), 6);
    }

    #[test]
    fn converged_document_is_untouched() {
        let driver = scripted();
        let outcome = Controller::new(&driver).run(FIXED).unwrap();
        assert_eq!(outcome.status, Status::Converged);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.text, FIXED);
        assert_eq!(outcome.failing().count(), 0);
        let xfail = outcome.cases.iter().find(|c| c.name == "testXfail").unwrap();
        assert!(xfail.accepted);
        assert_eq!(xfail.mismatches.len(), 1);
        assert_eq!(xfail.edits, 0);
    }

    #[test]
    fn single_attempt_reports_without_confirming() {
        let driver = scripted();
        let outcome = Controller::new(&driver).attempts(1).run(STALE).unwrap();
        assert_eq!(outcome.status, Status::Exhausted);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.text, FIXED);
        let failing: Vec<_> = outcome.failing().map(|c| c.name.as_str()).collect();
        assert_eq!(failing, vec!["testWrong"]);
    }

    #[test]
    fn unresolved_mismatch_stops_early() {
        let text = "[case testElsewhere]\nx = 1\n";
        let driver = Scripted::new(vec![(
            "testElsewhere",
            vec![Diagnostic::new("other.py", 1, Severity::Error, "outside")],
        )]);
        let outcome = Controller::new(&driver).attempts(5).run(text).unwrap();
        assert_eq!(outcome.status, Status::Exhausted);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.text, text);
        assert_eq!(outcome.cases[0].unresolved().count(), 1);
    }

    #[test]
    fn crash_consumes_an_attempt() {
        let mut driver = scripted();
        driver.crash_until = 1;
        let outcome = Controller::new(&driver).run(STALE).unwrap();
        assert_eq!(outcome.status, Status::Converged);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.text, FIXED);
    }

    #[test]
    fn crash_exhausts_budget() {
        let mut driver = scripted();
        driver.crash_until = usize::MAX;
        let outcome = Controller::new(&driver).attempts(2).run(STALE).unwrap();
        assert_eq!(outcome.status, Status::Exhausted);
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.text, STALE);
        assert!(outcome.crash.as_ref().map(|c| c.is_crash()).unwrap_or(false));
    }

    #[test]
    fn infrastructure_failure_aborts() {
        let mut driver = scripted();
        driver.infrastructure = true;
        let err = Controller::new(&driver).run(STALE).unwrap_err();
        assert!(matches!(err, RunError::Driver(_)), "{err}");
        assert_eq!(driver.runs(), 1);
    }

    #[test]
    fn parse_error_aborts() {
        let driver = scripted();
        let err = Controller::new(&driver).run("[case a]\n[bogus]\n").unwrap_err();
        assert!(matches!(err, RunError::Parse(_)), "{err}");
        assert_eq!(driver.runs(), 0);
    }

    #[test]
    fn diagnostics_settling_late_converge() {
        let text = "[case testFlaky]\ns: str = 42  # E: stale\n";
        let driver = Scripted::sequence(vec![
            vec![("testFlaky", vec![error(1, "first")])],
            vec![("testFlaky", vec![error(1, "second")])],
            vec![("testFlaky", vec![error(1, "settled")])],
        ]);
        let outcome = Controller::new(&driver).attempts(5).run(text).unwrap();
        assert_eq!(outcome.status, Status::Converged);
        // Settles on the third attempt, confirmed by the fourth
        assert_eq!(outcome.attempts, 4);
        assert_eq!(outcome.text, "[case testFlaky]\ns: str = 42  # E: settled\n");
        assert_eq!(outcome.failing().count(), 0);
    }

    #[test]
    fn diagnostics_never_settling_exhaust() {
        let text = "[case testFlaky]\ns: str = 42  # E: stale\n";
        let driver = Scripted::sequence(vec![
            vec![("testFlaky", vec![error(1, "one")])],
            vec![("testFlaky", vec![error(1, "two")])],
            vec![("testFlaky", vec![error(1, "three")])],
        ]);
        let outcome = Controller::new(&driver).attempts(3).run(text).unwrap();
        assert_eq!(outcome.status, Status::Exhausted);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.text, "[case testFlaky]\ns: str = 42  # E: three\n");

        let failing: Vec<_> = outcome.failing().collect();
        assert_eq!(failing.len(), 1);
        assert_eq!(failing[0].edits, 1);
        assert_eq!(failing[0].mismatches[0].expected, vec!["E: two".to_owned()]);
        assert_eq!(failing[0].mismatches[0].actual, vec!["E: three".to_owned()]);
        assert!(outcome.to_string().contains("testFlaky"));
    }

    #[test]
    fn settling_at_budget_edge_is_exhausted() {
        let text = "[case testFlaky]\ns: str = 42  # E: stale\n";
        let driver = Scripted::sequence(vec![
            vec![("testFlaky", vec![error(1, "first")])],
            vec![("testFlaky", vec![error(1, "settled")])],
        ]);
        // The second attempt still edits, leaving no attempt to confirm
        let outcome = Controller::new(&driver).attempts(2).run(text).unwrap();
        assert_eq!(outcome.status, Status::Exhausted);
        assert_eq!(outcome.text, "[case testFlaky]\ns: str = 42  # E: settled\n");

        let outcome = Controller::new(&driver).attempts(3).run(text).unwrap();
        assert_eq!(outcome.status, Status::Converged);
        assert_eq!(outcome.attempts, 3);
    }
}
