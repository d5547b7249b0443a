//! Decide which expectations need rewriting after a run

use std::collections::BTreeMap;
use std::ops::Range;

use crate::annotation::{self, Annotation};
use crate::document::{Case, Document, Unit};
use crate::driver::PassOutput;
use crate::{Diagnostic, Severity};

/// A change to the document needed for expectations to match observed diagnostics
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Edit {
    pub case: String,
    pub target: Target,
    pub action: Action,
    /// Document lines replaced by `text`; empty for a pure insertion
    pub range: Range<usize>,
    /// Replacement text, line terminators included
    pub text: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Target {
    /// Inline annotation on a 1-based line of `file`
    Annotation { file: String, line: usize },
    OutputSection { pass: usize },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Action {
    Replace,
    Remove,
    Insert,
}

/// An expectation that disagrees with what the checker reported
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mismatch {
    /// `main:3` for an inline annotation, `[out2]` for an output section
    pub location: String,
    pub expected: Vec<String>,
    pub actual: Vec<String>,
    /// Whether an [`Edit`] can express the fix
    pub resolvable: bool,
}

impl Mismatch {
    pub fn expected_text(&self) -> String {
        join(&self.expected)
    }

    pub fn actual_text(&self) -> String {
        join(&self.actual)
    }
}

fn join(lines: &[String]) -> String {
    let mut text = lines.join("\n");
    if !text.is_empty() {
        text.push('\n');
    }
    text
}

/// Result of comparing one case against its diagnostics
#[derive(Clone, Default, Debug, PartialEq, Eq)]
pub struct Reconciliation {
    pub edits: Vec<Edit>,
    pub mismatches: Vec<Mismatch>,
    /// The case is expected to fail: mismatches are kept as-is
    pub accepted: bool,
}

impl Reconciliation {
    pub fn is_converged(&self) -> bool {
        self.edits.is_empty()
    }

    /// Mismatches that no edit can fix and that are not accepted
    pub fn unresolved(&self) -> impl Iterator<Item = &Mismatch> {
        self.mismatches
            .iter()
            .filter(move |m| !self.accepted && !m.resolvable)
    }
}

/// Compares cases of one document against observed diagnostics
#[derive(Copy, Clone, Debug)]
pub struct Reconciler<'d> {
    document: &'d Document,
    main: &'d str,
}

impl<'d> Reconciler<'d> {
    /// `main` is the file name the checker reports for the primary source
    pub fn new(document: &'d Document, main: &'d str) -> Self {
        Self { document, main }
    }

    pub fn reconcile(&self, case: &Case, passes: &[PassOutput]) -> Reconciliation {
        let mut result = Reconciliation::default();

        for output in passes {
            if let Some(section) = case.output(output.pass) {
                self.output_section(case, section, &output.diagnostics, &mut result);
            } else if output.pass == 1 {
                self.inline(case, &output.diagnostics, &mut result);
            } else if !output.diagnostics.is_empty() {
                self.new_output_section(case, output, &mut result);
            }
        }

        if case.flags.xfail {
            if !result.mismatches.is_empty() {
                snapbox::debug!(
                    "Accepting {} mismatches for xfail case {}",
                    result.mismatches.len(),
                    case.name
                );
            }
            result.edits.clear();
            result.accepted = true;
        }
        result
    }

    fn inline(&self, case: &Case, diagnostics: &[Diagnostic], result: &mut Reconciliation) {
        let units: Vec<&Unit> = case.units().collect();

        // Keyed by (unit, line), preserving emission order within a line
        let mut observed: BTreeMap<(usize, usize), Vec<&Diagnostic>> = BTreeMap::new();
        for diagnostic in diagnostics {
            let placement = units
                .iter()
                .position(|u| self.unit_name(u) == diagnostic.file)
                .filter(|u| {
                    let unit = units[*u];
                    unit.document_line(diagnostic.line).is_some()
                        && unit.continuation_of(diagnostic.line).is_none()
                });
            match placement {
                Some(unit) => {
                    observed
                        .entry((unit, diagnostic.line))
                        .or_default()
                        .push(diagnostic);
                }
                None => {
                    result.mismatches.push(Mismatch {
                        location: format!("{}:{}", diagnostic.file, diagnostic.line),
                        expected: Vec::new(),
                        actual: vec![diagnostic.render()],
                        resolvable: false,
                    });
                }
            }
        }

        for (u, unit) in units.iter().enumerate() {
            for annotation in &unit.annotations {
                let line = annotation.line + 1;
                let actual = observed.remove(&(u, line)).unwrap_or_default();
                let actual: Vec<(Severity, &str)> = actual
                    .iter()
                    .map(|d| (d.severity, d.message.as_str()))
                    .collect();
                if annotation.matches(&actual) {
                    continue;
                }

                result.mismatches.push(Mismatch {
                    location: format!("{}:{}", self.unit_name(unit), line),
                    expected: annotation
                        .fragments
                        .iter()
                        .map(|f| format!("{}: {}", f.severity.token(), f.message))
                        .collect(),
                    actual: render_tokens(&actual),
                    resolvable: true,
                });
                self.rewrite_annotation(case, unit, annotation, &actual, result);
            }
        }

        for ((u, line), actual) in observed {
            let unit = units[u];
            let actual: Vec<(Severity, &str)> = actual
                .iter()
                .map(|d| (d.severity, d.message.as_str()))
                .collect();
            let Some(index) = unit.document_line(line) else {
                continue;
            };

            result.mismatches.push(Mismatch {
                location: format!("{}:{}", self.unit_name(unit), line),
                expected: Vec::new(),
                actual: render_tokens(&actual),
                resolvable: true,
            });
            let mut prefix = self.document.line(index).trim_end().to_owned();
            if !prefix.is_empty() {
                prefix.push_str(annotation::SEPARATOR);
            }
            let rendered = annotation::render(&prefix, &actual);
            result.edits.push(Edit {
                case: case.name.clone(),
                target: Target::Annotation {
                    file: self.unit_name(unit).to_owned(),
                    line,
                },
                action: Action::Insert,
                range: index..index + 1,
                text: self.join_lines(&rendered, index..index + 1),
            });
        }
    }

    fn rewrite_annotation(
        &self,
        case: &Case,
        unit: &Unit,
        annotation: &Annotation,
        actual: &[(Severity, &str)],
        result: &mut Reconciliation,
    ) {
        let first = unit.lines.start + annotation.line;
        let target = Target::Annotation {
            file: self.unit_name(unit).to_owned(),
            line: annotation.line + 1,
        };

        if actual.len() == annotation.fragments.len() {
            // Same shape: only touch the fragments that changed
            for (i, (fragment, (severity, message))) in
                annotation.fragments.iter().zip(actual).enumerate()
            {
                if fragment.matches(*severity, message) {
                    continue;
                }
                let index = first + i;
                let prefix = &self.document.line(index)[..fragment.column];
                let line =
                    annotation::render_fragment(prefix, *severity, message, fragment.continued);
                result.edits.push(Edit {
                    case: case.name.clone(),
                    target: target.clone(),
                    action: Action::Replace,
                    range: index..index + 1,
                    text: format!("{line}{}", self.document.terminator(index)),
                });
            }
            return;
        }

        let range = first..first + annotation.span();
        let code = &self.document.line(first)[..annotation.fragments[0].column];
        let (action, rendered) = if actual.is_empty() {
            (Action::Remove, vec![code.trim_end().to_owned()])
        } else {
            (Action::Replace, annotation::render(code, actual))
        };
        let text = self.join_lines(&rendered, range.clone());
        result.edits.push(Edit {
            case: case.name.clone(),
            target,
            action,
            range,
            text,
        });
    }

    fn output_section(
        &self,
        case: &Case,
        section: &crate::document::OutputSection,
        diagnostics: &[Diagnostic],
        result: &mut Reconciliation,
    ) {
        let expected = section.expected(self.document);
        let actual: Vec<String> = diagnostics.iter().map(Diagnostic::render).collect();
        if expected.iter().copied().eq(actual.iter().map(String::as_str)) {
            return;
        }

        result.mismatches.push(Mismatch {
            location: section.marker(),
            expected: expected.iter().map(|l| (*l).to_owned()).collect(),
            actual: actual.clone(),
            resolvable: true,
        });
        let action = if actual.is_empty() {
            Action::Remove
        } else {
            Action::Replace
        };
        let (range, text) = if section.body.is_empty() {
            self.insert_after(section.header, &actual)
        } else {
            (
                section.body.clone(),
                self.join_lines(&actual, section.body.clone()),
            )
        };
        result.edits.push(Edit {
            case: case.name.clone(),
            target: Target::OutputSection { pass: section.pass },
            action,
            range,
            text,
        });
    }

    fn new_output_section(&self, case: &Case, output: &PassOutput, result: &mut Reconciliation) {
        let marker = crate::document::output_marker(output.pass);
        let actual: Vec<String> = output.diagnostics.iter().map(Diagnostic::render).collect();
        result.mismatches.push(Mismatch {
            location: marker.clone(),
            expected: Vec::new(),
            actual: actual.clone(),
            resolvable: true,
        });

        let mut lines = vec![marker];
        lines.extend(actual);
        let end = case.content_end(self.document);
        let (range, text) = self.insert_after(end - 1, &lines);
        result.edits.push(Edit {
            case: case.name.clone(),
            target: Target::OutputSection { pass: output.pass },
            action: Action::Insert,
            range,
            text,
        });
    }

    /// Insert whole lines after document line `index`
    fn insert_after(&self, index: usize, lines: &[String]) -> (Range<usize>, String) {
        let newline = self.document.newline_near(index);
        let text: String = if self.document.terminator(index).is_empty() {
            // Unterminated final line: lead with the terminator so insertions at the same
            // anchor can be stacked
            lines.iter().map(|l| format!("{newline}{l}")).collect()
        } else {
            lines.iter().map(|l| format!("{l}{newline}")).collect()
        };
        (index + 1..index + 1, text)
    }

    /// Render replacement lines for `range`, keeping the range's final terminator
    fn join_lines(&self, lines: &[String], range: Range<usize>) -> String {
        let newline = self.document.newline_near(range.start);
        let last = self.document.terminator(range.end - 1);
        let mut text = String::new();
        for (i, line) in lines.iter().enumerate() {
            text.push_str(line);
            text.push_str(if i + 1 == lines.len() { last } else { newline });
        }
        text
    }

    fn unit_name<'u>(&'u self, unit: &'u Unit) -> &'u str {
        unit.path.as_deref().unwrap_or(self.main)
    }
}

fn render_tokens(actual: &[(Severity, &str)]) -> Vec<String> {
    actual
        .iter()
        .map(|(severity, message)| format!("{}: {}", severity.token(), message))
        .collect()
}
