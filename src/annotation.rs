//! Inline expectation annotations
//!
//! A source line carries its expectation as a trailing comment:
//! ```text
//! s: str = 42  # E: Incompatible types in assignment
//! ```
//! A message ending in `\` continues onto the next physical line, which holds nothing but another
//! annotation:
//! ```text
//! s: str = 42;  i: int = 'foo'  # E: first message \
//!                               # E: second message
//! ```
//! Both physical lines form one logical [`Annotation`].

use crate::document::{ParseError, ParseErrorKind};
use crate::Severity;

const CONTINUATION: char = '\\';

/// One message of a logical annotation, occupying one physical line
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fragment {
    pub severity: Severity,
    pub message: String,
    /// Ends in a continuation marker
    pub continued: bool,
    /// Byte offset of the `#` within its physical line
    pub column: usize,
}

impl Fragment {
    pub fn matches(&self, severity: Severity, message: &str) -> bool {
        self.severity == severity && self.message == message
    }
}

/// A logical annotation attached to one source line
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Annotation {
    /// 0-based index of the annotated line within its unit
    pub line: usize,
    pub fragments: Vec<Fragment>,
}

impl Annotation {
    /// Number of physical lines occupied, including continuation lines
    pub fn span(&self) -> usize {
        self.fragments.len()
    }

    pub fn matches(&self, expected: &[(Severity, &str)]) -> bool {
        self.fragments.len() == expected.len()
            && self
                .fragments
                .iter()
                .zip(expected)
                .all(|(f, (severity, message))| f.matches(*severity, message))
    }
}

/// Find the annotation marker on a single physical line (without terminator)
pub fn scan_line(line: &str) -> Option<Fragment> {
    for (column, _) in line.match_indices("# ") {
        let preceded_by_space = line[..column]
            .chars()
            .next_back()
            .map(char::is_whitespace)
            .unwrap_or(true);
        if !preceded_by_space {
            continue;
        }

        let rest = &line[column + 2..];
        let Some((token, message)) = rest.split_once(':') else {
            continue;
        };
        let Some(severity) = Severity::from_token(token) else {
            continue;
        };
        if !(message.is_empty() || message.starts_with(' ')) {
            continue;
        }

        let mut message = message.trim();
        let continued = trailing_backslashes(message) % 2 == 1;
        if continued {
            message = message[..message.len() - 1].trim_end();
        }
        return Some(Fragment {
            severity,
            message: unescape(message),
            continued,
            column,
        });
    }

    None
}

/// Collect the logical annotations of a unit
///
/// `first` is the document index of `lines[0]`, used for error reporting.
pub fn scan_unit(lines: &[&str], first: usize) -> Result<Vec<Annotation>, ParseError> {
    let mut annotations = Vec::new();

    let mut i = 0;
    while i < lines.len() {
        if let Some(fragment) = scan_line(lines[i]) {
            let start = i;
            let mut fragments = vec![fragment];
            while fragments.last().map(|f| f.continued).unwrap_or(false) {
                i += 1;
                let next = lines
                    .get(i)
                    .and_then(|l| scan_continuation(l))
                    .ok_or_else(|| {
                        ParseError::new(first + start, ParseErrorKind::UnterminatedAnnotation)
                    })?;
                fragments.push(next);
            }
            annotations.push(Annotation {
                line: start,
                fragments,
            });
        }
        i += 1;
    }

    Ok(annotations)
}

fn scan_continuation(line: &str) -> Option<Fragment> {
    let fragment = scan_line(line)?;
    line[..fragment.column]
        .trim()
        .is_empty()
        .then_some(fragment)
}

fn trailing_backslashes(message: &str) -> usize {
    message.chars().rev().take_while(|c| *c == CONTINUATION).count()
}

/// Double trailing backslashes so an odd count always marks a continuation
fn escape(message: &str) -> String {
    let n = trailing_backslashes(message);
    let mut escaped = message.to_owned();
    escaped.extend(std::iter::repeat(CONTINUATION).take(n));
    escaped
}

fn unescape(message: &str) -> String {
    let n = trailing_backslashes(message);
    message[..message.len() - n / 2].to_owned()
}

/// Render a single physical annotation line
///
/// `prefix` is everything before the `#`, including the separating whitespace.
pub fn render_fragment(
    prefix: &str,
    severity: Severity,
    message: &str,
    continued: bool,
) -> String {
    let mut line = format!("{prefix}# {}: {}", severity.token(), escape(message));
    if continued {
        line.push(' ');
        line.push(CONTINUATION);
    }
    line
}

/// Render a logical annotation, aligning continuation lines under the first `#`
pub fn render(prefix: &str, expected: &[(Severity, &str)]) -> Vec<String> {
    let indent = " ".repeat(prefix.chars().count());
    expected
        .iter()
        .enumerate()
        .map(|(i, (severity, message))| {
            let prefix = if i == 0 { prefix } else { indent.as_str() };
            render_fragment(prefix, *severity, message, i + 1 < expected.len())
        })
        .collect()
}

/// Separator between code and a newly attached annotation
pub const SEPARATOR: &str = "  ";
