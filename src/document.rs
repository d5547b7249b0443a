//! Suite documents: a sequence of `[case]` blocks
//!
//! ```text
//! [case testWrongMultipleFiles]
//! import a
//! s: str = 42  # E: foo
//! [file a.py]
//! s1: str = 42  # E: bar
//! [builtins fixtures/list.pyi]
//! [out2]
//! main:1: error: baz
//! ```
//!
//! Every line is kept verbatim (terminator included) so unmodified regions render byte-for-byte.

use std::collections::BTreeSet;
use std::ops::Range;

use crate::annotation::Annotation;

/// A parsed suite document
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Document {
    lines: Vec<String>,
    cases: Vec<Case>,
}

impl Document {
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let lines: Vec<String> = snapbox::utils::LinesWithTerminator::new(text)
            .map(ToOwned::to_owned)
            .collect();
        let cases = Parser::new(&lines).parse()?;
        Ok(Self { lines, cases })
    }

    pub fn cases(&self) -> &[Case] {
        &self.cases
    }

    pub fn case(&self, name: &str) -> Option<&Case> {
        self.cases.iter().find(|c| c.name == name)
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Line content without its terminator
    pub(crate) fn line(&self, index: usize) -> &str {
        strip_terminator(&self.lines[index])
    }

    /// Line content including its terminator
    pub(crate) fn raw_line(&self, index: usize) -> &str {
        &self.lines[index]
    }

    /// The terminator of a line, empty for an unterminated final line
    pub(crate) fn terminator(&self, index: usize) -> &str {
        let raw = self.raw_line(index);
        &raw[strip_terminator(raw).len()..]
    }

    /// The terminator to use for new lines written around `index`
    pub(crate) fn newline_near(&self, index: usize) -> &str {
        if self.lines.is_empty() {
            return "\n";
        }
        let start = index.min(self.lines.len().saturating_sub(1));
        (0..=start)
            .rev()
            .map(|i| self.terminator(i))
            .find(|t| !t.is_empty())
            .unwrap_or("\n")
    }

    /// Text of the unit's lines, as it is written out for the checker
    pub fn unit_text(&self, unit: &Unit) -> String {
        unit.lines
            .clone()
            .map(|i| {
                let raw = self.raw_line(i);
                raw.strip_prefix("\\[")
                    .map(|rest| format!("[{rest}"))
                    .unwrap_or_else(|| raw.to_owned())
            })
            .collect()
    }

    pub fn render(&self) -> String {
        self.lines.concat()
    }

    /// Apply one batch of line-range replacements, producing the new document text
    pub fn apply(&self, edits: &[crate::Edit]) -> Result<String, crate::Error> {
        let mut ordered: Vec<&crate::Edit> = edits.iter().collect();
        ordered.sort_by_key(|e| (e.range.start, e.range.end));

        for edit in &ordered {
            if self.lines.len() < edit.range.end || edit.range.end < edit.range.start {
                return Err(format!(
                    "Edit for `{}` targets lines {}..{} outside of the document ({} lines)",
                    edit.case,
                    edit.range.start,
                    edit.range.end,
                    self.lines.len()
                )
                .into());
            }
        }
        for pair in ordered.windows(2) {
            if pair[1].range.start < pair[0].range.end {
                return Err(format!(
                    "Overlapping edits for `{}` (lines {}..{}) and `{}` (lines {}..{})",
                    pair[0].case,
                    pair[0].range.start,
                    pair[0].range.end,
                    pair[1].case,
                    pair[1].range.start,
                    pair[1].range.end,
                )
                .into());
            }
        }

        let mut output = String::new();
        let mut cursor = 0;
        for edit in ordered {
            output.extend(self.lines[cursor..edit.range.start].iter().map(String::as_str));
            output.push_str(&edit.text);
            cursor = edit.range.end;
        }
        output.extend(self.lines[cursor..].iter().map(String::as_str));

        Ok(output)
    }
}

impl std::str::FromStr for Document {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// A self-contained test scenario
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Case {
    pub name: String,
    pub flags: Flags,
    /// Document index of the `[case]` line
    pub header: usize,
    /// All document lines owned by the case, header included
    pub lines: Range<usize>,
    pub main: Unit,
    pub files: Vec<Unit>,
    pub outputs: Vec<OutputSection>,
    pub builtins: Option<String>,
    pub deletes: Vec<Delete>,
}

impl Case {
    /// Number of execution passes the case asks for
    pub fn passes(&self) -> usize {
        let outputs = self.outputs.iter().map(|o| o.pass);
        let overlays = self.files.iter().filter_map(|f| f.overlay);
        let deletes = self.deletes.iter().map(|d| d.pass);
        outputs.chain(overlays).chain(deletes).fold(1, usize::max)
    }

    pub fn output(&self, pass: usize) -> Option<&OutputSection> {
        self.outputs.iter().find(|o| o.pass == pass)
    }

    /// Units whose annotations are checked against the first pass
    pub fn units(&self) -> impl Iterator<Item = &Unit> {
        std::iter::once(&self.main).chain(self.files.iter().filter(|f| f.overlay.is_none()))
    }

    /// Index one past the last non-blank line of the case
    pub fn content_end(&self, document: &Document) -> usize {
        self.lines
            .clone()
            .rev()
            .find(|i| !document.line(*i).trim().is_empty())
            .map(|i| i + 1)
            .unwrap_or(self.lines.end)
    }
}

#[derive(Copy, Clone, Default, Debug, PartialEq, Eq)]
pub struct Flags {
    /// Mismatches are expected and must never be rewritten
    pub xfail: bool,
    /// Neither executed nor reconciled
    pub skip: bool,
}

/// The primary source or an auxiliary `[file]`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Unit {
    /// `None` for the primary source
    pub path: Option<String>,
    /// Pass before which this content replaces `path`, for `[file <path>.<N>]`
    pub overlay: Option<usize>,
    pub lines: Range<usize>,
    /// Empty for overlays, which are never reconciled
    pub annotations: Vec<Annotation>,
}

impl Unit {
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Document index of a 1-based unit line
    pub fn document_line(&self, line: usize) -> Option<usize> {
        (1..=self.len())
            .contains(&line)
            .then(|| self.lines.start + line - 1)
    }

    pub fn annotation(&self, line: usize) -> Option<&Annotation> {
        self.annotations.iter().find(|a| a.line + 1 == line)
    }

    /// The annotation whose continuation lines cover a 1-based unit line
    pub fn continuation_of(&self, line: usize) -> Option<&Annotation> {
        self.annotations
            .iter()
            .find(|a| a.line + 1 < line && line <= a.line + a.span())
    }
}

/// Expected output for one execution pass
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputSection {
    pub pass: usize,
    pub header: usize,
    /// Lines holding output, excluding trailing blank separator lines
    pub body: Range<usize>,
}

impl OutputSection {
    pub fn expected<'d>(&self, document: &'d Document) -> Vec<&'d str> {
        self.body
            .clone()
            .map(|i| document.line(i).trim_end())
            .collect()
    }

    pub fn marker(&self) -> String {
        output_marker(self.pass)
    }
}

pub fn output_marker(pass: usize) -> String {
    if pass == 1 {
        "[out]".to_owned()
    } else {
        format!("[out{pass}]")
    }
}

/// `[delete <path>.<N>]`: remove `path` before pass `N`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delete {
    pub path: String,
    pub pass: usize,
}

/// A malformed suite document
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParseError {
    /// 1-based
    pub line: usize,
    pub kind: ParseErrorKind,
}

impl ParseError {
    /// `index` is the 0-based document line
    pub fn new(index: usize, kind: ParseErrorKind) -> Self {
        Self {
            line: index + 1,
            kind,
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}: {}", self.line, self.kind)
    }
}

impl std::error::Error for ParseError {}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParseErrorKind {
    UnknownMarker(String),
    MissingArgument(&'static str),
    UnexpectedArgument(String),
    OutsideCase,
    DuplicateCase(String),
    DuplicateSection(String),
    InvalidPath(String),
    UnterminatedAnnotation,
}

impl std::fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownMarker(marker) => write!(
                f,
                "unknown section marker `{marker}` (escape literal lines with `\\[`)"
            ),
            Self::MissingArgument(marker) => write!(f, "`[{marker}]` requires an argument"),
            Self::UnexpectedArgument(marker) => {
                write!(f, "`{marker}` does not take an argument")
            }
            Self::OutsideCase => write!(f, "content before the first `[case]`"),
            Self::DuplicateCase(name) => write!(f, "duplicate case `{name}`"),
            Self::DuplicateSection(marker) => write!(f, "duplicate section `{marker}`"),
            Self::InvalidPath(path) => write!(
                f,
                "`{path}` must be a relative path within the case directory"
            ),
            Self::UnterminatedAnnotation => write!(
                f,
                "annotation ends in `\\` but the next line holds no annotation"
            ),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Marker {
    Case { name: String, flags: Flags },
    File { path: String, overlay: Option<usize> },
    Out { pass: usize },
    Builtins { path: String },
    Delete(Delete),
}

impl Marker {
    fn parse(line: &str, index: usize) -> Result<Option<Self>, ParseError> {
        if !line.starts_with('[') {
            return Ok(None);
        }
        let Some(inner) = line
            .trim_end()
            .strip_prefix('[')
            .and_then(|l| l.strip_suffix(']'))
        else {
            return Ok(None);
        };
        let (keyword, arg) = match inner.split_once(' ') {
            Some((keyword, arg)) => (keyword, Some(arg.trim()).filter(|a| !a.is_empty())),
            None => (inner, None),
        };
        let err = |kind| ParseError::new(index, kind);

        let marker = match keyword {
            "case" => {
                let mut name = arg.ok_or_else(|| err(ParseErrorKind::MissingArgument("case")))?;
                if name.contains(char::is_whitespace) {
                    return Err(err(ParseErrorKind::UnknownMarker(line.trim_end().to_owned())));
                }
                let mut flags = Flags::default();
                loop {
                    if let Some(rest) = name.strip_suffix("-xfail") {
                        flags.xfail = true;
                        name = rest;
                    } else if let Some(rest) = name.strip_suffix("-skip") {
                        flags.skip = true;
                        name = rest;
                    } else {
                        break;
                    }
                }
                Self::Case {
                    name: name.to_owned(),
                    flags,
                }
            }
            "file" => {
                let path = arg.ok_or_else(|| err(ParseErrorKind::MissingArgument("file")))?;
                let path = validate_path(path).map_err(err)?;
                match split_pass(&path) {
                    Some((base, pass)) => Self::File {
                        path: base.to_owned(),
                        overlay: Some(pass),
                    },
                    None => Self::File {
                        path,
                        overlay: None,
                    },
                }
            }
            "builtins" => {
                let path = arg.ok_or_else(|| err(ParseErrorKind::MissingArgument("builtins")))?;
                Self::Builtins {
                    path: path.to_owned(),
                }
            }
            "delete" => {
                let path = arg.ok_or_else(|| err(ParseErrorKind::MissingArgument("delete")))?;
                let path = validate_path(path).map_err(err)?;
                let (base, pass) = split_pass(&path)
                    .ok_or_else(|| err(ParseErrorKind::InvalidPath(path.clone())))?;
                Self::Delete(Delete {
                    path: base.to_owned(),
                    pass,
                })
            }
            _ => {
                let pass = keyword.strip_prefix("out").and_then(|n| {
                    if n.is_empty() {
                        Some(1)
                    } else {
                        n.parse::<usize>().ok().filter(|n| 2 <= *n)
                    }
                });
                match pass {
                    Some(pass) => {
                        if arg.is_some() {
                            return Err(err(ParseErrorKind::UnexpectedArgument(
                                line.trim_end().to_owned(),
                            )));
                        }
                        Self::Out { pass }
                    }
                    None => {
                        return Err(err(ParseErrorKind::UnknownMarker(
                            line.trim_end().to_owned(),
                        )));
                    }
                }
            }
        };
        Ok(Some(marker))
    }
}

fn validate_path(path: &str) -> Result<String, ParseErrorKind> {
    let normalized = crate::diagnostic::normalize_file(path);
    let escapes = normalized.split('/').any(|c| c == ".." || c.is_empty());
    if normalized.is_empty() || normalized.starts_with('/') || normalized.contains(':') || escapes
    {
        return Err(ParseErrorKind::InvalidPath(path.to_owned()));
    }
    Ok(normalized)
}

/// Split `a.py.2` into (`a.py`, 2)
fn split_pass(path: &str) -> Option<(&str, usize)> {
    let (base, pass) = path.rsplit_once('.')?;
    let pass = pass.parse::<usize>().ok().filter(|p| 2 <= *p)?;
    (!base.is_empty()).then_some((base, pass))
}

pub(crate) fn strip_terminator(line: &str) -> &str {
    let line = line.strip_suffix('\n').unwrap_or(line);
    line.strip_suffix('\r').unwrap_or(line)
}

struct Parser<'l> {
    lines: &'l [String],
}

/// A section whose extent is known once the next marker (or the end) is reached
struct Pending {
    marker: Option<Marker>,
    header: usize,
    start: usize,
}

impl<'l> Parser<'l> {
    fn new(lines: &'l [String]) -> Self {
        Self { lines }
    }

    fn parse(&self) -> Result<Vec<Case>, ParseError> {
        let mut cases: Vec<Case> = Vec::new();
        let mut names = BTreeSet::new();
        let mut pending: Option<Pending> = None;

        for (index, raw) in self.lines.iter().enumerate() {
            let line = strip_terminator(raw);
            let Some(marker) = Marker::parse(line, index)? else {
                if pending.is_none() && !is_prelude(line) {
                    return Err(ParseError::new(index, ParseErrorKind::OutsideCase));
                }
                continue;
            };

            if let Some(section) = pending.take() {
                self.close(&mut cases, section, index)?;
            }
            match marker {
                Marker::Case { name, flags } => {
                    if !names.insert(name.clone()) {
                        return Err(ParseError::new(index, ParseErrorKind::DuplicateCase(name)));
                    }
                    cases.push(Case {
                        name,
                        flags,
                        header: index,
                        lines: index..index,
                        main: Unit {
                            path: None,
                            overlay: None,
                            lines: index + 1..index + 1,
                            annotations: Vec::new(),
                        },
                        files: Vec::new(),
                        outputs: Vec::new(),
                        builtins: None,
                        deletes: Vec::new(),
                    });
                    pending = Some(Pending {
                        marker: None,
                        header: index,
                        start: index + 1,
                    });
                }
                marker => {
                    if cases.is_empty() {
                        return Err(ParseError::new(index, ParseErrorKind::OutsideCase));
                    }
                    pending = Some(Pending {
                        marker: Some(marker),
                        header: index,
                        start: index + 1,
                    });
                }
            }
        }
        if let Some(section) = pending.take() {
            self.close(&mut cases, section, self.lines.len())?;
        }

        Ok(cases)
    }

    fn close(&self, cases: &mut [Case], section: Pending, end: usize) -> Result<(), ParseError> {
        let Some(case) = cases.last_mut() else {
            return Ok(());
        };
        case.lines.end = end;
        let lines = section.start..end;

        match section.marker {
            None => {
                case.main = self.unit(None, None, lines)?;
            }
            Some(Marker::File { path, overlay }) => {
                if case
                    .files
                    .iter()
                    .any(|f| f.path.as_deref() == Some(path.as_str()) && f.overlay == overlay)
                {
                    let marker = self.marker_text(section.header);
                    return Err(ParseError::new(
                        section.header,
                        ParseErrorKind::DuplicateSection(marker),
                    ));
                }
                let unit = self.unit(Some(path), overlay, lines)?;
                case.files.push(unit);
            }
            Some(Marker::Out { pass }) => {
                if case.output(pass).is_some() {
                    let marker = self.marker_text(section.header);
                    return Err(ParseError::new(
                        section.header,
                        ParseErrorKind::DuplicateSection(marker),
                    ));
                }
                let body_end = lines
                    .clone()
                    .rev()
                    .find(|i| !strip_terminator(&self.lines[*i]).trim().is_empty())
                    .map(|i| i + 1)
                    .unwrap_or(lines.start);
                case.outputs.push(OutputSection {
                    pass,
                    header: section.header,
                    body: lines.start..body_end,
                });
            }
            Some(Marker::Builtins { path }) => {
                if case.builtins.is_some() {
                    let marker = self.marker_text(section.header);
                    return Err(ParseError::new(
                        section.header,
                        ParseErrorKind::DuplicateSection(marker),
                    ));
                }
                case.builtins = Some(path);
            }
            Some(Marker::Delete(delete)) => {
                case.deletes.push(delete);
            }
            Some(Marker::Case { .. }) => unreachable!("cases open a new block"),
        }

        Ok(())
    }

    fn unit(
        &self,
        path: Option<String>,
        overlay: Option<usize>,
        lines: Range<usize>,
    ) -> Result<Unit, ParseError> {
        let annotations = if overlay.is_some() {
            Vec::new()
        } else {
            let content: Vec<&str> = self.lines[lines.clone()]
                .iter()
                .map(|l| strip_terminator(l))
                .collect();
            crate::annotation::scan_unit(&content, lines.start)?
        };
        Ok(Unit {
            path,
            overlay,
            lines,
            annotations,
        })
    }

    fn marker_text(&self, index: usize) -> String {
        strip_terminator(&self.lines[index]).trim_end().to_owned()
    }
}

fn is_prelude(line: &str) -> bool {
    let line = line.trim();
    line.is_empty() || line.starts_with("--")
}
