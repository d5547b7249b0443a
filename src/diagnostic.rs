//! Checker findings and the line-oriented stream they are reported in

/// How serious a finding is
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Error,
    Warning,
    Note,
}

impl Severity {
    /// Single-letter form used by inline annotations (`# E: ...`)
    pub fn token(self) -> &'static str {
        match self {
            Self::Error => "E",
            Self::Warning => "W",
            Self::Note => "N",
        }
    }

    /// Word form used by the checker and by output sections (`main:1: error: ...`)
    pub fn word(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Note => "note",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "E" => Some(Self::Error),
            "W" => Some(Self::Warning),
            "N" => Some(Self::Note),
            _ => None,
        }
    }

    pub fn from_word(word: &str) -> Option<Self> {
        match word {
            "error" => Some(Self::Error),
            "warning" => Some(Self::Warning),
            "note" => Some(Self::Note),
            _ => None,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.word().fmt(f)
    }
}

/// One finding reported by the checker for one execution pass
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Diagnostic {
    pub file: String,
    /// 1-based line within `file`
    pub line: usize,
    pub severity: Severity,
    pub message: String,
}

impl Diagnostic {
    pub fn new(
        file: impl Into<String>,
        line: usize,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            file: normalize_file(&file.into()),
            line,
            severity,
            message: message.into(),
        }
    }

    /// Parse a `<file>:<line>: <severity>: <message>` line
    ///
    /// Returns `None` for anything else, including a trailing line terminator-only line.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim_end_matches(['\n', '\r']);
        let (location, rest) = line.split_once(": ")?;
        let (file, line_num) = location.rsplit_once(':')?;
        if file.is_empty() {
            return None;
        }
        let line_num = line_num.parse::<usize>().ok()?;
        let (severity, message) = match rest.split_once(": ") {
            Some((severity, message)) => (severity, message),
            None => (rest.strip_suffix(':')?, ""),
        };
        let severity = Severity::from_word(severity)?;
        Some(Self::new(file, line_num, severity, message.trim_end()))
    }

    /// Output-section form of the finding
    pub fn render(&self) -> String {
        format!(
            "{}:{}: {}: {}",
            self.file, self.line, self.severity, self.message
        )
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.render().fmt(f)
    }
}

/// Extract every parseable diagnostic from checker output, in emission order
pub fn parse_stream(output: &str) -> Vec<Diagnostic> {
    snapbox::utils::LinesWithTerminator::new(output)
        .filter_map(|line| {
            let diagnostic = Diagnostic::parse(line);
            if diagnostic.is_none() && !line.trim().is_empty() {
                snapbox::debug!("Ignoring checker output: {:?}", line);
            }
            diagnostic
        })
        .collect()
}

pub(crate) fn normalize_file(file: &str) -> String {
    let file = file.replace('\\', "/");
    let mut file = file.as_str();
    while let Some(rest) = file.strip_prefix("./") {
        file = rest;
    }
    file.to_owned()
}
