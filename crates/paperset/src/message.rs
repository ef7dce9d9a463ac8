use derive_more::{Deref, DerefMut};
use std::fmt;

///
/// Landmark
///
/// Source location a message is attributed to. Rows normally carry the
/// sheet name and 1-based line; an explicit `landmark` column of the form
/// `file:line` overrides it, so errors from an uploaded file can be
/// re-surfaced through a different UI.
///

#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Landmark {
    pub file: String,
    pub line: u32,
}

impl Landmark {
    #[must_use]
    pub fn new(file: impl Into<String>, line: u32) -> Self {
        Self {
            file: file.into(),
            line,
        }
    }

    /// Parse a `file:line` override; the line defaults to zero when the
    /// suffix is missing or non-numeric.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        match text.rsplit_once(':') {
            Some((file, line)) => match line.trim().parse::<u32>() {
                Ok(line) => Self::new(file.trim(), line),
                Err(_) => Self::new(text.trim(), 0),
            },
            None => Self::new(text.trim(), 0),
        }
    }
}

impl fmt::Display for Landmark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.line == 0 {
            f.write_str(&self.file)
        } else {
            write!(f, "{}:{}", self.file, self.line)
        }
    }
}

///
/// Severity
///

#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        };
        write!(f, "{label}")
    }
}

///
/// Message
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Message {
    pub landmark: Landmark,
    pub severity: Severity,
    pub text: String,
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}: {}", self.landmark, self.severity, self.text)
    }
}

///
/// MessageSet
///
/// Ordered, landmark-attributed batch messages. Nothing is ever silently
/// dropped; `deduplicated` is an explicit view for log display.
///

#[derive(Clone, Debug, Default, Deref, DerefMut)]
pub struct MessageSet(Vec<Message>);

impl MessageSet {
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push_message(&mut self, landmark: &Landmark, severity: Severity, text: impl Into<String>) {
        self.0.push(Message {
            landmark: landmark.clone(),
            severity,
            text: text.into(),
        });
    }

    pub fn info(&mut self, landmark: &Landmark, text: impl Into<String>) {
        self.push_message(landmark, Severity::Info, text);
    }

    pub fn warning(&mut self, landmark: &Landmark, text: impl Into<String>) {
        self.push_message(landmark, Severity::Warning, text);
    }

    pub fn error(&mut self, landmark: &Landmark, text: impl Into<String>) {
        self.push_message(landmark, Severity::Error, text);
    }

    #[must_use]
    pub fn has_error(&self) -> bool {
        self.0.iter().any(|m| m.severity == Severity::Error)
    }

    #[must_use]
    pub fn max_severity(&self) -> Option<Severity> {
        self.0.iter().map(|m| m.severity).max()
    }

    /// Identical (severity, text) pairs collapse to their first occurrence.
    #[must_use]
    pub fn deduplicated(&self) -> Vec<&Message> {
        let mut seen = std::collections::BTreeSet::new();
        self.0
            .iter()
            .filter(|m| seen.insert((m.severity as u8, m.text.as_str())))
            .collect()
    }
}

///
/// TESTS
///
