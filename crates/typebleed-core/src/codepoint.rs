use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// A single Unicode scalar value as observed on the capture path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Codepoint(u32);

impl Codepoint {
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    pub const fn value(self) -> u32 {
        self.0
    }

    pub fn to_char(self) -> Option<char> {
        char::from_u32(self.0)
    }

    /// The request-path identifier: upper-case hex, at least four digits.
    pub fn identifier(self) -> String {
        format!("{:04X}", self.0)
    }

    /// Parses a hex identifier such as `0041`, `20ac` or `U+20AC`.
    ///
    /// Rejects anything that is not 1–6 hex digits or that names a surrogate
    /// or out-of-range value.
    pub fn parse_identifier(identifier: &str) -> Option<Self> {
        let hex = identifier
            .strip_prefix("U+")
            .or_else(|| identifier.strip_prefix("u+"))
            .unwrap_or(identifier);
        if hex.is_empty() || hex.len() > 6 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        let value = u32::from_str_radix(hex, 16).ok()?;
        char::from_u32(value).map(|_| Self(value))
    }

    /// Human-readable rendering for logs and the viewer.
    pub fn display(self) -> String {
        match self.to_char() {
            Some(' ') => "␣".to_string(),
            Some(c) if !c.is_control() => c.to_string(),
            _ => format!("U+{:04X}", self.0),
        }
    }

    pub fn is_ascii_digit(self) -> bool {
        self.to_char().is_some_and(|c| c.is_ascii_digit())
    }

    pub fn is_lowercase(self) -> bool {
        self.to_char().is_some_and(char::is_lowercase)
    }

    pub fn is_uppercase(self) -> bool {
        self.to_char().is_some_and(char::is_uppercase)
    }

    pub fn is_alphanumeric(self) -> bool {
        self.to_char().is_some_and(char::is_alphanumeric)
    }
}

impl From<char> for Codepoint {
    fn from(c: char) -> Self {
        Self(c as u32)
    }
}

impl fmt::Display for Codepoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "U+{:04X}", self.0)
    }
}

/// Collects the distinct characters of `text`.
pub fn codepoints(text: &str) -> BTreeSet<Codepoint> {
    text.chars().map(Codepoint::from).collect()
}

/// Renders a codepoint set as a string in codepoint order.
pub fn render(set: &BTreeSet<Codepoint>) -> String {
    set.iter().filter_map(|cp| cp.to_char()).collect()
}
