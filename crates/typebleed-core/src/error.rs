use thiserror::Error;

/// Errors raised by the capture-and-reconstruction pipeline.
///
/// Only `Configuration`, `Io` and `ConfigParse` are fatal, and only at
/// startup. The capture path turns `UnknownCodepoint` and `UnknownSession`
/// into rejection outcomes, and `CandidateOverflow` is carried on results as
/// a truncation flag.
#[derive(Debug, Error)]
pub enum TypeBleedError {
    #[error("unknown codepoint identifier: {identifier}")]
    UnknownCodepoint { identifier: String },

    #[error("unknown or evicted session: {session_id}")]
    UnknownSession { session_id: String },

    #[error("configuration error: {reason}")]
    Configuration { reason: String },

    #[error("candidate enumeration exceeded its cap of {cap}")]
    CandidateOverflow { cap: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("journal decode error on line {line}: {source}")]
    JournalDecode {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

impl TypeBleedError {
    pub fn config(reason: impl Into<String>) -> Self {
        TypeBleedError::Configuration { reason: reason.into() }
    }

    pub fn unknown_session(session_id: impl Into<String>) -> Self {
        TypeBleedError::UnknownSession { session_id: session_id.into() }
    }

    pub fn unknown_codepoint(identifier: impl Into<String>) -> Self {
        TypeBleedError::UnknownCodepoint { identifier: identifier.into() }
    }

    /// Fatal errors must stop the process before it serves a single request.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TypeBleedError::Configuration { .. }
                | TypeBleedError::Io(_)
                | TypeBleedError::ConfigParse(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, TypeBleedError>;
