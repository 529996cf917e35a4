use crate::codepoint::{codepoints, Codepoint};
use crate::error::{Result, TypeBleedError};
use std::collections::BTreeSet;
use std::sync::OnceLock;

/// Characters covered by the stock per-codepoint font split.
pub const DEFAULT_ALPHABET: &str = concat!(
    "abcdefghijklmnopqrstuvwxyz",
    "ABCDEFGHIJKLMNOPQRSTUVWXYZ",
    "0123456789",
    " ",
    ".!?,'\"-():;/@#$%&*+=",
    "€£¥₿",
    "<>{}[]|\\~^_",
);

pub fn default_alphabet() -> BTreeSet<Codepoint> {
    codepoints(DEFAULT_ALPHABET)
}

/// The CodepointRegistry binds request-path identifiers to the alphabet the
/// deployment split its font into.
///
/// ## Write-Once
/// The alphabet is fixed for the process lifetime. After `register` the
/// registry is read-only, so the capture hot path resolves identifiers
/// without taking any lock.
#[derive(Debug, Default)]
pub struct CodepointRegistry {
    alphabet: OnceLock<BTreeSet<Codepoint>>,
}

impl CodepointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_alphabet(alphabet: BTreeSet<Codepoint>) -> Result<Self> {
        let registry = Self::new();
        registry.register(alphabet)?;
        Ok(registry)
    }

    /// Defines the valid universe. Registering the same alphabet again is a
    /// no-op; a conflicting alphabet is a configuration error.
    pub fn register(&self, alphabet: BTreeSet<Codepoint>) -> Result<()> {
        if alphabet.is_empty() {
            return Err(TypeBleedError::config("alphabet must not be empty"));
        }
        match self.alphabet.set(alphabet) {
            Ok(()) => {
                tracing::info!("CodepointRegistry: registered {} codepoints", self.len());
                Ok(())
            }
            Err(rejected) if self.alphabet.get() == Some(&rejected) => Ok(()),
            Err(rejected) => Err(TypeBleedError::config(format!(
                "conflicting alphabet registration ({} codepoints already registered, {} offered)",
                self.len(),
                rejected.len()
            ))),
        }
    }

    /// Maps a request-path identifier to a registered codepoint.
    pub fn resolve(&self, identifier: &str) -> Result<Codepoint> {
        Codepoint::parse_identifier(identifier)
            .filter(|cp| self.contains(*cp))
            .ok_or_else(|| TypeBleedError::unknown_codepoint(identifier))
    }

    pub fn contains(&self, codepoint: Codepoint) -> bool {
        self.alphabet.get().is_some_and(|a| a.contains(&codepoint))
    }

    /// Registered alphabet; empty before `register`.
    pub fn alphabet(&self) -> &BTreeSet<Codepoint> {
        static EMPTY: BTreeSet<Codepoint> = BTreeSet::new();
        self.alphabet.get().unwrap_or(&EMPTY)
    }

    pub fn is_registered(&self) -> bool {
        self.alphabet.get().is_some()
    }

    pub fn len(&self) -> usize {
        self.alphabet().len()
    }

    pub fn is_empty(&self) -> bool {
        self.alphabet().is_empty()
    }

    /// Codepoints in `set` the registry does not know.
    pub fn unknown_in(&self, set: &BTreeSet<Codepoint>) -> BTreeSet<Codepoint> {
        set.iter().copied().filter(|cp| !self.contains(*cp)).collect()
    }
}
