pub mod codepoint;
pub mod config;
pub mod correlator;
pub mod error;
pub mod journal;
pub mod registry;
pub mod session;
pub mod sweeper;

pub use codepoint::Codepoint;
pub use config::{CaptureConfig, ReconstructionConfig, ServerConfig, TypeBleedConfig};
pub use correlator::{timing_buckets, CaptureCorrelator, Outcome, Rejection, TimingBucket};
pub use error::{Result, TypeBleedError};
pub use journal::{CaptureJournal, JournalEntry, JournalPage};
pub use registry::CodepointRegistry;
pub use session::{unix_millis, ClientMeta, Millis, Session, SessionId, SessionStore};
pub use sweeper::EvictionSweeper;
use std::sync::Arc;

/// The capture half of the pipeline, wired from one configuration.
///
/// Components are constructed explicitly and shared by `Arc`; there is no
/// process-wide state.
pub struct CapturePipeline {
    pub registry: Arc<CodepointRegistry>,
    pub store: Arc<SessionStore>,
    pub journal: Arc<CaptureJournal>,
    pub correlator: Arc<CaptureCorrelator>,
}

impl CapturePipeline {
    pub fn from_config(config: &TypeBleedConfig) -> Result<Self> {
        config.validate()?;
        let registry = Arc::new(CodepointRegistry::with_alphabet(config.alphabet_set())?);
        let store = SessionStore::init(config.capture.retention());
        let journal = Arc::new(CaptureJournal::new(config.capture.journal_capacity));
        let correlator = Arc::new(CaptureCorrelator::new(
            registry.clone(),
            store.clone(),
            journal.clone(),
            &config.capture,
        ));
        Ok(Self {
            registry,
            store,
            journal,
            correlator,
        })
    }
}
