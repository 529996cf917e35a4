use crate::codepoint::Codepoint;
use crate::error::{Result, TypeBleedError};
use crate::registry::CodepointRegistry;
use crate::session::{ClientMeta, Millis, SessionId, SessionStore};
use serde::{Deserialize, Serialize};
use std::io::BufRead;
use std::sync::{Mutex, PoisonError};
use typebleed_dsa::SequencedRing;

/// One accepted capture, as shown in the live access log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub seq: u64,
    pub session_id: SessionId,
    pub codepoint: Codepoint,
    pub character: String,
    pub observed_at: Millis,
    #[serde(default)]
    pub client: ClientMeta,
    /// False when the capture was a duplicate of an earlier one.
    #[serde(default)]
    pub new: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalPage {
    pub entries: Vec<JournalEntry>,
    pub total: u64,
}

/// Bounded, append-only record of accepted captures.
///
/// The lock is held only to stamp and append a single entry.
#[derive(Debug)]
pub struct CaptureJournal {
    ring: Mutex<SequencedRing<JournalEntry>>,
}

impl CaptureJournal {
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: Mutex::new(SequencedRing::new(capacity)),
        }
    }

    pub fn append(
        &self,
        session_id: &SessionId,
        codepoint: Codepoint,
        observed_at: Millis,
        client: &ClientMeta,
        new: bool,
    ) -> u64 {
        let mut ring = self.ring.lock().unwrap_or_else(PoisonError::into_inner);
        ring.push_with(|seq| JournalEntry {
            seq,
            session_id: session_id.clone(),
            codepoint,
            character: codepoint.display(),
            observed_at,
            client: client.clone(),
            new,
        })
    }

    /// At most `limit` of the newest entries with `seq >= since`.
    pub fn since(&self, since: u64, limit: usize) -> JournalPage {
        let ring = self.ring.lock().unwrap_or_else(PoisonError::into_inner);
        JournalPage {
            entries: ring
                .since(since, limit)
                .into_iter()
                .map(|(_, entry)| entry.clone())
                .collect(),
            total: ring.total(),
        }
    }

    pub fn total(&self) -> u64 {
        self.ring.lock().unwrap_or_else(PoisonError::into_inner).total()
    }

    /// Every retained entry as JSON lines, oldest first.
    pub fn to_json_lines(&self) -> String {
        let ring = self.ring.lock().unwrap_or_else(PoisonError::into_inner);
        ring.iter()
            .filter_map(|(_, entry)| serde_json::to_string(entry).ok())
            .map(|line| line + "\n")
            .collect()
    }
}

/// Rebuilds sessions from a JSON-lines journal for offline reconstruction.
///
/// Sessions are restored with their first entry's timestamp as creation
/// time. Entries naming codepoints outside the registry, or session ids the
/// capture path would not accept, are skipped the same way the live path
/// rejects them. Returns the number of entries folded into the store.
pub fn replay(
    reader: impl BufRead,
    registry: &CodepointRegistry,
    store: &SessionStore,
) -> Result<usize> {
    let mut applied = 0;
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let entry: JournalEntry = serde_json::from_str(line).map_err(|source| {
            TypeBleedError::JournalDecode {
                line: index + 1,
                source,
            }
        })?;
        if SessionId::parse(entry.session_id.as_str()).is_none() {
            tracing::warn!(
                "Journal replay: line {} has malformed session id {:?}",
                index + 1,
                entry.session_id.as_str()
            );
            continue;
        }
        if !registry.contains(entry.codepoint) {
            tracing::warn!(
                "Journal replay: line {} names unregistered {}",
                index + 1,
                entry.codepoint
            );
            continue;
        }
        store.restore(entry.session_id.clone(), entry.observed_at);
        match store.record_observation(
            &entry.session_id,
            entry.codepoint,
            entry.observed_at,
            Some(&entry.client),
        ) {
            Ok(_) => applied += 1,
            Err(e) => tracing::warn!("Journal replay: line {} dropped: {}", index + 1, e),
        }
    }
    Ok(applied)
}
