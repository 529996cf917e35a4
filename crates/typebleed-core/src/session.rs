use crate::codepoint::Codepoint;
use crate::error::{Result, TypeBleedError};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Milliseconds since the UNIX epoch.
pub type Millis = u64;

pub fn unix_millis() -> Millis {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as Millis)
        .unwrap_or(0)
}

/// Opaque per-visit token, safe to embed in a URL path component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// 128 random bits rendered as 32 lower-case hex characters.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Accepts a token from a request path: 1–64 characters of `[0-9A-Za-z_-]`.
    pub fn parse(token: &str) -> Option<Self> {
        let valid = !token.is_empty()
            && token.len() <= 64
            && token.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
        valid.then(|| Self(token.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First eight characters, for log lines.
    pub fn short(&self) -> &str {
        match self.0.char_indices().nth(8) {
            Some((end, _)) => &self.0[..end],
            None => &self.0,
        }
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Transport-level facts about the client that issued a capture request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientMeta {
    pub remote_addr: Option<String>,
    pub user_agent: Option<String>,
}

/// One monitored page visit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Session {
    pub id: SessionId,
    pub created_at: Millis,
    pub expires_at: Millis,
    /// Codepoint to the time it was first seen.
    pub captured: BTreeMap<Codepoint, Millis>,
    pub client: ClientMeta,
    pub last_seen_at: Option<Millis>,
}

impl Session {
    fn new(id: SessionId, created_at: Millis, retention: Duration) -> Self {
        Self {
            id,
            created_at,
            expires_at: created_at
                .saturating_add(Millis::try_from(retention.as_millis()).unwrap_or(Millis::MAX)),
            captured: BTreeMap::new(),
            client: ClientMeta::default(),
            last_seen_at: None,
        }
    }

    pub fn codepoints(&self) -> BTreeSet<Codepoint> {
        self.captured.keys().copied().collect()
    }

    pub fn first_seen(&self, codepoint: Codepoint) -> Option<Millis> {
        self.captured.get(&codepoint).copied()
    }

    pub fn is_expired(&self, now: Millis) -> bool {
        self.expires_at <= now
    }

    pub fn len(&self) -> usize {
        self.captured.len()
    }

    pub fn is_empty(&self) -> bool {
        self.captured.is_empty()
    }

    /// Keeps the earliest timestamp; returns true on first observation.
    fn observe(&mut self, codepoint: Codepoint, at: Millis) -> bool {
        self.last_seen_at = Some(self.last_seen_at.map_or(at, |t| t.max(at)));
        match self.captured.get_mut(&codepoint) {
            Some(first_seen) => {
                *first_seen = (*first_seen).min(at);
                false
            }
            None => {
                self.captured.insert(codepoint, at);
                true
            }
        }
    }
}

/// The SessionStore exclusively owns every live session record.
///
/// ## Fine-Grained Locking
/// Sessions live in a sharded `DashMap`. A mutation holds the shard guard of
/// its own session only for the duration of the insert, and snapshots clone
/// under the read guard, so a reader never sees a half-applied record and
/// captures for unrelated sessions proceed in parallel. Eviction removes one
/// session at a time and never locks the whole table.
#[derive(Debug)]
pub struct SessionStore {
    sessions: DashMap<SessionId, Session>,
    retention: Duration,
}

impl SessionStore {
    pub fn new(retention: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            retention,
        }
    }

    /// Process-start constructor; the returned handle is passed explicitly
    /// to every component that needs the store.
    pub fn init(retention: Duration) -> Arc<Self> {
        tracing::info!("SessionStore: initialised with {:?} retention", retention);
        Arc::new(Self::new(retention))
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    pub fn create(&self) -> SessionId {
        self.create_at(unix_millis())
    }

    /// Allocates a fresh session that expires at `now + retention`.
    pub fn create_at(&self, now: Millis) -> SessionId {
        loop {
            let id = SessionId::generate();
            if let Entry::Vacant(slot) = self.sessions.entry(id.clone()) {
                slot.insert(Session::new(id.clone(), now, self.retention));
                tracing::debug!("SessionStore: created session {}", id.short());
                return id;
            }
        }
    }

    /// Re-creates a session under a known id, e.g. when replaying a journal.
    /// Returns false if the id is already live.
    pub fn restore(&self, id: SessionId, created_at: Millis) -> bool {
        match self.sessions.entry(id.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(Session::new(id, created_at, self.retention));
                true
            }
            Entry::Occupied(_) => false,
        }
    }

    /// Inserts `(codepoint, at)` unless the codepoint is already recorded.
    ///
    /// Returns whether this was a new observation. Duplicates are not errors;
    /// an older duplicate only moves `first_seen` earlier.
    pub fn record(&self, id: &SessionId, codepoint: Codepoint, at: Millis) -> Result<bool> {
        self.record_observation(id, codepoint, at, None)
    }

    /// `record` plus client metadata, applied in the same critical section.
    pub fn record_observation(
        &self,
        id: &SessionId,
        codepoint: Codepoint,
        at: Millis,
        client: Option<&ClientMeta>,
    ) -> Result<bool> {
        let mut session = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| TypeBleedError::unknown_session(id.as_str()))?;
        if session.is_expired(at) {
            return Err(TypeBleedError::unknown_session(id.as_str()));
        }
        let new = session.observe(codepoint, at);
        if let Some(client) = client {
            session.client = client.clone();
        }
        Ok(new)
    }

    pub fn snapshot(&self, id: &SessionId) -> Result<Session> {
        self.snapshot_at(id, unix_millis())
    }

    /// Owned copy of a live session; expired-but-unswept sessions count as
    /// unknown.
    pub fn snapshot_at(&self, id: &SessionId, now: Millis) -> Result<Session> {
        self.sessions
            .get(id)
            .filter(|s| !s.is_expired(now))
            .map(|s| s.value().clone())
            .ok_or_else(|| TypeBleedError::unknown_session(id.as_str()))
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.contains_at(id, unix_millis())
    }

    pub fn contains_at(&self, id: &SessionId, now: Millis) -> bool {
        self.sessions.get(id).is_some_and(|s| !s.is_expired(now))
    }

    /// Explicit reset of one session; its data is discarded.
    pub fn reset(&self, id: &SessionId) -> bool {
        let removed = self.sessions.remove(id).is_some();
        if removed {
            tracing::info!("SessionStore: reset session {}", id.short());
        }
        removed
    }

    /// Removes every session with `expires_at <= now`; returns the count.
    pub fn evict_expired(&self, now: Millis) -> usize {
        // Collect first: removing while iterating would deadlock on the shard.
        let expired: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|entry| entry.is_expired(now))
            .map(|entry| entry.key().clone())
            .collect();

        let evicted = expired
            .iter()
            .filter(|id| self.sessions.remove_if(*id, |_, s| s.is_expired(now)).is_some())
            .count();
        if evicted > 0 {
            tracing::info!("SessionStore: evicted {} expired sessions", evicted);
        }
        evicted
    }

    /// Drops every session; used at shutdown.
    pub fn teardown(&self) -> usize {
        let count = self.sessions.len();
        self.sessions.clear();
        tracing::info!("SessionStore: teardown discarded {} sessions", count);
        count
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn ids(&self) -> Vec<SessionId> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }

    /// Snapshots of every live session, most recently active first.
    pub fn snapshots_at(&self, now: Millis) -> Vec<Session> {
        let mut sessions: Vec<Session> = self
            .sessions
            .iter()
            .filter(|e| !e.is_expired(now))
            .map(|e| e.value().clone())
            .collect();
        sessions.sort_by(|a, b| {
            b.last_seen_at
                .cmp(&a.last_seen_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        sessions
    }

    /// Live sessions with at least one capture, for listing.
    pub fn summaries(&self) -> Vec<Session> {
        let mut sessions = self.snapshots_at(unix_millis());
        sessions.retain(|s| !s.is_empty());
        sessions
    }
}

static_assertions::assert_impl_all!(SessionStore: Send, Sync);
static_assertions::assert_impl_all!(Session: Send, Sync, Clone);
