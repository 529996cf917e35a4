use crate::codepoint::Codepoint;
use crate::config::CaptureConfig;
use crate::journal::CaptureJournal;
use crate::registry::CodepointRegistry;
use crate::session::{ClientMeta, Millis, Session, SessionId, SessionStore};
use serde::Serialize;
use std::sync::Arc;

/// Why a capture request was not folded into a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Rejection {
    MalformedPath,
    UnknownSession,
    UnknownCodepoint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Accepted { codepoint: Codepoint, new: bool },
    Rejected(Rejection),
}

impl Outcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Outcome::Accepted { .. })
    }
}

/// The CaptureCorrelator is the single entry point of the capture hot path.
///
/// It turns `/<prefix>/<session>/<identifier>.<extension>` into a store
/// mutation. Every failure is classified into an `Outcome`; nothing escapes
/// this boundary, so a bad request can never break page rendering.
pub struct CaptureCorrelator {
    registry: Arc<CodepointRegistry>,
    store: Arc<SessionStore>,
    journal: Arc<CaptureJournal>,
    prefix: String,
    suffix: String,
}

impl CaptureCorrelator {
    pub fn new(
        registry: Arc<CodepointRegistry>,
        store: Arc<SessionStore>,
        journal: Arc<CaptureJournal>,
        capture: &CaptureConfig,
    ) -> Self {
        Self {
            registry,
            store,
            journal,
            prefix: format!("/{}/", capture.prefix.trim_matches('/')),
            suffix: format!(".{}", capture.extension),
        }
    }

    /// The capture prefix without surrounding slashes, e.g. `fonts/t`.
    pub fn prefix(&self) -> &str {
        self.prefix.trim_matches('/')
    }

    /// Splits a capture path into its session token and codepoint identifier.
    pub fn parse_path<'a>(&self, raw_path: &'a str) -> Option<(SessionId, &'a str)> {
        let path = raw_path.split(['?', '#']).next().unwrap_or(raw_path);
        let rest = path.strip_prefix(self.prefix.as_str())?;
        let (session, file) = rest.split_once('/')?;
        if file.contains('/') {
            return None;
        }
        let identifier = file.strip_suffix(self.suffix.as_str())?;
        if identifier.is_empty() {
            return None;
        }
        Some((SessionId::parse(session)?, identifier))
    }

    /// Path under which the renderer fetches `codepoint` for `session`.
    pub fn capture_path(&self, session: &SessionId, codepoint: Codepoint) -> String {
        format!("{}{}/{}{}", self.prefix, session, codepoint.identifier(), self.suffix)
    }

    pub fn observe(&self, raw_path: &str, observed_at: Millis, client: &ClientMeta) -> Outcome {
        let Some((session, identifier)) = self.parse_path(raw_path) else {
            tracing::warn!("Capture rejected: malformed path {:?}", raw_path);
            return Outcome::Rejected(Rejection::MalformedPath);
        };

        let codepoint = match self.registry.resolve(identifier) {
            Ok(cp) => cp,
            Err(_) => {
                tracing::warn!(
                    "Capture rejected: unknown codepoint {:?} for session {}",
                    identifier,
                    session.short()
                );
                return Outcome::Rejected(Rejection::UnknownCodepoint);
            }
        };

        match self
            .store
            .record_observation(&session, codepoint, observed_at, Some(client))
        {
            Ok(new) => {
                self.journal.append(&session, codepoint, observed_at, client, new);
                if new {
                    tracing::debug!(
                        "[CAPTURE] session={}... char={} '{}'",
                        session.short(),
                        codepoint,
                        codepoint.display()
                    );
                }
                Outcome::Accepted { codepoint, new }
            }
            // Recording only fails for sessions that are absent or expired.
            Err(_) => {
                tracing::warn!("Capture rejected: unknown session {}", session.short());
                Outcome::Rejected(Rejection::UnknownSession)
            }
        }
    }
}

/// Captured characters whose first fetch fell in the same time window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimingBucket {
    pub start: Millis,
    pub end: Millis,
    pub codepoints: Vec<Codepoint>,
}

/// Groups a session's captures into windows of `width_ms`.
///
/// A window opens at the first unassigned timestamp `t0` and admits every
/// capture with `t < t0 + width_ms`. Buckets are ordered by time; within a
/// bucket codepoints are ordered by arrival, then by value.
pub fn timing_buckets(session: &Session, width_ms: Millis) -> Vec<TimingBucket> {
    let width = width_ms.max(1);
    let mut arrivals: Vec<(Millis, Codepoint)> =
        session.captured.iter().map(|(cp, t)| (*t, *cp)).collect();
    arrivals.sort_unstable();

    let mut buckets: Vec<TimingBucket> = Vec::new();
    for (t, cp) in arrivals {
        match buckets.last_mut() {
            Some(bucket) if t < bucket.start.saturating_add(width) => {
                bucket.end = t;
                bucket.codepoints.push(cp);
            }
            _ => buckets.push(TimingBucket {
                start: t,
                end: t,
                codepoints: vec![cp],
            }),
        }
    }
    buckets
}
