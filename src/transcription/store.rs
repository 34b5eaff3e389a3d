//! # Transcript Store
//!
//! Process-wide mapping from session id to the transcript produced by that
//! session's finalize, held for a short retention window and then dropped.
//!
//! ## Expiry:
//! Every write schedules one deferred deletion for its id. The deletion is
//! guarded by the write's creation instant so a stale timer can never
//! remove a newer transcript that overwrote the same id (possible when a
//! session id is reused after finalize). Reads additionally check the age
//! themselves, so the retention boundary is exact even though the timer is
//! approximate.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// How long a transcript stays readable after finalize.
pub const TRANSCRIPT_TTL: Duration = Duration::from_millis(5000);

struct Transcript {
    text: String,
    created_at: Instant,
}

/// Self-expiring transcript map. Clone-cheap; clones share the entries.
#[derive(Clone)]
pub struct TranscriptStore {
    entries: Arc<DashMap<String, Transcript>>,
    ttl: Duration,
}

impl TranscriptStore {
    pub fn new() -> Self {
        Self::with_ttl(TRANSCRIPT_TTL)
    }

    /// Store with a custom retention window (tests use short windows).
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            ttl,
        }
    }

    /// Publish the transcript for `session_id`, replacing any prior entry,
    /// and schedule its removal after the retention window.
    ///
    /// Must be called from within a tokio runtime (the deferred deletion is
    /// a spawned timer task).
    pub fn publish(&self, session_id: &str, text: String) {
        let created_at = Instant::now();
        self.entries.insert(
            session_id.to_string(),
            Transcript { text, created_at },
        );

        let entries = Arc::clone(&self.entries);
        let id = session_id.to_string();
        let ttl = self.ttl;
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            // Only remove the exact write this timer belongs to; an
            // overwrite in the meantime gets its own timer.
            let removed = entries.remove_if(&id, |_, t| t.created_at == created_at);
            if removed.is_some() {
                debug!(session_id = %id, "transcript expired");
            }
        });
    }

    /// The transcript for `session_id`, if one is live. `Some("")` is a
    /// valid answer: the provider heard nothing in the utterance.
    pub fn read(&self, session_id: &str) -> Option<String> {
        self.entries
            .get(session_id)
            .filter(|t| t.created_at.elapsed() < self.ttl)
            .map(|t| t.text.clone())
    }

    /// Number of stored (possibly not-yet-reaped) entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for TranscriptStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[actix_web::test]
    async fn test_readable_within_window() {
        let store = TranscriptStore::with_ttl(Duration::from_millis(200));
        store.publish("s1", "hello".to_string());

        assert_eq!(store.read("s1"), Some("hello".to_string()));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.read("s1"), Some("hello".to_string()));
    }

    #[actix_web::test]
    async fn test_unreadable_after_window() {
        let store = TranscriptStore::with_ttl(Duration::from_millis(50));
        store.publish("s1", "hello".to_string());

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(store.read("s1"), None);
        // The deferred deletion also reclaimed the entry.
        assert!(store.is_empty());
    }

    #[actix_web::test]
    async fn test_absent_id_is_not_ready() {
        let store = TranscriptStore::new();
        assert_eq!(store.read("never-seen"), None);
    }

    #[actix_web::test]
    async fn test_empty_transcript_is_still_live() {
        let store = TranscriptStore::with_ttl(Duration::from_millis(200));
        store.publish("quiet", String::new());
        assert_eq!(store.read("quiet"), Some(String::new()));
    }

    #[actix_web::test]
    async fn test_overwrite_survives_stale_timer() {
        let store = TranscriptStore::with_ttl(Duration::from_millis(200));
        store.publish("s1", "first".to_string());

        tokio::time::sleep(Duration::from_millis(80)).await;
        store.publish("s1", "second".to_string());

        // The first write's timer fires around t=200; the overwrite from
        // t=80 must outlive it.
        tokio::time::sleep(Duration::from_millis(160)).await;
        assert_eq!(store.read("s1"), Some("second".to_string()));

        tokio::time::sleep(Duration::from_millis(160)).await;
        assert_eq!(store.read("s1"), None);
    }
}
