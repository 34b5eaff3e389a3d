//! # Audio Session Management
//!
//! Manages the lifecycle of utterance-capture sessions. A session is created
//! implicitly by the first chunk that arrives for its id, accumulates raw PCM
//! while the speaker is talking, and is destroyed when it is finalized —
//! either because silence outlasted the configured timeout or because a
//! caller asked for it explicitly.
//!
//! ## Session Lifecycle:
//! 1. **Absent**: No chunk seen yet (or already finalized)
//! 2. **Recording**: Accumulating chunks, tracking activity
//! 3. **Finalized**: Removed from the store; audio handed to the finalizer
//!
//! ## Thread Safety:
//! The store is a sharded concurrent map. Chunk processing for one session
//! id runs under that id's entry guard, so concurrent chunks for the same
//! session are serialized while unrelated sessions proceed in parallel.

use crate::audio::activity::{chunk_loudness, is_active};
use dashmap::DashMap;
use std::time::{Duration, Instant};

/// Session id used when a caller does not supply one.
pub const DEFAULT_SESSION_ID: &str = "default";

/// Cumulative loud-audio duration a session must accumulate before silence
/// is allowed to close the utterance. Until this gate is passed, silence
/// chunks are kept verbatim so leading pauses and short gaps survive into
/// the final buffer.
pub const MIN_ACTIVE_AUDIO_MS: f64 = 2000.0;

/// Accumulating state for one in-progress utterance.
pub struct Session {
    /// Sample rate declared when the session was created. Immutable; later
    /// chunks declaring a different rate do not change it.
    sample_rate: u32,

    /// Ordered chunk buffers, append-only until finalize.
    chunks: Vec<Vec<u8>>,

    /// When the most recent retained chunk arrived.
    last_activity: Instant,

    /// Latched once `active_audio_ms` crosses [`MIN_ACTIVE_AUDIO_MS`].
    has_spoken_enough: bool,

    /// Running total of loud-audio duration, derived from sample counts.
    active_audio_ms: f64,

    created_at: Instant,
}

impl Session {
    fn new(sample_rate: u32) -> Self {
        let now = Instant::now();
        Self {
            sample_rate,
            chunks: Vec::new(),
            last_activity: now,
            has_spoken_enough: false,
            active_audio_ms: 0.0,
            created_at: now,
        }
    }

    /// Consume the session, yielding its sample rate and buffered audio in
    /// arrival order.
    pub fn into_audio(self) -> (u32, Vec<Vec<u8>>) {
        (self.sample_rate, self.chunks)
    }

    /// Duration in milliseconds implied by a chunk's byte length at the
    /// declared sample rate (two bytes per 16-bit sample).
    fn chunk_duration_ms(len: usize, declared_rate: u32) -> f64 {
        (len as f64 / 2.0) / declared_rate as f64 * 1000.0
    }
}

/// What happened to one ingested chunk.
#[derive(Debug, Clone, Copy)]
pub struct ChunkOutcome {
    /// Normalized loudness of the chunk, echoed back to the caller.
    pub loudness: f32,

    /// Whether the chunk was classified as active speech.
    pub active: bool,

    /// True when the silence timeout has elapsed for this session and the
    /// caller must trigger finalize before acknowledging.
    pub should_finalize: bool,
}

/// Read-only view of a live session, for status probes.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub sample_rate: u32,
    pub chunk_count: usize,
    pub buffered_bytes: usize,
    pub active_audio_ms: f64,
    pub has_spoken_enough: bool,
    pub idle_ms: u64,
    pub age_ms: u64,
}

/// Process-wide mapping from session id to live session state.
///
/// A session exists in the store iff it has received at least one chunk and
/// has not been finalized. [`SessionStore::take`] is the atomic
/// remove-and-handoff the finalizer relies on: whichever caller gets
/// `Some` owns the audio, everyone else sees the session as absent.
pub struct SessionStore {
    sessions: DashMap<String, Session>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Run the per-chunk state transition for `id`.
    ///
    /// Creates the session on first contact, classifies the chunk through
    /// the activity detector, and applies the retention rules:
    /// - loud chunks are always appended and counted;
    /// - silence chunks are appended until the session has accumulated
    ///   [`MIN_ACTIVE_AUDIO_MS`] of speech, and discarded afterwards.
    ///
    /// The returned outcome tells the caller whether the silence timeout
    /// has already elapsed, in which case finalize must be triggered
    /// before the chunk is acknowledged.
    pub fn ingest_chunk(
        &self,
        id: &str,
        declared_rate: u32,
        chunk: &[u8],
        silence_timeout: Duration,
    ) -> ChunkOutcome {
        let mut entry = self
            .sessions
            .entry(id.to_string())
            .or_insert_with(|| Session::new(declared_rate));
        let session = entry.value_mut();

        let loudness = chunk_loudness(chunk);
        let active = is_active(loudness);
        let now = Instant::now();

        if active {
            session.chunks.push(chunk.to_vec());
            session.last_activity = now;
            // Duration accounting trusts the rate declared with this chunk,
            // even when it disagrees with the session's creation-time rate.
            session.active_audio_ms += Session::chunk_duration_ms(chunk.len(), declared_rate);
            if session.active_audio_ms >= MIN_ACTIVE_AUDIO_MS {
                session.has_spoken_enough = true;
            }
        } else if !session.has_spoken_enough || session.active_audio_ms < MIN_ACTIVE_AUDIO_MS {
            // Pre-speech and early-speech silence is retained verbatim.
            session.chunks.push(chunk.to_vec());
            session.last_activity = now;
        }
        // else: post-gate silence is dropped, leaving last_activity untouched
        // so the idle clock keeps running.

        let should_finalize = session.has_spoken_enough
            && now.duration_since(session.last_activity) > silence_timeout;

        ChunkOutcome {
            loudness,
            active,
            should_finalize,
        }
    }

    /// Atomically remove and return the session for `id`, if present.
    pub fn take(&self, id: &str) -> Option<Session> {
        self.sessions.remove(id).map(|(_, session)| session)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Snapshot a live session for the status probe endpoint.
    pub fn snapshot(&self, id: &str) -> Option<SessionSnapshot> {
        self.sessions.get(id).map(|session| SessionSnapshot {
            session_id: id.to_string(),
            sample_rate: session.sample_rate,
            chunk_count: session.chunks.len(),
            buffered_bytes: session.chunks.iter().map(|c| c.len()).sum(),
            active_audio_ms: session.active_audio_ms,
            has_spoken_enough: session.has_spoken_enough,
            idle_ms: session.last_activity.elapsed().as_millis() as u64,
            age_ms: session.created_at.elapsed().as_millis() as u64,
        })
    }

    /// Ids of sessions whose silence timeout has elapsed.
    ///
    /// Only sessions past the minimum-speech gate qualify; a session that
    /// never spoke enough idles indefinitely until a manual finalize drains
    /// it. Used by the periodic sweep that closes sessions which stopped
    /// sending chunks altogether.
    pub fn timed_out_sessions(&self, silence_timeout: Duration) -> Vec<String> {
        self.sessions
            .iter()
            .filter(|entry| {
                entry.value().has_spoken_enough
                    && entry.value().last_activity.elapsed() > silence_timeout
            })
            .map(|entry| entry.key().clone())
            .collect()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 16_000;
    const TIMEOUT: Duration = Duration::from_millis(1200);

    /// A chunk of `ms` milliseconds at `RATE` with the given amplitude.
    fn chunk(ms: usize, amplitude: i16) -> Vec<u8> {
        let samples = RATE as usize * ms / 1000;
        (0..samples)
            .map(|i| if i % 2 == 0 { amplitude } else { -amplitude })
            .flat_map(|s| s.to_le_bytes())
            .collect()
    }

    fn loud(ms: usize) -> Vec<u8> {
        chunk(ms, 10_000)
    }

    fn silence(ms: usize) -> Vec<u8> {
        chunk(ms, 0)
    }

    #[test]
    fn test_session_created_on_first_chunk() {
        let store = SessionStore::new();
        assert!(!store.contains("s1"));

        store.ingest_chunk("s1", RATE, &loud(100), TIMEOUT);
        assert!(store.contains("s1"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_active_duration_counts_only_loud_chunks() {
        let store = SessionStore::new();
        store.ingest_chunk("s1", RATE, &loud(500), TIMEOUT);
        store.ingest_chunk("s1", RATE, &silence(300), TIMEOUT);
        store.ingest_chunk("s1", RATE, &loud(250), TIMEOUT);

        let snap = store.snapshot("s1").unwrap();
        assert!((snap.active_audio_ms - 750.0).abs() < 0.5);
        // All three were retained (silence arrived before the gate).
        assert_eq!(snap.chunk_count, 3);
    }

    #[test]
    fn test_active_duration_is_monotonic() {
        let store = SessionStore::new();
        let mut previous = 0.0;
        for i in 0..20 {
            let data = if i % 3 == 0 { silence(100) } else { loud(100) };
            store.ingest_chunk("s1", RATE, &data, TIMEOUT);
            let now = store.snapshot("s1").unwrap().active_audio_ms;
            assert!(now >= previous);
            previous = now;
        }
    }

    #[test]
    fn test_post_gate_silence_is_discarded() {
        let store = SessionStore::new();
        // Cross the minimum-speech gate.
        store.ingest_chunk("s1", RATE, &loud(2100), TIMEOUT);
        let before = store.snapshot("s1").unwrap();
        assert!(before.has_spoken_enough);

        store.ingest_chunk("s1", RATE, &silence(400), TIMEOUT);
        let after = store.snapshot("s1").unwrap();
        assert_eq!(after.chunk_count, before.chunk_count);
        assert_eq!(after.buffered_bytes, before.buffered_bytes);
        assert_eq!(after.active_audio_ms, before.active_audio_ms);
    }

    #[test]
    fn test_gate_not_reached_means_no_timeout() {
        let store = SessionStore::new();
        let timeout = Duration::from_millis(10);
        store.ingest_chunk("s2", RATE, &loud(500), timeout);

        std::thread::sleep(Duration::from_millis(30));
        // Well past the silence timeout, but the gate was never crossed.
        assert!(store.timed_out_sessions(timeout).is_empty());
        let outcome = store.ingest_chunk("s2", RATE, &silence(100), timeout);
        assert!(!outcome.should_finalize);
    }

    #[test]
    fn test_silence_timeout_trips_after_gate() {
        let store = SessionStore::new();
        let timeout = Duration::from_millis(10);
        store.ingest_chunk("s1", RATE, &loud(2100), timeout);

        std::thread::sleep(Duration::from_millis(30));
        let sweep = store.timed_out_sessions(timeout);
        assert_eq!(sweep, vec!["s1".to_string()]);

        // A post-gate silence chunk reports the trip without resetting the
        // idle clock.
        let outcome = store.ingest_chunk("s1", RATE, &silence(50), timeout);
        assert!(!outcome.active);
        assert!(outcome.should_finalize);
    }

    #[test]
    fn test_loud_chunk_resets_idle_clock() {
        let store = SessionStore::new();
        let timeout = Duration::from_millis(10);
        store.ingest_chunk("s1", RATE, &loud(2100), timeout);

        std::thread::sleep(Duration::from_millis(30));
        let outcome = store.ingest_chunk("s1", RATE, &loud(100), timeout);
        assert!(!outcome.should_finalize);
        assert!(store.timed_out_sessions(timeout).is_empty());
    }

    #[test]
    fn test_take_is_an_atomic_handoff() {
        let store = SessionStore::new();
        store.ingest_chunk("s1", RATE, &loud(300), TIMEOUT);

        let session = store.take("s1").expect("session present");
        let (rate, chunks) = session.into_audio();
        assert_eq!(rate, RATE);
        assert_eq!(chunks.len(), 1);

        assert!(store.take("s1").is_none());
        assert!(!store.contains("s1"));
    }

    #[test]
    fn test_sample_rate_fixed_at_creation() {
        let store = SessionStore::new();
        store.ingest_chunk("s1", 16_000, &loud(100), TIMEOUT);
        // A later chunk declaring a different rate is accepted but does not
        // rewrite the session's rate; its declared rate drives the duration
        // increment for that chunk only.
        store.ingest_chunk("s1", 8_000, &loud(100), TIMEOUT);

        let snap = store.snapshot("s1").unwrap();
        assert_eq!(snap.sample_rate, 16_000);
        // 100ms at 16kHz plus the same byte count read as 8kHz (200ms).
        assert!((snap.active_audio_ms - 300.0).abs() < 0.5);
    }

    #[test]
    fn test_sessions_are_independent() {
        let store = SessionStore::new();
        store.ingest_chunk("a", RATE, &loud(100), TIMEOUT);
        store.ingest_chunk("b", RATE, &silence(100), TIMEOUT);

        assert_eq!(store.len(), 2);
        store.take("a");
        assert!(store.contains("b"));
        assert_eq!(store.len(), 1);
    }
}
