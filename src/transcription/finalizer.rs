//! # Utterance Finalizer
//!
//! Closes out a session: drains its buffered audio, ships the utterance to
//! the recognition service, and publishes the transcript. This is the only
//! component that talks to the provider and the only writer of the
//! transcript store.
//!
//! ## Finalize Sequence:
//! 1. Atomically remove the session from the store (absent → no-op)
//! 2. Bail early when no audio was buffered
//! 3. Concatenate the chunks in arrival order
//! 4. Stage the utterance as a scratch WAV file
//! 5. Call the recognition service
//! 6. Publish the transcript (missing fields in the reply become "")
//!
//! ## Failure Policy:
//! Provider and staging failures are logged and swallowed — the utterance
//! is lost, the caller is never failed, and nothing is retried or
//! re-inserted. The scratch file is released on every exit path; a release
//! failure is logged and ignored.

use crate::audio::session::SessionStore;
use crate::transcription::provider::SpeechClient;
use crate::transcription::store::TranscriptStore;
use anyhow::{Context, Result};
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read, Seek, SeekFrom};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// How one finalize call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeOutcome {
    /// No session existed for the id; nothing happened.
    Absent,
    /// The session existed but held no audio; removed without a transcript.
    NoAudio,
    /// A transcript (possibly empty text) was published.
    Published,
    /// The provider or staging failed; the utterance is lost.
    Lost,
}

/// Drains sessions and publishes transcripts. Clone-cheap.
#[derive(Clone)]
pub struct Finalizer {
    sessions: Arc<SessionStore>,
    transcripts: TranscriptStore,
    speech: SpeechClient,
}

impl Finalizer {
    pub fn new(sessions: Arc<SessionStore>, transcripts: TranscriptStore, speech: SpeechClient) -> Self {
        Self {
            sessions,
            transcripts,
            speech,
        }
    }

    /// Finalize `session_id`. Idempotent with respect to the session store:
    /// whoever removes the session does the work, any concurrent or repeat
    /// call sees [`FinalizeOutcome::Absent`].
    ///
    /// The session is already out of the store before the provider call, so
    /// the (slow) network round-trip never blocks chunk ingestion for any
    /// session id.
    pub async fn finalize(&self, session_id: &str, model: &str, language: &str) -> FinalizeOutcome {
        let session = match self.sessions.take(session_id) {
            Some(session) => session,
            None => return FinalizeOutcome::Absent,
        };

        let (sample_rate, chunks) = session.into_audio();
        let total_bytes: usize = chunks.iter().map(|c| c.len()).sum();
        if total_bytes == 0 {
            debug!(session_id, "finalized session had no audio");
            return FinalizeOutcome::NoAudio;
        }

        let mut utterance = Vec::with_capacity(total_bytes);
        for chunk in &chunks {
            utterance.extend_from_slice(chunk);
        }
        info!(
            session_id,
            chunks = chunks.len(),
            bytes = total_bytes,
            sample_rate,
            "finalizing session"
        );

        let (scratch, wav_bytes) = match stage_wav(&utterance, sample_rate) {
            Ok(staged) => staged,
            Err(e) => {
                warn!(session_id, error = %e, "failed to stage utterance; transcript lost");
                return FinalizeOutcome::Lost;
            }
        };

        let result = self
            .speech
            .recognize(&wav_bytes, sample_rate, model, language)
            .await;

        // The scratch file only existed to stage the upload; release it no
        // matter how the provider call went.
        if let Err(e) = scratch.close() {
            warn!(session_id, error = %e, "failed to remove scratch file");
        }

        match result {
            Ok(text) => {
                info!(session_id, transcript_len = text.len(), "transcript published");
                self.transcripts.publish(session_id, text);
                FinalizeOutcome::Published
            }
            Err(e) => {
                warn!(session_id, error = %e, "recognition failed; transcript lost");
                FinalizeOutcome::Lost
            }
        }
    }
}

/// Render raw PCM bytes as a 16-bit mono WAV staged in a scratch file,
/// returning the scratch handle (so the caller controls release) and the
/// file's bytes ready for upload.
fn stage_wav(pcm: &[u8], sample_rate: u32) -> Result<(NamedTempFile, Vec<u8>)> {
    let mut cursor = Cursor::new(pcm);
    let mut samples = Vec::with_capacity(pcm.len() / 2);
    while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
        samples.push(sample);
    }

    let mut scratch = NamedTempFile::new().context("failed to create scratch file")?;
    let header = wav::Header::new(wav::header::WAV_FORMAT_PCM, 1, sample_rate, 16);
    wav::write(header, &wav::BitDepth::Sixteen(samples), scratch.as_file_mut())
        .context("failed to write scratch WAV")?;

    let file = scratch.as_file_mut();
    file.seek(SeekFrom::Start(0))
        .context("failed to rewind scratch file")?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)
        .context("failed to read scratch file")?;

    Ok((scratch, bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::session::SessionStore;
    use actix_web::{web, App, HttpResponse, HttpServer};
    use std::time::Duration;

    const RATE: u32 = 16_000;
    const TIMEOUT: Duration = Duration::from_millis(1200);

    fn chunk(ms: usize, amplitude: i16) -> Vec<u8> {
        let samples = RATE as usize * ms / 1000;
        (0..samples)
            .map(|i| if i % 2 == 0 { amplitude } else { -amplitude })
            .flat_map(|s| s.to_le_bytes())
            .collect()
    }

    /// Serve a canned provider reply on a loopback port; returns the
    /// recognize URL.
    fn spawn_mock_provider(reply: serde_json::Value) -> String {
        let reply = web::Data::new(reply);
        let server = HttpServer::new(move || {
            App::new().app_data(reply.clone()).default_service(web::route().to(
                |reply: web::Data<serde_json::Value>| async move {
                    HttpResponse::Ok().json(reply.get_ref())
                },
            ))
        })
        .workers(1)
        .bind(("127.0.0.1", 0))
        .expect("bind mock provider");
        let addr = server.addrs()[0];
        tokio::spawn(server.run());
        format!("http://{}/v1/speech:recognize", addr)
    }

    fn build_finalizer(endpoint: String) -> (Arc<SessionStore>, TranscriptStore, Finalizer) {
        let sessions = Arc::new(SessionStore::new());
        let transcripts = TranscriptStore::new();
        let speech = SpeechClient::new(endpoint, None);
        let finalizer = Finalizer::new(Arc::clone(&sessions), transcripts.clone(), speech);
        (sessions, transcripts, finalizer)
    }

    #[actix_web::test]
    async fn test_finalize_absent_session_is_noop() {
        let (_, transcripts, finalizer) = build_finalizer("http://127.0.0.1:9/unused".into());
        let outcome = finalizer.finalize("ghost", "latest_long", "en-US").await;
        assert_eq!(outcome, FinalizeOutcome::Absent);
        assert!(transcripts.is_empty());
    }

    #[actix_web::test]
    async fn test_finalize_empty_audio_produces_no_transcript() {
        let (sessions, transcripts, finalizer) = build_finalizer("http://127.0.0.1:9/unused".into());
        // A zero-length chunk creates the session but buffers nothing.
        sessions.ingest_chunk("s1", RATE, &[], TIMEOUT);
        assert!(sessions.contains("s1"));

        let outcome = finalizer.finalize("s1", "latest_long", "en-US").await;
        assert_eq!(outcome, FinalizeOutcome::NoAudio);
        assert!(!sessions.contains("s1"));
        assert_eq!(transcripts.read("s1"), None);
    }

    #[actix_web::test]
    async fn test_provider_failure_loses_utterance() {
        // Nothing listens on this port; the request errors out.
        let (sessions, transcripts, finalizer) = build_finalizer("http://127.0.0.1:9/recognize".into());
        sessions.ingest_chunk("s1", RATE, &chunk(300, 9000), TIMEOUT);

        let outcome = finalizer.finalize("s1", "latest_long", "en-US").await;
        assert_eq!(outcome, FinalizeOutcome::Lost);
        assert_eq!(transcripts.read("s1"), None);
        // The session is gone for good; a retry finds nothing.
        assert_eq!(
            finalizer.finalize("s1", "latest_long", "en-US").await,
            FinalizeOutcome::Absent
        );
    }

    #[actix_web::test]
    async fn test_full_pipeline_with_mock_provider() {
        let endpoint = spawn_mock_provider(serde_json::json!({
            "results": [ { "alternatives": [ { "transcript": "the quick brown fox", "confidence": 0.94 } ] } ]
        }));
        let (sessions, transcripts, finalizer) = build_finalizer(endpoint);

        // Three loud chunks totaling 2200ms cross the minimum-speech gate.
        for _ in 0..2 {
            sessions.ingest_chunk("s1", RATE, &chunk(800, 10_000), TIMEOUT);
        }
        sessions.ingest_chunk("s1", RATE, &chunk(600, 10_000), TIMEOUT);
        assert!(sessions.snapshot("s1").unwrap().has_spoken_enough);

        let outcome = finalizer.finalize("s1", "latest_long", "en-US").await;
        assert_eq!(outcome, FinalizeOutcome::Published);
        assert_eq!(transcripts.read("s1"), Some("the quick brown fox".to_string()));
        assert!(!sessions.contains("s1"));

        // Second finalize with no intervening chunks writes nothing new.
        assert_eq!(
            finalizer.finalize("s1", "latest_long", "en-US").await,
            FinalizeOutcome::Absent
        );
    }

    #[actix_web::test]
    async fn test_silence_timeout_end_to_end() {
        let endpoint = spawn_mock_provider(serde_json::json!({
            "results": [ { "alternatives": [ { "transcript": "done talking" } ] } ]
        }));
        let (sessions, transcripts, finalizer) = build_finalizer(endpoint);

        let timeout = Duration::from_millis(30);
        sessions.ingest_chunk("s1", RATE, &chunk(2200, 10_000), timeout);

        // No further chunks for longer than the silence timeout: the sweep
        // sees the session and finalizes it exactly once.
        tokio::time::sleep(Duration::from_millis(60)).await;
        let due = sessions.timed_out_sessions(timeout);
        assert_eq!(due, vec!["s1".to_string()]);

        for id in due {
            finalizer.finalize(&id, "latest_long", "en-US").await;
        }
        assert_eq!(transcripts.read("s1"), Some("done talking".to_string()));
        assert!(!sessions.contains("s1"));
    }

    #[actix_web::test]
    async fn test_silent_session_only_manual_finalize_drains_it() {
        // Provider finds nothing in the silence.
        let endpoint = spawn_mock_provider(serde_json::json!({ "results": [] }));
        let (sessions, transcripts, finalizer) = build_finalizer(endpoint);

        let timeout = Duration::from_millis(20);
        sessions.ingest_chunk("s2", RATE, &chunk(400, 0), timeout);
        sessions.ingest_chunk("s2", RATE, &chunk(400, 0), timeout);

        // Never crossed the gate, so no amount of waiting auto-finalizes it.
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(sessions.timed_out_sessions(timeout).is_empty());
        assert!(sessions.contains("s2"));

        // Manual finalize drains the retained silence and still transcribes.
        let outcome = finalizer.finalize("s2", "latest_long", "en-US").await;
        assert_eq!(outcome, FinalizeOutcome::Published);
        assert_eq!(transcripts.read("s2"), Some(String::new()));
        assert!(!sessions.contains("s2"));
    }

    #[test]
    fn test_stage_wav_layout() {
        // 100ms of a square wave at 16kHz = 1600 samples = 3200 PCM bytes.
        let pcm = chunk(100, 5000);
        let (scratch, bytes) = stage_wav(&pcm, RATE).unwrap();

        // RIFF/WAVE magic plus our PCM payload at the tail.
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WAVE");
        assert!(bytes.len() > pcm.len());
        assert!(bytes.ends_with(&pcm));

        scratch.close().unwrap();
    }
}
