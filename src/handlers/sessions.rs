//! # Session REST API Handlers
//!
//! The three boundary operations of the ingest pipeline, plus a status
//! probe:
//! - `POST /sessions/{id}/chunks` — feed one raw PCM chunk, acked with its
//!   loudness
//! - `POST /sessions/{id}/finalize` — close the utterance explicitly
//! - `GET /sessions/{id}/transcript` — fetch the transcript if one is live
//! - `GET /sessions/{id}` — inspect a live session

use crate::error::{AppError, AppResult};
use crate::state::AppState;
use crate::transcription::FinalizeOutcome;
use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

#[derive(Debug, Deserialize)]
pub struct IngestQuery {
    /// Declared sample rate of the chunk; falls back to the configured
    /// default when omitted.
    pub sample_rate: Option<u32>,
}

/// Acknowledgment for one ingested chunk.
#[derive(Debug, Serialize)]
pub struct ChunkAck {
    pub session_id: String,
    /// Normalized loudness of the chunk in [0, 1].
    pub loudness: f32,
    /// Whether the chunk counted as active speech.
    pub active: bool,
    /// Whether this chunk tripped the silence timeout and the session was
    /// finalized before this response.
    pub finalized: bool,
}

/// Transcript read result; `ready` is false when nothing is live for the
/// id (never finalized, expired, or the utterance held no audio).
#[derive(Debug, Serialize)]
pub struct TranscriptResponse {
    pub text: String,
    pub ready: bool,
}

/// POST /sessions/{id}/chunks
///
/// Body is the raw PCM chunk. Creates the session on first contact. When
/// the chunk reveals that the silence timeout has already elapsed, the
/// session is finalized before the acknowledgment goes out.
pub async fn ingest_chunk(
    state: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<IngestQuery>,
    body: web::Bytes,
) -> AppResult<HttpResponse> {
    let session_id = path.into_inner();
    let sample_rate = query
        .sample_rate
        .unwrap_or_else(|| state.default_sample_rate());
    if sample_rate == 0 {
        return Err(AppError::Validation(
            "sample_rate must be greater than 0".to_string(),
        ));
    }

    let outcome = state.sessions.ingest_chunk(
        &session_id,
        sample_rate,
        &body,
        state.silence_timeout(),
    );
    state.record_chunk(body.len());
    debug!(
        session_id = %session_id,
        bytes = body.len(),
        loudness = outcome.loudness,
        active = outcome.active,
        "chunk ingested"
    );

    let finalized = if outcome.should_finalize {
        !matches!(
            state.finalize_session(&session_id).await,
            FinalizeOutcome::Absent
        )
    } else {
        false
    };

    Ok(HttpResponse::Ok().json(ChunkAck {
        session_id,
        loudness: outcome.loudness,
        active: outcome.active,
        finalized,
    }))
}

/// POST /sessions/{id}/finalize
///
/// Explicitly close the utterance. 404 when no session exists for the id;
/// a repeat call therefore answers 404 rather than writing twice.
pub async fn finalize(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let session_id = path.into_inner();

    match state.finalize_session(&session_id).await {
        FinalizeOutcome::Absent => Err(AppError::NotFound(format!(
            "No session with id '{}'",
            session_id
        ))),
        _ => Ok(HttpResponse::Ok().json(json!({
            "session_id": session_id,
            "status": "finalized",
            "timestamp": chrono::Utc::now().to_rfc3339()
        }))),
    }
}

/// GET /sessions/{id}/transcript
///
/// Always 200; absence is expressed through `ready: false` so pollers can
/// keep asking without special-casing status codes.
pub async fn read_transcript(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> HttpResponse {
    let session_id = path.into_inner();

    match state.transcripts.read(&session_id) {
        Some(text) => HttpResponse::Ok().json(TranscriptResponse { text, ready: true }),
        None => HttpResponse::Ok().json(TranscriptResponse {
            text: String::new(),
            ready: false,
        }),
    }
}

/// GET /sessions/{id}
///
/// Status probe for a live (not yet finalized) session.
pub async fn session_status(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let session_id = path.into_inner();

    match state.sessions.snapshot(&session_id) {
        Some(snapshot) => Ok(HttpResponse::Ok().json(snapshot)),
        None => Err(AppError::NotFound(format!(
            "No session with id '{}'",
            session_id
        ))),
    }
}
