//! Debug endpoints for poking at the pipeline without a streaming client.
//!
//! Useful during development: check what loudness a chunk produces, or
//! verify the provider endpoint is reachable, without wiring up a WebSocket
//! audio source.

use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::audio::activity::{chunk_loudness, is_active, ACTIVITY_THRESHOLD};
use crate::error::AppError;
use crate::state::AppState;

/// Response from the loudness probe.
#[derive(Debug, Serialize)]
pub struct LoudnessResponse {
    pub loudness: f32,
    pub active: bool,
    pub threshold: f32,
    pub byte_count: usize,
}

/// Request to exercise the provider with a synthetic tone.
#[derive(Debug, Deserialize)]
pub struct TestProviderRequest {
    /// Tone duration in milliseconds (default 200).
    pub duration_ms: Option<u64>,
}

/// POST /debug/loudness
///
/// Body: raw PCM bytes. Computes the loudness the ingest path would see,
/// without creating or touching any session.
pub async fn probe_loudness(body: web::Bytes) -> HttpResponse {
    let loudness = chunk_loudness(&body);

    HttpResponse::Ok().json(LoudnessResponse {
        loudness,
        active: is_active(loudness),
        threshold: ACTIVITY_THRESHOLD,
        byte_count: body.len(),
    })
}

/// POST /debug/test-provider
///
/// Sends a short synthetic tone through the configured provider and reports
/// the outcome. Unlike the finalize path this endpoint surfaces the
/// provider error, which is the point of the probe.
pub async fn test_provider(
    state: web::Data<AppState>,
    req: web::Json<TestProviderRequest>,
) -> Result<HttpResponse, AppError> {
    let config = state.get_config();
    let sample_rate = config.audio.default_sample_rate;
    let duration_ms = req.duration_ms.unwrap_or(200).min(2000);

    // 440Hz sine at moderate amplitude.
    let sample_count = (sample_rate as u64 * duration_ms / 1000) as usize;
    let tone: Vec<u8> = (0..sample_count)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            ((t * 440.0 * 2.0 * std::f32::consts::PI).sin() * 12_000.0) as i16
        })
        .flat_map(|s| s.to_le_bytes())
        .collect();

    let started = std::time::Instant::now();
    let speech = crate::transcription::SpeechClient::new(
        config.transcription.endpoint.clone(),
        config.transcription.api_key.clone(),
    );
    let result = speech
        .recognize(
            &tone,
            sample_rate,
            &config.transcription.model,
            &config.transcription.language,
        )
        .await;
    let elapsed_ms = started.elapsed().as_millis() as u64;

    match result {
        Ok(text) => Ok(HttpResponse::Ok().json(json!({
            "success": true,
            "transcript": text,
            "round_trip_ms": elapsed_ms,
            "endpoint": config.transcription.endpoint
        }))),
        Err(e) => Ok(HttpResponse::Ok().json(json!({
            "success": false,
            "error_details": e.to_string(),
            "round_trip_ms": elapsed_ms,
            "endpoint": config.transcription.endpoint
        }))),
    }
}
