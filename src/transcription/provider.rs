//! # Speech-to-Text Provider Client
//!
//! Thin HTTP client for the external recognition service. The service is a
//! black box from this side: we POST the staged audio with a model/language
//! configuration and pull the transcript out of the JSON reply.
//!
//! ## Request Shape:
//! ```json
//! {
//!   "config": { "sampleRateHertz": 16000, "languageCode": "en-US", "model": "latest_long" },
//!   "audio": { "content": "<base64 audio bytes>" }
//! }
//! ```
//!
//! ## Response Shape:
//! ```json
//! { "results": [ { "alternatives": [ { "transcript": "…", "confidence": 0.93 } ] } ] }
//! ```
//!
//! Any missing level of the transcript path degrades to an empty string —
//! an odd reply is never an error. Transport failures and non-success
//! statuses are errors here; the finalizer decides what to do with them.

use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Client for the recognition endpoint. Cheap to clone; the inner reqwest
/// client pools connections.
#[derive(Debug, Clone)]
pub struct SpeechClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

#[derive(Debug, Serialize)]
struct RecognizeRequest<'a> {
    config: RecognitionConfig<'a>,
    audio: RecognitionAudio,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RecognitionConfig<'a> {
    sample_rate_hertz: u32,
    language_code: &'a str,
    model: &'a str,
}

#[derive(Debug, Serialize)]
struct RecognitionAudio {
    /// Base64-encoded audio bytes.
    content: String,
}

/// Provider reply. Every level defaults so that an empty or partial body
/// deserializes to "no results" rather than failing.
#[derive(Debug, Default, Deserialize)]
pub struct RecognizeResponse {
    #[serde(default)]
    results: Vec<SpeechResult>,
}

#[derive(Debug, Default, Deserialize)]
struct SpeechResult {
    #[serde(default)]
    alternatives: Vec<SpeechAlternative>,
}

#[derive(Debug, Default, Deserialize)]
struct SpeechAlternative {
    #[serde(default)]
    transcript: String,
    #[serde(default)]
    #[allow(dead_code)]
    confidence: Option<f32>,
}

impl SpeechClient {
    pub fn new(endpoint: String, api_key: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint,
            api_key,
        }
    }

    /// Submit one utterance for recognition.
    ///
    /// ## Parameters:
    /// - **audio**: staged audio bytes (WAV rendering of the utterance)
    /// - **sample_rate**: the session's sample rate
    /// - **model** / **language**: recognition configuration
    ///
    /// ## Returns:
    /// - **Ok(String)**: extracted transcript, possibly empty
    /// - **Err**: transport failure, non-success status, or unparseable body
    pub async fn recognize(
        &self,
        audio: &[u8],
        sample_rate: u32,
        model: &str,
        language: &str,
    ) -> Result<String> {
        let body = RecognizeRequest {
            config: RecognitionConfig {
                sample_rate_hertz: sample_rate,
                language_code: language,
                model,
            },
            audio: RecognitionAudio {
                content: BASE64.encode(audio),
            },
        };

        let mut request = self.http.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.query(&[("key", key.as_str())]);
        }

        let response = request
            .send()
            .await
            .context("recognition request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(anyhow!("recognition service returned {}: {}", status, detail));
        }

        let parsed: RecognizeResponse = response
            .json()
            .await
            .context("unparseable recognition response")?;

        Ok(extract_transcript(&parsed))
    }
}

/// Pull the transcript out of a provider reply: the first alternative of
/// each result, joined with single spaces. Missing results, missing
/// alternatives, or missing transcript fields all collapse to "".
pub fn extract_transcript(response: &RecognizeResponse) -> String {
    let pieces: Vec<&str> = response
        .results
        .iter()
        .filter_map(|result| result.alternatives.first())
        .map(|alt| alt.transcript.trim())
        .filter(|text| !text.is_empty())
        .collect();
    pieces.join(" ")
}
