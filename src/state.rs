//! # Application State Management
//!
//! Shared state handed to every request handler, the WebSocket actor, and
//! the background sweep: configuration, the two pipeline stores, the
//! finalizer, and request metrics.
//!
//! ## Thread Safety:
//! Configuration and metrics sit behind `Arc<RwLock<T>>` — many readers or
//! one writer, copied out quickly so no lock is held across I/O. The
//! session and transcript stores do their own per-key locking internally,
//! so handlers touch them directly without any outer lock.

use crate::audio::session::SessionStore;
use crate::config::AppConfig;
use crate::transcription::{FinalizeOutcome, Finalizer, SpeechClient, TranscriptStore};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

/// Shared application state. Clone-cheap: every field is either `Copy` or
/// reference-counted.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration (model/language/silence timeout can change
    /// at runtime).
    pub config: Arc<RwLock<AppConfig>>,

    /// Request and pipeline metrics.
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// Live sessions, keyed by session id.
    pub sessions: Arc<SessionStore>,

    /// Finished transcripts, keyed by session id, self-expiring.
    pub transcripts: TranscriptStore,

    /// Drains sessions and talks to the recognition provider.
    pub finalizer: Finalizer,

    /// When the server started.
    pub start_time: Instant,
}

/// Counters collected across all requests and pipeline activity.
#[derive(Debug, Default)]
pub struct AppMetrics {
    /// HTTP requests processed since start.
    pub request_count: u64,

    /// Requests that ended in a 4xx/5xx or handler error.
    pub error_count: u64,

    /// Audio chunks accepted (HTTP and WebSocket combined).
    pub chunks_ingested: u64,

    /// Raw audio bytes accepted.
    pub bytes_ingested: u64,

    /// Finalize runs that found a session to drain.
    pub finalize_count: u64,

    /// Finalize runs that published a transcript.
    pub transcripts_published: u64,

    /// Finalize runs lost to provider or staging failures.
    pub provider_failures: u64,

    /// Per-endpoint request statistics, keyed by "METHOD path".
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Request statistics for one endpoint.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

impl AppState {
    /// Build the state graph from a validated configuration.
    pub fn new(config: AppConfig) -> Self {
        let sessions = Arc::new(SessionStore::new());
        let transcripts = TranscriptStore::new();
        let speech = SpeechClient::new(
            config.transcription.endpoint.clone(),
            config.transcription.api_key.clone(),
        );
        let finalizer = Finalizer::new(Arc::clone(&sessions), transcripts.clone(), speech);

        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            sessions,
            transcripts,
            finalizer,
            start_time: Instant::now(),
        }
    }

    pub fn get_config(&self) -> AppConfig {
        self.config.read().unwrap().clone()
    }

    pub fn update_config(&self, new_config: AppConfig) -> Result<(), String> {
        match new_config.validate() {
            Ok(_) => {
                *self.config.write().unwrap() = new_config;
                Ok(())
            }
            Err(e) => Err(e.to_string()),
        }
    }

    /// Current silence timeout as a `Duration`.
    pub fn silence_timeout(&self) -> Duration {
        Duration::from_millis(self.config.read().unwrap().audio.silence_timeout_ms)
    }

    /// Sample rate to assume when the caller declared none.
    pub fn default_sample_rate(&self) -> u32 {
        self.config.read().unwrap().audio.default_sample_rate
    }

    /// Finalize `session_id` with the currently configured model/language
    /// and account for the outcome. The single entry point used by the
    /// ingest handlers, the WebSocket actor, and the silence sweep.
    pub async fn finalize_session(&self, session_id: &str) -> FinalizeOutcome {
        let (model, language) = {
            let config = self.config.read().unwrap();
            (
                config.transcription.model.clone(),
                config.transcription.language.clone(),
            )
        };

        let outcome = self.finalizer.finalize(session_id, &model, &language).await;

        let mut metrics = self.metrics.write().unwrap();
        match outcome {
            FinalizeOutcome::Absent => {}
            FinalizeOutcome::NoAudio => metrics.finalize_count += 1,
            FinalizeOutcome::Published => {
                metrics.finalize_count += 1;
                metrics.transcripts_published += 1;
            }
            FinalizeOutcome::Lost => {
                metrics.finalize_count += 1;
                metrics.provider_failures += 1;
            }
        }

        outcome
    }

    pub fn increment_request_count(&self) {
        self.metrics.write().unwrap().request_count += 1;
    }

    pub fn increment_error_count(&self) {
        self.metrics.write().unwrap().error_count += 1;
    }

    /// Account for one accepted audio chunk.
    pub fn record_chunk(&self, bytes: usize) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.chunks_ingested += 1;
        metrics.bytes_ingested += bytes as u64;
    }

    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write().unwrap();
        let endpoint_metric = metrics
            .endpoint_metrics
            .entry(endpoint.to_string())
            .or_default();
        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Consistent copy of the metrics for the health/metrics endpoints.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        let metrics = self.metrics.read().unwrap();
        AppMetrics {
            request_count: metrics.request_count,
            error_count: metrics.error_count,
            chunks_ingested: metrics.chunks_ingested,
            bytes_ingested: metrics.bytes_ingested,
            finalize_count: metrics.finalize_count,
            transcripts_published: metrics.transcripts_published,
            provider_failures: metrics.provider_failures,
            endpoint_metrics: metrics.endpoint_metrics.clone(),
        }
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
