//! # Voice Ingest Backend - Main Application Entry Point
//!
//! Actix-web server wiring for the utterance ingest pipeline.
//!
//! ## Application Architecture:
//! - **config**: layered configuration (config.toml + environment variables)
//! - **state**: shared stores, provider client, finalizer, metrics
//! - **audio**: loudness detection and per-session accumulation
//! - **transcription**: provider client, finalizer, transcript retention
//! - **handlers**: REST endpoints for the boundary operations
//! - **websocket**: streaming ingest surface
//! - **middleware**: request metrics and completion logging
//!
//! Two background concerns live here: the silence sweep that finalizes
//! sessions whose callers stopped sending chunks, and the signal handlers
//! for graceful shutdown.

mod audio;
mod config;
mod error;
mod handlers;
mod health;
mod middleware;
mod state;
mod transcription;
mod websocket;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use config::AppConfig;
use state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, error, info};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Global shutdown flag flipped by the signal handlers.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

/// How often the background sweep looks for sessions whose silence timeout
/// has elapsed. The timeout itself is configuration; this only bounds how
/// late past it a finalize can fire.
const SWEEP_INTERVAL: Duration = Duration::from_millis(250);

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting voice-ingest-backend v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Configuration loaded: {}:{}, silence timeout {}ms, provider {}",
        config.server.host,
        config.server.port,
        config.audio.silence_timeout_ms,
        config.transcription.endpoint
    );

    let app_state = AppState::new(config.clone());
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    setup_signal_handlers();
    spawn_silence_sweeper(app_state.clone());

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(TracingLogger::default())
            .wrap(middleware::MetricsMiddleware)
            .wrap(middleware::RequestLogging)
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::get_config))
                    .route("/config", web::put().to(handlers::update_config))
                    .route(
                        "/sessions/{id}/chunks",
                        web::post().to(handlers::ingest_chunk),
                    )
                    .route(
                        "/sessions/{id}/finalize",
                        web::post().to(handlers::finalize),
                    )
                    .route(
                        "/sessions/{id}/transcript",
                        web::get().to(handlers::read_transcript),
                    )
                    .route("/sessions/{id}", web::get().to(handlers::session_status))
                    .route("/debug/loudness", web::post().to(handlers::probe_loudness))
                    .route(
                        "/debug/test-provider",
                        web::post().to(handlers::test_provider),
                    ),
            )
            .route("/ws/audio", web::get().to(websocket::audio_websocket))
            .route("/health", web::get().to(health::health_check))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(server_result) => {
                    if let Err(e) = server_result {
                        error!("Server error: {}", e);
                    }
                }
                Err(e) => {
                    error!("Server task error: {}", e);
                }
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Console logging with an env-driven filter. `RUST_LOG` overrides the
/// default of debug for this crate and info for actix.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voice_ingest_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Periodically finalize sessions whose silence timeout has elapsed.
///
/// The per-chunk check only fires while chunks keep arriving; this sweep
/// covers the common case where the caller simply stops sending once the
/// speaker goes quiet.
fn spawn_silence_sweeper(state: AppState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;

            let timeout = state.silence_timeout();
            for session_id in state.sessions.timed_out_sessions(timeout) {
                debug!(%session_id, "silence timeout elapsed, finalizing");
                state.finalize_session(&session_id).await;
            }
        }
    });
}

/// Flip the shutdown flag on SIGTERM or SIGINT.
fn setup_signal_handlers() {
    tokio::spawn(async {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler");
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
            .expect("Failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

/// Poll the shutdown flag set by the signal handlers.
async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
