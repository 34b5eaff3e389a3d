//! Runtime configuration endpoints: read the effective configuration and
//! apply partial updates to the tunable fields (silence timeout, provider
//! model/language). The API key is write-only and never echoed back.

use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

fn config_view(config: &crate::config::AppConfig) -> serde_json::Value {
    json!({
        "server": {
            "host": config.server.host,
            "port": config.server.port
        },
        "transcription": {
            "endpoint": config.transcription.endpoint,
            "model": config.transcription.model,
            "language": config.transcription.language,
            "api_key_set": config.transcription.api_key.is_some()
        },
        "audio": {
            "default_sample_rate": config.audio.default_sample_rate,
            "silence_timeout_ms": config.audio.silence_timeout_ms
        }
    })
}

pub async fn get_config(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let config = state.get_config();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": config_view(&config)
    })))
}

pub async fn update_config(
    state: web::Data<AppState>,
    body: web::Json<serde_json::Value>,
) -> Result<HttpResponse, AppError> {
    let json_str = serde_json::to_string(&body.into_inner())?;

    let mut current_config = state.get_config();
    current_config
        .update_from_json(&json_str)
        .map_err(|e| AppError::Validation(e.to_string()))?;

    state
        .update_config(current_config.clone())
        .map_err(AppError::Validation)?;

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "message": "Configuration updated",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": config_view(&current_config)
    })))
}
