//! # WebSocket Audio Streaming Handler
//!
//! Streaming ingest surface at `/ws/audio`. Control messages are JSON text
//! frames; audio travels as binary frames, one chunk per frame.
//!
//! ## Protocol:
//! 1. **start_session** (optional): binds the connection to a session id
//!    and sample rate. Without it, chunks land on the sentinel session id
//!    at the configured default rate.
//! 2. **Binary frames**: one audio chunk each; every chunk is acknowledged
//!    with its loudness classification.
//! 3. **finalize**: closes the utterance explicitly.
//! 4. **ping/pong**: heartbeat; the server drops connections that go quiet.
//!
//! Closing the socket does not end the session — the session lifecycle is
//! driven by chunks, the silence timeout, and finalize, never by transport
//! connectivity. A client may reconnect and keep streaming into the same
//! session id.

use crate::audio::session::DEFAULT_SESSION_ID;
use crate::state::AppState;
use crate::transcription::FinalizeOutcome;

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// How often the server pings idle connections.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// How long a connection may stay silent before it is dropped.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// Messages exchanged over the socket, tagged by `type`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WsMessage {
    /// Bind this connection to a session (client → server).
    #[serde(rename = "start_session")]
    StartSession {
        session_id: Option<String>,
        sample_rate: Option<u32>,
    },

    /// Acknowledgment for one binary audio frame (server → client).
    #[serde(rename = "chunk_ack")]
    ChunkAck {
        session_id: String,
        loudness: f32,
        active: bool,
        finalized: bool,
    },

    /// Explicitly close an utterance (client → server). Without a
    /// session_id, the connection's bound session is finalized.
    #[serde(rename = "finalize")]
    Finalize { session_id: Option<String> },

    /// Session lifecycle notification (server → client).
    #[serde(rename = "session_status")]
    SessionStatus {
        session_id: String,
        status: String,
        message: Option<String>,
    },

    /// Error notification (server → client).
    #[serde(rename = "error")]
    Error {
        code: String,
        message: String,
        session_id: Option<String>,
    },

    #[serde(rename = "ping")]
    Ping { timestamp: u64 },

    #[serde(rename = "pong")]
    Pong { timestamp: u64 },
}

/// Actor owning one streaming connection.
pub struct AudioWebSocket {
    /// Connection id for log correlation (not the session id).
    connection_id: String,

    /// Session the connection is bound to; the sentinel until a
    /// start_session message says otherwise.
    session_id: String,

    /// Sample rate declared for this connection's chunks.
    sample_rate: u32,

    state: web::Data<AppState>,

    last_heartbeat: Instant,
}

impl AudioWebSocket {
    pub fn new(state: web::Data<AppState>) -> Self {
        let sample_rate = state.default_sample_rate();
        Self {
            connection_id: Uuid::new_v4().to_string(),
            session_id: DEFAULT_SESSION_ID.to_string(),
            sample_rate,
            state,
            last_heartbeat: Instant::now(),
        }
    }

    fn send_message(&self, ctx: &mut ws::WebsocketContext<Self>, msg: &WsMessage) {
        if let Ok(json) = serde_json::to_string(msg) {
            ctx.text(json);
        }
    }

    fn send_error(
        &self,
        ctx: &mut ws::WebsocketContext<Self>,
        code: &str,
        message: &str,
        session_id: Option<String>,
    ) {
        warn!(connection_id = %self.connection_id, code, message, "websocket error");
        self.send_message(
            ctx,
            &WsMessage::Error {
                code: code.to_string(),
                message: message.to_string(),
                session_id,
            },
        );
    }

    fn handle_start_session(
        &mut self,
        session_id: Option<String>,
        sample_rate: Option<u32>,
        ctx: &mut ws::WebsocketContext<Self>,
    ) {
        let sample_rate = sample_rate.unwrap_or_else(|| self.state.default_sample_rate());
        if sample_rate == 0 {
            self.send_error(ctx, "invalid_sample_rate", "sample_rate must be greater than 0", session_id);
            return;
        }

        self.session_id = session_id.unwrap_or_else(|| DEFAULT_SESSION_ID.to_string());
        self.sample_rate = sample_rate;

        info!(
            connection_id = %self.connection_id,
            session_id = %self.session_id,
            sample_rate,
            "websocket bound to session"
        );

        self.send_message(
            ctx,
            &WsMessage::SessionStatus {
                session_id: self.session_id.clone(),
                status: "started".to_string(),
                message: None,
            },
        );
    }

    /// One binary frame = one chunk. Store operations never await, so the
    /// whole transition runs inline; only a triggered finalize is spawned.
    fn handle_audio_frame(&mut self, data: &[u8], ctx: &mut ws::WebsocketContext<Self>) {
        let outcome = self.state.sessions.ingest_chunk(
            &self.session_id,
            self.sample_rate,
            data,
            self.state.silence_timeout(),
        );
        self.state.record_chunk(data.len());

        if outcome.should_finalize {
            self.spawn_finalize(self.session_id.clone(), ctx);
        }

        self.send_message(
            ctx,
            &WsMessage::ChunkAck {
                session_id: self.session_id.clone(),
                loudness: outcome.loudness,
                active: outcome.active,
                finalized: outcome.should_finalize,
            },
        );
    }

    /// Run finalize off the actor and report the outcome back through it.
    fn spawn_finalize(&self, session_id: String, ctx: &mut ws::WebsocketContext<Self>) {
        let state = self.state.clone();
        let addr = ctx.address();

        tokio::spawn(async move {
            let outcome = state.finalize_session(&session_id).await;
            let msg = match outcome {
                FinalizeOutcome::Absent => WsMessage::Error {
                    code: "not_found".to_string(),
                    message: format!("No session with id '{}'", session_id),
                    session_id: Some(session_id),
                },
                FinalizeOutcome::NoAudio => WsMessage::SessionStatus {
                    session_id,
                    status: "finalized".to_string(),
                    message: Some("Session held no audio; no transcript produced".to_string()),
                },
                FinalizeOutcome::Published => WsMessage::SessionStatus {
                    session_id,
                    status: "finalized".to_string(),
                    message: Some("Transcript available".to_string()),
                },
                FinalizeOutcome::Lost => WsMessage::SessionStatus {
                    session_id,
                    status: "finalized".to_string(),
                    message: Some("Transcription failed; utterance lost".to_string()),
                },
            };
            if let Ok(json) = serde_json::to_string(&msg) {
                addr.do_send(SendText(json));
            }
        });
    }
}

/// Text pushed to the client from outside the actor's own handlers.
#[derive(Message)]
#[rtype(result = "()")]
struct SendText(String);

impl Actor for AudioWebSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(connection_id = %self.connection_id, "websocket connection started");

        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!(connection_id = %act.connection_id, "websocket heartbeat timeout, closing");
                ctx.stop();
                return;
            }

            let ping = WsMessage::Ping {
                timestamp: chrono::Utc::now().timestamp_millis() as u64,
            };
            if let Ok(json) = serde_json::to_string(&ping) {
                ctx.text(json);
            }
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        // The session deliberately outlives the socket; only chunks,
        // timeouts, and finalize end it.
        info!(
            connection_id = %self.connection_id,
            session_id = %self.session_id,
            "websocket connection stopped"
        );
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for AudioWebSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => match serde_json::from_str::<WsMessage>(&text) {
                Ok(WsMessage::StartSession {
                    session_id,
                    sample_rate,
                }) => {
                    self.handle_start_session(session_id, sample_rate, ctx);
                }
                Ok(WsMessage::Finalize { session_id }) => {
                    let target = session_id.unwrap_or_else(|| self.session_id.clone());
                    self.spawn_finalize(target, ctx);
                }
                Ok(WsMessage::Ping { timestamp }) => {
                    self.last_heartbeat = Instant::now();
                    self.send_message(ctx, &WsMessage::Pong { timestamp });
                }
                Ok(WsMessage::Pong { .. }) => {
                    self.last_heartbeat = Instant::now();
                }
                Ok(_) => {
                    self.send_error(ctx, "unexpected_message", "Unexpected message type", None);
                }
                Err(err) => {
                    self.send_error(ctx, "invalid_json", &format!("Invalid JSON: {}", err), None);
                }
            },
            Ok(ws::Message::Binary(data)) => {
                debug!(
                    connection_id = %self.connection_id,
                    bytes = data.len(),
                    "audio frame received"
                );
                self.handle_audio_frame(&data, ctx);
            }
            Ok(ws::Message::Ping(data)) => {
                ctx.pong(&data);
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!(connection_id = %self.connection_id, ?reason, "websocket closed");
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                self.send_error(ctx, "unsupported_frame", "Continuation frames are not supported", None);
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                warn!(connection_id = %self.connection_id, error = %err, "websocket protocol error");
                ctx.stop();
            }
        }
    }
}

impl Handler<SendText> for AudioWebSocket {
    type Result = ();

    fn handle(&mut self, msg: SendText, ctx: &mut Self::Context) {
        ctx.text(msg.0);
    }
}

/// HTTP → WebSocket upgrade endpoint.
pub async fn audio_websocket(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    ws::start(AudioWebSocket::new(state), &req, stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_session_message_roundtrip() {
        let msg = WsMessage::StartSession {
            session_id: Some("s1".to_string()),
            sample_rate: Some(16_000),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("start_session"));

        match serde_json::from_str::<WsMessage>(&json).unwrap() {
            WsMessage::StartSession {
                session_id,
                sample_rate,
            } => {
                assert_eq!(session_id.as_deref(), Some("s1"));
                assert_eq!(sample_rate, Some(16_000));
            }
            _ => panic!("wrong message type"),
        }
    }

    #[test]
    fn test_chunk_ack_shape() {
        let msg = WsMessage::ChunkAck {
            session_id: "s1".to_string(),
            loudness: 0.31,
            active: true,
            finalized: false,
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "chunk_ack");
        assert_eq!(value["session_id"], "s1");
        assert_eq!(value["active"], true);
    }

    #[test]
    fn test_finalize_without_session_id_parses() {
        let msg: WsMessage = serde_json::from_str(r#"{"type":"finalize"}"#).unwrap();
        match msg {
            WsMessage::Finalize { session_id } => assert!(session_id.is_none()),
            _ => panic!("wrong message type"),
        }
    }
}
