//! # Transcription Module
//!
//! Everything downstream of the silence decision: draining a finished
//! session, talking to the external recognition service, and holding the
//! resulting transcript for its retention window.
//!
//! ## Key Components:
//! - **Provider Client**: HTTP request/response client for the external
//!   speech-to-text service
//! - **Finalizer**: the at-most-once drain/transcribe/publish sequence
//! - **Transcript Store**: self-expiring transcript map
//!
//! The provider is deliberately treated as best-effort: a failed call loses
//! that one utterance and nothing else. The rest of the service keeps
//! running, other sessions are unaffected, and no retry queue exists.

pub mod finalizer; // Drain, stage, recognize, publish
pub mod provider; // External speech-to-text client
pub mod store; // Transcript retention with TTL

pub use finalizer::{FinalizeOutcome, Finalizer};
pub use provider::SpeechClient;
pub use store::TranscriptStore;
