//! # Audio Processing Module
//!
//! Everything between a raw inbound chunk and the finalize decision lives
//! here: loudness measurement and the per-session accumulation state
//! machine.
//!
//! ## Key Components:
//! - **Activity Detector**: normalized RMS loudness with a fixed speech
//!   threshold
//! - **Session Store**: concurrent per-id session state with atomic
//!   remove-and-handoff for finalize
//!
//! ## Audio Format Requirements:
//! - **Bit Depth**: 16-bit PCM
//! - **Encoding**: Little-endian signed integers
//! - **Sample Rate**: declared by the caller per session (16kHz typical)

pub mod activity; // RMS loudness and the speech/silence threshold
pub mod session; // Per-session accumulation and silence-timeout tracking
