//! # Voicelink
//!
//! Bidirectional low-latency voice pipeline: capture, framing, and Opus
//! encoding on one side; decode, queueing, and playback on the other.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                     SessionController                         │
//! │      Uninitialized -> Initialized -> Recording -> Released    │
//! └──────────┬────────────────────────────────────────┬───────────┘
//!            │                                        │
//!            ▼  capture direction                     ▼  playback direction
//! ┌─────────────────────┐                  ┌─────────────────────────┐
//! │   CaptureEngine     │                  │     PlaybackEngine      │
//! │  ┌───────────────┐  │                  │  ┌───────────────────┐  │
//! │  │ Capture Thread│  │                  │  │  Playback Worker  │  │
//! │  │  read bytes   │  │                  │  │  decode (Opus)    │  │
//! │  │  reframe      │  │                  │  │  bounded queue    │  │
//! │  │  encode (Opus)│  │                  │  │  drain loop       │  │
//! │  └──────┬────────┘  │                  │  └─────────┬─────────┘  │
//! └─────────┼───────────┘                  └────────────┼────────────┘
//!           │                                           │
//!           ▼                                           ▼
//!    CaptureSink callbacks                       Render device
//!    (PCM frames / packets)                      (non-blocking writes)
//! ```
//!
//! Devices and the codec are injected capabilities ([`audio::DeviceProvider`],
//! [`codec::VoiceCodec`]), so the pipeline core runs unchanged against the
//! bundled cpal/Opus backends or against fakes in tests.

pub mod audio;
pub mod codec;
pub mod config;
pub mod controller;
pub mod error;

#[cfg(test)]
pub(crate) mod testutil;

pub use controller::{ControllerState, SessionController};
pub use error::{Error, Result};

/// Pipeline-wide constants
pub mod constants {
    /// Default sample rate for voice sessions
    pub const DEFAULT_SAMPLE_RATE: u32 = 16000;

    /// Default channel count (mono)
    pub const DEFAULT_CHANNELS: u16 = 1;

    /// Default Opus bitrate in bits per second
    pub const DEFAULT_BITRATE: u32 = 24_000;
}
