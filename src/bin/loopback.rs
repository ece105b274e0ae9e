//! Voice Loopback Application
//!
//! Captures from the default microphone, Opus-encodes each frame, and plays
//! the packets straight back through the default output. A few seconds of
//! talking into the microphone should come back with codec latency only.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use bytes::Bytes;
use crossbeam_channel::{unbounded, Sender};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use voicelink::audio::capture::CaptureSink;
use voicelink::audio::device::CpalDeviceProvider;
use voicelink::audio::playback::PlaybackEvents;
use voicelink::codec::OpusCodec;
use voicelink::config::{AudioFormat, SessionConfig};
use voicelink::error::ErrorCode;
use voicelink::SessionController;

/// Forwards encoded capture frames into a channel for the main loop
struct ForwardingSink {
    packets: Sender<Bytes>,
}

impl CaptureSink for ForwardingSink {
    fn on_pcm_frame(&self, _data: &[u8]) {}

    fn on_encoded_frame(&self, data: &[u8]) {
        let _ = self.packets.send(Bytes::copy_from_slice(data));
    }

    fn on_capture_error(&self, code: ErrorCode, message: &str) {
        tracing::error!("Capture error {}: {}", code.code(), message);
    }
}

struct LoggingEvents;

impl PlaybackEvents for LoggingEvents {
    fn on_playback_error(&self, code: ErrorCode, message: &str) {
        tracing::error!("Playback error {}: {}", code.code(), message);
    }
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let seconds: u64 = std::env::args()
        .nth(1)
        .map(|arg| arg.parse())
        .transpose()?
        .unwrap_or(10);

    tracing::info!("Starting voice loopback for {} seconds", seconds);

    let config = SessionConfig {
        format: AudioFormat::Compressed,
        ..SessionConfig::default()
    };

    let (packet_tx, packet_rx) = unbounded::<Bytes>();

    let mut controller = SessionController::new(
        config,
        Arc::new(CpalDeviceProvider),
        Arc::new(OpusCodec),
        Arc::new(ForwardingSink { packets: packet_tx }),
        Arc::new(LoggingEvents),
    )?;

    controller.init()?;
    controller.start_capture()?;
    tracing::info!("Speak into the microphone; audio loops back to the speaker");

    let deadline = std::time::Instant::now() + Duration::from_secs(seconds);
    let mut packets = 0u64;
    while std::time::Instant::now() < deadline {
        match packet_rx.recv_timeout(Duration::from_millis(200)) {
            Ok(packet) => {
                controller.enqueue_compressed(packet);
                packets += 1;
            }
            Err(_) => continue,
        }
    }

    tracing::info!("Loopback finished: {} packets relayed", packets);
    controller.release();
    Ok(())
}
