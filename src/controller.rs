//! Session lifecycle controller
//!
//! Coordinates the capture and playback subsystems behind one control
//! surface and enforces the lifecycle ordering:
//! Uninitialized -> Initialized -> Recording -> Initialized -> Released.
//!
//! Init acquires the capture device and, for compressed sessions, the
//! encoder; a failure rolls back whatever was acquired so the controller is
//! never left half-initialized. Release is idempotent and best-effort.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;

use crate::audio::capture::{CaptureEngine, CaptureSink};
use crate::audio::device::{capture_buffer_bytes, CaptureDevice, DeviceProvider};
use crate::audio::playback::{PlaybackEngine, PlaybackEvents};
use crate::codec::{EncoderParams, FrameEncoder, VoiceCodec};
use crate::config::{AudioFormat, SessionConfig};
use crate::error::{AudioError, ErrorCode, Result};

/// Lifecycle state of the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Uninitialized,
    /// Capture device (and encoder, if compressed) ready
    Initialized,
    /// Capture loop active
    Recording,
    /// Terminal; all resources released
    Released,
}

/// Unified control surface over capture and playback
pub struct SessionController {
    config: SessionConfig,
    /// Replacement config, applied on the next init
    pending_config: Option<SessionConfig>,
    provider: Arc<dyn DeviceProvider>,
    codec: Arc<dyn VoiceCodec>,
    sink: Arc<dyn CaptureSink>,

    state: ControllerState,
    mic_muted: Arc<AtomicBool>,
    speaker_muted: Arc<AtomicBool>,
    comm_mode_entered: bool,

    capture_device: Option<Box<dyn CaptureDevice>>,
    encoder: Option<Box<dyn FrameEncoder>>,
    capture: Option<CaptureEngine>,
    playback: PlaybackEngine,
}

impl SessionController {
    /// Build a controller. The playback worker starts immediately and lives
    /// until release; capture resources are acquired by `init`.
    pub fn new(
        config: SessionConfig,
        provider: Arc<dyn DeviceProvider>,
        codec: Arc<dyn VoiceCodec>,
        sink: Arc<dyn CaptureSink>,
        events: Arc<dyn PlaybackEvents>,
    ) -> Result<Self> {
        config.validate()?;

        let speaker_muted = Arc::new(AtomicBool::new(false));
        let playback = PlaybackEngine::new(
            &config,
            provider.clone(),
            codec.clone(),
            events,
            speaker_muted.clone(),
        );

        Ok(Self {
            config,
            pending_config: None,
            provider,
            codec,
            sink,
            state: ControllerState::Uninitialized,
            mic_muted: Arc::new(AtomicBool::new(false)),
            speaker_muted,
            comm_mode_entered: false,
            capture_device: None,
            encoder: None,
            capture: None,
            playback,
        })
    }

    /// Acquire capture resources. No-op (reported, not fatal) when already
    /// initialized; rolls back fully on failure.
    pub fn init(&mut self) -> Result<()> {
        match self.state {
            ControllerState::Initialized | ControllerState::Recording => {
                tracing::warn!("Controller already initialized");
                self.sink
                    .on_capture_error(ErrorCode::AlreadyInitialized, "already initialized");
                return Ok(());
            }
            ControllerState::Released => {
                tracing::warn!("Controller was released, init ignored");
                self.sink
                    .on_capture_error(ErrorCode::NotInitialized, "controller released");
                return Ok(());
            }
            ControllerState::Uninitialized => {}
        }

        if let Some(config) = self.pending_config.take() {
            self.config = config;
        }
        self.config.validate()?;

        if !self.comm_mode_entered {
            self.provider.enter_communication_mode();
            self.comm_mode_entered = true;
        }

        let buffer_bytes = capture_buffer_bytes(self.config.frame_bytes(), 0);
        let device = match self.provider.open_capture(&self.config, buffer_bytes) {
            Ok(device) => device,
            Err(e) => {
                self.rollback_init();
                self.sink.on_capture_error(
                    ErrorCode::CaptureDeviceInit,
                    &format!("capture device init failed: {}", e),
                );
                return Err(e.into());
            }
        };

        if self.config.format == AudioFormat::Compressed {
            let params = EncoderParams::voice(
                self.config.sample_rate,
                self.config.channels,
                self.config.frame_duration.millis(),
            );
            match self.codec.create_encoder(&params) {
                Ok(encoder) => self.encoder = Some(encoder),
                Err(e) => {
                    drop(device);
                    self.rollback_init();
                    self.sink.on_capture_error(
                        ErrorCode::EncoderInit,
                        &format!("encoder init failed: {}", e),
                    );
                    return Err(e.into());
                }
            }
        }

        self.capture_device = Some(device);
        self.state = ControllerState::Initialized;
        tracing::info!(
            "Controller initialized: rate={}, channels={}, frame={}ms, format={:?}",
            self.config.sample_rate,
            self.config.channels,
            self.config.frame_duration.millis(),
            self.config.format
        );
        Ok(())
    }

    fn rollback_init(&mut self) {
        self.capture_device = None;
        self.encoder = None;
        if self.comm_mode_entered {
            self.provider.restore_mode();
            self.comm_mode_entered = false;
        }
    }

    /// Start the capture loop. Requires an initialized controller.
    pub fn start_capture(&mut self) -> Result<()> {
        match self.state {
            ControllerState::Recording => {
                tracing::debug!("Already recording, start ignored");
                return Ok(());
            }
            ControllerState::Initialized => {}
            _ => {
                self.sink
                    .on_capture_error(ErrorCode::NotInitialized, "init() has not been called");
                return Err(AudioError::NotInitialized.into());
            }
        }

        let mut device = match self.capture_device.take() {
            Some(device) => device,
            None => {
                self.sink.on_capture_error(
                    ErrorCode::CaptureDeviceInit,
                    "capture device unavailable",
                );
                return Err(AudioError::DeviceClosed.into());
            }
        };
        if let Err(e) = device.start() {
            // The device is intact after a failed start; keep it so a retry
            // needs no re-init.
            self.capture_device = Some(device);
            self.sink.on_capture_error(
                ErrorCode::CaptureDeviceInit,
                &format!("capture device start failed: {}", e),
            );
            return Err(e.into());
        }

        let engine = match CaptureEngine::start(
            &self.config,
            device,
            self.encoder.take(),
            self.sink.clone(),
            self.mic_muted.clone(),
            capture_buffer_bytes(self.config.frame_bytes(), 0),
        ) {
            Ok(engine) => engine,
            Err(e) => {
                // Spawn failure loses the device and encoder with the dead
                // thread; fall back to Uninitialized so init can reacquire.
                self.rollback_init();
                self.state = ControllerState::Uninitialized;
                self.sink.on_capture_error(
                    ErrorCode::CaptureDeviceInit,
                    &format!("capture start failed: {}", e),
                );
                return Err(e.into());
            }
        };

        self.capture = Some(engine);
        self.state = ControllerState::Recording;
        tracing::info!("Capture started");
        Ok(())
    }

    /// Stop the capture loop, reclaiming the device and encoder for restart
    pub fn stop_capture(&mut self) {
        if self.state != ControllerState::Recording {
            return;
        }

        if let Some(mut engine) = self.capture.take() {
            match engine.stop() {
                Some((device, encoder)) => {
                    self.capture_device = Some(device);
                    self.encoder = encoder;
                }
                None => {
                    // The device and encoder are stuck on the lost thread;
                    // drop to Uninitialized so init reacquires fresh ones.
                    tracing::error!("Capture thread lost; reinitialize to reacquire the devices");
                    self.rollback_init();
                    self.state = ControllerState::Uninitialized;
                    return;
                }
            }
        }
        self.state = ControllerState::Initialized;
        tracing::info!("Capture stopped");
    }

    pub fn is_recording(&self) -> bool {
        self.state == ControllerState::Recording
    }

    /// Queue one chunk for playback at an explicit format
    pub fn enqueue_playback(
        &self,
        data: Bytes,
        sample_rate: u32,
        channels: u16,
        format: AudioFormat,
    ) {
        self.playback.enqueue(data, sample_rate, channels, format);
    }

    /// Queue raw PCM at the session's configured rate and channels
    pub fn enqueue_raw(&self, data: Bytes) {
        self.enqueue_playback(
            data,
            self.config.sample_rate,
            self.config.channels,
            AudioFormat::Raw,
        );
    }

    /// Queue a compressed packet at the session's configured rate and channels
    pub fn enqueue_compressed(&self, data: Bytes) {
        self.enqueue_playback(
            data,
            self.config.sample_rate,
            self.config.channels,
            AudioFormat::Compressed,
        );
    }

    pub fn stop_playback(&self) {
        self.playback.stop();
    }

    pub fn is_playing(&self) -> bool {
        self.playback.is_playing()
    }

    /// Gate capture callbacks without touching capture resources
    pub fn set_capture_mute(&self, muted: bool) {
        self.mic_muted.store(muted, Ordering::SeqCst);
        tracing::info!("Capture mute: {}", muted);
    }

    pub fn is_capture_muted(&self) -> bool {
        self.mic_muted.load(Ordering::SeqCst)
    }

    /// Gate playback; muting also drops queued audio so nothing stale plays
    /// after unmute.
    pub fn set_render_mute(&self, muted: bool) {
        self.speaker_muted.store(muted, Ordering::SeqCst);
        if muted {
            self.playback.clear_queue();
        }
        tracing::info!("Render mute: {}", muted);
    }

    pub fn is_render_muted(&self) -> bool {
        self.speaker_muted.load(Ordering::SeqCst)
    }

    /// Mute or unmute both directions
    pub fn set_mute(&self, muted: bool) {
        self.set_capture_mute(muted);
        self.set_render_mute(muted);
    }

    pub fn is_muted(&self) -> bool {
        self.is_capture_muted() && self.is_render_muted()
    }

    /// Replace the configuration; takes effect on the next init
    pub fn update_config(&mut self, config: SessionConfig) -> Result<()> {
        config.validate()?;
        self.pending_config = Some(config);
        tracing::info!("Config updated; re-initialize to apply");
        Ok(())
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn is_initialized(&self) -> bool {
        matches!(
            self.state,
            ControllerState::Initialized | ControllerState::Recording
        )
    }

    /// Tear down both subsystems. Idempotent; secondary failures are
    /// swallowed so cleanup always runs to completion.
    pub fn release(&mut self) {
        if self.state == ControllerState::Released {
            return;
        }

        if self.state == ControllerState::Recording {
            self.stop_capture();
        }

        self.capture_device = None;
        self.encoder = None;
        if self.comm_mode_entered {
            self.provider.restore_mode();
            self.comm_mode_entered = false;
        }

        self.playback.shutdown();

        self.state = ControllerState::Released;
        tracing::info!("Controller released");
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.release();
    }
}
