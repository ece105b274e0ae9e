//! Device session layer
//!
//! The pipeline treats the platform audio device as an opaque duplex
//! endpoint: a capture device with a blocking byte read and a render device
//! with a non-blocking byte write. [`DeviceProvider`] opens both; the
//! cpal-backed provider bridges cpal's callback model to that contract.
//!
//! All byte buffers carry PCM at the session bit depth, 16-bit signed
//! little-endian for the cpal backend.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use crate::config::SessionConfig;
use crate::error::AudioError;

/// Render device lifecycle tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderState {
    Closed,
    /// Bound to a (sample rate, channels) pair but not consuming
    Open,
    /// Actively consuming queued audio
    Playing,
}

/// Capture side of the duplex endpoint. Reads block until data arrives or a
/// short device-internal timeout elapses; a zero-length result is transient.
///
/// The device survives a stop: `start` may be called again afterwards. It is
/// closed for good when dropped.
pub trait CaptureDevice: Send {
    /// Begin delivering samples to `read`
    fn start(&mut self) -> Result<(), AudioError>;

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, AudioError>;

    /// Pause sample delivery; `start` resumes it
    fn stop(&mut self);
}

/// Render side of the duplex endpoint. Writes never block; a short write
/// means the device buffer is full and the remainder must be retried.
pub trait RenderDevice: Send {
    fn write(&mut self, data: &[u8]) -> Result<usize, AudioError>;

    fn play(&mut self) -> Result<(), AudioError>;

    fn pause(&mut self);

    fn flush(&mut self);

    fn stop(&mut self);

    fn state(&self) -> RenderState;
}

/// Opens capture and render devices and owns the platform audio mode.
///
/// The communication-mode hooks default to no-ops; platforms with a call
/// audio mode switch it on the first init and restore it on release.
pub trait DeviceProvider: Send + Sync {
    fn open_capture(
        &self,
        config: &SessionConfig,
        buffer_bytes: usize,
    ) -> Result<Box<dyn CaptureDevice>, AudioError>;

    fn open_render(
        &self,
        sample_rate: u32,
        channels: u16,
        buffer_bytes: usize,
    ) -> Result<Box<dyn RenderDevice>, AudioError>;

    fn enter_communication_mode(&self) {}

    fn restore_mode(&self) {}
}

/// Capture buffer: at least two frames, bounded below by twice the
/// platform-reported minimum.
pub fn capture_buffer_bytes(frame_bytes: usize, min_buffer_bytes: usize) -> usize {
    (min_buffer_bytes * 2).max(frame_bytes * 2)
}

/// Render buffer: roughly 200 ms of audio, bounded below by twice the
/// platform-reported minimum.
pub fn render_buffer_bytes(sample_rate: u32, channels: u16, min_buffer_bytes: usize) -> usize {
    let target = sample_rate as usize * channels as usize * 2 / 5;
    (min_buffer_bytes * 2).max(target)
}

/// How long a blocking capture read waits before reporting an empty read
const CAPTURE_READ_TIMEOUT: Duration = Duration::from_millis(100);

/// cpal-backed [`DeviceProvider`] using the default host devices
#[derive(Debug, Default)]
pub struct CpalDeviceProvider;

impl DeviceProvider for CpalDeviceProvider {
    fn open_capture(
        &self,
        config: &SessionConfig,
        buffer_bytes: usize,
    ) -> Result<Box<dyn CaptureDevice>, AudioError> {
        if config.bit_depth != 16 {
            return Err(AudioError::UnsupportedFormat(format!(
                "cpal capture supports 16-bit only, got {}",
                config.bit_depth
            )));
        }
        Ok(Box::new(CpalCaptureDevice::open(
            config.sample_rate,
            config.channels,
            buffer_bytes,
        )?))
    }

    fn open_render(
        &self,
        sample_rate: u32,
        channels: u16,
        buffer_bytes: usize,
    ) -> Result<Box<dyn RenderDevice>, AudioError> {
        Ok(Box::new(CpalRenderDevice::open(
            sample_rate,
            channels,
            buffer_bytes,
        )?))
    }
}

/// Blocking-read capture device over a cpal input stream.
///
/// cpal streams are not `Send`, so the stream lives on a dedicated owner
/// thread and hands sample batches to `read` through a bounded channel.
pub struct CpalCaptureDevice {
    running: Arc<AtomicBool>,
    capturing: Arc<AtomicBool>,
    data_rx: Receiver<Vec<u8>>,
    /// Bytes received from the stream but not yet consumed by `read`
    pending: VecDeque<u8>,
    owner: Option<JoinHandle<()>>,
}

impl CpalCaptureDevice {
    fn open(sample_rate: u32, channels: u16, buffer_bytes: usize) -> Result<Self, AudioError> {
        let running = Arc::new(AtomicBool::new(true));
        let capturing = Arc::new(AtomicBool::new(false));
        // Sized so a stalled reader drops batches at the channel instead of
        // growing memory; each batch is one cpal callback's worth.
        let (data_tx, data_rx) = bounded::<Vec<u8>>(32);
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);

        let running_owner = running.clone();
        let capturing_owner = capturing.clone();
        let owner = thread::Builder::new()
            .name("cpal-capture".into())
            .spawn(move || {
                run_capture_stream(
                    sample_rate,
                    channels,
                    buffer_bytes,
                    running_owner,
                    capturing_owner,
                    data_tx,
                    ready_tx,
                );
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        match ready_rx.recv_timeout(Duration::from_secs(2)) {
            Ok(Ok(())) => {
                tracing::info!(
                    "Capture device opened: rate={}, channels={}, buffer={}B",
                    sample_rate,
                    channels,
                    buffer_bytes
                );
                Ok(Self {
                    running,
                    capturing,
                    data_rx,
                    pending: VecDeque::new(),
                    owner: Some(owner),
                })
            }
            Ok(Err(e)) => {
                running.store(false, Ordering::SeqCst);
                let _ = owner.join();
                Err(e)
            }
            Err(_) => {
                running.store(false, Ordering::SeqCst);
                Err(AudioError::StreamError("capture stream startup timed out".into()))
            }
        }
    }
}

fn run_capture_stream(
    sample_rate: u32,
    channels: u16,
    buffer_bytes: usize,
    running: Arc<AtomicBool>,
    capturing: Arc<AtomicBool>,
    data_tx: Sender<Vec<u8>>,
    ready_tx: Sender<Result<(), AudioError>>,
) {
    let host = cpal::default_host();
    let device = match host.default_input_device() {
        Some(device) => device,
        None => {
            let _ = ready_tx.send(Err(AudioError::DeviceNotFound(
                "no default input device".into(),
            )));
            return;
        }
    };

    let config = cpal::StreamConfig {
        channels,
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Fixed((buffer_bytes / 2).max(1) as u32),
    };

    let capturing_cb = capturing.clone();
    let stream = device.build_input_stream(
        &config,
        move |data: &[i16], _: &cpal::InputCallbackInfo| {
            if !capturing_cb.load(Ordering::Relaxed) {
                return;
            }
            let mut bytes = Vec::with_capacity(data.len() * 2);
            for &sample in data {
                bytes.extend_from_slice(&sample.to_le_bytes());
            }
            // Dropped on overflow; the reader is behind anyway.
            let _ = data_tx.try_send(bytes);
        },
        |err| {
            tracing::error!("Capture stream error: {}", err);
        },
        None,
    );

    match stream {
        Ok(stream) => {
            if let Err(e) = stream.play() {
                let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
                return;
            }
            let _ = ready_tx.send(Ok(()));

            // Keep the stream alive until the device is stopped
            while running.load(Ordering::Relaxed) {
                thread::sleep(Duration::from_millis(10));
            }
        }
        Err(e) => {
            let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
        }
    }
}

impl CaptureDevice for CpalCaptureDevice {
    fn start(&mut self) -> Result<(), AudioError> {
        if !self.running.load(Ordering::Relaxed) {
            return Err(AudioError::DeviceClosed);
        }
        self.capturing.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, AudioError> {
        if !self.running.load(Ordering::Relaxed) {
            return Err(AudioError::DeviceClosed);
        }

        if self.pending.is_empty() {
            match self.data_rx.recv_timeout(CAPTURE_READ_TIMEOUT) {
                Ok(batch) => self.pending.extend(batch),
                Err(RecvTimeoutError::Timeout) => return Ok(0),
                Err(RecvTimeoutError::Disconnected) => return Err(AudioError::DeviceClosed),
            }
        }

        let mut written = 0;
        while written < buf.len() {
            match self.pending.pop_front() {
                Some(byte) => {
                    buf[written] = byte;
                    written += 1;
                }
                None => break,
            }
        }
        Ok(written)
    }

    fn stop(&mut self) {
        self.capturing.store(false, Ordering::SeqCst);
    }
}

impl Drop for CpalCaptureDevice {
    fn drop(&mut self) {
        self.capturing.store(false, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.owner.take() {
            let _ = handle.join();
        }
    }
}

/// Shared state between `write` and the cpal output callback
struct RenderShared {
    buffer: Mutex<VecDeque<u8>>,
    playing: AtomicBool,
}

/// Non-blocking-write render device over a cpal output stream.
///
/// `write` fills a bounded byte ring up to its free space; the output
/// callback drains it, emitting silence on underrun. Partial-write semantics
/// fall out of the ring bound.
pub struct CpalRenderDevice {
    shared: Arc<RenderShared>,
    running: Arc<AtomicBool>,
    capacity: usize,
    state: RenderState,
    owner: Option<JoinHandle<()>>,
}

impl CpalRenderDevice {
    fn open(sample_rate: u32, channels: u16, buffer_bytes: usize) -> Result<Self, AudioError> {
        let shared = Arc::new(RenderShared {
            buffer: Mutex::new(VecDeque::with_capacity(buffer_bytes)),
            playing: AtomicBool::new(false),
        });
        let running = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);

        let shared_owner = shared.clone();
        let running_owner = running.clone();
        let owner = thread::Builder::new()
            .name("cpal-render".into())
            .spawn(move || {
                run_render_stream(sample_rate, channels, shared_owner, running_owner, ready_tx);
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        match ready_rx.recv_timeout(Duration::from_secs(2)) {
            Ok(Ok(())) => {
                tracing::info!(
                    "Render device opened: rate={}, channels={}, buffer={}B",
                    sample_rate,
                    channels,
                    buffer_bytes
                );
                Ok(Self {
                    shared,
                    running,
                    capacity: buffer_bytes,
                    state: RenderState::Open,
                    owner: Some(owner),
                })
            }
            Ok(Err(e)) => {
                running.store(false, Ordering::SeqCst);
                let _ = owner.join();
                Err(e)
            }
            Err(_) => {
                running.store(false, Ordering::SeqCst);
                Err(AudioError::StreamError("render stream startup timed out".into()))
            }
        }
    }
}

fn run_render_stream(
    sample_rate: u32,
    channels: u16,
    shared: Arc<RenderShared>,
    running: Arc<AtomicBool>,
    ready_tx: Sender<Result<(), AudioError>>,
) {
    let host = cpal::default_host();
    let device = match host.default_output_device() {
        Some(device) => device,
        None => {
            let _ = ready_tx.send(Err(AudioError::DeviceNotFound(
                "no default output device".into(),
            )));
            return;
        }
    };

    let config = cpal::StreamConfig {
        channels,
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let shared_cb = shared.clone();
    let stream = device.build_output_stream(
        &config,
        move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
            if !shared_cb.playing.load(Ordering::Relaxed) {
                data.fill(0);
                return;
            }
            let mut buffer = shared_cb.buffer.lock();
            for sample in data.iter_mut() {
                let lo = buffer.pop_front();
                let hi = buffer.pop_front();
                *sample = match (lo, hi) {
                    (Some(lo), Some(hi)) => i16::from_le_bytes([lo, hi]),
                    _ => 0,
                };
            }
        },
        |err| {
            tracing::error!("Render stream error: {}", err);
        },
        None,
    );

    match stream {
        Ok(stream) => {
            if let Err(e) = stream.play() {
                let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
                return;
            }
            let _ = ready_tx.send(Ok(()));

            while running.load(Ordering::Relaxed) {
                thread::sleep(Duration::from_millis(10));
            }
        }
        Err(e) => {
            let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
        }
    }
}

impl RenderDevice for CpalRenderDevice {
    fn write(&mut self, data: &[u8]) -> Result<usize, AudioError> {
        if self.state == RenderState::Closed {
            return Err(AudioError::DeviceClosed);
        }
        let mut buffer = self.shared.buffer.lock();
        let free = self.capacity.saturating_sub(buffer.len());
        let accepted = data.len().min(free);
        buffer.extend(&data[..accepted]);
        Ok(accepted)
    }

    fn play(&mut self) -> Result<(), AudioError> {
        if self.state == RenderState::Closed {
            return Err(AudioError::DeviceClosed);
        }
        self.shared.playing.store(true, Ordering::SeqCst);
        self.state = RenderState::Playing;
        Ok(())
    }

    fn pause(&mut self) {
        self.shared.playing.store(false, Ordering::SeqCst);
        if self.state == RenderState::Playing {
            self.state = RenderState::Open;
        }
    }

    fn flush(&mut self) {
        self.shared.buffer.lock().clear();
    }

    fn stop(&mut self) {
        self.pause();
        self.flush();
        self.running.store(false, Ordering::SeqCst);
        self.state = RenderState::Closed;
        if let Some(handle) = self.owner.take() {
            let _ = handle.join();
        }
    }

    fn state(&self) -> RenderState {
        self.state
    }
}

impl Drop for CpalRenderDevice {
    fn drop(&mut self) {
        self.stop();
    }
}
