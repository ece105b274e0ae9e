//! Shared test fakes: scripted devices, a loopback codec, and collecting
//! listeners. Compiled for tests only.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::audio::capture::CaptureSink;
use crate::audio::device::{CaptureDevice, DeviceProvider, RenderDevice, RenderState};
use crate::audio::playback::PlaybackEvents;
use crate::codec::{EncoderParams, FrameDecoder, FrameEncoder, VoiceCodec};
use crate::config::SessionConfig;
use crate::error::{AudioError, CodecError, ErrorCode};

// ---------------------------------------------------------------- capture

/// One scripted outcome of a capture read
pub enum ScriptedRead {
    Data(Vec<u8>),
    Empty,
    Fail,
    /// Block inside the read for this long, then return empty
    Stall(Duration),
}

/// Capture device that replays a fixed read script, then returns empty reads
pub struct ScriptedCaptureDevice {
    script: Mutex<VecDeque<ScriptedRead>>,
    started: Arc<AtomicBool>,
    stopped: Arc<AtomicUsize>,
    fail_start: Arc<AtomicBool>,
}

impl ScriptedCaptureDevice {
    pub fn new(script: Vec<ScriptedRead>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            started: Arc::new(AtomicBool::new(false)),
            stopped: Arc::new(AtomicUsize::new(0)),
            fail_start: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_fail_start(script: Vec<ScriptedRead>, fail_start: Arc<AtomicBool>) -> Self {
        Self {
            fail_start,
            ..Self::new(script)
        }
    }

    pub fn started_flag(&self) -> Arc<AtomicBool> {
        self.started.clone()
    }

    pub fn stop_counter(&self) -> Arc<AtomicUsize> {
        self.stopped.clone()
    }
}

impl CaptureDevice for ScriptedCaptureDevice {
    fn start(&mut self) -> Result<(), AudioError> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(AudioError::StreamError("scripted failure".into()));
        }
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, AudioError> {
        let next = self.script.lock().pop_front();
        match next {
            Some(ScriptedRead::Data(data)) => {
                let len = data.len().min(buf.len());
                buf[..len].copy_from_slice(&data[..len]);
                Ok(len)
            }
            Some(ScriptedRead::Empty) => Ok(0),
            Some(ScriptedRead::Fail) => Err(AudioError::ReadFailed("scripted failure".into())),
            Some(ScriptedRead::Stall(duration)) => {
                thread::sleep(duration);
                Ok(0)
            }
            None => {
                // Script exhausted: behave like a quiet microphone
                thread::sleep(Duration::from_millis(5));
                Ok(0)
            }
        }
    }

    fn stop(&mut self) {
        self.started.store(false, Ordering::SeqCst);
        self.stopped.fetch_add(1, Ordering::SeqCst);
    }
}

/// Capture listener that records every delivery
#[derive(Default)]
pub struct CollectingSink {
    pcm: Mutex<Vec<Vec<u8>>>,
    encoded: Mutex<Vec<Vec<u8>>>,
    errors: Mutex<Vec<(ErrorCode, String)>>,
}

impl CollectingSink {
    pub fn pcm_frames(&self) -> usize {
        self.pcm.lock().len()
    }

    pub fn pcm_frame(&self, index: usize) -> Vec<u8> {
        self.pcm.lock()[index].clone()
    }

    pub fn pcm_frame_len(&self, index: usize) -> usize {
        self.pcm.lock()[index].len()
    }

    pub fn encoded_frames(&self) -> usize {
        self.encoded.lock().len()
    }

    pub fn encoded_frame(&self, index: usize) -> Vec<u8> {
        self.encoded.lock()[index].clone()
    }

    pub fn errors(&self) -> usize {
        self.errors.lock().len()
    }

    pub fn last_error_code(&self) -> Option<ErrorCode> {
        self.errors.lock().last().map(|(code, _)| *code)
    }
}

impl CaptureSink for CollectingSink {
    fn on_pcm_frame(&self, data: &[u8]) {
        self.pcm.lock().push(data.to_vec());
    }

    fn on_encoded_frame(&self, data: &[u8]) {
        self.encoded.lock().push(data.to_vec());
    }

    fn on_capture_error(&self, code: ErrorCode, message: &str) {
        self.errors.lock().push((code, message.to_string()));
    }
}

/// Encoder whose every encode call fails
pub struct FailingEncoder {
    frame_samples: usize,
}

impl FailingEncoder {
    pub fn new(frame_samples: usize) -> Self {
        Self { frame_samples }
    }
}

impl FrameEncoder for FailingEncoder {
    fn encode(&mut self, _pcm: &[i16]) -> Result<Bytes, CodecError> {
        Err(CodecError::EncodingFailed("scripted failure".into()))
    }

    fn frame_samples(&self) -> usize {
        self.frame_samples
    }
}

// ----------------------------------------------------------------- codec

/// Trivial codec: "encoding" packs samples to LE bytes, "decoding" expands
/// each packet byte to one i16 sample. Creation can be scripted to fail.
#[derive(Default)]
pub struct LoopbackCodec {
    pub fail_encoder: AtomicBool,
    pub fail_decoder: AtomicBool,
}

struct LoopbackEncoder {
    frame_samples: usize,
}

impl FrameEncoder for LoopbackEncoder {
    fn encode(&mut self, pcm: &[i16]) -> Result<Bytes, CodecError> {
        if pcm.len() != self.frame_samples {
            return Err(CodecError::InvalidFrameSize(pcm.len()));
        }
        Ok(Bytes::from(crate::codec::i16le_to_bytes(pcm)))
    }

    fn frame_samples(&self) -> usize {
        self.frame_samples
    }
}

struct LoopbackDecoder {
    channels: u16,
    frame_samples: usize,
}

impl FrameDecoder for LoopbackDecoder {
    fn decode(&mut self, packet: &[u8], pcm_out: &mut [i16]) -> Result<usize, CodecError> {
        if packet.is_empty() {
            return Err(CodecError::DecodingFailed("empty packet".into()));
        }
        let samples = packet.len().min(pcm_out.len());
        for (out, &byte) in pcm_out.iter_mut().zip(packet.iter()).take(samples) {
            *out = byte as i16;
        }
        Ok(samples / self.channels as usize)
    }

    fn frame_samples(&self) -> usize {
        self.frame_samples
    }
}

impl VoiceCodec for LoopbackCodec {
    fn create_encoder(&self, params: &EncoderParams) -> Result<Box<dyn FrameEncoder>, CodecError> {
        if self.fail_encoder.load(Ordering::SeqCst) {
            return Err(CodecError::EncoderInit("scripted failure".into()));
        }
        params.validate()?;
        Ok(Box::new(LoopbackEncoder {
            frame_samples: params.frame_samples(),
        }))
    }

    fn create_decoder(
        &self,
        sample_rate: u32,
        channels: u16,
        frame_ms: u32,
    ) -> Result<Box<dyn FrameDecoder>, CodecError> {
        if self.fail_decoder.load(Ordering::SeqCst) {
            return Err(CodecError::DecoderInit("scripted failure".into()));
        }
        crate::codec::validate_rate_channels(sample_rate, channels)?;
        Ok(Box::new(LoopbackDecoder {
            channels,
            frame_samples: sample_rate as usize * channels as usize * frame_ms as usize / 1000,
        }))
    }
}

// ---------------------------------------------------------------- render

enum WriteMode {
    AcceptAll,
    AcceptAtMost(usize),
    /// Accept at most `cap` bytes per call, failing every `nth` call
    FailEveryNth { nth: usize, cap: usize },
    /// Accept nothing until the gate opens, then everything
    Gated,
}

struct RenderLogInner {
    writes: Mutex<Vec<Vec<u8>>>,
    mode: WriteMode,
    gate_open: AtomicBool,
    write_calls: AtomicUsize,
    written: AtomicUsize,
}

/// Write log shared by every render device a [`FakeDeviceProvider`] opens,
/// so assertions survive device rebuilds.
#[derive(Clone)]
pub struct SharedRenderLog {
    inner: Arc<RenderLogInner>,
}

impl SharedRenderLog {
    fn with_mode(mode: WriteMode) -> Self {
        Self {
            inner: Arc::new(RenderLogInner {
                writes: Mutex::new(Vec::new()),
                mode,
                gate_open: AtomicBool::new(false),
                write_calls: AtomicUsize::new(0),
                written: AtomicUsize::new(0),
            }),
        }
    }

    pub fn accepting_all() -> Self {
        Self::with_mode(WriteMode::AcceptAll)
    }

    pub fn accepting_at_most(bytes_per_write: usize) -> Self {
        Self::with_mode(WriteMode::AcceptAtMost(bytes_per_write))
    }

    pub fn failing_every_nth_write(nth: usize) -> Self {
        Self::with_mode(WriteMode::FailEveryNth { nth, cap: 400 })
    }

    pub fn gated() -> Self {
        Self::with_mode(WriteMode::Gated)
    }

    pub fn open_gate(&self) {
        self.inner.gate_open.store(true, Ordering::SeqCst);
    }

    pub fn written_bytes(&self) -> usize {
        self.inner.written.load(Ordering::SeqCst)
    }

    /// All accepted bytes in write order
    pub fn concatenated(&self) -> Vec<u8> {
        self.inner.writes.lock().iter().flatten().copied().collect()
    }

    fn write(&self, data: &[u8]) -> Result<usize, AudioError> {
        let call = self.inner.write_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let accepted = match self.inner.mode {
            WriteMode::AcceptAll => data.len(),
            WriteMode::AcceptAtMost(cap) => data.len().min(cap),
            WriteMode::FailEveryNth { nth, cap } => {
                if call % nth == 0 {
                    return Err(AudioError::WriteFailed("scripted failure".into()));
                }
                data.len().min(cap)
            }
            WriteMode::Gated => {
                if self.inner.gate_open.load(Ordering::SeqCst) {
                    data.len()
                } else {
                    0
                }
            }
        };
        if accepted > 0 {
            self.inner.writes.lock().push(data[..accepted].to_vec());
            self.inner.written.fetch_add(accepted, Ordering::SeqCst);
        }
        Ok(accepted)
    }
}

struct FakeRenderDevice {
    log: SharedRenderLog,
    state: RenderState,
    stopped: Arc<AtomicUsize>,
}

impl RenderDevice for FakeRenderDevice {
    fn write(&mut self, data: &[u8]) -> Result<usize, AudioError> {
        if self.state == RenderState::Closed {
            return Err(AudioError::DeviceClosed);
        }
        self.log.write(data)
    }

    fn play(&mut self) -> Result<(), AudioError> {
        if self.state == RenderState::Closed {
            return Err(AudioError::DeviceClosed);
        }
        self.state = RenderState::Playing;
        Ok(())
    }

    fn pause(&mut self) {
        if self.state == RenderState::Playing {
            self.state = RenderState::Open;
        }
    }

    fn flush(&mut self) {}

    fn stop(&mut self) {
        if self.state != RenderState::Closed {
            self.stopped.fetch_add(1, Ordering::SeqCst);
        }
        self.state = RenderState::Closed;
    }

    fn state(&self) -> RenderState {
        self.state
    }
}

// -------------------------------------------------------------- provider

/// Device provider handing out scripted capture devices and log-backed
/// render devices, recording every interaction.
pub struct FakeDeviceProvider {
    render_log: SharedRenderLog,
    opened_render: Mutex<Vec<(u32, u16)>>,
    opened_capture: Mutex<Vec<SessionConfig>>,
    render_stopped: Arc<AtomicUsize>,
    capture_script: Mutex<Option<Vec<ScriptedRead>>>,
    pub fail_capture_open: AtomicBool,
    /// Shared with every capture device this provider opens
    pub fail_capture_start: Arc<AtomicBool>,
    pub fail_render_open: AtomicBool,
    comm_enters: AtomicUsize,
    comm_restores: AtomicUsize,
}

impl FakeDeviceProvider {
    pub fn new(render_log: SharedRenderLog) -> Self {
        Self {
            render_log,
            opened_render: Mutex::new(Vec::new()),
            opened_capture: Mutex::new(Vec::new()),
            render_stopped: Arc::new(AtomicUsize::new(0)),
            capture_script: Mutex::new(None),
            fail_capture_open: AtomicBool::new(false),
            fail_capture_start: Arc::new(AtomicBool::new(false)),
            fail_render_open: AtomicBool::new(false),
            comm_enters: AtomicUsize::new(0),
            comm_restores: AtomicUsize::new(0),
        }
    }

    /// Script the next opened capture device's reads
    pub fn set_capture_script(&self, script: Vec<ScriptedRead>) {
        *self.capture_script.lock() = Some(script);
    }

    pub fn opened_formats(&self) -> Vec<(u32, u16)> {
        self.opened_render.lock().clone()
    }

    pub fn opened_capture_rates(&self) -> Vec<u32> {
        self.opened_capture.lock().iter().map(|c| c.sample_rate).collect()
    }

    pub fn stopped_devices(&self) -> usize {
        self.render_stopped.load(Ordering::SeqCst)
    }

    pub fn comm_mode_enters(&self) -> usize {
        self.comm_enters.load(Ordering::SeqCst)
    }

    pub fn comm_mode_restores(&self) -> usize {
        self.comm_restores.load(Ordering::SeqCst)
    }
}

impl DeviceProvider for FakeDeviceProvider {
    fn open_capture(
        &self,
        config: &SessionConfig,
        _buffer_bytes: usize,
    ) -> Result<Box<dyn CaptureDevice>, AudioError> {
        if self.fail_capture_open.load(Ordering::SeqCst) {
            return Err(AudioError::DeviceNotFound("scripted failure".into()));
        }
        self.opened_capture.lock().push(config.clone());
        let script = self.capture_script.lock().take().unwrap_or_default();
        Ok(Box::new(ScriptedCaptureDevice::with_fail_start(
            script,
            self.fail_capture_start.clone(),
        )))
    }

    fn open_render(
        &self,
        sample_rate: u32,
        channels: u16,
        _buffer_bytes: usize,
    ) -> Result<Box<dyn RenderDevice>, AudioError> {
        if self.fail_render_open.load(Ordering::SeqCst) {
            return Err(AudioError::DeviceNotFound("scripted failure".into()));
        }
        self.opened_render.lock().push((sample_rate, channels));
        Ok(Box::new(FakeRenderDevice {
            log: self.render_log.clone(),
            state: RenderState::Open,
            stopped: self.render_stopped.clone(),
        }))
    }

    fn enter_communication_mode(&self) {
        self.comm_enters.fetch_add(1, Ordering::SeqCst);
    }

    fn restore_mode(&self) {
        self.comm_restores.fetch_add(1, Ordering::SeqCst);
    }
}

/// Playback listener that records reported errors
#[derive(Default)]
pub struct CollectingEvents {
    errors: Mutex<Vec<(ErrorCode, String)>>,
}

impl CollectingEvents {
    pub fn errors(&self) -> usize {
        self.errors.lock().len()
    }

    pub fn last_error_code(&self) -> Option<ErrorCode> {
        self.errors.lock().last().map(|(code, _)| *code)
    }
}

impl PlaybackEvents for CollectingEvents {
    fn on_playback_error(&self, code: ErrorCode, message: &str) {
        self.errors.lock().push((code, message.to_string()));
    }
}
