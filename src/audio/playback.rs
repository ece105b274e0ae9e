//! Playback queue/drain engine
//!
//! All playback work runs on a single serialized worker thread that owns the
//! render device, the decoder, and the queue exclusively, so none of them
//! needs a lock. Callers hand work off through a command channel and never
//! touch the queue directly. The drain loop is armed on demand and at most
//! one instance runs, tracked by an atomic flag set on arm and cleared on the
//! loop's own exit.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};

use crate::audio::device::{render_buffer_bytes, DeviceProvider, RenderDevice, RenderState};
use crate::audio::queue::PlaybackQueue;
use crate::codec::{i16le_to_bytes, FrameDecoder, VoiceCodec};
use crate::config::{AudioFormat, SessionConfig};
use crate::error::ErrorCode;

/// Chunks written per drain batch
const DRAIN_BATCH_CHUNKS: usize = 10;
/// Chunks pre-charged right after a device rebuild
const PRECHARGE_CHUNKS: usize = 5;
/// Empty-queue polls before the drain loop gives up and disarms
const IDLE_POLL_LIMIT: u32 = 5;
const IDLE_POLL_SLEEP: Duration = Duration::from_millis(10);
const DRAIN_BATCH_SLEEP: Duration = Duration::from_millis(5);

/// Receives playback-side errors
pub trait PlaybackEvents: Send + Sync {
    fn on_playback_error(&self, code: ErrorCode, message: &str);
}

enum Command {
    Enqueue {
        data: Bytes,
        sample_rate: u32,
        channels: u16,
        format: AudioFormat,
    },
    Stop,
    ClearQueue,
    Shutdown,
}

/// Owns the playback worker for the controller's entire active lifetime
pub struct PlaybackEngine {
    cmd_tx: Sender<Command>,
    speaker_muted: Arc<AtomicBool>,
    draining: Arc<AtomicBool>,
    playing: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl PlaybackEngine {
    pub fn new(
        config: &SessionConfig,
        provider: Arc<dyn DeviceProvider>,
        codec: Arc<dyn VoiceCodec>,
        events: Arc<dyn PlaybackEvents>,
        speaker_muted: Arc<AtomicBool>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = unbounded();
        let draining = Arc::new(AtomicBool::new(false));
        let playing = Arc::new(AtomicBool::new(false));

        let worker_state = PlaybackWorker {
            provider,
            codec,
            events,
            frame_ms: config.frame_duration.millis(),
            queue: PlaybackQueue::new(config.playback_queue_capacity()),
            device: None,
            decoder: None,
            device_format: None,
            decoder_format: None,
            draining: draining.clone(),
            playing: playing.clone(),
            idle_polls: 0,
        };

        let worker = thread::Builder::new()
            .name("voice-playback".into())
            .spawn(move || worker_state.run(cmd_rx))
            .expect("failed to spawn playback worker");

        Self {
            cmd_tx,
            speaker_muted,
            draining,
            playing,
            worker: Some(worker),
        }
    }

    /// Hand one chunk to the worker. Discarded silently while speaker-muted.
    pub fn enqueue(&self, data: Bytes, sample_rate: u32, channels: u16, format: AudioFormat) {
        if self.speaker_muted.load(Ordering::Relaxed) {
            return;
        }
        let _ = self.cmd_tx.send(Command::Enqueue {
            data,
            sample_rate,
            channels,
            format,
        });
    }

    /// Halt draining, pause/flush/stop the device, clear the queue.
    /// Executed on the worker so it cannot race an in-flight drain batch.
    pub fn stop(&self) {
        let _ = self.cmd_tx.send(Command::Stop);
    }

    /// Drop all queued audio without touching the device
    pub fn clear_queue(&self) {
        let _ = self.cmd_tx.send(Command::ClearQueue);
    }

    /// Tear everything down and join the worker
    pub fn shutdown(&mut self) {
        let _ = self.cmd_tx.send(Command::Shutdown);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Worker-thread state; every field is owned by the worker exclusively
struct PlaybackWorker {
    provider: Arc<dyn DeviceProvider>,
    codec: Arc<dyn VoiceCodec>,
    events: Arc<dyn PlaybackEvents>,
    frame_ms: u32,
    queue: PlaybackQueue,
    device: Option<Box<dyn RenderDevice>>,
    decoder: Option<Box<dyn FrameDecoder>>,
    /// (sample rate, channels) the open device is bound to
    device_format: Option<(u32, u16)>,
    /// (sample rate, channels) the decoder is bound to
    decoder_format: Option<(u32, u16)>,
    draining: Arc<AtomicBool>,
    playing: Arc<AtomicBool>,
    idle_polls: u32,
}

impl PlaybackWorker {
    fn run(mut self, cmd_rx: Receiver<Command>) {
        tracing::debug!("Playback worker started");
        loop {
            if self.draining.load(Ordering::SeqCst) {
                // Service pending commands between drain iterations so stop
                // and shutdown are never starved by a busy queue.
                loop {
                    match cmd_rx.try_recv() {
                        Ok(Command::Shutdown) => {
                            self.teardown();
                            return;
                        }
                        Ok(cmd) => self.handle(cmd),
                        Err(TryRecvError::Empty) => break,
                        Err(TryRecvError::Disconnected) => {
                            self.teardown();
                            return;
                        }
                    }
                }
                self.drain_iteration();
            } else {
                match cmd_rx.recv() {
                    Ok(Command::Shutdown) | Err(_) => {
                        self.teardown();
                        return;
                    }
                    Ok(cmd) => self.handle(cmd),
                }
            }
        }
    }

    fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Enqueue {
                data,
                sample_rate,
                channels,
                format,
            } => self.handle_enqueue(data, sample_rate, channels, format),
            Command::Stop => self.handle_stop(),
            Command::ClearQueue => self.queue.clear(),
            Command::Shutdown => unreachable!("handled by the worker loop"),
        }
    }

    fn handle_enqueue(&mut self, data: Bytes, sample_rate: u32, channels: u16, format: AudioFormat) {
        self.ensure_device(sample_rate, channels, format);
        if self.device.is_none() {
            return;
        }

        let pcm = match format {
            AudioFormat::Raw => data,
            AudioFormat::Compressed => match self.decode(&data) {
                Some(pcm) => pcm,
                // Decode failure discards the chunk, nothing is enqueued
                None => return,
            },
        };

        let evicted = self.queue.push_back(pcm);
        if evicted > 0 {
            tracing::debug!("Playback queue evicted {} oldest chunk(s)", evicted);
        }

        self.arm_drain();
    }

    fn handle_stop(&mut self) {
        self.draining.store(false, Ordering::SeqCst);
        if let Some(device) = self.device.as_mut() {
            device.pause();
            device.flush();
            device.stop();
        }
        self.playing.store(false, Ordering::SeqCst);
        self.queue.clear();
        tracing::info!("Playback stopped");
    }

    /// Make sure an open, playing device matches the requested format,
    /// rebuilding device and decoder as needed.
    fn ensure_device(&mut self, sample_rate: u32, channels: u16, format: AudioFormat) {
        if format == AudioFormat::Compressed {
            self.ensure_decoder(sample_rate, channels);
        }

        let format_matches = self.device_format == Some((sample_rate, channels));
        let device_usable = self
            .device
            .as_ref()
            .map(|d| d.state() != RenderState::Closed)
            .unwrap_or(false);

        if device_usable && format_matches {
            if let Some(device) = self.device.as_mut() {
                if device.state() != RenderState::Playing {
                    if let Err(e) = device.play() {
                        tracing::error!("Render device play failed: {}", e);
                    } else {
                        self.playing.store(true, Ordering::SeqCst);
                    }
                }
            }
            return;
        }

        // Rebuild: tear down the old session, queued audio included
        if let Some(mut old) = self.device.take() {
            old.pause();
            old.flush();
            old.stop();
        }
        self.playing.store(false, Ordering::SeqCst);
        self.device_format = None;
        self.queue.clear();

        let buffer_bytes = render_buffer_bytes(sample_rate, channels, 0);
        match self.provider.open_render(sample_rate, channels, buffer_bytes) {
            Ok(mut device) => {
                if let Err(e) = device.play() {
                    self.events.on_playback_error(
                        ErrorCode::RenderDeviceInit,
                        &format!("render device start failed: {}", e),
                    );
                    return;
                }
                tracing::info!(
                    "Render device rebuilt: rate={}, channels={}, buffer={}B",
                    sample_rate,
                    channels,
                    buffer_bytes
                );
                self.device = Some(device);
                self.device_format = Some((sample_rate, channels));
                self.playing.store(true, Ordering::SeqCst);
                // Pre-charge a few chunks to shrink the first audible gap
                self.drain_batch(PRECHARGE_CHUNKS);
            }
            Err(e) => {
                tracing::error!("Render device open failed: {}", e);
                self.events.on_playback_error(
                    ErrorCode::RenderDeviceInit,
                    &format!("render device open failed: {}", e),
                );
            }
        }
    }

    fn ensure_decoder(&mut self, sample_rate: u32, channels: u16) {
        if self.decoder.is_some() && self.decoder_format == Some((sample_rate, channels)) {
            return;
        }
        // Bound format changed (or first use): recreate
        self.decoder = None;
        self.decoder_format = None;

        match self.codec.create_decoder(sample_rate, channels, self.frame_ms) {
            Ok(decoder) => {
                self.decoder = Some(decoder);
                self.decoder_format = Some((sample_rate, channels));
            }
            Err(e) => {
                tracing::error!("Decoder init failed: {}", e);
                self.events.on_playback_error(
                    ErrorCode::DecoderInit,
                    &format!("decoder init failed: {}", e),
                );
            }
        }
    }

    fn decode(&mut self, packet: &[u8]) -> Option<Bytes> {
        let decoder = self.decoder.as_mut()?;
        let channels = self
            .decoder_format
            .map(|(_, channels)| channels as usize)
            .unwrap_or(1);

        let mut pcm_out = vec![0i16; decoder.frame_samples()];
        match decoder.decode(packet, &mut pcm_out) {
            Ok(samples_per_channel) => {
                let samples = samples_per_channel * channels;
                Some(Bytes::from(i16le_to_bytes(&pcm_out[..samples])))
            }
            Err(e) => {
                tracing::warn!("Packet decode failed, chunk dropped: {}", e);
                None
            }
        }
    }

    fn arm_drain(&mut self) {
        if self
            .draining
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.idle_polls = 0;
        }
    }

    /// One outer iteration of the drain loop
    fn drain_iteration(&mut self) {
        let playing = self
            .device
            .as_ref()
            .map(|d| d.state() == RenderState::Playing)
            .unwrap_or(false);
        if !playing {
            self.draining.store(false, Ordering::SeqCst);
            return;
        }

        if self.queue.is_empty() {
            self.idle_polls += 1;
            if self.idle_polls >= IDLE_POLL_LIMIT {
                // Give up; re-armed by the next enqueue
                self.idle_polls = 0;
                self.draining.store(false, Ordering::SeqCst);
                return;
            }
            thread::sleep(IDLE_POLL_SLEEP);
            return;
        }

        self.idle_polls = 0;
        self.drain_batch(DRAIN_BATCH_CHUNKS);
        thread::sleep(DRAIN_BATCH_SLEEP);
    }

    /// Write up to `max_chunks` chunks with non-blocking writes. A short or
    /// failed write puts the unwritten remainder back at the queue front and
    /// ends the batch; the outer loop retries on its next iteration.
    fn drain_batch(&mut self, max_chunks: usize) {
        let Some(device) = self.device.as_mut() else {
            return;
        };

        let mut written_chunks = 0;
        while written_chunks < max_chunks {
            let Some(chunk) = self.queue.pop_front() else {
                break;
            };

            let mut offset = 0;
            while offset < chunk.len() {
                match device.write(&chunk[offset..]) {
                    Ok(0) => {
                        // Device buffer full
                        self.queue.push_front(chunk.slice(offset..));
                        return;
                    }
                    Ok(written) => offset += written,
                    Err(e) => {
                        tracing::warn!("Render write failed, retrying remainder: {}", e);
                        self.queue.push_front(chunk.slice(offset..));
                        self.events.on_playback_error(
                            ErrorCode::RenderRuntime,
                            &format!("render write failed: {}", e),
                        );
                        return;
                    }
                }
            }
            written_chunks += 1;
        }
    }

    fn teardown(&mut self) {
        self.draining.store(false, Ordering::SeqCst);
        if let Some(device) = self.device.as_mut() {
            device.pause();
            device.flush();
            device.stop();
        }
        self.device = None;
        self.decoder = None;
        self.playing.store(false, Ordering::SeqCst);
        self.queue.clear();
        tracing::debug!("Playback worker exited");
    }
}
