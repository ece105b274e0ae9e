//! Capture framing loop
//!
//! One dedicated thread blocks on device reads and reframes the byte stream
//! to exact frame boundaries. A single device read may complete zero, one, or
//! several frames; leftover bytes persist in the accumulator across reads.
//! Each completed frame is delivered through [`CaptureSink`], optionally
//! encoded first.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};

use crate::audio::device::CaptureDevice;
use crate::codec::{bytes_to_i16le, FrameEncoder};
use crate::config::SessionConfig;
use crate::error::{AudioError, ErrorCode};

/// Bounded wait for the capture thread to exit on `stop`
const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Backoff for consecutive empty device reads: starts at 1 ms, doubles to a
/// 20 ms cap, resets on the first successful read.
const EMPTY_READ_BACKOFF_START: Duration = Duration::from_millis(1);
const EMPTY_READ_BACKOFF_CAP: Duration = Duration::from_millis(20);

/// Receives capture output and errors
pub trait CaptureSink: Send + Sync {
    /// One exact raw PCM frame
    fn on_pcm_frame(&self, data: &[u8]);

    /// One compressed packet, only when the session format is Compressed
    fn on_encoded_frame(&self, data: &[u8]);

    fn on_capture_error(&self, code: ErrorCode, message: &str);
}

/// Device and encoder handed back when the capture loop exits, so a stopped
/// session can be restarted without reacquiring resources.
pub type CaptureParts = (Box<dyn CaptureDevice>, Option<Box<dyn FrameEncoder>>);

/// Owns the capture thread between start and stop
pub struct CaptureEngine {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    done_rx: Receiver<CaptureParts>,
}

impl CaptureEngine {
    /// Spawn the capture loop. The device and encoder move onto the loop
    /// thread and are handed back through [`CaptureEngine::stop`].
    pub fn start(
        config: &SessionConfig,
        device: Box<dyn CaptureDevice>,
        encoder: Option<Box<dyn FrameEncoder>>,
        sink: Arc<dyn CaptureSink>,
        mic_muted: Arc<AtomicBool>,
        read_buffer_bytes: usize,
    ) -> Result<Self, AudioError> {
        let running = Arc::new(AtomicBool::new(true));
        let (done_tx, done_rx) = bounded::<CaptureParts>(1);

        let loop_state = CaptureLoop {
            running: running.clone(),
            device,
            encoder,
            sink,
            mic_muted,
            frame_bytes: config.frame_bytes(),
            read_buffer_bytes,
        };

        let thread = thread::Builder::new()
            .name("voice-capture".into())
            .spawn(move || {
                let parts = loop_state.run();
                let _ = done_tx.send(parts);
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        Ok(Self {
            running,
            thread: Some(thread),
            done_rx,
        })
    }

    /// Signal termination and wait up to one second for the loop to exit.
    ///
    /// Returns the device and encoder for reuse when the loop exited within
    /// the bound; `None` means they were lost with a stuck thread.
    pub fn stop(&mut self) -> Option<CaptureParts> {
        self.running.store(false, Ordering::SeqCst);

        match self.done_rx.recv_timeout(STOP_JOIN_TIMEOUT) {
            Ok(parts) => {
                if let Some(handle) = self.thread.take() {
                    let _ = handle.join();
                }
                Some(parts)
            }
            Err(RecvTimeoutError::Disconnected) => {
                if let Some(handle) = self.thread.take() {
                    let _ = handle.join();
                }
                None
            }
            Err(RecvTimeoutError::Timeout) => {
                // Leave the thread to finish on its own; it polls the running
                // flag after the current blocking read returns.
                tracing::warn!("Capture thread did not exit within {:?}", STOP_JOIN_TIMEOUT);
                self.thread.take();
                None
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for CaptureEngine {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

struct CaptureLoop {
    running: Arc<AtomicBool>,
    device: Box<dyn CaptureDevice>,
    encoder: Option<Box<dyn FrameEncoder>>,
    sink: Arc<dyn CaptureSink>,
    mic_muted: Arc<AtomicBool>,
    frame_bytes: usize,
    read_buffer_bytes: usize,
}

impl CaptureLoop {
    fn run(mut self) -> CaptureParts {
        tracing::info!(
            "Capture loop started: frame={}B, read_buffer={}B",
            self.frame_bytes,
            self.read_buffer_bytes
        );

        let mut read_buffer = vec![0u8; self.read_buffer_bytes];
        let mut frame = vec![0u8; self.frame_bytes];
        let mut frame_offset = 0usize;

        let mut total_reads = 0u64;
        let mut zero_reads = 0u64;
        let mut error_reads = 0u64;
        let mut backoff = EMPTY_READ_BACKOFF_START;

        while self.running.load(Ordering::SeqCst) {
            let read_bytes = match self.device.read(&mut read_buffer) {
                Ok(n) => n,
                Err(e) => {
                    error_reads += 1;
                    tracing::error!("Capture read failed: {}", e);
                    self.sink.on_capture_error(
                        ErrorCode::CaptureRuntime,
                        &format!("capture read failed: {}", e),
                    );
                    break;
                }
            };

            if read_bytes == 0 {
                zero_reads += 1;
                thread::sleep(backoff);
                backoff = (backoff * 2).min(EMPTY_READ_BACKOFF_CAP);
                continue;
            }
            total_reads += 1;
            backoff = EMPTY_READ_BACKOFF_START;

            let mut cursor = 0;
            while cursor < read_bytes {
                let copy_len = (self.frame_bytes - frame_offset).min(read_bytes - cursor);
                frame[frame_offset..frame_offset + copy_len]
                    .copy_from_slice(&read_buffer[cursor..cursor + copy_len]);
                frame_offset += copy_len;
                cursor += copy_len;

                if frame_offset == self.frame_bytes {
                    self.deliver_frame(&frame);
                    frame_offset = 0;
                }
            }
        }

        self.device.stop();
        tracing::info!(
            "Capture loop exited: total_reads={}, zero_reads={}, error_reads={}",
            total_reads,
            zero_reads,
            error_reads
        );
        (self.device, self.encoder)
    }

    fn deliver_frame(&mut self, frame: &[u8]) {
        if self.mic_muted.load(Ordering::Relaxed) {
            return;
        }

        self.sink.on_pcm_frame(frame);

        if let Some(encoder) = self.encoder.as_mut() {
            let result = bytes_to_i16le(frame).and_then(|pcm| encoder.encode(&pcm));
            match result {
                Ok(packet) => self.sink.on_encoded_frame(&packet),
                Err(e) => {
                    // Encode failures are per-frame, never fatal to the loop
                    tracing::warn!("Frame encode failed: {}", e);
                    self.sink.on_capture_error(
                        ErrorCode::CaptureRuntime,
                        &format!("frame encode failed: {}", e),
                    );
                }
            }
        }
    }
}
