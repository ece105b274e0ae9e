//! Opus encoder wrapper
//!
//! Wraps one Opus encoder instance bound to (sample rate, channels, frame
//! duration). Encodes exactly one frame of interleaved i16 samples per call.

use bytes::Bytes;
use opus::{Application, Bitrate, Channels, Encoder};

use crate::codec::{EncoderParams, FrameEncoder};
use crate::error::CodecError;

/// Largest packet one Opus frame can produce, with headroom
const ENCODE_BUFFER_BYTES: usize = 4000;

/// Opus-backed [`FrameEncoder`]
pub struct OpusFrameEncoder {
    encoder: Encoder,
    frame_samples: usize,
    /// Encoding buffer, reused to avoid per-frame allocations
    encode_buffer: Vec<u8>,
    frames_encoded: u64,
}

impl OpusFrameEncoder {
    pub fn new(params: EncoderParams) -> Result<Self, CodecError> {
        params.validate()?;

        let channels = match params.channels {
            1 => Channels::Mono,
            2 => Channels::Stereo,
            other => return Err(CodecError::UnsupportedChannels(other)),
        };

        let mut encoder = Encoder::new(params.sample_rate, channels, Application::Voip)
            .map_err(|e| CodecError::EncoderInit(e.to_string()))?;

        encoder
            .set_bitrate(Bitrate::Bits(params.bitrate as i32))
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set bitrate: {}", e)))?;

        encoder
            .set_vbr(!params.cbr)
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set VBR: {}", e)))?;

        encoder
            .set_complexity(params.complexity.min(10) as i32)
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set complexity: {}", e)))?;

        encoder
            .set_dtx(params.dtx)
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set DTX: {}", e)))?;

        let signal = if params.signal_voice {
            opus::Signal::Voice
        } else {
            opus::Signal::Auto
        };
        encoder
            .set_signal(signal)
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set signal type: {}", e)))?;

        tracing::info!(
            "Opus encoder created: rate={}, channels={}, frame={}ms, bitrate={}, cbr={}",
            params.sample_rate,
            params.channels,
            params.frame_ms,
            params.bitrate,
            params.cbr
        );

        Ok(Self {
            encoder,
            frame_samples: params.frame_samples(),
            encode_buffer: vec![0u8; ENCODE_BUFFER_BYTES],
            frames_encoded: 0,
        })
    }

    /// Frames encoded since creation
    pub fn frames_encoded(&self) -> u64 {
        self.frames_encoded
    }
}

impl FrameEncoder for OpusFrameEncoder {
    fn encode(&mut self, pcm: &[i16]) -> Result<Bytes, CodecError> {
        if pcm.len() != self.frame_samples {
            return Err(CodecError::InvalidFrameSize(pcm.len()));
        }

        let size = self
            .encoder
            .encode(pcm, &mut self.encode_buffer)
            .map_err(|e| CodecError::EncodingFailed(e.to_string()))?;

        self.frames_encoded += 1;
        Ok(Bytes::copy_from_slice(&self.encode_buffer[..size]))
    }

    fn frame_samples(&self) -> usize {
        self.frame_samples
    }
}
