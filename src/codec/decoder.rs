//! Opus decoder wrapper
//!
//! Wraps one Opus decoder instance bound to (sample rate, channels). Decodes
//! one compressed packet per call into a caller-provided i16 buffer.

use opus::{Channels, Decoder};

use crate::codec::{validate_rate_channels, FrameDecoder};
use crate::error::CodecError;

/// Opus-backed [`FrameDecoder`]
pub struct OpusFrameDecoder {
    decoder: Decoder,
    channels: u16,
    frame_samples: usize,
    frames_decoded: u64,
}

impl OpusFrameDecoder {
    pub fn new(sample_rate: u32, channels: u16, frame_ms: u32) -> Result<Self, CodecError> {
        validate_rate_channels(sample_rate, channels)?;

        let opus_channels = match channels {
            1 => Channels::Mono,
            2 => Channels::Stereo,
            other => return Err(CodecError::UnsupportedChannels(other)),
        };

        let decoder = Decoder::new(sample_rate, opus_channels)
            .map_err(|e| CodecError::DecoderInit(e.to_string()))?;

        tracing::info!(
            "Opus decoder created: rate={}, channels={}, frame={}ms",
            sample_rate,
            channels,
            frame_ms
        );

        Ok(Self {
            decoder,
            channels,
            frame_samples: sample_rate as usize * channels as usize * frame_ms as usize / 1000,
            frames_decoded: 0,
        })
    }

    /// Packets decoded since creation
    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }
}

impl FrameDecoder for OpusFrameDecoder {
    fn decode(&mut self, packet: &[u8], pcm_out: &mut [i16]) -> Result<usize, CodecError> {
        let samples_per_channel = self
            .decoder
            .decode(packet, pcm_out, false)
            .map_err(|e| CodecError::DecodingFailed(e.to_string()))?;

        if samples_per_channel == 0 {
            return Err(CodecError::DecodingFailed("no output produced".into()));
        }

        self.frames_decoded += 1;
        Ok(samples_per_channel)
    }

    fn frame_samples(&self) -> usize {
        self.frame_samples
    }
}
