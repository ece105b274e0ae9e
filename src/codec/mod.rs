//! Speech codec boundary
//!
//! The codec is an injected capability: the pipeline talks to [`VoiceCodec`]
//! and the handle traits only, so the core runs against a fake codec in tests.
//! Handles are owned, move-only values; releasing is dropping.

pub mod decoder;
pub mod encoder;

use bytes::Bytes;

use crate::config::SUPPORTED_SAMPLE_RATES;
use crate::error::CodecError;

pub use decoder::OpusFrameDecoder;
pub use encoder::OpusFrameEncoder;

/// Encoder tuning, validated before any native resource is created
#[derive(Debug, Clone)]
pub struct EncoderParams {
    pub sample_rate: u32,
    pub channels: u16,
    /// Frame duration in milliseconds
    pub frame_ms: u32,
    /// Target bitrate in bits per second
    pub bitrate: u32,
    /// Constant bitrate mode
    pub cbr: bool,
    /// Discontinuous transmission
    pub dtx: bool,
    /// Encoder complexity, 0-10
    pub complexity: u8,
    /// Hint the encoder toward voice content
    pub signal_voice: bool,
}

impl EncoderParams {
    pub fn voice(sample_rate: u32, channels: u16, frame_ms: u32) -> Self {
        Self {
            sample_rate,
            channels,
            frame_ms,
            bitrate: crate::constants::DEFAULT_BITRATE,
            cbr: true,
            dtx: false,
            complexity: 5,
            signal_voice: true,
        }
    }

    pub fn validate(&self) -> Result<(), CodecError> {
        validate_rate_channels(self.sample_rate, self.channels)
    }

    /// Samples (all channels) in one frame at these parameters
    pub fn frame_samples(&self) -> usize {
        self.sample_rate as usize * self.channels as usize * self.frame_ms as usize / 1000
    }
}

pub(crate) fn validate_rate_channels(sample_rate: u32, channels: u16) -> Result<(), CodecError> {
    if !SUPPORTED_SAMPLE_RATES.contains(&sample_rate) {
        return Err(CodecError::UnsupportedSampleRate(sample_rate));
    }
    if channels != 1 && channels != 2 {
        return Err(CodecError::UnsupportedChannels(channels));
    }
    Ok(())
}

/// Encodes exactly one PCM frame per call
pub trait FrameEncoder: Send {
    /// Encode one frame of interleaved i16 samples to a compressed packet.
    ///
    /// `pcm` must contain exactly `frame_samples()` samples.
    fn encode(&mut self, pcm: &[i16]) -> Result<Bytes, CodecError>;

    /// Samples (all channels) expected per frame
    fn frame_samples(&self) -> usize;
}

/// Decodes one compressed packet per call
pub trait FrameDecoder: Send {
    /// Decode one packet into `pcm_out`, returning samples per channel written.
    ///
    /// `pcm_out` must be sized to at least `frame_samples()`.
    fn decode(&mut self, packet: &[u8], pcm_out: &mut [i16]) -> Result<usize, CodecError>;

    /// Samples (all channels) produced for one full frame
    fn frame_samples(&self) -> usize;
}

/// Factory capability for encoder/decoder instances
pub trait VoiceCodec: Send + Sync {
    fn create_encoder(&self, params: &EncoderParams) -> Result<Box<dyn FrameEncoder>, CodecError>;

    fn create_decoder(
        &self,
        sample_rate: u32,
        channels: u16,
        frame_ms: u32,
    ) -> Result<Box<dyn FrameDecoder>, CodecError>;
}

/// Opus implementation of [`VoiceCodec`]
#[derive(Debug, Default)]
pub struct OpusCodec;

impl VoiceCodec for OpusCodec {
    fn create_encoder(&self, params: &EncoderParams) -> Result<Box<dyn FrameEncoder>, CodecError> {
        Ok(Box::new(OpusFrameEncoder::new(params.clone())?))
    }

    fn create_decoder(
        &self,
        sample_rate: u32,
        channels: u16,
        frame_ms: u32,
    ) -> Result<Box<dyn FrameDecoder>, CodecError> {
        Ok(Box::new(OpusFrameDecoder::new(sample_rate, channels, frame_ms)?))
    }
}

/// Convert little-endian PCM bytes to interleaved i16 samples.
///
/// Rejects odd-length input rather than silently dropping the tail byte.
pub fn bytes_to_i16le(data: &[u8]) -> Result<Vec<i16>, CodecError> {
    if data.len() % 2 != 0 {
        return Err(CodecError::InvalidFrameSize(data.len()));
    }
    Ok(data
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

/// Convert interleaved i16 samples to little-endian PCM bytes
pub fn i16le_to_bytes(samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        out.extend_from_slice(&sample.to_le_bytes());
    }
    out
}
