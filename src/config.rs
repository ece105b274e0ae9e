//! Session configuration
//!
//! A [`SessionConfig`] is supplied when the controller is constructed and is
//! immutable while a session is active; replacing it takes effect on the next
//! initialization only.

use crate::error::ConfigError;

/// Sample rates accepted by both the device layer and the codec.
pub const SUPPORTED_SAMPLE_RATES: [u32; 5] = [8000, 12000, 16000, 24000, 48000];

/// Duration of one capture/encode frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDuration {
    Ms20,
    Ms40,
    Ms60,
}

impl FrameDuration {
    pub fn millis(self) -> u32 {
        match self {
            FrameDuration::Ms20 => 20,
            FrameDuration::Ms40 => 40,
            FrameDuration::Ms60 => 60,
        }
    }
}

/// Wire format of frames delivered by capture and accepted by playback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    /// Raw PCM, 16-bit signed little-endian
    Raw,
    /// Codec-compressed packets
    Compressed,
}

/// Full configuration for a capture/playback session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Sample rate in Hz, one of [`SUPPORTED_SAMPLE_RATES`]
    pub sample_rate: u32,
    /// 1 = mono, 2 = stereo
    pub channels: u16,
    /// 8 or 16 bits per sample
    pub bit_depth: u16,
    /// Capture framing granularity
    pub frame_duration: FrameDuration,
    /// Format delivered by the capture callback path
    pub format: AudioFormat,
    /// Echo cancellation request, passed through to the device layer
    pub enable_aec: bool,
    /// Automatic gain control request, passed through
    pub enable_agc: bool,
    /// Noise suppression request, passed through
    pub enable_ns: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sample_rate: crate::constants::DEFAULT_SAMPLE_RATE,
            channels: crate::constants::DEFAULT_CHANNELS,
            bit_depth: 16,
            frame_duration: FrameDuration::Ms60,
            format: AudioFormat::Raw,
            enable_aec: false,
            enable_agc: false,
            enable_ns: false,
        }
    }
}

impl SessionConfig {
    /// Validate the configuration before any resource is acquired
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !SUPPORTED_SAMPLE_RATES.contains(&self.sample_rate) {
            return Err(ConfigError::SampleRate(self.sample_rate));
        }
        if self.channels != 1 && self.channels != 2 {
            return Err(ConfigError::Channels(self.channels));
        }
        if self.bit_depth != 8 && self.bit_depth != 16 {
            return Err(ConfigError::BitDepth(self.bit_depth));
        }
        Ok(())
    }

    /// Bytes per sample at the configured bit depth
    pub fn bytes_per_sample(&self) -> usize {
        self.bit_depth as usize / 8
    }

    /// Size in bytes of exactly one frame
    pub fn frame_bytes(&self) -> usize {
        self.sample_rate as usize
            * self.bytes_per_sample()
            * self.channels as usize
            * self.frame_duration.millis() as usize
            / 1000
    }

    /// Samples (all channels) in one frame
    pub fn frame_samples(&self) -> usize {
        self.sample_rate as usize * self.channels as usize * self.frame_duration.millis() as usize
            / 1000
    }

    /// Playback queue capacity: one second of raw audio at the session rate
    pub fn playback_queue_capacity(&self) -> usize {
        self.sample_rate as usize * self.channels as usize * 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SessionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sample_rate, crate::constants::DEFAULT_SAMPLE_RATE);
        assert_eq!(config.sample_rate, 16000);
        assert_eq!(config.channels, 1);
        assert_eq!(config.frame_duration.millis(), 60);
    }

    #[test]
    fn test_frame_bytes() {
        // 16 kHz mono 16-bit 60 ms = 1920 bytes
        let config = SessionConfig::default();
        assert_eq!(config.frame_bytes(), 1920);
        assert_eq!(config.frame_samples(), 960);

        let stereo = SessionConfig {
            sample_rate: 48000,
            channels: 2,
            frame_duration: FrameDuration::Ms20,
            ..SessionConfig::default()
        };
        assert_eq!(stereo.frame_bytes(), 48000 * 2 * 2 * 20 / 1000);
    }

    #[test]
    fn test_frame_bytes_divides_accumulated_reads() {
        // A whole number of frames always fits exactly into any multiple of
        // the frame length, for every supported rate/duration combination.
        for &rate in &SUPPORTED_SAMPLE_RATES {
            for duration in [FrameDuration::Ms20, FrameDuration::Ms40, FrameDuration::Ms60] {
                for channels in [1u16, 2] {
                    let config = SessionConfig {
                        sample_rate: rate,
                        channels,
                        frame_duration: duration,
                        ..SessionConfig::default()
                    };
                    let frame = config.frame_bytes();
                    assert!(frame > 0);
                    assert_eq!(frame % (config.bytes_per_sample() * channels as usize), 0);
                    assert_eq!((frame * 7) % frame, 0);
                }
            }
        }
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = SessionConfig::default();
        config.sample_rate = 44100;
        assert!(matches!(config.validate(), Err(ConfigError::SampleRate(44100))));

        let mut config = SessionConfig::default();
        config.channels = 3;
        assert!(matches!(config.validate(), Err(ConfigError::Channels(3))));

        let mut config = SessionConfig::default();
        config.bit_depth = 24;
        assert!(matches!(config.validate(), Err(ConfigError::BitDepth(24))));
    }

    #[test]
    fn test_queue_capacity_is_one_second() {
        let config = SessionConfig::default();
        assert_eq!(config.playback_queue_capacity(), 32000);
    }
}
