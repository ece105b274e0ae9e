//! Error types for the voice pipeline

use thiserror::Error;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Audio device and engine errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Device read failed: {0}")]
    ReadFailed(String),

    #[error("Device write failed: {0}")]
    WriteFailed(String),

    #[error("Device is closed")]
    DeviceClosed,

    #[error("Not initialized")]
    NotInitialized,

    #[error("Already initialized")]
    AlreadyInitialized,
}

/// Codec errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Encoder initialization failed: {0}")]
    EncoderInit(String),

    #[error("Decoder initialization failed: {0}")]
    DecoderInit(String),

    #[error("Encoding failed: {0}")]
    EncodingFailed(String),

    #[error("Decoding failed: {0}")]
    DecodingFailed(String),

    #[error("Invalid frame size: {0}")]
    InvalidFrameSize(usize),

    #[error("Unsupported sample rate: {0}")]
    UnsupportedSampleRate(u32),

    #[error("Unsupported channel count: {0}")]
    UnsupportedChannels(u16),
}

/// Configuration errors, rejected before any resource is acquired
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Unsupported sample rate: {0}")]
    SampleRate(u32),

    #[error("Unsupported channel count: {0}")]
    Channels(u16),

    #[error("Unsupported bit depth: {0}")]
    BitDepth(u16),
}

/// Stable error codes delivered through the listener callbacks.
///
/// The integer values are part of the public contract and never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ErrorCode {
    NotInitialized = 1,
    AlreadyInitialized = 2,
    CaptureDeviceInit = 3,
    EncoderInit = 4,
    CaptureRuntime = 5,
    RenderDeviceInit = 6,
    DecoderInit = 7,
    RenderRuntime = 8,
}

impl ErrorCode {
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;
