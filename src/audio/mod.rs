//! Audio subsystem module

pub mod capture;
pub mod device;
pub mod playback;
pub mod queue;

pub use capture::{CaptureEngine, CaptureSink};
pub use device::{CaptureDevice, CpalDeviceProvider, DeviceProvider, RenderDevice, RenderState};
pub use playback::{PlaybackEngine, PlaybackEvents};
pub use queue::PlaybackQueue;
