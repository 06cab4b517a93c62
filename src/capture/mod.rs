//! Capture sources
//!
//! Stream handles, the device acquisition manager, and an in-memory device
//! provider. Real device access is supplied by the host through
//! [`DeviceProvider`].

pub mod devices;
pub mod stream;
pub mod synthetic;
pub mod traits;

pub use devices::{DeviceManager, DeviceSet};
pub use stream::CaptureStream;
pub use traits::{CaptureConstraints, DeviceProvider, MediaSource, Resolution, StreamKind};
