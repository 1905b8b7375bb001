//! Frame sources
//!
//! Device enumeration, the capture session, and the concrete backends that
//! produce frames.

pub mod catalog;
pub mod manual;
pub mod session;
pub mod synthetic;
pub mod traits;

#[cfg(feature = "webcam")]
pub mod webcam;

pub use catalog::{DeviceCatalog, DeviceLease, DeviceLeases};
pub use manual::{ManualBackend, ManualFeed};
pub use session::{CaptureSession, CaptureState, SessionHalt};
pub use synthetic::SyntheticBackend;
pub use traits::{
    CaptureBackend, CaptureStream, Device, Resolution, StopHandle, StreamCallback, StreamEvent,
};

#[cfg(feature = "webcam")]
pub use webcam::WebcamBackend;
