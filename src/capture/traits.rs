//! Capture trait definitions
//!
//! Platform-agnostic interfaces between the capture layer and a concrete
//! frame source.

use crate::frame::Frame;
use super::catalog::DeviceLeases;
use crate::utils::error::{CameraError, CameraResult};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// A capture device as reported by enumeration
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    /// Opaque backend handle (index, moniker, path)
    pub id: String,

    /// Human readable name
    pub name: String,
}

impl Device {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Video resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

/// What a stream delivers to its callback
#[derive(Debug)]
pub enum StreamEvent<'a> {
    /// A decoded frame, only valid for the duration of the call
    Frame(&'a Frame),

    /// The device stopped producing; no further events follow
    Fault(CameraError),
}

/// Callback invoked on the producer thread
pub type StreamCallback = Arc<dyn Fn(StreamEvent<'_>) + Send + Sync>;

/// Cross-thread "stop producing" flag
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_signalled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Source of devices and streams
pub trait CaptureBackend: Send + Sync {
    /// Backend name for logging
    fn name(&self) -> &str;

    /// List the devices this backend can open, in presentation order
    fn enumerate(&self) -> CameraResult<Vec<Device>>;

    /// Registry of bound devices, shared by every user of this backend
    fn leases(&self) -> &DeviceLeases;

    /// Bind to a device
    ///
    /// Returns `DeviceUnavailable` if the handle does not name a device this
    /// backend can open.
    fn open(&self, device: &Device) -> CameraResult<Box<dyn CaptureStream>>;
}

/// An opened device that can deliver frames asynchronously
pub trait CaptureStream: Send {
    /// Begin delivering frames to `callback` until `stop` is signalled
    ///
    /// A stream that can no longer produce delivers one
    /// [`StreamEvent::Fault`] and exits.
    fn start(&mut self, callback: StreamCallback, stop: StopHandle) -> CameraResult<()>;

    /// Halt delivery
    ///
    /// No callback invocation may begin after this returns. When called from
    /// a thread other than the producer it also waits for the invocation in
    /// flight, if any.
    fn stop(&mut self);

    /// Whether the producer is still alive and delivering
    fn is_producing(&self) -> bool;

    /// Negotiated resolution, once known
    fn resolution(&self) -> Option<Resolution>;
}

/// Join a producer thread unless we are running on it
///
/// A producer that tears its own session down (pipeline failure) cannot join
/// itself; its loop exits as soon as the current callback returns.
pub(crate) fn join_producer(handle: JoinHandle<()>) {
    if handle.thread().id() == std::thread::current().id() {
        tracing::debug!("Producer stopping itself, not joining");
        return;
    }

    let name = handle.thread().name().unwrap_or("producer").to_string();
    if handle.join().is_err() {
        tracing::error!("Capture thread '{}' panicked", name);
    }
}
