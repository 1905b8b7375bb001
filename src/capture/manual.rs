//! Push-driven capture backend
//!
//! Frames are delivered synchronously on whichever thread calls
//! [`ManualFeed::push`]. Useful for embedding frames that come from elsewhere
//! (a decoder, a network receiver) and for driving the pipeline in tests.

use super::catalog::DeviceLeases;
use super::traits::{
    CaptureBackend, CaptureStream, Device, Resolution, StopHandle, StreamCallback, StreamEvent,
};
use crate::frame::Frame;
use crate::utils::error::{CameraError, CameraResult};
use parking_lot::RwLock;
use std::sync::Arc;

struct FeedState {
    resolution: Resolution,
    /// Callback of the running stream, if any
    target: RwLock<Option<(StreamCallback, StopHandle)>>,
}

/// Producer side of a manual device
#[derive(Clone)]
pub struct ManualFeed {
    state: Arc<FeedState>,
}

impl ManualFeed {
    /// Deliver a frame to the running stream
    ///
    /// Returns `false` if the stream is not running and the frame was dropped.
    pub fn push(&self, frame: &Frame) -> bool {
        let target = self.state.target.read();
        match target.as_ref() {
            Some((callback, stop)) if !stop.is_signalled() => {
                callback(StreamEvent::Frame(frame));
                true
            }
            _ => false,
        }
    }

    /// Report a device fault and end the stream, as an unplugged camera would
    ///
    /// Returns `false` if the stream was not running.
    pub fn fail(&self, error: CameraError) -> bool {
        let target = self.state.target.read();
        match target.as_ref() {
            Some((callback, stop)) if !stop.is_signalled() => {
                callback(StreamEvent::Fault(error));
                stop.signal();
                true
            }
            _ => false,
        }
    }

    /// End the stream without reporting anything
    pub fn disconnect(&self) {
        if let Some((_, stop)) = self.state.target.read().as_ref() {
            stop.signal();
        }
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self.state.target.read().as_ref(), Some((_, stop)) if !stop.is_signalled())
    }
}

/// Backend whose devices are fed by the caller
#[derive(Default)]
pub struct ManualBackend {
    devices: RwLock<Vec<(Device, ManualFeed)>>,
    leases: DeviceLeases,
}

impl ManualBackend {
    /// Backend with no devices
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a device and get the handle that feeds it
    pub fn add_device(
        &self,
        id: impl Into<String>,
        name: impl Into<String>,
        resolution: Resolution,
    ) -> ManualFeed {
        let feed = ManualFeed {
            state: Arc::new(FeedState {
                resolution,
                target: RwLock::new(None),
            }),
        };
        self.devices
            .write()
            .push((Device::new(id, name), feed.clone()));
        feed
    }
}

impl CaptureBackend for ManualBackend {
    fn name(&self) -> &str {
        "manual"
    }

    fn enumerate(&self) -> CameraResult<Vec<Device>> {
        Ok(self
            .devices
            .read()
            .iter()
            .map(|(device, _)| device.clone())
            .collect())
    }

    fn leases(&self) -> &DeviceLeases {
        &self.leases
    }

    fn open(&self, device: &Device) -> CameraResult<Box<dyn CaptureStream>> {
        let devices = self.devices.read();
        let feed = devices
            .iter()
            .find(|(known, _)| known.id == device.id)
            .map(|(_, feed)| feed.clone())
            .ok_or_else(|| CameraError::DeviceUnavailable(format!("unknown device '{}'", device.id)))?;

        Ok(Box::new(ManualStream { feed }))
    }
}

struct ManualStream {
    feed: ManualFeed,
}

impl CaptureStream for ManualStream {
    fn start(&mut self, callback: StreamCallback, stop: StopHandle) -> CameraResult<()> {
        *self.feed.state.target.write() = Some((callback, stop));
        Ok(())
    }

    fn stop(&mut self) {
        if let Some((_, stop)) = self.feed.state.target.read().as_ref() {
            stop.signal();
        }
        // Taking the write lock waits out any push in flight.
        self.feed.state.target.write().take();
    }

    fn is_producing(&self) -> bool {
        self.feed.is_streaming()
    }

    fn resolution(&self) -> Option<Resolution> {
        Some(self.feed.state.resolution)
    }
}

impl Drop for ManualStream {
    fn drop(&mut self) {
        self.stop();
    }
}
