//! Device catalog
//!
//! Wraps a backend's enumeration and hands out exclusive device leases so the
//! same device is never bound twice.

use super::traits::{CaptureBackend, CaptureStream, Device};
use crate::utils::error::{CameraError, CameraResult};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

/// Ids of the devices currently bound, shared by every catalog on a backend
#[derive(Debug, Clone, Default)]
pub struct DeviceLeases(Arc<Mutex<HashSet<String>>>);

impl DeviceLeases {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_leased(&self, id: &str) -> bool {
        self.0.lock().contains(id)
    }
}

/// Enumerates devices and hands out leases
#[derive(Clone)]
pub struct DeviceCatalog {
    backend: Arc<dyn CaptureBackend>,
}

impl DeviceCatalog {
    pub fn new(backend: Arc<dyn CaptureBackend>) -> Self {
        Self { backend }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Enumerate devices, failing with `EmptyCatalog` if there are none
    pub fn enumerate(&self) -> CameraResult<Vec<Device>> {
        let devices = self.backend.enumerate()?;
        if devices.is_empty() {
            tracing::warn!("No capture devices found on backend '{}'", self.backend.name());
            return Err(CameraError::EmptyCatalog);
        }

        tracing::debug!(
            "Backend '{}' reported {} device(s)",
            self.backend.name(),
            devices.len()
        );
        Ok(devices)
    }

    /// Open a device for exclusive use
    ///
    /// Fails with `DeviceUnavailable` while any other catalog on the same
    /// backend holds the device.
    pub fn acquire(&self, device: &Device) -> CameraResult<(DeviceLease, Box<dyn CaptureStream>)> {
        let leases = self.backend.leases().clone();
        let mut in_use = leases.0.lock();
        if in_use.contains(&device.id) {
            return Err(CameraError::DeviceUnavailable(format!(
                "'{}' is already in use",
                device.name
            )));
        }

        let stream = self.backend.open(device)?;
        in_use.insert(device.id.clone());
        drop(in_use);

        let lease = DeviceLease {
            device: device.clone(),
            leases,
        };
        Ok((lease, stream))
    }

    pub fn is_in_use(&self, device: &Device) -> bool {
        self.backend.leases().is_leased(&device.id)
    }
}

/// Exclusive claim on a device, released on drop
pub struct DeviceLease {
    device: Device,
    leases: DeviceLeases,
}

impl DeviceLease {
    pub fn device(&self) -> &Device {
        &self.device
    }
}

impl Drop for DeviceLease {
    fn drop(&mut self) {
        self.leases.0.lock().remove(&self.device.id);
        tracing::debug!("Released device '{}'", self.device.name);
    }
}
