//! motioncam - live camera preview with motion detection and recording.
//!
//! Frames from a capture device are copied, optionally recorded, classified
//! as motion / no motion, and handed to a display consumer. The
//! [`CameraController`] ties the pieces together.

pub mod camera;
pub mod capture;
pub mod config;
pub mod display;
pub mod frame;
pub mod motion;
pub mod pipeline;
pub mod recorder;
pub mod snapshot;
pub mod utils;

pub use camera::{CameraController, CameraControllerBuilder, CameraEvent};
pub use config::CameraConfig;
pub use frame::{DisplayFrame, Frame, PixelFormat};
pub use motion::{DetectionResult, MotionLabel, MOTION_THRESHOLD};
pub use pipeline::DetectionStatus;
pub use utils::error::{CameraError, CameraResult, ErrorResponse};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global tracing subscriber
///
/// `RUST_LOG` overrides the default filter. Safe to call more than once.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "motioncam=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
