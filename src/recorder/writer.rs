//! Video writer interfaces
//!
//! The recording controller only talks to [`VideoWriter`]; the container and
//! codec are up to the writer.

use super::ffmpeg::{FfmpegSettings, FfmpegWriter};
use super::sequence::{PngSequenceWriter, SEQUENCE_EXTENSION};
use crate::frame::Frame;
use std::io;
use std::path::Path;
use std::time::Duration;

/// Sink for the frames of one recording
pub trait VideoWriter: Send {
    /// Write the time-zero frame
    fn write_frame(&mut self, frame: &Frame) -> io::Result<()> {
        self.write_frame_at(frame, Duration::ZERO)
    }

    /// Write a frame at `timestamp` relative to the first frame
    fn write_frame_at(&mut self, frame: &Frame, timestamp: Duration) -> io::Result<()>;

    /// Flush and close the output. Closing twice is a no-op.
    fn close(&mut self) -> io::Result<()>;
}

/// Opens writers for new recordings
pub trait WriterFactory: Send + Sync {
    fn open(&self, path: &Path, width: u32, height: u32) -> io::Result<Box<dyn VideoWriter>>;
}

/// Chooses a writer from the output file extension
///
/// `.frames` produces a PNG sequence directory; anything else is encoded by
/// FFmpeg.
#[derive(Debug, Clone, Default)]
pub struct DefaultWriterFactory {
    pub ffmpeg: FfmpegSettings,
}

impl DefaultWriterFactory {
    pub fn new(ffmpeg: FfmpegSettings) -> Self {
        Self { ffmpeg }
    }
}

impl WriterFactory for DefaultWriterFactory {
    fn open(&self, path: &Path, width: u32, height: u32) -> io::Result<Box<dyn VideoWriter>> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();

        if extension == SEQUENCE_EXTENSION {
            Ok(Box::new(PngSequenceWriter::create(path, width, height)?))
        } else {
            Ok(Box::new(FfmpegWriter::spawn(&self.ffmpeg, path, width, height)?))
        }
    }
}

/// Reject frames that do not match the dimensions a writer was opened with
pub(crate) fn check_dimensions(frame: &Frame, width: u32, height: u32) -> io::Result<()> {
    if frame.dimensions() != (width, height) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "frame is {}x{}, writer expects {}x{}",
                frame.width(),
                frame.height(),
                width,
                height
            ),
        ));
    }
    Ok(())
}
