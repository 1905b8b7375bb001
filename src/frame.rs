//! Frame types
//!
//! A [`Frame`] is one decoded image sample from the capture stream. Frames are
//! owned values; the pipeline copies the producer's buffer before any consumer
//! sees it. [`DisplayFrame`] is the immutable, shareable form handed to the
//! display side.

use crate::utils::error::{CameraError, CameraResult};
use serde::{Deserialize, Serialize};
use std::ops::Deref;
use std::sync::Arc;
use std::time::Instant;

/// Pixel layout of a frame buffer (8 bits per channel)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Rgb,
    Rgba,
    Bgra,
}

impl PixelFormat {
    /// Bytes used by a single pixel
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Rgb => 3,
            PixelFormat::Rgba | PixelFormat::Bgra => 4,
        }
    }

    /// Pixel format used by the display side
    pub const DISPLAY: PixelFormat = PixelFormat::Bgra;

    fn read_rgba(&self, px: &[u8]) -> [u8; 4] {
        match self {
            PixelFormat::Rgb => [px[0], px[1], px[2], 255],
            PixelFormat::Rgba => [px[0], px[1], px[2], px[3]],
            PixelFormat::Bgra => [px[2], px[1], px[0], px[3]],
        }
    }

    fn write_rgba(&self, rgba: [u8; 4], out: &mut Vec<u8>) {
        match self {
            PixelFormat::Rgb => out.extend_from_slice(&rgba[..3]),
            PixelFormat::Rgba => out.extend_from_slice(&rgba),
            PixelFormat::Bgra => out.extend_from_slice(&[rgba[2], rgba[1], rgba[0], rgba[3]]),
        }
    }
}

/// One decoded image sample with its capture time
#[derive(Debug, Clone)]
pub struct Frame {
    width: u32,
    height: u32,
    format: PixelFormat,
    data: Vec<u8>,
    captured_at: Instant,
}

impl Frame {
    /// Wrap a decoded pixel buffer
    ///
    /// Fails if the buffer length does not match `width * height * bpp`.
    pub fn new(
        width: u32,
        height: u32,
        format: PixelFormat,
        data: Vec<u8>,
        captured_at: Instant,
    ) -> CameraResult<Self> {
        let expected = width as usize * height as usize * format.bytes_per_pixel();
        if data.len() != expected {
            return Err(CameraError::Pipeline(format!(
                "frame buffer is {} bytes, expected {} for {}x{} {:?}",
                data.len(),
                expected,
                width,
                height,
                format
            )));
        }

        Ok(Self {
            width,
            height,
            format,
            data,
            captured_at,
        })
    }

    /// Solid-colour frame, mostly useful for sources that have nothing to show yet
    pub fn filled(width: u32, height: u32, rgb: [u8; 3], captured_at: Instant) -> Self {
        let mut data = Vec::with_capacity(width as usize * height as usize * 3);
        for _ in 0..(width as usize * height as usize) {
            data.extend_from_slice(&rgb);
        }
        Self {
            width,
            height,
            format: PixelFormat::Rgb,
            data,
            captured_at,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    /// Convert into another pixel layout, producing a new buffer
    pub fn convert(&self, target: PixelFormat) -> Frame {
        if target == self.format {
            return self.clone();
        }

        let bpp = self.format.bytes_per_pixel();
        let mut out =
            Vec::with_capacity(self.width as usize * self.height as usize * target.bytes_per_pixel());
        for px in self.data.chunks_exact(bpp) {
            target.write_rgba(self.format.read_rgba(px), &mut out);
        }

        Frame {
            width: self.width,
            height: self.height,
            format: target,
            data: out,
            captured_at: self.captured_at,
        }
    }

    /// RGBA bytes of this frame (copy)
    pub fn to_rgba(&self) -> Vec<u8> {
        self.convert(PixelFormat::Rgba).data
    }

    /// Iterate over the Rec.601 luma value of every pixel
    pub fn luma(&self) -> impl Iterator<Item = u8> + '_ {
        let format = self.format;
        self.data
            .chunks_exact(format.bytes_per_pixel())
            .map(move |px| {
                let [r, g, b, _] = format.read_rgba(px);
                ((r as u32 * 299 + g as u32 * 587 + b as u32 * 114) / 1000) as u8
            })
    }

    /// Rendering-ready immutable copy in the display pixel format
    pub fn to_display(&self) -> DisplayFrame {
        DisplayFrame(Arc::new(self.convert(PixelFormat::DISPLAY)))
    }
}

/// Immutable frame ready for presentation
///
/// Cheap to clone; every clone shares the same pixels.
#[derive(Debug, Clone)]
pub struct DisplayFrame(Arc<Frame>);

impl DisplayFrame {
    /// Whether two handles point to the same pixels
    pub fn ptr_eq(&self, other: &DisplayFrame) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Deref for DisplayFrame {
    type Target = Frame;

    fn deref(&self) -> &Frame {
        &self.0
    }
}
