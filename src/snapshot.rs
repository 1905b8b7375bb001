//! PNG encoding of single frames

use crate::frame::Frame;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// Encode `frame` as an 8-bit RGBA PNG into `out`
pub fn encode_png<W: Write>(frame: &Frame, out: W) -> io::Result<()> {
    let mut encoder = png::Encoder::new(out, frame.width(), frame.height());
    encoder.set_color(png::ColorType::Rgba);
    encoder.set_depth(png::BitDepth::Eight);

    let mut writer = encoder.write_header().map_err(into_io)?;
    writer.write_image_data(&frame.to_rgba()).map_err(into_io)?;
    writer.finish().map_err(into_io)
}

/// Write `frame` to a PNG file, creating parent directories as needed
pub fn save_png(frame: &Frame, path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let file = File::create(path)?;
    let mut out = BufWriter::new(file);
    encode_png(frame, &mut out)?;
    out.flush()?;

    tracing::debug!("Saved {}x{} snapshot to {:?}", frame.width(), frame.height(), path);
    Ok(())
}

fn into_io(err: png::EncodingError) -> io::Error {
    match err {
        png::EncodingError::IoError(e) => e,
        other => io::Error::new(io::ErrorKind::InvalidData, other.to_string()),
    }
}
