//! Image conversion between decoded pictures and pixel grids.
//!
//! Decoding and resizing are done by the `image` crate; this module only
//! adapts its output to the display geometry and back (for previews).

use crate::PanelConfig;
use crate::error::{JumbotronError, Result};
use crate::pixel::{Pixel, PixelGrid};
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageReader, Rgb, RgbImage};
use std::io::Cursor;
use std::path::Path;

/// Decode an uploaded image (PNG, JPEG or GIF first frame).
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage> {
    image::load_from_memory(bytes).map_err(|e| JumbotronError::SourceUnreadable(e.to_string()))
}

/// Load an image file from disk.
pub fn load_image(path: &Path) -> Result<DynamicImage> {
    ImageReader::open(path)
        .map_err(|e| JumbotronError::SourceUnreadable(format!("{}: {}", path.display(), e)))?
        .with_guessed_format()
        .map_err(|e| JumbotronError::SourceUnreadable(format!("{}: {}", path.display(), e)))?
        .decode()
        .map_err(|e| JumbotronError::SourceUnreadable(format!("{}: {}", path.display(), e)))
}

/// Resize to the panel and tag every cell with `brightness`.
pub fn image_to_grid(img: &DynamicImage, panel: PanelConfig, brightness: u8) -> PixelGrid {
    let resized = if img.width() == panel.cols && img.height() == panel.rows {
        img.to_rgb8()
    } else {
        img.resize_exact(panel.cols, panel.rows, FilterType::Lanczos3)
            .to_rgb8()
    };

    resized
        .rows()
        .map(|row| {
            row.map(|px| Pixel::new(px[0], px[1], px[2], brightness))
                .collect()
        })
        .collect()
}

/// Render a grid back into an image (undimmed colors).
pub fn grid_to_image(grid: &[Vec<Pixel>]) -> RgbImage {
    let height = grid.len() as u32;
    let width = grid.first().map_or(0, Vec::len) as u32;
    let mut img = RgbImage::new(width, height);
    for (y, row) in grid.iter().enumerate() {
        for (x, p) in row.iter().enumerate().take(width as usize) {
            img.put_pixel(x as u32, y as u32, Rgb([p.r, p.g, p.b]));
        }
    }
    img
}

pub fn encode_png(img: &RgbImage) -> Result<Vec<u8>> {
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png)
        .map_err(|e| JumbotronError::Storage(std::io::Error::other(e)))?;
    Ok(out.into_inner())
}
