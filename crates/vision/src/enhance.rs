use std::io::Cursor;

use image::{DynamicImage, GrayImage, ImageBuffer, Luma};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EnhanceError {
    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("failed to encode enhanced image: {0}")]
    Encode(String),
}

/// Cleans up a receipt photo before text recognition. Implementations
/// take the uploaded bytes and return bytes in a format the recognizer
/// accepts.
pub trait ImageEnhancer: Send + Sync {
    fn enhance(&self, data: &[u8]) -> Result<Vec<u8>, EnhanceError>;
}

/// Phone photos come in far larger than recognition needs; thermal
/// print is low-contrast gray on near-white. Shrink, flatten to
/// grayscale, and stretch the contrast, then hand back PNG bytes.
pub struct LocalEnhancer {
    max_dimension: u32,
}

/// Receipt strips are narrow; anything past this many pixels on the
/// long edge adds recognition latency without adding legibility.
const DEFAULT_MAX_DIMENSION: u32 = 2800;

impl LocalEnhancer {
    pub fn new(max_dimension: u32) -> Self {
        Self { max_dimension }
    }

    fn shrink(&self, img: DynamicImage) -> DynamicImage {
        if img.width() > self.max_dimension || img.height() > self.max_dimension {
            img.resize(
                self.max_dimension,
                self.max_dimension,
                image::imageops::FilterType::Lanczos3,
            )
        } else {
            img
        }
    }
}

impl Default for LocalEnhancer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DIMENSION)
    }
}

impl ImageEnhancer for LocalEnhancer {
    fn enhance(&self, data: &[u8]) -> Result<Vec<u8>, EnhanceError> {
        let img = image::load_from_memory(data)?;
        let gray = stretch_contrast(self.shrink(img).to_luma8());
        to_png(DynamicImage::ImageLuma8(gray))
    }
}

/// Min-max stretch so the darkest pixel maps to 0 and the lightest to
/// 255. A uniform image has no range and is returned untouched.
fn stretch_contrast(gray: GrayImage) -> GrayImage {
    let (min_px, max_px) = gray
        .pixels()
        .fold((255u8, 0u8), |(mn, mx), p| (mn.min(p[0]), mx.max(p[0])));
    if max_px == min_px {
        return gray;
    }
    let range = (max_px - min_px) as u32;
    ImageBuffer::from_fn(gray.width(), gray.height(), |x, y| {
        let p = gray.get_pixel(x, y)[0];
        Luma([((p - min_px) as u32 * 255 / range) as u8])
    })
}

fn to_png(img: DynamicImage) -> Result<Vec<u8>, EnhanceError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .map_err(|e| EnhanceError::Encode(e.to_string()))?;
    Ok(buf)
}
