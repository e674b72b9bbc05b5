use crate::api::error::{AppError, ControlledError};
use crate::config::StorageConfig;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{ColorType, DynamicImage, ImageError, ImageOutputFormat};
use std::io::Cursor;
use std::path::Path;
use tracing::debug;

/// Derives the fixed-width preview stored next to every uploaded image.
#[derive(Debug, Clone, Copy)]
pub struct ThumbnailService {
    width: u32,
    quality: u8,
}

impl ThumbnailService {
    pub fn new(width: u32, quality: u8) -> Self {
        Self { width, quality }
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(config.thumbnail_width, config.thumbnail_quality)
    }

    /// Reads `source` and returns the encoded thumbnail bytes.
    /// `extension` picks the output codec (`.png` stays PNG, everything else is JPEG).
    pub async fn generate(&self, source: &Path, extension: &str) -> Result<Vec<u8>, AppError> {
        let data = tokio::fs::read(source).await?;
        let png = extension.eq_ignore_ascii_case(".png");
        let (width, quality) = (self.width, self.quality);

        debug!("Generating thumbnail for {:?} ({} bytes)", source, data.len());

        tokio::task::spawn_blocking(move || render(&data, width, quality, png))
            .await
            .map_err(|e| AppError::Internal(format!("Thumbnail task failed: {}", e)))?
    }
}

fn render(data: &[u8], width: u32, quality: u8, png: bool) -> Result<Vec<u8>, AppError> {
    let img = image::load_from_memory(data).map_err(decode_error)?;
    let thumbnail = resize_to_width(&img, width);

    let mut out = Vec::new();
    if png {
        thumbnail.write_to(&mut Cursor::new(&mut out), ImageOutputFormat::Png)?;
    } else {
        // JPEG has no alpha channel
        let rgb = thumbnail.to_rgb8();
        JpegEncoder::new_with_quality(&mut out, quality).encode(
            rgb.as_raw(),
            rgb.width(),
            rgb.height(),
            ColorType::Rgb8,
        )?;
    }
    Ok(out)
}

/// Scales to exactly `width` pixels wide, keeping the aspect ratio.
fn resize_to_width(img: &DynamicImage, width: u32) -> DynamicImage {
    let (w, h) = (img.width().max(1), img.height());
    let height = ((h as u64 * width as u64) / w as u64).max(1) as u32;
    img.resize_exact(width, height, FilterType::Triangle)
}

fn decode_error(e: ImageError) -> AppError {
    match e {
        ImageError::Decoding(_) | ImageError::Unsupported(_) => {
            ControlledError::warn(format!("Image could not be read: {}", e)).into()
        }
        other => AppError::Image(other),
    }
}
