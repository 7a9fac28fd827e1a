//! Image preparation for publishing
//!
//! The platform only accepts photos within a narrow aspect-ratio range, so
//! every image is letterboxed onto a white square before upload.

use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::{imageops, Rgba, RgbaImage};
use reqwest::Client;
use std::time::Duration;

use crate::error::{ImageError, Result};

pub mod mock;

const JPEG_QUALITY: u8 = 90;
const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);

#[async_trait]
pub trait ImageTransform: Send + Sync {
    /// Fetch the media at `source_url` and return it as a square JPEG.
    async fn square_pad(&self, source_url: &str) -> Result<Vec<u8>>;
}

/// Downloads media over HTTP and pads it with [`square_pad_bytes`].
pub struct SquarePadTransform {
    http: Client,
}

impl SquarePadTransform {
    pub fn new() -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| ImageError::Download(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { http })
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| ImageError::Download(format!("{}: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ImageError::Download(format!("{} returned {}", url, status)).into());
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ImageError::Download(format!("{}: {}", url, e)))?;

        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl ImageTransform for SquarePadTransform {
    async fn square_pad(&self, source_url: &str) -> Result<Vec<u8>> {
        let bytes = self.download(source_url).await?;
        // Decoding and encoding are CPU bound.
        tokio::task::spawn_blocking(move || square_pad_bytes(&bytes))
            .await
            .map_err(|e| ImageError::Encode(format!("Image task failed: {}", e)))?
    }
}

/// Centre an encoded image on a white square of side `max(width, height)`
/// and re-encode it as JPEG. Transparent pixels end up white.
pub fn square_pad_bytes(bytes: &[u8]) -> Result<Vec<u8>> {
    let source = image::load_from_memory(bytes)
        .map_err(|e| ImageError::Decode(e.to_string()))?
        .to_rgba8();

    let (width, height) = source.dimensions();
    if width == 0 || height == 0 {
        return Err(ImageError::Decode("Image has no pixels".to_string()).into());
    }

    let side = width.max(height);
    let mut canvas = RgbaImage::from_pixel(side, side, WHITE);
    let x = i64::from((side - width) / 2);
    let y = i64::from((side - height) / 2);
    imageops::overlay(&mut canvas, &source, x, y);

    let rgb = image::DynamicImage::ImageRgba8(canvas).to_rgb8();
    let mut jpeg = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY);
    encoder
        .encode_image(&rgb)
        .map_err(|e| ImageError::Encode(e.to_string()))?;

    Ok(jpeg)
}
