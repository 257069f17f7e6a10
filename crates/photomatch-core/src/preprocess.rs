//! Upload preprocessing: bounded-width JPEG re-encoding with timeout support.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};
use std::path::Path;
use std::time::Duration;
use tokio::time::timeout;

use crate::config::{ImageConfig, LimitsConfig};
use crate::error::ImageError;

/// A re-encoded image ready for upload.
#[derive(Debug, Clone)]
pub struct EncodedImage {
    /// JPEG bytes
    pub bytes: Vec<u8>,
    /// Width after scaling
    pub width: u32,
    /// Height after scaling
    pub height: u32,
}

impl EncodedImage {
    /// Base64 form used in the search request body.
    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.bytes)
    }
}

/// Shrinks and re-encodes source images to bound upload payload size.
#[derive(Debug, Clone)]
pub struct ImagePreprocessor {
    image: ImageConfig,
    limits: LimitsConfig,
}

impl ImagePreprocessor {
    pub fn new(image: ImageConfig, limits: LimitsConfig) -> Self {
        Self { image, limits }
    }

    /// Prepare an image using the configured width bound and quality.
    pub async fn prepare(&self, path: &Path) -> Result<EncodedImage, ImageError> {
        self.prepare_with(path, self.image.max_width, self.image.quality)
            .await
    }

    /// Read, scale and re-encode one image.
    ///
    /// The file is opened read-only and shared, so other readers of the same
    /// path are never blocked. Decoding and encoding run on the blocking pool
    /// under the configured decode timeout.
    pub async fn prepare_with(
        &self,
        path: &Path,
        max_width: u32,
        quality: u8,
    ) -> Result<EncodedImage, ImageError> {
        self.check_input(path)?;

        let bytes = tokio::fs::read(path).await.map_err(|e| ImageError::Read {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let path_owned = path.to_path_buf();
        let timeout_duration = Duration::from_millis(self.limits.decode_timeout_ms);
        let result = timeout(timeout_duration, async {
            tokio::task::spawn_blocking(move || {
                Self::encode_sync(&bytes, &path_owned, max_width, quality)
            })
            .await
        })
        .await;

        match result {
            Ok(Ok(encoded)) => encoded,
            Ok(Err(e)) => Err(ImageError::Decode {
                path: path.to_path_buf(),
                message: format!("Task join error: {e}"),
            }),
            Err(_) => Err(ImageError::Timeout {
                path: path.to_path_buf(),
                timeout_ms: self.limits.decode_timeout_ms,
            }),
        }
    }

    /// Cheap checks before touching file contents.
    fn check_input(&self, path: &Path) -> Result<(), ImageError> {
        let metadata = std::fs::metadata(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ImageError::FileNotFound(path.to_path_buf())
            } else {
                ImageError::Read {
                    path: path.to_path_buf(),
                    message: format!("Cannot read metadata: {e}"),
                }
            }
        })?;

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        if !self.image.supported_formats.iter().any(|f| *f == extension) {
            return Err(ImageError::UnsupportedFormat {
                path: path.to_path_buf(),
                format: if extension.is_empty() {
                    "unknown".to_string()
                } else {
                    extension
                },
            });
        }

        let max_bytes = self.limits.max_file_size_mb.saturating_mul(1024 * 1024);
        if metadata.len() > max_bytes {
            return Err(ImageError::FileTooLarge {
                path: path.to_path_buf(),
                size_mb: metadata.len() / (1024 * 1024),
                max_mb: self.limits.max_file_size_mb,
            });
        }

        Ok(())
    }

    /// Synchronous decode, scale and encode (runs in spawn_blocking).
    fn encode_sync(
        bytes: &[u8],
        path: &Path,
        max_width: u32,
        quality: u8,
    ) -> Result<EncodedImage, ImageError> {
        let image = image::load_from_memory(bytes).map_err(|e| ImageError::Decode {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let scaled = scale_to_width(image, max_width);
        let (width, height) = scaled.dimensions();

        // JPEG has no alpha channel
        let rgb = scaled.to_rgb8();
        let mut buffer = Vec::new();
        JpegEncoder::new_with_quality(&mut buffer, quality.min(100))
            .encode_image(&rgb)
            .map_err(|e| ImageError::Encode {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        Ok(EncodedImage {
            bytes: buffer,
            width,
            height,
        })
    }
}

/// Target dimensions for a width bound.
///
/// Height is `height * max_width / width` in integer arithmetic, never below 1.
/// Images at or under the bound keep their size.
pub fn scaled_dimensions(width: u32, height: u32, max_width: u32) -> (u32, u32) {
    if width <= max_width || width == 0 {
        return (width, height);
    }
    let scaled_height = (u64::from(height) * u64::from(max_width) / u64::from(width)) as u32;
    (max_width, scaled_height.max(1))
}

fn scale_to_width(image: DynamicImage, max_width: u32) -> DynamicImage {
    let (width, height) = image.dimensions();
    let (target_width, target_height) = scaled_dimensions(width, height, max_width);
    if (target_width, target_height) == (width, height) {
        image
    } else {
        image.resize_exact(target_width, target_height, FilterType::Triangle)
    }
}
