//! Media storage
//!
//! Validates uploaded bytes as a raster image and writes them under the
//! configured media root. Stored paths are relative to that root so the
//! same value works for serving (`/media/<path>`) and for the database.

use std::path::{Path, PathBuf};

use image::ImageFormat;
use tokio::{fs, task};
use uuid::Uuid;

use crate::config::UploadConfig;

/// Directory under the media root that holds post images.
pub const POST_UPLOAD_DIR: &str = "uploads/post";

/// Formats accepted for post images.
const ACCEPTED_FORMATS: &[ImageFormat] = &[
    ImageFormat::Png,
    ImageFormat::Jpeg,
    ImageFormat::Gif,
    ImageFormat::WebP,
    ImageFormat::Bmp,
];

/// Error types for media operations
#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    /// Upload larger than the configured limit
    #[error("File too large: {size} bytes (maximum {max} bytes)")]
    TooLarge { size: u64, max: u64 },

    /// Bytes are not a decodable image of an accepted format
    #[error("Upload a valid image. The file you uploaded was either not an image or a corrupted image.")]
    InvalidImage(String),

    /// Filesystem failure
    #[error("Failed to store file: {0}")]
    Io(#[from] std::io::Error),
}

/// File storage for uploaded images
#[derive(Debug, Clone)]
pub struct MediaStore {
    root: PathBuf,
    max_file_size: u64,
}

impl MediaStore {
    pub fn new(root: impl Into<PathBuf>, max_file_size: u64) -> Self {
        Self {
            root: root.into(),
            max_file_size,
        }
    }

    pub fn from_config(config: &UploadConfig) -> Self {
        Self::new(config.media_root.clone(), config.max_file_size)
    }

    /// Check size and decode the bytes, returning the detected format.
    pub fn validate_image(&self, data: &[u8]) -> Result<ImageFormat, MediaError> {
        let size = data.len() as u64;
        if size > self.max_file_size {
            return Err(MediaError::TooLarge {
                size,
                max: self.max_file_size,
            });
        }

        let format = image::guess_format(data)
            .map_err(|e| MediaError::InvalidImage(e.to_string()))?;
        if !ACCEPTED_FORMATS.contains(&format) {
            return Err(MediaError::InvalidImage(format!(
                "unsupported format {:?}",
                format
            )));
        }

        image::load_from_memory_with_format(data, format)
            .map_err(|e| MediaError::InvalidImage(e.to_string()))?;

        Ok(format)
    }

    /// Validate and persist a post image.
    ///
    /// Decoding runs on the blocking pool. Returns the stored path relative
    /// to the media root, `uploads/post/<uuid>.<ext>`. Nothing is written
    /// when validation fails.
    pub async fn store_post_image(
        &self,
        original_name: Option<&str>,
        data: &[u8],
    ) -> Result<String, MediaError> {
        let store = self.clone();
        let bytes = data.to_vec();
        let format = task::spawn_blocking(move || store.validate_image(&bytes))
            .await
            .map_err(|e| MediaError::Io(std::io::Error::other(e)))??;
        let ext = choose_extension(original_name, format);
        let relative = format!("{}/{}.{}", POST_UPLOAD_DIR, Uuid::new_v4(), ext);

        let dir = self.root.join(POST_UPLOAD_DIR);
        fs::create_dir_all(&dir).await?;
        fs::write(self.root.join(&relative), data).await?;

        tracing::debug!("Stored image {} ({} bytes)", relative, data.len());
        Ok(relative)
    }
}

/// Extension for a stored image: the original file name's extension,
/// lower-cased, or the decoded format's canonical one.
pub fn choose_extension(original_name: Option<&str>, format: ImageFormat) -> String {
    original_name
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_else(|| {
            format
                .extensions_str()
                .first()
                .copied()
                .unwrap_or("img")
                .to_string()
        })
}
