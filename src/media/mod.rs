//! Storage for uploaded recipe images.
//!
//! Files live under `<root>/uploads/recipe/` with a random v4 UUID name and
//! an extension derived from the sniffed format. They are served back by the
//! HTTP server under the configured URL prefix, and that public URL path is
//! what gets recorded on the recipe.

use bytes::Bytes;
use image::ImageFormat;
use std::path::{Component, Path, PathBuf};
use uuid::Uuid;

use crate::config::MediaConfig;

const RECIPE_IMAGE_DIR: &str = "uploads/recipe";

#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("Upload a valid image. The file you uploaded was either not an image or a corrupted image.")]
    InvalidImage,

    #[error("failed to store media file: {0}")]
    Io(#[from] std::io::Error),
}

/// A file written by [`ImageStore::save_recipe_image`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredImage {
    /// Public URL path, e.g. `/media/uploads/recipe/<uuid>.png`
    pub url: String,
    /// Location on disk
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ImageStore {
    root: PathBuf,
    url_prefix: String,
}

impl ImageStore {
    pub fn new(root: impl Into<PathBuf>, url_prefix: &str) -> Self {
        let trimmed = url_prefix.trim_end_matches('/');
        let url_prefix = if trimmed.starts_with('/') {
            trimmed.to_string()
        } else {
            format!("/{}", trimmed)
        };

        Self {
            root: root.into(),
            url_prefix,
        }
    }

    pub fn from_config(config: &MediaConfig) -> Self {
        Self::new(config.root.clone(), &config.url_prefix)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// URL path the media root is mounted at, without a trailing slash
    pub fn url_prefix(&self) -> &str {
        &self.url_prefix
    }

    /// Validate and store an uploaded recipe image under a fresh random name
    pub async fn save_recipe_image(&self, data: Bytes) -> Result<StoredImage, MediaError> {
        let format = tokio::task::spawn_blocking(move || sniff_image(&data).map(|f| (f, data)))
            .await
            .map_err(|e| MediaError::Io(std::io::Error::other(e)))?;
        let (format, data) = format?;

        let extension = format.extensions_str().first().copied().unwrap_or("img");
        let file_name = format!("{}.{}", Uuid::new_v4(), extension);

        let dir = self.root.join(RECIPE_IMAGE_DIR);
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(&file_name);
        tokio::fs::write(&path, &data).await?;

        tracing::debug!(path = %path.display(), bytes = data.len(), "Stored recipe image");

        Ok(StoredImage {
            url: format!("{}/{}/{}", self.url_prefix, RECIPE_IMAGE_DIR, file_name),
            path,
        })
    }

    /// Map a public URL path back to a file under the media root.
    ///
    /// Returns None for URLs outside the prefix or containing anything but
    /// plain path segments.
    pub fn path_for_url(&self, url: &str) -> Option<PathBuf> {
        let relative = url.strip_prefix(&self.url_prefix)?.strip_prefix('/')?;
        let relative = Path::new(relative);

        if relative.as_os_str().is_empty()
            || !relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)))
        {
            return None;
        }

        Some(self.root.join(relative))
    }

    /// Remove a previously stored file, logging instead of failing
    pub async fn remove(&self, url: &str) {
        let Some(path) = self.path_for_url(url) else {
            tracing::warn!(url, "Refusing to remove media outside the media root");
            return;
        };

        match tokio::fs::remove_file(&path).await {
            Ok(()) => tracing::debug!(path = %path.display(), "Removed media file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to remove media file"),
        }
    }
}

/// Detect the image format from the bytes and make sure they decode
fn sniff_image(data: &[u8]) -> Result<ImageFormat, MediaError> {
    let format = image::guess_format(data).map_err(|_| MediaError::InvalidImage)?;
    image::load_from_memory_with_format(data, format).map_err(|_| MediaError::InvalidImage)?;
    Ok(format)
}
