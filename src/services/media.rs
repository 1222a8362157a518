use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use image::ImageFormat;
use tokio::fs;
use uuid::Uuid;

use crate::error::AppError;

const PHOTOS_DIR: &str = "photos";
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "bmp"];
const IMAGE_FORMATS: &[ImageFormat] = &[
    ImageFormat::Jpeg,
    ImageFormat::Png,
    ImageFormat::Gif,
    ImageFormat::WebP,
    ImageFormat::Bmp,
];

/// Uploaded user files on local disk, addressed by names relative to the media root.
#[derive(Debug, Clone)]
pub struct MediaStorage {
    root: Arc<PathBuf>,
    base_url: Arc<str>,
}

impl MediaStorage {
    pub fn new(root: PathBuf, base_url: String) -> Self {
        Self {
            root: Arc::new(root),
            base_url: Arc::from(base_url),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn ensure_structure(&self) -> Result<(), AppError> {
        fs::create_dir_all(self.root().join(PHOTOS_DIR)).await?;
        Ok(())
    }

    /// Public URL of a stored file; empty names have none.
    pub fn url_for(&self, name: &str) -> Option<String> {
        if name.is_empty() {
            None
        } else {
            Some(format!("{}{}", self.base_url, name.trim_start_matches('/')))
        }
    }

    /// Lowercased extension of an upload whose name and contents are both
    /// those of a supported image.
    pub fn image_extension(file_name: &str, data: &[u8]) -> Option<String> {
        let ext = Path::new(file_name)
            .extension()?
            .to_str()?
            .to_ascii_lowercase();
        if !IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            return None;
        }
        let format = image::guess_format(data).ok()?;
        IMAGE_FORMATS.contains(&format).then_some(ext)
    }

    /// Stores a photo under a fresh name and returns that name.
    pub async fn save_photo(&self, extension: &str, data: &[u8]) -> Result<String, AppError> {
        let name = format!("{PHOTOS_DIR}/{}.{extension}", Uuid::new_v4());
        fs::create_dir_all(self.root().join(PHOTOS_DIR)).await?;
        fs::write(self.root().join(&name), data).await?;
        Ok(name)
    }

    pub async fn remove(&self, name: &str) -> Result<(), AppError> {
        let path = self.root().join(name);
        if fs::try_exists(&path).await? {
            fs::remove_file(path).await?;
        }
        Ok(())
    }
}
