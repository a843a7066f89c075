use std::path::PathBuf;

use base64::{engine::general_purpose::STANDARD, Engine};

use crate::{
    error::{Error, HtmlError},
    IMAGE_EXTENSIONS, RECIPE_IMAGE_DIR,
};

/// A decoded `data:image/<ext>;base64,<payload>` string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pub extension: String,
    pub bytes: Vec<u8>,
}

impl TryFrom<&str> for DecodedImage {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let invalid = || HtmlError::ValidationFailed.new("image: Upload a valid image.");

        let (header, payload) = value.split_once(";base64,").ok_or_else(invalid)?;
        let extension = header
            .strip_prefix("data:image/")
            .ok_or_else(invalid)?
            .to_ascii_lowercase();

        if !IMAGE_EXTENSIONS.contains(&extension.as_str()) {
            return Err(HtmlError::ValidationFailed.new(&format!(
                "image: File extension \"{extension}\" is not allowed."
            )));
        }

        let bytes = STANDARD.decode(payload.trim()).map_err(|_| invalid())?;
        if bytes.is_empty() {
            return Err(HtmlError::ValidationFailed.new("image: The submitted file is empty."));
        }

        Ok(Self { extension, bytes })
    }
}

/// Writes uploaded recipe images under `root` and hands out the URL they are
/// served from.
#[derive(Debug, Clone)]
pub struct ImageStore {
    root: PathBuf,
    base_url: String,
}

impl ImageStore {
    pub fn new(root: impl Into<PathBuf>, base_url: &str) -> Self {
        let base_url = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{base_url}/")
        };

        Self {
            root: root.into(),
            base_url,
        }
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    pub async fn save(&self, encoded: &str) -> Result<String, Error> {
        let image = DecodedImage::try_from(encoded)?;
        let relative = format!(
            "{RECIPE_IMAGE_DIR}/{}.{}",
            uuid::Uuid::new_v4(),
            image.extension
        );

        let path = self.root.join(&relative);
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await.map_err(|e| {
                log::error!("Failed to create {}: {e}", dir.display());
                HtmlError::InternalServerError.new("Failed to store image")
            })?;
        }
        tokio::fs::write(&path, &image.bytes).await.map_err(|e| {
            log::error!("Failed to write {}: {e}", path.display());
            HtmlError::InternalServerError.new("Failed to store image")
        })?;

        log::debug!("Stored image {relative} ({} bytes)", image.bytes.len());
        Ok(format!("{}{relative}", self.base_url))
    }

    /// Best-effort removal of an image this store handed out.
    pub async fn remove(&self, url: &str) {
        let Some(relative) = url.strip_prefix(&self.base_url) else {
            return;
        };
        if relative.contains("..") {
            return;
        }
        if let Err(e) = tokio::fs::remove_file(self.root.join(relative)).await {
            log::warn!("Failed to remove image {relative}: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PIXEL: &str = "data:image/png;base64,iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAQAAAC1HAwCAAAAC0lEQVR42mNkYAAAAAYAAjCB0C8AAAAASUVORK5CYII=";

    #[test]
    fn decodes_data_urls() {
        let image = DecodedImage::try_from(PIXEL).unwrap();
        assert_eq!(image.extension, "png");
        assert_eq!(&image.bytes[1..4], b"PNG");
    }

    #[test]
    fn rejects_non_image_payloads() {
        assert!(DecodedImage::try_from("not an image").is_err());
        assert!(DecodedImage::try_from("data:text/plain;base64,aGVsbG8=").is_err());
        assert!(DecodedImage::try_from("data:image/exe;base64,aGVsbG8=").is_err());
        assert!(DecodedImage::try_from("data:image/png;base64,@@@").is_err());
    }

    #[tokio::test]
    async fn saves_under_root_and_returns_url() {
        let dir = tempfile::tempdir().unwrap();
        let store = ImageStore::new(dir.path(), "/media");

        let url = store.save(PIXEL).await.unwrap();
        assert!(url.starts_with("/media/recipes/images/"));
        assert!(url.ends_with(".png"));

        let relative = url.strip_prefix("/media/").unwrap();
        assert!(dir.path().join(relative).exists());

        store.remove(&url).await;
        assert!(!dir.path().join(relative).exists());
    }
}
