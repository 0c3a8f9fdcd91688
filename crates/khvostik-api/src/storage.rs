use anyhow::{Result, bail};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use uuid::Uuid;

/// URL prefix under which stored photos are served.
pub const MEDIA_PREFIX: &str = "/media/";

/// Largest accepted photo.
pub const MAX_PHOTO_SIZE: usize = 10 * 1024 * 1024;

/// Object store for listing photos.
///
/// Each photo is a flat file `{dir}/{pet_id}-{sha256 prefix}.{ext}`, so a
/// re-upload of the same image for the same listing lands on the same key.
pub struct PhotoStore {
    dir: PathBuf,
}

impl PhotoStore {
    pub async fn new(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir).await?;
        info!("Photo storage directory: {}", dir.display());
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    /// Path to the object for a given key.
    pub fn file_path(&self, key: &str) -> Result<PathBuf> {
        if !is_valid_key(key) {
            bail!("Invalid photo key '{}'", key);
        }
        Ok(self.dir.join(key))
    }

    /// Store a photo for a listing and return its key.
    pub async fn put(&self, pet_id: Uuid, ext: &str, data: &[u8]) -> Result<String> {
        let digest = hex::encode(Sha256::digest(data));
        let key = format!("{}-{}.{}", pet_id, &digest[..16], ext);

        let path = self.file_path(&key)?;
        let mut file = fs::File::create(&path).await?;
        file.write_all(data).await?;
        file.flush().await?;

        info!("Stored photo {} ({} bytes)", key, data.len());
        Ok(key)
    }

    /// Delete an object. A missing object is not an error.
    pub async fn delete(&self, key: &str) -> Result<()> {
        let path = self.file_path(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                info!("Deleted photo {}", key);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Photo {} already gone", key);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Public URL for a stored key.
pub fn photo_url(key: &str) -> String {
    format!("{MEDIA_PREFIX}{key}")
}

/// Key behind a URL produced by [`photo_url`]; `None` for foreign URLs.
pub fn key_from_url(url: &str) -> Option<&str> {
    url.strip_prefix(MEDIA_PREFIX).filter(|key| is_valid_key(key))
}

/// File extension for an accepted image content type.
pub fn extension_for(content_type: &str) -> Option<&'static str> {
    let essence = content_type.split(';').next().unwrap_or("").trim();
    match essence {
        "image/jpeg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/gif" => Some("gif"),
        _ => None,
    }
}

// Keys never contain path separators or leading dots.
fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && !key.starts_with('.')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
}
