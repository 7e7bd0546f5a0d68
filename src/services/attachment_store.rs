use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::codecs::jpeg::JpegEncoder;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

/// JPEG quality used for every stored attachment (0-100 scale).
/// Images are re-encoded regardless of source format to bound the payload
/// size of the completion request.
pub const JPEG_QUALITY: u8 = 80;

#[derive(Debug, Error)]
pub enum AttachmentStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

/// Local content store for attachment binaries.
///
/// Files are keyed by generated unique names, so concurrent writes from
/// unrelated sends never collide. Writes go through a temp file and rename so
/// a concurrent load never observes a partial file.
pub struct AttachmentStore {
    root: PathBuf,
}

impl AttachmentStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Re-encode the image as JPEG and persist it, returning the stored path
    pub async fn store(&self, bytes: &[u8]) -> Result<PathBuf, AttachmentStoreError> {
        let root = self.root.clone();
        let bytes = bytes.to_vec();

        tokio::task::spawn_blocking(move || {
            std::fs::create_dir_all(&root)?;

            let img = image::load_from_memory(&bytes)?;
            let mut encoded = Vec::new();
            let encoder = JpegEncoder::new_with_quality(Cursor::new(&mut encoded), JPEG_QUALITY);
            img.write_with_encoder(encoder)?;

            let path = root.join(format!("{}.jpg", Uuid::new_v4()));

            // Write atomically (write to temp, then rename)
            let temp_path = path.with_extension("jpg.tmp");
            std::fs::write(&temp_path, &encoded)?;
            std::fs::rename(&temp_path, &path)?;

            Ok(path)
        })
        .await
        .map_err(|e| AttachmentStoreError::Io(std::io::Error::other(e)))?
    }

    /// Load stored bytes. A missing or unreadable file yields `None`; stale
    /// attachment references degrade silently rather than failing a send.
    pub async fn load(&self, path: &Path) -> Option<Vec<u8>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Attachment not loadable");
                None
            }
        }
    }
}
