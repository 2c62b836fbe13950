//! The user's chosen input image and its locally-held preview reference.

use std::{
    collections::HashMap,
    io::Cursor,
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, PoisonError,
    },
};

use anyhow::{Context, Result};
use shared::domain::ImageSize;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageFile {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Arc<Vec<u8>>,
}

impl ImageFile {
    /// MIME type is guessed from the file name's extension.
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        let file_name = file_name.into();
        let mime_type = mime_guess::from_path(&file_name)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        Self::with_mime_type(file_name, mime_type, bytes)
    }

    pub fn with_mime_type(
        file_name: impl Into<String>,
        mime_type: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            mime_type: mime_type.into(),
            bytes: Arc::new(bytes),
        }
    }

    pub async fn from_path(path: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read image file '{}'", path.display()))?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        Ok(Self::new(file_name, bytes))
    }

    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }

    /// Reads only the image header; `None` when the format is not recognised.
    pub fn dimensions(&self) -> Option<ImageSize> {
        let (width, height) = image::ImageReader::new(Cursor::new(self.bytes.as_slice()))
            .with_guessed_format()
            .ok()?
            .into_dimensions()
            .ok()?;
        Some(ImageSize { width, height })
    }
}

/// Revocable handle to a locally displayable copy of the selected image.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PreviewRef(String);

impl PreviewRef {
    pub fn new(url: impl Into<String>) -> Self {
        Self(url.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Creates and releases preview references. Every reference returned by
/// `create` must be passed to `revoke` exactly once.
pub trait PreviewProvider: Send + Sync {
    fn create(&self, image: &ImageFile) -> PreviewRef;
    fn revoke(&self, preview: &PreviewRef);
}

/// In-process blob store handing out `blob:segview/<uuid>` references.
#[derive(Default)]
pub struct BlobPreviewRegistry {
    entries: Mutex<HashMap<PreviewRef, Arc<Vec<u8>>>>,
    created: AtomicUsize,
    revoked: AtomicUsize,
    unknown_revocations: AtomicUsize,
}

impl BlobPreviewRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn resolve(&self, preview: &PreviewRef) -> Option<Arc<Vec<u8>>> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(preview)
            .cloned()
    }

    pub fn live_count(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn revoked_count(&self) -> usize {
        self.revoked.load(Ordering::SeqCst)
    }

    /// Revocations of references that were never issued or already released.
    pub fn unknown_revocations(&self) -> usize {
        self.unknown_revocations.load(Ordering::SeqCst)
    }
}

impl PreviewProvider for BlobPreviewRegistry {
    fn create(&self, image: &ImageFile) -> PreviewRef {
        let preview = PreviewRef(format!("blob:segview/{}", Uuid::new_v4()));
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(preview.clone(), Arc::clone(&image.bytes));
        self.created.fetch_add(1, Ordering::SeqCst);
        debug!(preview = preview.as_str(), file = %image.file_name, "preview created");
        preview
    }

    fn revoke(&self, preview: &PreviewRef) {
        let removed = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(preview);
        if removed.is_some() {
            self.revoked.fetch_add(1, Ordering::SeqCst);
            debug!(preview = preview.as_str(), "preview revoked");
        } else {
            self.unknown_revocations.fetch_add(1, Ordering::SeqCst);
            warn!(preview = preview.as_str(), "revoking unknown preview reference");
        }
    }
}

/// A selected image together with the preview reference created for it.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub image: ImageFile,
    pub preview: PreviewRef,
    pub dimensions: Option<ImageSize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guesses_mime_type_from_extension() {
        assert_eq!(ImageFile::new("street.jpg", Vec::new()).mime_type, "image/jpeg");
        assert!(ImageFile::new("street.PNG", Vec::new()).is_image());
        assert!(!ImageFile::new("notes.txt", Vec::new()).is_image());
        assert_eq!(
            ImageFile::new("no_extension", Vec::new()).mime_type,
            "application/octet-stream"
        );
    }

    #[test]
    fn unknown_bytes_have_no_dimensions() {
        let file = ImageFile::new("street.png", b"definitely not a png".to_vec());
        assert_eq!(file.dimensions(), None);
    }

    #[test]
    fn registry_tracks_each_reference_once() {
        let registry = BlobPreviewRegistry::new();
        let file = ImageFile::new("a.png", vec![1, 2, 3]);

        let first = registry.create(&file);
        let second = registry.create(&file);
        assert_ne!(first, second);
        assert!(first.as_str().starts_with("blob:segview/"));
        assert_eq!(registry.live_count(), 2);
        assert_eq!(registry.resolve(&first).as_deref(), Some(&vec![1, 2, 3]));

        registry.revoke(&first);
        registry.revoke(&first);
        assert_eq!(registry.revoked_count(), 1);
        assert_eq!(registry.unknown_revocations(), 1);
        assert_eq!(registry.resolve(&first), None);
        assert_eq!(registry.live_count(), 1);
    }
}
