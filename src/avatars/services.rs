use std::{future::Future, sync::Arc};

use anyhow::Context;
use bytes::Bytes;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{error::AppError, storage::StorageClient};

/// Inclusive upper bound on avatar size (2048 KiB).
pub const MAX_AVATAR_BYTES: usize = 2 * 1024 * 1024;

const ALLOWED_MIME: [&str; 3] = ["image/jpeg", "image/jpg", "image/png"];

/// Raw multipart field as received from the client.
#[derive(Debug, Clone)]
pub struct AvatarUpload {
    pub body: Bytes,
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ImageKind {
    Jpeg,
    Png,
}

impl ImageKind {
    fn sniff(bytes: &[u8]) -> Option<Self> {
        const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";
        if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(ImageKind::Jpeg)
        } else if bytes.starts_with(PNG_MAGIC) {
            Some(ImageKind::Png)
        } else {
            None
        }
    }

    fn ext(self) -> &'static str {
        match self {
            ImageKind::Jpeg => "jpg",
            ImageKind::Png => "png",
        }
    }

    fn mime(self) -> &'static str {
        match self {
            ImageKind::Jpeg => "image/jpeg",
            ImageKind::Png => "image/png",
        }
    }
}

fn validate(upload: &AvatarUpload) -> Result<ImageKind, AppError> {
    let declared = upload
        .content_type
        .as_deref()
        .map(|ct| ct.split(';').next().unwrap_or_default().trim().to_lowercase())
        .unwrap_or_default();
    if !ALLOWED_MIME.contains(&declared.as_str()) {
        return Err(AppError::File(
            "The avatar field must be a file of type: jpeg, png, jpg.".into(),
        ));
    }
    if upload.body.len() > MAX_AVATAR_BYTES {
        return Err(AppError::File(
            "The avatar field must not be greater than 2048 kilobytes.".into(),
        ));
    }
    ImageKind::sniff(&upload.body)
        .ok_or_else(|| AppError::File("The avatar field must be an image.".into()))
}

/// Owns avatar objects in the storage namespace; the user row owns the key.
#[derive(Clone)]
pub struct AvatarManager {
    storage: Arc<dyn StorageClient>,
    public_url: String,
}

impl AvatarManager {
    pub fn new(storage: Arc<dyn StorageClient>, public_url: impl Into<String>) -> Self {
        Self {
            storage,
            public_url: public_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Validates and stores the upload under a fresh key, returning that key.
    pub async fn store(&self, user_id: Uuid, upload: AvatarUpload) -> Result<String, AppError> {
        let kind = validate(&upload)?;
        let key = format!("avatars/{}/{}.{}", user_id, Uuid::new_v4(), kind.ext());
        self.storage
            .put_object(&key, upload.body, kind.mime())
            .await
            .with_context(|| format!("put_object {key}"))?;
        debug!(%user_id, %key, "avatar stored");
        Ok(key)
    }

    /// Stores the new avatar, hands its key to `link`, and only then deletes
    /// `old_key`. A failed `link` removes the new object again.
    pub async fn replace<F, Fut, T>(
        &self,
        user_id: Uuid,
        upload: AvatarUpload,
        old_key: Option<&str>,
        link: F,
    ) -> Result<T, AppError>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let new_key = self.store(user_id, upload).await?;
        let linked = match link(new_key.clone()).await {
            Ok(v) => v,
            Err(e) => {
                self.discard(&new_key).await;
                return Err(e);
            }
        };
        if let Some(old) = old_key.filter(|old| *old != new_key) {
            self.discard(old).await;
        }
        Ok(linked)
    }

    /// Best-effort delete; a failure leaves an orphaned object behind.
    pub async fn discard(&self, key: &str) {
        if let Err(e) = self.storage.delete_object(key).await {
            warn!(error = %format!("{e:#}"), %key, "failed to delete avatar object");
        }
    }

    pub fn url_for(&self, key: Option<&str>) -> Option<String> {
        key.map(|k| format!("{}/{}", self.public_url, k))
    }
}
