use bytes::Bytes;
use tracing::{info, warn};
use uuid::Uuid;

use crate::storage::StorageClient;

/// A file buffered from a multipart field.
#[derive(Debug, Clone)]
pub struct UploadItem {
    pub body: Bytes,
    pub content_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedMedia {
    pub url: String,
    pub public_id: String,
}

/// Bucket prefix an upload lands under.
#[derive(Debug, Clone, Copy)]
pub enum MediaFolder {
    Avatars,
    Covers,
}

impl MediaFolder {
    fn as_str(self) -> &'static str {
        match self {
            MediaFolder::Avatars => "avatars",
            MediaFolder::Covers => "covers",
        }
    }
}

/// Stores `item` and returns its public URL, or `None` when the upload did not happen.
pub async fn upload(
    storage: &dyn StorageClient,
    folder: MediaFolder,
    item: UploadItem,
) -> Option<UploadedMedia> {
    if item.body.is_empty() {
        warn!(folder = folder.as_str(), "refusing to upload empty file");
        return None;
    }

    let ext = ext_from_mime(&item.content_type).unwrap_or("bin");
    let key = format!("{}/{}.{}", folder.as_str(), Uuid::new_v4(), ext);
    let size = item.body.len();
    match storage.put_object(&key, item.body, &item.content_type).await {
        Ok(()) => {
            let url = storage.public_url(&key);
            info!(%key, size, "media uploaded");
            Some(UploadedMedia { url, public_id: key })
        }
        Err(e) => {
            warn!(error = %e, %key, "media upload failed");
            None
        }
    }
}

/// Best-effort removal of a previously uploaded object.
pub async fn delete(storage: &dyn StorageClient, url: &str) {
    let Some(key) = storage.key_from_url(url) else {
        warn!(%url, "not a managed media url; skipping delete");
        return;
    };
    match storage.delete_object(&key).await {
        Ok(()) => info!(%key, "media deleted"),
        Err(e) => warn!(error = %e, %key, "media delete failed; object orphaned"),
    }
}

fn ext_from_mime(ct: &str) -> Option<&'static str> {
    match ct {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/gif" => Some("gif"),
        "image/heic" => Some("heic"),
        _ => None,
    }
}

#[cfg(test)]
mod media_tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn png(bytes: &'static [u8]) -> UploadItem {
        UploadItem {
            body: Bytes::from_static(bytes),
            content_type: "image/png".into(),
        }
    }

    #[test]
    fn test_ext_from_mime() {
        assert_eq!(ext_from_mime("image/jpeg"), Some("jpg"));
        assert_eq!(ext_from_mime("image/jpg"), Some("jpg"));
        assert_eq!(ext_from_mime("image/png"), Some("png"));
        assert_eq!(ext_from_mime("image/webp"), Some("webp"));
        assert_eq!(ext_from_mime("image/gif"), Some("gif"));
        assert_eq!(ext_from_mime("image/heic"), Some("heic"));
        assert_eq!(ext_from_mime("application/octet-stream"), None);
    }

    #[tokio::test]
    async fn upload_returns_public_url() {
        let storage = MemoryStorage::new();
        let media = upload(&storage, MediaFolder::Avatars, png(b"\x89PNG"))
            .await
            .expect("uploaded");
        assert!(media.public_id.starts_with("avatars/"));
        assert!(media.public_id.ends_with(".png"));
        assert_eq!(media.url, storage.public_url(&media.public_id));
        assert!(storage.contains(&media.public_id).await);
    }

    #[tokio::test]
    async fn failed_or_empty_upload_is_none() {
        let storage = MemoryStorage::new();
        assert!(upload(&storage, MediaFolder::Covers, png(b"")).await.is_none());

        storage.fail_uploads(true);
        assert!(upload(&storage, MediaFolder::Covers, png(b"data")).await.is_none());
        assert_eq!(storage.len().await, 0);
    }

    #[tokio::test]
    async fn delete_is_best_effort() {
        let storage = MemoryStorage::new();
        let media = upload(&storage, MediaFolder::Avatars, png(b"img")).await.unwrap();

        storage.fail_deletes(true);
        delete(&storage, &media.url).await;
        assert!(storage.contains(&media.public_id).await);

        storage.fail_deletes(false);
        delete(&storage, "https://elsewhere.org/a.png").await;
        delete(&storage, &media.url).await;
        assert!(!storage.contains(&media.public_id).await);
    }
}
