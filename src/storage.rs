use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Context;
use aws_config::{defaults, BehaviorVersion};
use aws_credential_types::Credentials;
use aws_sdk_s3::{
    config::{Builder as S3ConfigBuilder, Region},
    Client,
};
use aws_smithy_types::byte_stream::ByteStream;
use axum::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;

use crate::config::StorageConfig;

#[async_trait]
pub trait StorageClient: Send + Sync {
    async fn put_object(&self, key: &str, body: Bytes, content_type: &str) -> anyhow::Result<()>;
    async fn delete_object(&self, key: &str) -> anyhow::Result<()>;
    /// Public URL under which `key` is served.
    fn public_url(&self, key: &str) -> String;
    /// Inverse of [`StorageClient::public_url`]; `None` for URLs this bucket did not issue.
    fn key_from_url(&self, url: &str) -> Option<String>;
}

#[derive(Clone)]
pub struct Storage {
    client: Client,
    bucket: String,
    public_base: String,
}

impl Storage {
    pub async fn new(cfg: &StorageConfig) -> anyhow::Result<Self> {
        let shared = defaults(BehaviorVersion::latest())
            .region(Region::new(cfg.region.clone()))
            .credentials_provider(Credentials::new(
                &cfg.access_key,
                &cfg.secret_key,
                None,
                None,
                "static",
            ))
            .endpoint_url(&cfg.endpoint)
            .load()
            .await;

        let conf = S3ConfigBuilder::from(&shared)
            .endpoint_url(&cfg.endpoint)
            .force_path_style(true)
            .build();

        Ok(Self {
            client: Client::from_conf(conf),
            bucket: cfg.bucket.clone(),
            public_base: cfg.public_url.clone(),
        })
    }
}

#[async_trait]
impl StorageClient for Storage {
    async fn put_object(&self, key: &str, body: Bytes, content_type: &str) -> anyhow::Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type(content_type)
            .send()
            .await
            .context("s3 put_object")?;
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> anyhow::Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .context("s3 delete_object")?;
        Ok(())
    }

    fn public_url(&self, key: &str) -> String {
        join_url(&self.public_base, key)
    }

    fn key_from_url(&self, url: &str) -> Option<String> {
        split_url(&self.public_base, url)
    }
}

fn join_url(base: &str, key: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), key)
}

fn split_url(base: &str, url: &str) -> Option<String> {
    let key = url
        .strip_prefix(base.trim_end_matches('/'))?
        .strip_prefix('/')?;
    (!key.is_empty()).then(|| key.to_string())
}

/// Bucket kept in process memory. Backs `AppState::fake()` and the tests.
#[derive(Default)]
pub struct MemoryStorage {
    objects: RwLock<HashMap<String, Bytes>>,
    fail_puts: AtomicBool,
    fail_deletes: AtomicBool,
}

impl MemoryStorage {
    pub const BASE_URL: &'static str = "https://media.test/vidtube";

    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent `put_object` fail.
    pub fn fail_uploads(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    /// Makes every subsequent `delete_object` fail.
    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.objects.read().await.contains_key(key)
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }
}

#[async_trait]
impl StorageClient for MemoryStorage {
    async fn put_object(&self, key: &str, body: Bytes, _content_type: &str) -> anyhow::Result<()> {
        if self.fail_puts.load(Ordering::SeqCst) {
            anyhow::bail!("memory storage: put {key} refused");
        }
        self.objects.write().await.insert(key.to_string(), body);
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> anyhow::Result<()> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            anyhow::bail!("memory storage: delete {key} refused");
        }
        self.objects.write().await.remove(key);
        Ok(())
    }

    fn public_url(&self, key: &str) -> String {
        join_url(Self::BASE_URL, key)
    }

    fn key_from_url(&self, url: &str) -> Option<String> {
        split_url(Self::BASE_URL, url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_and_key_are_inverse() {
        let base = "https://cdn.example.com/media/";
        let url = join_url(base, "avatars/abc.png");
        assert_eq!(url, "https://cdn.example.com/media/avatars/abc.png");
        assert_eq!(split_url(base, &url).as_deref(), Some("avatars/abc.png"));
    }

    #[test]
    fn foreign_urls_have_no_key() {
        let base = "https://cdn.example.com/media";
        assert_eq!(split_url(base, "https://elsewhere.org/avatars/abc.png"), None);
        assert_eq!(split_url(base, "https://cdn.example.com/media"), None);
        assert_eq!(split_url(base, "https://cdn.example.com/mediaX/a.png"), None);
    }

    #[tokio::test]
    async fn memory_storage_put_delete() {
        let storage = MemoryStorage::new();
        storage
            .put_object("covers/x.jpg", Bytes::from_static(b"jpg"), "image/jpeg")
            .await
            .unwrap();
        assert!(storage.contains("covers/x.jpg").await);
        storage.delete_object("covers/x.jpg").await.unwrap();
        assert_eq!(storage.len().await, 0);

        storage.fail_uploads(true);
        assert!(storage
            .put_object("covers/y.jpg", Bytes::from_static(b"jpg"), "image/jpeg")
            .await
            .is_err());
    }
}
