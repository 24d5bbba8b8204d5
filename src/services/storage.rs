use std::collections::BTreeMap;
use std::sync::RwLock;

use anyhow::Context;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use sha2::{Digest, Sha256};

use crate::core::config::Settings;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StoredObject {
    pub(crate) size: usize,
    pub(crate) sha256: String,
}

impl StoredObject {
    fn describe(bytes: &[u8]) -> Self {
        Self { size: bytes.len(), sha256: hex::encode(Sha256::digest(bytes)) }
    }
}

/// Flat key/value blob store. `put` overwrites, so repeated writes are idempotent.
#[async_trait]
pub(crate) trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, content_type: &str, bytes: Vec<u8>)
        -> anyhow::Result<StoredObject>;

    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>>;

    /// Keys under `prefix`, sorted.
    async fn list(&self, prefix: &str) -> anyhow::Result<Vec<String>>;
}

#[derive(Debug, Clone)]
pub(crate) struct S3ObjectStore {
    client: Client,
    bucket: String,
}

impl S3ObjectStore {
    /// Returns `None` when no S3 credentials are configured.
    pub(crate) async fn pair_from_settings(
        settings: &Settings,
    ) -> anyhow::Result<Option<(Self, Self)>> {
        let s3 = settings.s3();
        if s3.access_key.is_empty() || s3.secret_key.is_empty() {
            return Ok(None);
        }

        let creds = Credentials::new(
            s3.access_key.clone(),
            s3.secret_key.clone(),
            None,
            None,
            "grading-orchestrator-static",
        );

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(s3.region.clone()))
            .credentials_provider(creds);
        if !s3.endpoint.is_empty() {
            loader = loader.endpoint_url(s3.endpoint.clone());
        }
        let config = loader.load().await;

        let s3_config = aws_sdk_s3::config::Builder::from(&config).force_path_style(true).build();
        let client = Client::from_conf(s3_config);

        let results = Self { client: client.clone(), bucket: s3.result_bucket.clone() };
        let reports = Self { client, bucket: s3.report_bucket.clone() };
        Ok(Some((results, reports)))
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(
        &self,
        key: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> anyhow::Result<StoredObject> {
        let stored = StoredObject::describe(&bytes);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .with_context(|| format!("Failed to put s3://{}/{key}", self.bucket))?;

        Ok(stored)
    }

    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let output = match self.client.get_object().bucket(&self.bucket).key(key).send().await {
            Ok(output) => output,
            Err(err) => {
                return match err.into_service_error() {
                    GetObjectError::NoSuchKey(_) => Ok(None),
                    other => Err(anyhow::Error::new(other)
                        .context(format!("Failed to get s3://{}/{key}", self.bucket))),
                };
            }
        };

        let body = output
            .body
            .collect()
            .await
            .with_context(|| format!("Failed to read s3://{}/{key}", self.bucket))?;
        Ok(Some(body.into_bytes().to_vec()))
    }

    async fn list(&self, prefix: &str) -> anyhow::Result<Vec<String>> {
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .into_paginator()
            .send();

        let mut keys = Vec::new();
        while let Some(page) = pages.next().await {
            let page =
                page.with_context(|| format!("Failed to list s3://{}/{prefix}", self.bucket))?;
            keys.extend(page.contents().iter().filter_map(|object| object.key().map(str::to_string)));
        }
        keys.sort();
        Ok(keys)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MemoryObject {
    pub(crate) content_type: String,
    pub(crate) bytes: Vec<u8>,
}

/// Process-local store used when S3 is not configured.
#[derive(Debug, Default)]
pub(crate) struct MemoryObjectStore {
    objects: RwLock<BTreeMap<String, MemoryObject>>,
}

impl MemoryObjectStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn snapshot(&self) -> BTreeMap<String, MemoryObject> {
        self.objects.read().map(|objects| objects.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(
        &self,
        key: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> anyhow::Result<StoredObject> {
        let stored = StoredObject::describe(&bytes);
        let mut objects =
            self.objects.write().map_err(|_| anyhow::anyhow!("object store lock poisoned"))?;
        objects.insert(key.to_string(), MemoryObject { content_type: content_type.to_string(), bytes });
        Ok(stored)
    }

    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let objects =
            self.objects.read().map_err(|_| anyhow::anyhow!("object store lock poisoned"))?;
        Ok(objects.get(key).map(|object| object.bytes.clone()))
    }

    async fn list(&self, prefix: &str) -> anyhow::Result<Vec<String>> {
        let objects =
            self.objects.read().map_err(|_| anyhow::anyhow!("object store lock poisoned"))?;
        Ok(objects.keys().filter(|key| key.starts_with(prefix)).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;

    #[tokio::test]
    async fn memory_store_overwrites_in_place() {
        let store = MemoryObjectStore::new();

        let first = store.put("lab1/todayMarks.json", "application/json", b"{}".to_vec()).await;
        let second = store.put("lab1/todayMarks.json", "application/json", b"{}".to_vec()).await;

        assert_eq!(first.expect("first put"), second.expect("second put"));
        assert_eq!(store.snapshot().len(), 1);
        assert_eq!(store.get("lab1/todayMarks.json").await.expect("get"), Some(b"{}".to_vec()));
        assert_eq!(store.get("lab1/missing.json").await.expect("get"), None);
    }

    #[tokio::test]
    async fn memory_store_lists_by_prefix_sorted() {
        let store = MemoryObjectStore::new();
        for key in ["lab2/x", "lab1/b", "lab1/a"] {
            store.put(key, "text/plain", Vec::new()).await.expect("put");
        }

        let keys = store.list("lab1/").await.expect("list");
        assert_eq!(keys, vec!["lab1/a".to_string(), "lab1/b".to_string()]);
    }

    #[tokio::test]
    async fn stored_object_reports_sha256() {
        let store = MemoryObjectStore::new();
        let stored = store.put("k", "text/plain", b"abc".to_vec()).await.expect("put");
        assert_eq!(stored.size, 3);
        assert_eq!(
            stored.sha256,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn s3_store_is_disabled_without_credentials() {
        let settings = {
            let _guard = test_support::env_lock();
            test_support::set_test_env();
            Settings::load().expect("settings")
        };

        let stores = S3ObjectStore::pair_from_settings(&settings).await.expect("stores");
        assert!(stores.is_none());
    }
}
