//! Content-addressable copy between a source and a target
//!
//! The remote [`Repository`](crate::registry::Repository) and the in-memory
//! [`MemoryStore`] both implement [`ContentSource`] and [`ContentTarget`], so the
//! same [`copy`] routine serves push, pull and tests.

use crate::error::{Result, SyncError};
use crate::logging::Logger;
use crate::registry::manifest::{Descriptor, Manifest, sha256_digest};
use crate::registry::platform::Platform;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::RwLock;

#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Resolve a tag or digest to the root descriptor
    async fn resolve(&self, reference: &str) -> Result<Descriptor>;

    async fn fetch_manifest(&self, desc: &Descriptor) -> Result<Vec<u8>>;

    async fn fetch_blob(&self, desc: &Descriptor) -> Result<Vec<u8>>;
}

#[async_trait]
pub trait ContentTarget: Send + Sync {
    async fn exists(&self, desc: &Descriptor) -> Result<bool>;

    async fn push_blob(&self, desc: &Descriptor, data: Vec<u8>) -> Result<()>;

    /// Store a manifest, tagging it when `tag` is given
    async fn push_manifest(&self, desc: &Descriptor, data: Vec<u8>, tag: Option<&str>) -> Result<()>;
}

/// Copy the artifact `reference` from `source` into `target` under `tag`.
///
/// With a `platform`, an index is narrowed to its matching child and only that
/// child is copied and tagged; for a single-platform manifest the image config
/// must match. Blobs the target already holds are skipped. Returns the
/// descriptor tagged at the target.
pub async fn copy(
    source: &dyn ContentSource,
    target: &dyn ContentTarget,
    reference: &str,
    tag: &str,
    platform: Option<&Platform>,
    output: &Logger,
) -> Result<Descriptor> {
    let root = source.resolve(reference).await?;
    output.detail(&format!(
        "Resolved {} to {} ({})",
        reference, root.digest, root.media_type
    ));

    let root_data = source.fetch_manifest(&root).await?;
    root.verify(reference, &root_data)?;

    match Manifest::parse(&root.media_type, &root_data)? {
        Manifest::Index(index) => match platform {
            Some(wanted) => {
                let child = index
                    .select(wanted)
                    .cloned()
                    .ok_or_else(|| SyncError::PlatformNotFound {
                        reference: reference.to_string(),
                        platform: wanted.to_string(),
                    })?;
                output.detail(&format!("Selected {} for platform {}", child.digest, wanted));
                copy_image(source, target, reference, &child, Some(tag), output).await?;
                Ok(child)
            }
            None => {
                for child in &index.manifests {
                    copy_image(source, target, reference, child, None, output).await?;
                }
                target.push_manifest(&root, root_data, Some(tag)).await?;
                Ok(root)
            }
        },
        Manifest::Image(manifest) => {
            if let Some(wanted) = platform {
                let config = source.fetch_blob(&manifest.config).await?;
                manifest.config.verify(reference, &config)?;
                let found = config_platform(&config)?;
                if !wanted.matches(&found) {
                    return Err(SyncError::PlatformNotFound {
                        reference: reference.to_string(),
                        platform: wanted.to_string(),
                    });
                }
            }
            copy_blobs(source, target, reference, &manifest.config, &manifest.layers, output)
                .await?;
            target.push_manifest(&root, root_data, Some(tag)).await?;
            Ok(root)
        }
    }
}

async fn copy_image(
    source: &dyn ContentSource,
    target: &dyn ContentTarget,
    reference: &str,
    desc: &Descriptor,
    tag: Option<&str>,
    output: &Logger,
) -> Result<()> {
    let data = source.fetch_manifest(desc).await?;
    desc.verify(reference, &data)?;
    match Manifest::parse(&desc.media_type, &data)? {
        Manifest::Image(manifest) => {
            copy_blobs(source, target, reference, &manifest.config, &manifest.layers, output)
                .await?;
        }
        Manifest::Index(_) => {
            return Err(SyncError::Parse(format!(
                "{}: nested index {} is not supported",
                reference, desc.digest
            )));
        }
    }
    target.push_manifest(desc, data, tag).await
}

async fn copy_blobs(
    source: &dyn ContentSource,
    target: &dyn ContentTarget,
    reference: &str,
    config: &Descriptor,
    layers: &[Descriptor],
    output: &Logger,
) -> Result<()> {
    for blob in std::iter::once(config).chain(layers) {
        if target.exists(blob).await? {
            output.detail(&format!("Blob {} already present, skipping", blob.digest));
            continue;
        }
        let data = source.fetch_blob(blob).await?;
        blob.verify(reference, &data)?;
        target.push_blob(blob, data).await?;
        output.detail(&format!(
            "Copied blob {} ({})",
            blob.digest,
            output.format_size(blob.size)
        ));
    }
    Ok(())
}

#[derive(Deserialize)]
struct ConfigPlatform {
    #[serde(default)]
    architecture: String,
    #[serde(default)]
    os: String,
    #[serde(rename = "os.version", default)]
    os_version: Option<String>,
    #[serde(rename = "os.features", default)]
    os_features: Vec<String>,
    #[serde(default)]
    variant: Option<String>,
}

fn config_platform(config: &[u8]) -> Result<Platform> {
    let parsed: ConfigPlatform = serde_json::from_slice(config)?;
    Ok(Platform {
        architecture: parsed.architecture,
        os: parsed.os,
        os_version: parsed.os_version,
        os_features: parsed.os_features,
        variant: parsed.variant,
    })
}

#[derive(Debug, Clone)]
struct StoredContent {
    media_type: String,
    data: Vec<u8>,
}

/// Transient content store used as the destination of a pull
#[derive(Debug, Default)]
pub struct MemoryStore {
    content: RwLock<HashMap<String, StoredContent>>,
    tags: RwLock<HashMap<String, Descriptor>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert raw content directly, returning its descriptor
    pub fn insert(&self, media_type: &str, data: Vec<u8>) -> Result<Descriptor> {
        let desc = Descriptor::for_content(media_type, &data);
        self.write_content(&desc, data)?;
        Ok(desc)
    }

    pub fn tag(&self, tag: &str, desc: Descriptor) -> Result<()> {
        let mut tags = self
            .tags
            .write()
            .map_err(|_| SyncError::Task("memory store tag lock poisoned".to_string()))?;
        tags.insert(tag.to_string(), desc);
        Ok(())
    }

    pub fn blob_count(&self) -> usize {
        self.content.read().map(|c| c.len()).unwrap_or(0)
    }

    fn write_content(&self, desc: &Descriptor, data: Vec<u8>) -> Result<()> {
        let mut content = self
            .content
            .write()
            .map_err(|_| SyncError::Task("memory store lock poisoned".to_string()))?;
        content.insert(
            desc.digest.clone(),
            StoredContent {
                media_type: desc.media_type.clone(),
                data,
            },
        );
        Ok(())
    }

    fn read_content(&self, digest: &str) -> Result<StoredContent> {
        let content = self
            .content
            .read()
            .map_err(|_| SyncError::Task("memory store lock poisoned".to_string()))?;
        content
            .get(digest)
            .cloned()
            .ok_or_else(|| SyncError::NotFound(format!("content {}", digest)))
    }
}

#[async_trait]
impl ContentSource for MemoryStore {
    async fn resolve(&self, reference: &str) -> Result<Descriptor> {
        if reference.contains(':') {
            let stored = self.read_content(reference)?;
            return Ok(Descriptor {
                media_type: stored.media_type,
                digest: reference.to_string(),
                size: stored.data.len() as u64,
                platform: None,
            });
        }
        let tags = self
            .tags
            .read()
            .map_err(|_| SyncError::Task("memory store tag lock poisoned".to_string()))?;
        tags.get(reference)
            .cloned()
            .ok_or_else(|| SyncError::NotFound(format!("tag {}", reference)))
    }

    async fn fetch_manifest(&self, desc: &Descriptor) -> Result<Vec<u8>> {
        Ok(self.read_content(&desc.digest)?.data)
    }

    async fn fetch_blob(&self, desc: &Descriptor) -> Result<Vec<u8>> {
        Ok(self.read_content(&desc.digest)?.data)
    }
}

#[async_trait]
impl ContentTarget for MemoryStore {
    async fn exists(&self, desc: &Descriptor) -> Result<bool> {
        let content = self
            .content
            .read()
            .map_err(|_| SyncError::Task("memory store lock poisoned".to_string()))?;
        Ok(content.contains_key(&desc.digest))
    }

    async fn push_blob(&self, desc: &Descriptor, data: Vec<u8>) -> Result<()> {
        let actual = sha256_digest(&data);
        if actual != desc.digest {
            return Err(SyncError::DigestMismatch {
                reference: "memory store".to_string(),
                expected: desc.digest.clone(),
                actual,
            });
        }
        self.write_content(desc, data)
    }

    async fn push_manifest(&self, desc: &Descriptor, data: Vec<u8>, tag: Option<&str>) -> Result<()> {
        self.push_blob(desc, data).await?;
        if let Some(tag) = tag {
            let mut tagged = desc.clone();
            tagged.platform = None;
            self.tag(tag, tagged)?;
        }
        Ok(())
    }
}
