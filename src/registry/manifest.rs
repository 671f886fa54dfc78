//! Descriptors and manifest documents
//!
//! Covers the Docker Registry v2 and OCI manifest formats:
//! - image manifests (config + layers)
//! - indexes / manifest lists (per-platform manifests)

use crate::error::{Result, SyncError};
use crate::registry::platform::Platform;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const DOCKER_MANIFEST_V2: &str = "application/vnd.docker.distribution.manifest.v2+json";
pub const DOCKER_MANIFEST_LIST: &str = "application/vnd.docker.distribution.manifest.list.v2+json";
pub const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
pub const OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";
pub const DOCKER_CONFIG: &str = "application/vnd.docker.container.image.v1+json";
pub const DOCKER_LAYER: &str = "application/vnd.docker.image.rootfs.diff.tar";
pub const DOCKER_LAYER_GZIP: &str = "application/vnd.docker.image.rootfs.diff.tar.gzip";

/// Accept header value covering every manifest format handled here
pub const MANIFEST_ACCEPT: &str = "application/vnd.docker.distribution.manifest.v2+json, \
     application/vnd.docker.distribution.manifest.list.v2+json, \
     application/vnd.oci.image.manifest.v1+json, \
     application/vnd.oci.image.index.v1+json";

/// Content-addressable reference to a registry artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    pub media_type: String,
    pub digest: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
}

impl Descriptor {
    /// Describe raw content, computing its sha256 digest
    pub fn for_content(media_type: &str, data: &[u8]) -> Self {
        Self {
            media_type: media_type.to_string(),
            digest: sha256_digest(data),
            size: data.len() as u64,
            platform: None,
        }
    }

    pub fn is_index(&self) -> bool {
        is_index_media_type(&self.media_type)
    }

    pub fn is_manifest(&self) -> bool {
        self.is_index() || self.media_type == DOCKER_MANIFEST_V2 || self.media_type == OCI_MANIFEST
    }

    /// Fail with `DigestMismatch` unless `data` hashes to this descriptor's digest
    pub fn verify(&self, reference: &str, data: &[u8]) -> Result<()> {
        let actual = sha256_digest(data);
        if actual != self.digest {
            return Err(SyncError::DigestMismatch {
                reference: reference.to_string(),
                expected: self.digest.clone(),
                actual,
            });
        }
        Ok(())
    }
}

pub fn sha256_digest(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

pub fn is_index_media_type(media_type: &str) -> bool {
    media_type == OCI_INDEX || media_type == DOCKER_MANIFEST_LIST
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageManifest {
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    pub config: Descriptor,
    pub layers: Vec<Descriptor>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageIndex {
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    pub manifests: Vec<Descriptor>,
}

impl ImageIndex {
    /// First entry whose platform satisfies `wanted`
    pub fn select(&self, wanted: &Platform) -> Option<&Descriptor> {
        self.manifests.iter().find(|entry| {
            entry
                .platform
                .as_ref()
                .is_some_and(|platform| wanted.matches(platform))
        })
    }
}

#[derive(Debug, Clone)]
pub enum Manifest {
    Image(ImageManifest),
    Index(ImageIndex),
}

impl Manifest {
    /// Parse manifest bytes. The media type from the response header wins over
    /// the document's own `mediaType`; documents without either are told apart
    /// by the presence of `manifests`.
    pub fn parse(media_type: &str, data: &[u8]) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_slice(data)
            .map_err(|e| SyncError::Parse(format!("invalid manifest JSON: {}", e)))?;

        let declared = value
            .get("mediaType")
            .and_then(|m| m.as_str())
            .unwrap_or_default();
        let is_index = if is_index_media_type(media_type) {
            true
        } else if media_type == DOCKER_MANIFEST_V2 || media_type == OCI_MANIFEST {
            false
        } else if !declared.is_empty() {
            is_index_media_type(declared)
        } else {
            value.get("manifests").is_some()
        };

        if is_index {
            Ok(Manifest::Index(serde_json::from_value(value)?))
        } else {
            Ok(Manifest::Image(serde_json::from_value(value)?))
        }
    }
}
