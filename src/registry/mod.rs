//! Registry access: transport, authentication, content copy and fan-out
//!
//! - [`client`] talks the Registry v2 protocol to one endpoint
//! - [`store`] holds the copy engine and the transient in-memory store
//! - [`set`] probes presence across every configured registry
//! - [`import`] distributes candidate images to the registries missing them

pub mod archive;
pub mod auth;
pub mod client;
pub mod import;
pub mod manifest;
pub mod platform;
pub mod set;
pub mod store;

pub use archive::ArchiveReader;
pub use auth::{AuthChallenge, CredentialStore, Credentials};
pub use client::{PulledImage, RegistryClient, Repository};
pub use import::{ImportPlan, Importer, PushRecord};
pub use manifest::Descriptor;
pub use platform::Platform;
pub use set::{
    ExistenceMatrix, ImportCandidate, ImportCandidates, Presence, RegistrySet,
    identify_import_candidates, select_import_candidates,
};
pub use store::{ContentSource, ContentTarget, MemoryStore, copy};

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A configured target registry. Immutable after configuration load.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Registry {
    pub name: String,
    /// Host with optional port and path prefix, e.g. `registry.example.com:5000`
    pub url: String,
    /// Accept invalid TLS certificates
    pub insecure: bool,
    #[serde(rename = "plainHTTP")]
    pub plain_http: bool,
}

impl Registry {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            ..Default::default()
        }
    }
}

/// Presence check against one registry
#[async_trait]
pub trait Exister: Send + Sync {
    fn registry(&self) -> &Registry;

    fn name(&self) -> &str {
        &self.registry().name
    }

    /// `Ok(false)` only when the registry confirmed the reference is absent;
    /// connectivity and auth failures come back as errors.
    async fn exist(&self, name: &str, reference: &str) -> Result<bool>;
}

/// Distribution into one registry
#[async_trait]
pub trait Pusher: Exister {
    /// Copy `source_url/name:reference` into this registry as `name:tag`
    async fn push(
        &self,
        source_url: &str,
        name: &str,
        reference: &str,
        tag: &str,
        platform: Option<&Platform>,
    ) -> Result<Descriptor>;

    /// Upload a docker-save archive as `name:tag`
    async fn push_archive(&self, archive: &Path, name: &str, tag: &str) -> Result<Descriptor>;
}

/// Hosts that are served over plain HTTP without configuration
pub fn is_local_address(url: &str) -> bool {
    let host = url
        .trim_start_matches("http://")
        .trim_start_matches("https://");
    let host = host.split('/').next().unwrap_or(host);
    let host = if host.starts_with('[') {
        host.split(']').next().map(|h| h.trim_start_matches('[')).unwrap_or(host)
    } else {
        host.rsplit_once(':').map(|(h, _)| h).unwrap_or(host)
    };
    matches!(host, "localhost" | "127.0.0.1" | "0.0.0.0" | "::1")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_address_detection() {
        assert!(is_local_address("localhost:5000"));
        assert!(is_local_address("127.0.0.1:5000/mirror"));
        assert!(is_local_address("0.0.0.0"));
        assert!(is_local_address("[::1]:5000"));
        assert!(!is_local_address("registry.example.com"));
        assert!(!is_local_address("localhost.example.com:443"));
    }

    #[test]
    fn test_registry_from_yaml() {
        let registry: Registry =
            serde_yaml::from_str("name: edge\nurl: localhost:5000\nplainHTTP: true\n").unwrap();
        assert_eq!(registry.name, "edge");
        assert!(registry.plain_http);
        assert!(!registry.insecure);
    }
}
