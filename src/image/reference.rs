//! Image references
//!
//! An [`Image`] is the mutable record the pipeline carries around; an [`ImageKey`]
//! is the canonical reference string it had when it was keyed. Collections are
//! always keyed by `ImageKey`, never by the record itself.

use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Registry assumed for references without an explicit host
pub const DEFAULT_REGISTRY: &str = "docker.io";

pub const DEFAULT_TAG: &str = "latest";

/// Whether an image takes part in vulnerability patching
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchPolicy {
    /// No explicit choice; patched when the scan says it is worthwhile
    #[default]
    Unset,
    Excluded,
    Included,
}

impl PatchPolicy {
    pub fn is_excluded(self) -> bool {
        self == PatchPolicy::Excluded
    }
}

impl From<Option<bool>> for PatchPolicy {
    fn from(value: Option<bool>) -> Self {
        match value {
            None => PatchPolicy::Unset,
            Some(false) => PatchPolicy::Excluded,
            Some(true) => PatchPolicy::Included,
        }
    }
}

/// Canonical reference string used as an immutable collection key
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageKey(String);

impl ImageKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    /// Registry host, optionally with port
    pub registry: String,
    /// Registry-relative repository path, e.g. `library/nginx`
    pub repository: String,
    pub tag: String,
    pub digest: Option<String>,
    /// Pull by digest instead of tag
    pub use_digest: bool,
    pub patch: PatchPolicy,
    /// Platform constraint such as `linux/amd64`
    pub architecture: Option<String>,
}

impl Image {
    /// Parse a reference such as `ghcr.io/org/app:1.0@sha256:...`
    pub fn parse(reference: &str) -> Result<Self> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(SyncError::InvalidReference("empty reference".to_string()));
        }
        if reference.contains("://") {
            return Err(SyncError::InvalidReference(format!(
                "{}: references must not include a scheme",
                reference
            )));
        }

        let (name_part, digest) = match reference.split_once('@') {
            Some((name, digest)) => {
                validate_digest(reference, digest)?;
                (name, Some(digest.to_string()))
            }
            None => (reference, None),
        };

        // A colon after the last slash separates the tag; earlier colons belong to a port
        let last_slash = name_part.rfind('/').map(|i| i + 1).unwrap_or(0);
        let (path, tag) = match name_part[last_slash..].rfind(':') {
            Some(pos) => {
                let split = last_slash + pos;
                (&name_part[..split], Some(name_part[split + 1..].to_string()))
            }
            None => (name_part, None),
        };

        if tag.as_deref() == Some("") {
            return Err(SyncError::InvalidReference(format!("{}: empty tag", reference)));
        }

        let (registry, repository) = split_registry(path);
        if repository.is_empty() || repository.split('/').any(|segment| segment.is_empty()) {
            return Err(SyncError::InvalidReference(format!(
                "{}: invalid repository path",
                reference
            )));
        }
        if repository.chars().any(|c| c.is_ascii_uppercase()) {
            return Err(SyncError::InvalidReference(format!(
                "{}: repository must be lowercase",
                reference
            )));
        }

        let use_digest = digest.is_some() && tag.is_none();
        Ok(Self {
            registry,
            repository,
            tag: tag.unwrap_or_else(|| DEFAULT_TAG.to_string()),
            digest,
            use_digest,
            patch: PatchPolicy::Unset,
            architecture: None,
        })
    }

    pub fn with_patch(mut self, patch: PatchPolicy) -> Self {
        self.patch = patch;
        self
    }

    pub fn with_architecture(mut self, architecture: Option<String>) -> Self {
        self.architecture = architecture;
        self
    }

    /// Registry-relative name, e.g. `library/nginx`
    pub fn name(&self) -> &str {
        &self.repository
    }

    /// Name as users write it: Docker Hub official images drop `library/`
    pub fn familiar_name(&self) -> &str {
        if self.registry == DEFAULT_REGISTRY {
            self.repository
                .strip_prefix("library/")
                .unwrap_or(&self.repository)
        } else {
            &self.repository
        }
    }

    /// Reference the source registry is pulled with: the digest when pinned, the tag otherwise
    pub fn source_reference(&self) -> &str {
        match (&self.digest, self.use_digest) {
            (Some(digest), true) => digest,
            _ => &self.tag,
        }
    }

    /// Full reference including registry host
    pub fn reference(&self) -> String {
        let mut out = format!("{}/{}", self.registry, self.repository);
        if self.use_digest {
            if let Some(digest) = &self.digest {
                out.push('@');
                out.push_str(digest);
                return out;
            }
        }
        out.push(':');
        out.push_str(&self.tag);
        if let Some(digest) = &self.digest {
            out.push('@');
            out.push_str(digest);
        }
        out
    }

    /// The same image addressed in another registry
    pub fn reference_in(&self, registry_url: &str) -> String {
        format!(
            "{}/{}:{}",
            registry_url.trim_end_matches('/'),
            self.repository,
            self.tag
        )
    }

    pub fn key(&self) -> ImageKey {
        ImageKey(self.reference())
    }
}

impl fmt::Display for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reference())
    }
}

impl FromStr for Image {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        Image::parse(s)
    }
}

fn split_registry(path: &str) -> (String, String) {
    match path.split_once('/') {
        Some((first, rest)) if looks_like_host(first) => (first.to_string(), rest.to_string()),
        Some(_) => (DEFAULT_REGISTRY.to_string(), path.to_string()),
        None => (DEFAULT_REGISTRY.to_string(), format!("library/{}", path)),
    }
}

fn looks_like_host(segment: &str) -> bool {
    segment.contains('.') || segment.contains(':') || segment == "localhost"
}

fn validate_digest(reference: &str, digest: &str) -> Result<()> {
    let valid = digest
        .split_once(':')
        .map(|(algorithm, hex)| {
            !algorithm.is_empty() && !hex.is_empty() && hex.chars().all(|c| c.is_ascii_hexdigit())
        })
        .unwrap_or(false);
    if valid {
        Ok(())
    } else {
        Err(SyncError::InvalidReference(format!(
            "{}: malformed digest {}",
            reference, digest
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIGEST: &str = "sha256:b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    #[test]
    fn test_parse_docker_hub_shorthand() {
        let image = Image::parse("nginx").unwrap();
        assert_eq!(image.registry, "docker.io");
        assert_eq!(image.repository, "library/nginx");
        assert_eq!(image.tag, "latest");
        assert_eq!(image.reference(), "docker.io/library/nginx:latest");
        assert_eq!(image.familiar_name(), "nginx");
    }

    #[test]
    fn test_parse_registry_with_port() {
        let image = Image::parse("localhost:5000/team/app:1.0").unwrap();
        assert_eq!(image.registry, "localhost:5000");
        assert_eq!(image.repository, "team/app");
        assert_eq!(image.tag, "1.0");
    }

    #[test]
    fn test_parse_org_without_host() {
        let image = Image::parse("bitnami/redis:7.2").unwrap();
        assert_eq!(image.registry, "docker.io");
        assert_eq!(image.repository, "bitnami/redis");
    }

    #[test]
    fn test_parse_digest_only_pins_digest() {
        let image = Image::parse(&format!("ghcr.io/org/app@{}", DIGEST)).unwrap();
        assert!(image.use_digest);
        assert_eq!(image.source_reference(), DIGEST);
        assert_eq!(image.reference(), format!("ghcr.io/org/app@{}", DIGEST));
    }

    #[test]
    fn test_parse_tag_and_digest_keeps_tag() {
        let image = Image::parse(&format!("ghcr.io/org/app:1.2@{}", DIGEST)).unwrap();
        assert!(!image.use_digest);
        assert_eq!(image.source_reference(), "1.2");
        assert_eq!(image.reference(), format!("ghcr.io/org/app:1.2@{}", DIGEST));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(Image::parse("").is_err());
        assert!(Image::parse("https://ghcr.io/app:1").is_err());
        assert!(Image::parse("ghcr.io/app:").is_err());
        assert!(Image::parse("ghcr.io//app").is_err());
        assert!(Image::parse("ghcr.io/App:1").is_err());
        assert!(Image::parse("ghcr.io/app@sha256:zz").is_err());
    }

    #[test]
    fn test_patch_policy_from_optional_flag() {
        assert_eq!(PatchPolicy::from(None), PatchPolicy::Unset);
        assert_eq!(PatchPolicy::from(Some(false)), PatchPolicy::Excluded);
        assert_eq!(PatchPolicy::from(Some(true)), PatchPolicy::Included);
    }

    #[test]
    fn test_key_is_independent_of_later_mutation() {
        let mut image = Image::parse("app:1.0").unwrap();
        let key = image.key();
        image.registry = "mirror.local".to_string();
        assert_eq!(key.as_str(), "docker.io/library/app:1.0");
        assert_ne!(image.key(), key);
    }

    #[test]
    fn test_reference_in_other_registry() {
        let image = Image::parse("quay.io/org/tool:2.3").unwrap();
        assert_eq!(image.reference_in("registry.local:5000/"), "registry.local:5000/org/tool:2.3");
    }
}
