//! Configuration file model and validation
//!
//! The configuration is a YAML document. Keys are camelCase; every section has
//! defaults so a minimal file only lists registries and images.

use crate::error::{Result, SyncError};
use crate::image::{Image, PatchPolicy};
use crate::registry::{Platform, Registry};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub registries: Vec<Registry>,
    pub images: Vec<ImageConfig>,
    pub mirrors: Vec<MirrorConfig>,
    pub rewrites: RewriteConfig,
    pub import: ImportConfig,
    pub tools: ToolConfig,
}

/// An image listed directly in configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImageConfig {
    #[serde(rename = "ref")]
    pub reference: String,
    /// `false` excludes the image from patching, `true` opts in explicitly
    pub patch: Option<bool>,
    pub use_digest: bool,
    /// Platform to copy and scan for this image, overriding `import.architecture`
    pub architecture: Option<String>,
}

impl ImageConfig {
    pub fn to_image(&self) -> Result<Image> {
        let mut image = Image::parse(&self.reference)?.with_patch(PatchPolicy::from(self.patch));
        if self.use_digest {
            if image.digest.is_none() {
                return Err(SyncError::Configuration(format!(
                    "image {} sets useDigest but has no digest",
                    self.reference
                )));
            }
            image.use_digest = true;
        }
        if let Some(architecture) = &self.architecture {
            Platform::parse(architecture)?;
        }
        Ok(image.with_architecture(self.architecture.clone()))
    }
}

/// Replace a source registry host with a mirror
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MirrorConfig {
    pub registry: String,
    pub mirror: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RewriteConfig {
    /// Reference prefixes dropped from the catalog
    pub exclude: Vec<PrefixRule>,
    /// Reference prefixes never patched
    pub exclude_patch: Vec<PrefixRule>,
    pub modify: Vec<ModifyRule>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PrefixRule {
    #[serde(rename = "ref")]
    pub reference: String,
}

/// Replace the first occurrence of `from` in references starting with it
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModifyRule {
    pub from: String,
    pub to: String,
}

/// How an unreachable registry affects the existence decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExistencePolicy {
    /// Treat the registry as missing the image and carry on
    #[default]
    BestEffort,
    /// Abort the batch on the first failed probe
    Strict,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImportConfig {
    pub enabled: bool,
    /// Copy every image even when already present
    pub all: bool,
    /// Platform restriction, e.g. `linux/amd64`
    pub architecture: Option<String>,
    /// Worker pool size for registry probes and pushes
    pub concurrency: usize,
    pub existence: ExistencePolicy,
    pub copacetic: CopaceticConfig,
    pub cosign: CosignConfig,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            all: false,
            architecture: None,
            concurrency: 4,
            existence: ExistencePolicy::BestEffort,
            copacetic: CopaceticConfig::default(),
            cosign: CosignConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CopaceticConfig {
    pub enabled: bool,
    /// Log and skip images whose patch fails instead of aborting
    pub ignore_errors: bool,
    pub buildkitd: BuildkitConfig,
    pub trivy: TrivyConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BuildkitConfig {
    pub addr: String,
    pub ca_cert_path: Option<PathBuf>,
    pub cert_path: Option<PathBuf>,
    pub key_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TrivyConfig {
    /// Trivy server address; empty runs the scanner standalone
    pub addr: String,
    pub insecure: bool,
    pub ignore_unfixed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OutputConfig {
    pub reports: OutputFolder,
    pub tars: OutputFolder,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            reports: OutputFolder {
                folder: PathBuf::from("reports"),
                clean: true,
            },
            tars: OutputFolder {
                folder: PathBuf::from("tars"),
                clean: true,
            },
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OutputFolder {
    pub folder: PathBuf,
    /// Remove the artifacts written here when the batch ends
    pub clean: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CosignConfig {
    pub enabled: bool,
    pub key_ref: String,
    pub key_ref_pass: Option<String>,
    pub allow_insecure: bool,
    #[serde(rename = "allowHTTPRegistry")]
    pub allow_http_registry: bool,
}

/// Executables used for the external collaborators
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ToolConfig {
    pub trivy: String,
    pub copa: String,
    pub docker: String,
    pub cosign: String,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            trivy: "trivy".to_string(),
            copa: "copa".to_string(),
            docker: "docker".to_string(),
            cosign: "cosign".to_string(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            SyncError::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&data)
    }

    pub fn from_yaml(data: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for registry in &self.registries {
            if registry.name.is_empty() || registry.url.is_empty() {
                return Err(SyncError::Configuration(
                    "registries need both a name and a url".to_string(),
                ));
            }
            if !names.insert(registry.name.as_str()) {
                return Err(SyncError::Configuration(format!(
                    "duplicate registry name: {}",
                    registry.name
                )));
            }
        }

        if self.import.enabled && self.registries.is_empty() {
            return Err(SyncError::Configuration(
                "import is enabled but no registries are configured".to_string(),
            ));
        }
        if self.import.concurrency == 0 {
            return Err(SyncError::Configuration(
                "import.concurrency must be at least 1".to_string(),
            ));
        }
        if let Some(architecture) = &self.import.architecture {
            Platform::parse(architecture)?;
        }

        let copacetic = &self.import.copacetic;
        if copacetic.enabled {
            if copacetic.output.reports.folder.as_os_str().is_empty()
                || copacetic.output.tars.folder.as_os_str().is_empty()
            {
                return Err(SyncError::Configuration(
                    "copacetic output folders must be set".to_string(),
                ));
            }
            if copacetic.buildkitd.addr.is_empty() {
                return Err(SyncError::Configuration(
                    "copacetic.buildkitd.addr must be set".to_string(),
                ));
            }
        }

        if self.import.cosign.enabled && self.import.cosign.key_ref.is_empty() {
            return Err(SyncError::Configuration(
                "cosign.keyRef must be set when signing is enabled".to_string(),
            ));
        }

        for rule in &self.rewrites.modify {
            if rule.from.is_empty() {
                return Err(SyncError::Configuration(
                    "rewrites.modify entries need a non-empty from".to_string(),
                ));
            }
        }

        for image in &self.images {
            image.to_image()?;
        }
        Ok(())
    }

    /// Images from the `images` section, parsed
    pub fn static_images(&self) -> Result<Vec<Image>> {
        self.images.iter().map(ImageConfig::to_image).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
registries:
  - name: primary
    url: registry.example.com
  - name: edge
    url: localhost:5000
    plainHTTP: true
images:
  - ref: docker.io/library/nginx:1.25
  - ref: quay.io/org/tool:2.3
    patch: false
mirrors:
  - registry: docker.io
    mirror: mirror.gcr.io
rewrites:
  exclude:
    - ref: docker.io/library/busybox
  modify:
    - from: quay.io/org
      to: ghcr.io/org
import:
  enabled: true
  architecture: linux/amd64
  copacetic:
    enabled: true
    ignoreErrors: true
    buildkitd:
      addr: tcp://127.0.0.1:8888
    trivy:
      addr: http://127.0.0.1:4954
      ignoreUnfixed: true
    output:
      reports:
        folder: out/reports
        clean: false
      tars:
        folder: out/tars
        clean: true
  cosign:
    enabled: true
    keyRef: cosign.key
    allowHTTPRegistry: true
"#;

    #[test]
    fn test_parse_full_config() {
        let config = Config::from_yaml(SAMPLE).unwrap();
        assert_eq!(config.registries.len(), 2);
        assert!(config.registries[1].plain_http);
        assert_eq!(config.images[1].patch, Some(false));
        assert_eq!(config.import.concurrency, 4);
        assert_eq!(config.import.existence, ExistencePolicy::BestEffort);
        assert!(config.import.copacetic.ignore_errors);
        assert!(!config.import.copacetic.output.reports.clean);
        assert_eq!(config.import.copacetic.output.tars.folder, PathBuf::from("out/tars"));
        assert!(config.import.cosign.allow_http_registry);
        assert_eq!(config.tools.trivy, "trivy");
    }

    #[test]
    fn test_static_images_carry_patch_policy() {
        let config = Config::from_yaml(SAMPLE).unwrap();
        let images = config.static_images().unwrap();
        assert_eq!(images[0].patch, PatchPolicy::Unset);
        assert_eq!(images[1].patch, PatchPolicy::Excluded);
    }

    #[test]
    fn test_rejects_duplicate_registry_names() {
        let yaml = "registries:\n  - {name: a, url: one.example}\n  - {name: a, url: two.example}\n";
        assert!(matches!(Config::from_yaml(yaml), Err(SyncError::Configuration(_))));
    }

    #[test]
    fn test_rejects_import_without_registries() {
        let yaml = "import:\n  enabled: true\n";
        assert!(Config::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_rejects_invalid_architecture() {
        let yaml = "import:\n  architecture: amd64\n";
        assert!(Config::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_image_architecture_is_validated_and_kept() {
        let yaml = "images:\n  - ref: tool:2.3\n    architecture: linux/arm64\n";
        let images = Config::from_yaml(yaml).unwrap().static_images().unwrap();
        assert_eq!(images[0].architecture.as_deref(), Some("linux/arm64"));

        let yaml = "images:\n  - ref: tool:2.3\n    architecture: arm64\n";
        assert!(Config::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_rejects_signing_without_key() {
        let yaml = "registries:\n  - {name: a, url: one.example}\nimport:\n  enabled: true\n  cosign:\n    enabled: true\n";
        assert!(Config::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_use_digest_requires_digest() {
        let yaml = "images:\n  - ref: nginx:1.25\n    useDigest: true\n";
        assert!(Config::from_yaml(yaml).is_err());
    }
}
