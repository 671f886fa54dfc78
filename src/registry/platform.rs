//! Platform selection for multi-platform indexes

use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Platform {
    pub architecture: String,
    pub os: String,
    #[serde(rename = "os.version", default, skip_serializing_if = "Option::is_none")]
    pub os_version: Option<String>,
    #[serde(rename = "os.features", default, skip_serializing_if = "Vec::is_empty")]
    pub os_features: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

impl Platform {
    /// Parse `os/arch[/variant][:osversion]`, e.g. `linux/arm64/v8` or
    /// `windows/amd64:10.0.17763.1234`
    pub fn parse(value: &str) -> Result<Self> {
        let (platform, os_version) = match value.split_once(':') {
            Some((platform, version)) if !version.is_empty() => (platform, Some(version.to_string())),
            Some(_) => return Err(SyncError::InvalidPlatform(value.to_string())),
            None => (value, None),
        };

        let parts: Vec<&str> = platform.split('/').collect();
        if parts.iter().any(|part| part.is_empty()) {
            return Err(SyncError::InvalidPlatform(value.to_string()));
        }
        let (os, architecture, variant) = match parts.as_slice() {
            [os, arch] => (*os, *arch, None),
            [os, arch, variant] => (*os, *arch, Some(variant.to_string())),
            _ => return Err(SyncError::InvalidPlatform(value.to_string())),
        };

        Ok(Self {
            architecture: normalize_arch(architecture).to_string(),
            os: os.to_lowercase(),
            os_version,
            os_features: Vec::new(),
            variant,
        })
    }

    /// Whether a candidate entry satisfies this requested platform.
    ///
    /// Architecture and OS must be equal. OS version and variant are compared
    /// only when requested; requested OS features must all be present.
    pub fn matches(&self, candidate: &Platform) -> bool {
        if self.architecture != normalize_arch(&candidate.architecture) || self.os != candidate.os {
            return false;
        }
        if let Some(version) = &self.os_version {
            if candidate.os_version.as_ref() != Some(version) {
                return false;
            }
        }
        if let Some(variant) = &self.variant {
            if candidate.variant.as_ref() != Some(variant) {
                return false;
            }
        }
        self.os_features
            .iter()
            .all(|feature| candidate.os_features.contains(feature))
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.architecture)?;
        if let Some(variant) = &self.variant {
            write!(f, "/{}", variant)?;
        }
        if let Some(version) = &self.os_version {
            write!(f, ":{}", version)?;
        }
        Ok(())
    }
}

fn normalize_arch(arch: &str) -> &str {
    match arch {
        "x86_64" | "x86-64" => "amd64",
        "aarch64" => "arm64",
        other => other,
    }
}
