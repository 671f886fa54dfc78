//! Vulnerability report model and patch classification
//!
//! The report follows the scanner's JSON layout (PascalCase keys). Fields this
//! crate does not interpret are kept in `extra` so a written report can still be
//! fed to the patcher unchanged.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// OS families the patcher can remediate
pub const SUPPORTED_OS_FAMILIES: &[&str] = &[
    "alpine",
    "debian",
    "ubuntu",
    "cbl-mariner",
    "azurelinux",
    "centos",
    "oracle",
    "redhat",
    "rocky",
    "amazon",
    "alma",
];

/// Result class of findings rooted in the base image's package manager
pub const OS_PACKAGES_CLASS: &str = "os-pkgs";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ScanReport {
    #[serde(default)]
    pub artifact_name: String,
    #[serde(default)]
    pub metadata: ReportMetadata,
    #[serde(default)]
    pub results: Vec<ScanResult>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ReportMetadata {
    #[serde(rename = "OS", default, skip_serializing_if = "Option::is_none")]
    pub os: Option<OsInfo>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OsInfo {
    #[serde(default)]
    pub family: String,
    #[serde(default)]
    pub name: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ScanResult {
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub class: String,
    #[serde(rename = "Type", default)]
    pub kind: String,
    /// The scanner writes `null` for a clean target
    #[serde(default)]
    pub vulnerabilities: Option<Vec<Vulnerability>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Vulnerability {
    #[serde(rename = "VulnerabilityID")]
    pub id: String,
    #[serde(default)]
    pub pkg_name: String,
    #[serde(default)]
    pub installed_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed_version: Option<String>,
    #[serde(default)]
    pub severity: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ScanReport {
    /// Detected OS family, empty when the scanner found none
    pub fn os_family(&self) -> &str {
        self.metadata
            .os
            .as_ref()
            .map(|os| os.family.as_str())
            .unwrap_or_default()
    }

    pub fn vulnerability_count(&self) -> usize {
        self.results
            .iter()
            .map(|r| r.vulnerabilities.as_ref().map_or(0, Vec::len))
            .sum()
    }

    pub fn os_package_vulnerability_count(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.class == OS_PACKAGES_CLASS)
            .map(|r| r.vulnerabilities.as_ref().map_or(0, Vec::len))
            .sum()
    }
}

pub fn is_supported_os(family: &str) -> bool {
    let family = family.to_ascii_lowercase();
    SUPPORTED_OS_FAMILIES.contains(&family.as_str())
}

pub fn contains_os_package_findings(results: &[ScanResult]) -> bool {
    results.iter().any(|result| {
        result.class == OS_PACKAGES_CLASS
            && result
                .vulnerabilities
                .as_ref()
                .is_some_and(|v| !v.is_empty())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEBIAN_REPORT: &str = r#"{
        "SchemaVersion": 2,
        "ArtifactName": "docker.io/library/app:1.0",
        "ArtifactType": "container_image",
        "Metadata": {"OS": {"Family": "debian", "Name": "12.5"}, "ImageID": "sha256:abc"},
        "Results": [
            {"Target": "app (debian 12.5)", "Class": "os-pkgs", "Type": "debian",
             "Vulnerabilities": [{"VulnerabilityID": "CVE-2024-0001", "PkgName": "openssl",
                                  "InstalledVersion": "3.0.11-1", "FixedVersion": "3.0.13-1",
                                  "Severity": "HIGH", "Title": "kept verbatim"}]},
            {"Target": "app/go.mod", "Class": "lang-pkgs", "Type": "gomod", "Vulnerabilities": null}
        ]
    }"#;

    #[test]
    fn test_parse_and_classify() {
        let report: ScanReport = serde_json::from_str(DEBIAN_REPORT).unwrap();
        assert_eq!(report.os_family(), "debian");
        assert!(is_supported_os(report.os_family()));
        assert!(contains_os_package_findings(&report.results));
        assert_eq!(report.vulnerability_count(), 1);
        assert_eq!(report.os_package_vulnerability_count(), 1);
    }

    #[test]
    fn test_unknown_fields_survive_rewrite() {
        let report: ScanReport = serde_json::from_str(DEBIAN_REPORT).unwrap();
        let written = serde_json::to_value(&report).unwrap();
        assert_eq!(written["SchemaVersion"], 2);
        assert_eq!(written["Metadata"]["ImageID"], "sha256:abc");
        assert_eq!(written["Results"][0]["Vulnerabilities"][0]["Title"], "kept verbatim");
    }

    #[test]
    fn test_language_findings_are_not_os_findings() {
        let results = vec![ScanResult {
            class: "lang-pkgs".to_string(),
            vulnerabilities: Some(vec![Vulnerability::default()]),
            ..Default::default()
        }];
        assert!(!contains_os_package_findings(&results));

        let clean = vec![ScanResult {
            class: OS_PACKAGES_CLASS.to_string(),
            vulnerabilities: None,
            ..Default::default()
        }];
        assert!(!contains_os_package_findings(&clean));
    }

    #[test]
    fn test_supported_os_families() {
        assert!(is_supported_os("alpine"));
        assert!(is_supported_os("Ubuntu"));
        assert!(!is_supported_os("windows"));
        assert!(!is_supported_os(""));
    }
}
