//! Vulnerability scanning and the patch-or-push decision

pub mod report;
pub mod trivy;

pub use report::{ScanReport, ScanResult, Vulnerability, contains_os_package_findings, is_supported_os};
pub use trivy::TrivyScanner;

use crate::error::Result;
use crate::image::{Image, PatchPolicy};
use crate::logging::Logger;
use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// What the scanner looks at
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanTarget {
    /// An image in a registry, optionally pinned to one platform
    Reference {
        reference: String,
        platform: Option<String>,
    },
    /// A docker-save archive on disk
    Archive(PathBuf),
}

impl fmt::Display for ScanTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanTarget::Reference { reference, .. } => f.write_str(reference),
            ScanTarget::Archive(path) => write!(f, "{}", path.display()),
        }
    }
}

impl ScanTarget {
    pub fn reference(reference: impl Into<String>) -> Self {
        ScanTarget::Reference {
            reference: reference.into(),
            platform: None,
        }
    }

    /// `image` as pulled from its source registry, with its own platform if set
    pub fn image(image: &Image) -> Self {
        ScanTarget::Reference {
            reference: image.reference(),
            platform: image.architecture.clone(),
        }
    }
}

#[async_trait]
pub trait Scanner: Send + Sync {
    async fn scan(&self, target: &ScanTarget) -> Result<ScanReport>;
}

/// Why an image is distributed without patching
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushReason {
    Excluded,
    UnsupportedOs(String),
    NoOsPackageFindings,
    /// Patching failed and errors are ignored
    PatchFailed(String),
}

/// Exactly one per image per run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    PushOnly(PushReason),
    PatchThenPush,
}

impl Decision {
    pub fn is_patch(&self) -> bool {
        matches!(self, Decision::PatchThenPush)
    }

    /// Warning to surface for this decision, if any
    pub fn warning(&self, image: &Image) -> Option<String> {
        match self {
            Decision::PushOnly(PushReason::UnsupportedOs(os)) => Some(format!(
                "Image {} contains an unsupported OS ({}). The image will not be patched.",
                image,
                if os.is_empty() { "unknown" } else { os }
            )),
            Decision::PushOnly(PushReason::NoOsPackageFindings) => Some(format!(
                "Image {} does not contain os-pkgs vulnerabilities. The image will not be patched.",
                image
            )),
            Decision::PushOnly(PushReason::PatchFailed(message)) => Some(format!(
                "Patching {} failed, pushing it unpatched: {}",
                image, message
            )),
            Decision::PushOnly(PushReason::Excluded) | Decision::PatchThenPush => None,
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::PatchThenPush => f.write_str("patch"),
            Decision::PushOnly(PushReason::Excluded) => f.write_str("push (excluded)"),
            Decision::PushOnly(PushReason::UnsupportedOs(_)) => f.write_str("push (unsupported OS)"),
            Decision::PushOnly(PushReason::NoOsPackageFindings) => {
                f.write_str("push (no os-pkgs findings)")
            }
            Decision::PushOnly(PushReason::PatchFailed(_)) => f.write_str("push (patch failed)"),
        }
    }
}

/// Decide from an image's patch policy and its scan report
pub fn classify(image: &Image, report: &ScanReport) -> Decision {
    if image.patch == PatchPolicy::Excluded {
        return Decision::PushOnly(PushReason::Excluded);
    }
    if !is_supported_os(report.os_family()) {
        return Decision::PushOnly(PushReason::UnsupportedOs(report.os_family().to_string()));
    }
    if !contains_os_package_findings(&report.results) {
        return Decision::PushOnly(PushReason::NoOsPackageFindings);
    }
    Decision::PatchThenPush
}

/// Scan result for one image; excluded images are never scanned
#[derive(Debug, Clone)]
pub struct Assessment {
    pub decision: Decision,
    pub report: Option<ScanReport>,
}

pub struct ScanCoordinator {
    scanner: Arc<dyn Scanner>,
    output: Logger,
}

impl ScanCoordinator {
    pub fn new(scanner: Arc<dyn Scanner>, output: Logger) -> Self {
        Self { scanner, output }
    }

    pub async fn scan(&self, target: &ScanTarget) -> Result<ScanReport> {
        let report = self.scanner.scan(target).await?;
        self.output.detail(&format!(
            "{}: OS {}, {} findings ({} in OS packages)",
            target,
            if report.os_family().is_empty() { "unknown" } else { report.os_family() },
            report.vulnerability_count(),
            report.os_package_vulnerability_count()
        ));
        Ok(report)
    }

    /// Scan `image` unless excluded and classify the result
    pub async fn assess(&self, image: &Image) -> Result<Assessment> {
        if image.patch.is_excluded() {
            self.output
                .debug(&format!("Image {} should not be patched", image));
            return Ok(Assessment {
                decision: Decision::PushOnly(PushReason::Excluded),
                report: None,
            });
        }

        let report = self.scan(&ScanTarget::image(image)).await?;
        let decision = classify(image, &report);
        Ok(Assessment {
            decision,
            report: Some(report),
        })
    }

    /// Write a report as indented JSON, creating the folder as needed
    pub async fn write_report(&self, report: &ScanReport, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let data = serde_json::to_vec_pretty(report)?;
        tokio::fs::write(path, data).await?;
        self.output
            .detail(&format!("Wrote report {}", path.display()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::report::{OsInfo, ReportMetadata, ScanResult, Vulnerability};
    use std::sync::Mutex;

    pub(crate) fn report(os: &str, os_findings: usize) -> ScanReport {
        ScanReport {
            metadata: ReportMetadata {
                os: Some(OsInfo {
                    family: os.to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            },
            results: vec![ScanResult {
                class: "os-pkgs".to_string(),
                vulnerabilities: Some(vec![Vulnerability::default(); os_findings]),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    struct FixedScanner {
        report: ScanReport,
        scanned: Mutex<Vec<ScanTarget>>,
    }

    #[async_trait]
    impl Scanner for FixedScanner {
        async fn scan(&self, target: &ScanTarget) -> Result<ScanReport> {
            self.scanned.lock().unwrap().push(target.clone());
            Ok(self.report.clone())
        }
    }

    #[test]
    fn test_classification_table() {
        let unset = Image::parse("app:1.0").unwrap();
        let excluded = unset.clone().with_patch(PatchPolicy::Excluded);
        let included = unset.clone().with_patch(PatchPolicy::Included);

        assert_eq!(
            classify(&excluded, &report("debian", 3)),
            Decision::PushOnly(PushReason::Excluded)
        );
        assert_eq!(
            classify(&unset, &report("windows", 3)),
            Decision::PushOnly(PushReason::UnsupportedOs("windows".into()))
        );
        assert_eq!(
            classify(&included, &report("alpine", 0)),
            Decision::PushOnly(PushReason::NoOsPackageFindings)
        );
        assert_eq!(classify(&unset, &report("debian", 1)), Decision::PatchThenPush);
        assert_eq!(classify(&included, &report("debian", 1)), Decision::PatchThenPush);
    }

    #[test]
    fn test_warnings() {
        let image = Image::parse("tool:2.3").unwrap();
        assert!(Decision::PatchThenPush.warning(&image).is_none());
        assert!(Decision::PushOnly(PushReason::Excluded).warning(&image).is_none());
        let warning = Decision::PushOnly(PushReason::NoOsPackageFindings)
            .warning(&image)
            .unwrap();
        assert!(warning.contains("tool:2.3"));
    }

    #[tokio::test]
    async fn test_excluded_images_are_not_scanned() {
        let scanner = Arc::new(FixedScanner {
            report: report("debian", 1),
            scanned: Mutex::new(Vec::new()),
        });
        let coordinator = ScanCoordinator::new(scanner.clone(), Logger::new_quiet());
        let image = Image::parse("app:1.0").unwrap().with_patch(PatchPolicy::Excluded);

        let assessment = coordinator.assess(&image).await.unwrap();
        assert_eq!(assessment.decision, Decision::PushOnly(PushReason::Excluded));
        assert!(assessment.report.is_none());
        assert!(scanner.scanned.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_write_report_creates_folder() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports/prescan-app:1.0.json");
        let coordinator = ScanCoordinator::new(
            Arc::new(FixedScanner {
                report: report("debian", 1),
                scanned: Mutex::new(Vec::new()),
            }),
            Logger::new_quiet(),
        );
        coordinator.write_report(&report("debian", 1), &path).await.unwrap();
        let written: ScanReport = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(written.os_family(), "debian");
    }
}
