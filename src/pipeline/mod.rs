//! Batch orchestration
//!
//! A batch normalizes the discovered catalog, probes every registry, selects
//! the images to distribute and then, depending on the [`Mode`], only reports,
//! pushes, or scans, patches, pushes and rescans. Signing follows a successful
//! push when a signer is configured.
//!
//! The whole batch is one future. Dropping it cancels registry transfers and
//! kills running tools; the artifact cleanup guard still runs.

pub mod artifacts;

pub use artifacts::{ArtifactCleanup, ArtifactPaths};

use crate::config::{Config, MirrorConfig, OutputConfig, RewriteConfig};
use crate::error::{Result, SyncError};
use crate::image::{Image, ImageCatalog, ImageKey, Normalizer, PatchPolicy};
use crate::logging::Logger;
use crate::output::{Overview, spawn_overview};
use crate::patch::{PatchCoordinator, PatchJob, Patcher};
use crate::registry::{
    ExistenceMatrix, ImportCandidates, ImportPlan, Importer, Platform, PushRecord, RegistrySet,
    identify_import_candidates,
};
use crate::scan::{Decision, PushReason, ScanCoordinator, ScanTarget, Scanner};
use crate::sign::{SignCoordinator, Signer};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

/// What a batch does after probing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Probe and render the overview only
    #[default]
    Overview,
    /// Push candidates as they are
    ImportOnly,
    /// Scan candidates, patch where worthwhile, then push
    Patch,
}

#[derive(Debug, Clone, Default)]
pub struct PipelineSettings {
    pub mode: Mode,
    /// Distribute to every registry, present or not
    pub include_all: bool,
    /// Push an image unpatched when patching it fails
    pub ignore_errors: bool,
    pub platform: Option<Platform>,
    pub rewrites: RewriteConfig,
    pub mirrors: Vec<MirrorConfig>,
    pub artifacts: OutputConfig,
    /// Images listed in configuration; added after normalization, unchanged
    pub images: Vec<Image>,
}

impl PipelineSettings {
    pub fn from_config(config: &Config, dry_run: bool) -> Result<Self> {
        let import = &config.import;
        let mode = if dry_run || !import.enabled {
            Mode::Overview
        } else if import.copacetic.enabled {
            Mode::Patch
        } else {
            Mode::ImportOnly
        };
        let platform = import
            .architecture
            .as_deref()
            .map(Platform::parse)
            .transpose()?;

        Ok(Self {
            mode,
            include_all: import.all,
            ignore_errors: import.copacetic.ignore_errors,
            platform,
            rewrites: config.rewrites.clone(),
            mirrors: config.mirrors.clone(),
            artifacts: import.copacetic.output.clone(),
            images: config.static_images()?,
        })
    }
}

/// What a batch did
#[derive(Debug, Clone, Default)]
pub struct PipelineReport {
    pub matrices: BTreeMap<ImageKey, ExistenceMatrix>,
    pub candidates: Vec<ImageKey>,
    /// One per scanned or excluded candidate, patch mode only
    pub decisions: BTreeMap<ImageKey, Decision>,
    pub warnings: Vec<String>,
    pub pushed: Vec<PushRecord>,
    /// Images as handed to the importer, with their final patch policy
    pub distributed: Vec<Image>,
    pub signed: usize,
    pub prescan_reports: Vec<PathBuf>,
    pub postscan_reports: Vec<PathBuf>,
    pub archives: Vec<PathBuf>,
}

impl PipelineReport {
    fn warn(&mut self, output: &Logger, warning: String) {
        output.warning(&warning);
        self.warnings.push(warning);
    }
}

pub struct PipelineBuilder {
    registries: RegistrySet,
    settings: PipelineSettings,
    scanner: Option<Arc<dyn Scanner>>,
    patcher: Option<Arc<dyn Patcher>>,
    signer: Option<Arc<dyn Signer>>,
    output: Logger,
}

impl PipelineBuilder {
    pub fn new(registries: RegistrySet, output: Logger) -> Self {
        Self {
            registries,
            settings: PipelineSettings::default(),
            scanner: None,
            patcher: None,
            signer: None,
            output,
        }
    }

    pub fn settings(mut self, settings: PipelineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn scanner(mut self, scanner: Arc<dyn Scanner>) -> Self {
        self.scanner = Some(scanner);
        self
    }

    pub fn patcher(mut self, patcher: Arc<dyn Patcher>) -> Self {
        self.patcher = Some(patcher);
        self
    }

    /// Sign every distributed image after pushing
    pub fn signer(mut self, signer: Arc<dyn Signer>) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn build(self) -> Result<Pipeline> {
        let tools = match (self.settings.mode, self.scanner, self.patcher) {
            (Mode::Patch, Some(scanner), Some(patcher)) => Some((scanner, patcher)),
            (Mode::Patch, _, _) => {
                return Err(SyncError::Configuration(
                    "patch mode needs both a scanner and a patcher".to_string(),
                ));
            }
            _ => None,
        };
        Ok(Pipeline {
            registries: self.registries,
            settings: self.settings,
            tools,
            signer: self.signer,
            output: self.output,
        })
    }
}

pub struct Pipeline {
    registries: RegistrySet,
    settings: PipelineSettings,
    tools: Option<(Arc<dyn Scanner>, Arc<dyn Patcher>)>,
    signer: Option<Arc<dyn Signer>>,
    output: Logger,
}

impl Pipeline {
    pub fn builder(registries: RegistrySet, output: Logger) -> PipelineBuilder {
        PipelineBuilder::new(registries, output)
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Run one batch over the discovered `catalog`
    pub async fn run(&self, mut catalog: ImageCatalog) -> Result<PipelineReport> {
        let start = Instant::now();
        self.output.section("Image sync");

        Normalizer::new(
            &self.settings.rewrites,
            &self.settings.mirrors,
            self.output.for_component("rewrite"),
        )
        .apply(&mut catalog)?;
        catalog.add_static_images(self.settings.images.iter().cloned());

        let mut report = PipelineReport::default();
        if catalog.is_empty() {
            self.output.info("No images to process");
            return Ok(report);
        }

        self.output.info(&format!(
            "Checking {} images against {} registries",
            catalog.image_count(),
            self.registries.registries().len()
        ));
        let (matrices, candidates) =
            identify_import_candidates(&self.registries, &catalog, self.settings.include_all)
                .await?;

        let overview = spawn_overview(
            Overview::new(catalog.clone(), matrices.clone(), self.registries.registries()),
            self.output.for_component("overview"),
        );

        report.matrices = matrices;
        report.candidates = candidates.images.keys().cloned().collect();

        let result = match self.settings.mode {
            Mode::Overview => {
                self.output.info(&format!(
                    "{} images would be imported; import is not enabled",
                    candidates.len()
                ));
                Ok(())
            }
            Mode::ImportOnly => self.import(&candidates, &mut report).await,
            Mode::Patch => self.patch_and_import(&candidates, &mut report).await,
        };

        if let Err(e) = overview.await {
            self.output
                .debug(&format!("Overview rendering failed: {}", e));
        }
        result?;

        self.output.success(&format!(
            "Batch completed in {}: {} pushes, {} signatures, {} warnings",
            self.output.format_duration(start.elapsed()),
            report.pushed.len(),
            report.signed,
            report.warnings.len()
        ));
        Ok(report)
    }

    async fn import(&self, candidates: &ImportCandidates, report: &mut PipelineReport) -> Result<()> {
        if candidates.is_empty() {
            self.output.info("Every image already exists in every registry");
            return Ok(());
        }
        let plans: Vec<ImportPlan> = candidates
            .images
            .values()
            .map(|candidate| ImportPlan {
                image: candidate.image.clone(),
                targets: candidate.targets.clone(),
                archive: None,
            })
            .collect();
        report.pushed = self.importer().run(&plans).await?;

        report.distributed = plans.into_iter().map(|plan| plan.image).collect();
        self.sign(report).await
    }

    async fn patch_and_import(
        &self,
        candidates: &ImportCandidates,
        report: &mut PipelineReport,
    ) -> Result<()> {
        let Some((scanner, patcher)) = &self.tools else {
            return Err(SyncError::Configuration(
                "patch mode needs both a scanner and a patcher".to_string(),
            ));
        };
        if candidates.is_empty() {
            self.output.info("Every image already exists in every registry");
            return Ok(());
        }

        let folders = &self.settings.artifacts;
        tokio::fs::create_dir_all(&folders.reports.folder).await?;
        tokio::fs::create_dir_all(&folders.tars.folder).await?;
        let mut cleanup = ArtifactCleanup::new(
            folders.reports.clean,
            folders.tars.clean,
            self.output.for_component("cleanup"),
        );

        let scans = ScanCoordinator::new(Arc::clone(scanner), self.output.for_component("scan"));
        let mut images: BTreeMap<ImageKey, Image> = BTreeMap::new();
        let mut paths: BTreeMap<ImageKey, ArtifactPaths> = BTreeMap::new();
        let mut jobs = Vec::new();

        let total = candidates.len();
        for (index, (key, candidate)) in candidates.images.iter().enumerate() {
            let mut image = candidate.image.clone();
            let artifacts =
                ArtifactPaths::for_image(&image, &folders.reports.folder, &folders.tars.folder);
            cleanup.track(&artifacts);

            self.output
                .info(&format!("Scanning {} ({}/{})", image, index + 1, total));
            let assessment = scans.assess(&image).await?;
            if let Some(scan) = &assessment.report {
                scans.write_report(scan, &artifacts.prescan).await?;
                report.prescan_reports.push(artifacts.prescan.clone());
            }
            if let Some(warning) = assessment.decision.warning(&image) {
                report.warn(&self.output, warning);
            }

            if assessment.decision.is_patch() {
                jobs.push(PatchJob {
                    image: image.clone(),
                    report: artifacts.prescan.clone(),
                    archive: artifacts.archive.clone(),
                });
            } else {
                image.patch = PatchPolicy::Excluded;
            }
            report.decisions.insert(key.clone(), assessment.decision);
            images.insert(key.clone(), image);
            paths.insert(key.clone(), artifacts);
        }

        let outcome = PatchCoordinator::new(
            Arc::clone(patcher),
            self.settings.ignore_errors,
            self.output.for_component("patch"),
        )
        .patch(&jobs)
        .await?;

        for (key, message) in outcome.failed {
            let decision = Decision::PushOnly(PushReason::PatchFailed(message));
            if let Some(image) = images.get_mut(&key) {
                image.patch = PatchPolicy::Excluded;
                if let Some(warning) = decision.warning(image) {
                    report.warn(&self.output, warning);
                }
            }
            report.decisions.insert(key, decision);
        }

        let patched: BTreeSet<ImageKey> = outcome.patched.into_iter().collect();
        let plans: Vec<ImportPlan> = candidates
            .images
            .iter()
            .map(|(key, candidate)| ImportPlan {
                image: images.get(key).cloned().unwrap_or_else(|| candidate.image.clone()),
                targets: candidate.targets.clone(),
                archive: patched
                    .contains(key)
                    .then(|| paths.get(key).map(|p| p.archive.clone()))
                    .flatten(),
            })
            .collect();
        report.archives = plans.iter().filter_map(|plan| plan.archive.clone()).collect();

        report.pushed = self.importer().run(&plans).await?;

        for key in &patched {
            let Some(artifacts) = paths.get(key) else {
                continue;
            };
            let scan = scans
                .scan(&ScanTarget::Archive(artifacts.archive.clone()))
                .await?;
            scans.write_report(&scan, &artifacts.postscan).await?;
            report.postscan_reports.push(artifacts.postscan.clone());
        }

        let lines: Vec<String> = report
            .decisions
            .iter()
            .map(|(key, decision)| format!("{}: {}", key, decision))
            .collect();
        self.output.summary("Decisions", &lines);

        report.distributed = plans.into_iter().map(|plan| plan.image).collect();
        self.sign(report).await
    }

    fn importer(&self) -> Importer {
        Importer::new(
            self.registries.clone(),
            self.settings.platform.clone(),
            self.output.for_component("import"),
        )
    }

    async fn sign(&self, report: &mut PipelineReport) -> Result<()> {
        let Some(signer) = &self.signer else {
            return Ok(());
        };
        report.signed = SignCoordinator::new(Arc::clone(signer), self.output.for_component("sign"))
            .sign(&report.distributed, &self.registries.registries())
            .await?;
        Ok(())
    }
}
