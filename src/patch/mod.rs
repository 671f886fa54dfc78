//! Vulnerability patching of selected images

pub mod copa;

pub use copa::CopaPatcher;

use crate::error::{Result, SyncError};
use crate::image::{Image, ImageKey};
use crate::logging::Logger;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[async_trait]
pub trait Patcher: Send + Sync {
    /// Patch `image` using its prescan `report` and write the result to `archive`
    async fn patch(&self, image: &Image, report: &Path, archive: &Path) -> Result<()>;
}

/// An image selected for patching with its artifact locations
#[derive(Debug, Clone)]
pub struct PatchJob {
    pub image: Image,
    pub report: PathBuf,
    pub archive: PathBuf,
}

#[derive(Debug, Default)]
pub struct PatchOutcome {
    pub patched: Vec<ImageKey>,
    /// Failures skipped because errors are ignored
    pub failed: Vec<(ImageKey, String)>,
}

pub struct PatchCoordinator {
    patcher: Arc<dyn Patcher>,
    ignore_errors: bool,
    output: Logger,
}

impl PatchCoordinator {
    pub fn new(patcher: Arc<dyn Patcher>, ignore_errors: bool, output: Logger) -> Self {
        Self {
            patcher,
            ignore_errors,
            output,
        }
    }

    /// Patch every job in order.
    ///
    /// A failure aborts the batch unless errors are ignored, in which case the
    /// image is recorded as failed and left unpatched.
    pub async fn patch(&self, jobs: &[PatchJob]) -> Result<PatchOutcome> {
        let mut outcome = PatchOutcome::default();
        for (index, job) in jobs.iter().enumerate() {
            self.output.info(&format!(
                "Patching {} ({}/{})",
                job.image,
                index + 1,
                jobs.len()
            ));

            match self.patch_one(job).await {
                Ok(()) => {
                    self.output.success(&format!(
                        "Patched {} into {}",
                        job.image,
                        job.archive.display()
                    ));
                    outcome.patched.push(job.image.key());
                }
                Err(e) if self.ignore_errors => {
                    self.output
                        .warning(&format!("Ignoring patch failure for {}: {}", job.image, e));
                    outcome.failed.push((job.image.key(), e.to_string()));
                }
                Err(e) => {
                    self.output
                        .error(&format!("Patching {} failed: {}", job.image, e));
                    return Err(e);
                }
            }
        }
        Ok(outcome)
    }

    async fn patch_one(&self, job: &PatchJob) -> Result<()> {
        self.patcher.patch(&job.image, &job.report, &job.archive).await?;
        if !tokio::fs::try_exists(&job.archive).await? {
            return Err(SyncError::Patch {
                image: job.image.to_string(),
                message: format!("patcher did not write {}", job.archive.display()),
            });
        }
        Ok(())
    }
}
