//! Patcher backed by `copa` and a buildkitd instance

use crate::config::BuildkitConfig;
use crate::error::{Result, SyncError};
use crate::image::Image;
use crate::logging::Logger;
use crate::patch::Patcher;
use crate::tool;
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;
use uuid::Uuid;

const PATCH_TIMEOUT: Duration = Duration::from_secs(30 * 60);
const SAVE_TIMEOUT: Duration = Duration::from_secs(10 * 60);

pub struct CopaPatcher {
    copa: String,
    docker: String,
    buildkit: BuildkitConfig,
    output: Logger,
}

impl CopaPatcher {
    pub fn new(
        copa: impl Into<String>,
        docker: impl Into<String>,
        buildkit: BuildkitConfig,
        output: Logger,
    ) -> Self {
        Self {
            copa: copa.into(),
            docker: docker.into(),
            buildkit,
            output,
        }
    }

    /// Local tag the patched image is built under before export
    fn working_tag(image: &Image) -> String {
        let suffix = Uuid::new_v4().simple().to_string();
        format!("{}-patched-{}", image.tag, &suffix[..8])
    }

    fn patch_command(&self, image: &Image, report: &Path, tag: &str) -> Command {
        let mut command = Command::new(&self.copa);
        command
            .arg("patch")
            .args(["--image", &image.reference()])
            .arg("--report")
            .arg(report)
            .args(["--tag", tag])
            .args(["--addr", &self.buildkit.addr]);
        if let Some(path) = &self.buildkit.ca_cert_path {
            command.arg("--cacert").arg(path);
        }
        if let Some(path) = &self.buildkit.cert_path {
            command.arg("--cert").arg(path);
        }
        if let Some(path) = &self.buildkit.key_path {
            command.arg("--key").arg(path);
        }
        command
    }

    fn save_command(&self, local: &str, archive: &Path) -> Command {
        let mut command = Command::new(&self.docker);
        command.arg("save").arg("--output").arg(archive).arg(local);
        command
    }
}

#[async_trait]
impl Patcher for CopaPatcher {
    async fn patch(&self, image: &Image, report: &Path, archive: &Path) -> Result<()> {
        let error = |message: String| SyncError::Patch {
            image: image.to_string(),
            message,
        };

        let tag = Self::working_tag(image);
        tool::run(self.patch_command(image, report, &tag), PATCH_TIMEOUT, &self.output)
            .await
            .map_err(error)?;

        if let Some(parent) = archive.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let local = format!("{}/{}:{}", image.registry, image.name(), tag);
        tool::run(self.save_command(&local, archive), SAVE_TIMEOUT, &self.output)
            .await
            .map_err(error)?;

        let mut remove = Command::new(&self.docker);
        remove.args(["image", "rm", &local]);
        if let Err(message) = tool::run(remove, SAVE_TIMEOUT, &self.output).await {
            self.output
                .debug(&format!("Could not remove working image {}: {}", local, message));
        }
        Ok(())
    }
}
