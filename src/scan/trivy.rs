//! Scanner backed by the `trivy` command line

use crate::config::TrivyConfig;
use crate::error::{Result, SyncError};
use crate::logging::Logger;
use crate::scan::report::ScanReport;
use crate::scan::{ScanTarget, Scanner};
use crate::tool;
use async_trait::async_trait;
use std::time::Duration;
use tokio::process::Command;

const SCAN_TIMEOUT: Duration = Duration::from_secs(15 * 60);

pub struct TrivyScanner {
    executable: String,
    config: TrivyConfig,
    platform: Option<String>,
    output: Logger,
}

impl TrivyScanner {
    pub fn new(
        executable: impl Into<String>,
        config: TrivyConfig,
        platform: Option<String>,
        output: Logger,
    ) -> Self {
        Self {
            executable: executable.into(),
            config,
            platform,
            output,
        }
    }

    fn command(&self, target: &ScanTarget) -> Command {
        let mut command = Command::new(&self.executable);
        command.args(["image", "--format", "json", "--quiet"]);
        if !self.config.addr.is_empty() {
            command.args(["--server", &self.config.addr]);
        }
        if self.config.insecure {
            command.arg("--insecure");
        }
        if self.config.ignore_unfixed {
            command.arg("--ignore-unfixed");
        }
        match target {
            ScanTarget::Reference {
                reference,
                platform,
            } => {
                if let Some(platform) = platform.as_ref().or(self.platform.as_ref()) {
                    command.args(["--platform", platform.as_str()]);
                }
                command.arg(reference);
            }
            ScanTarget::Archive(path) => {
                command.arg("--input").arg(path);
            }
        }
        command
    }
}

#[async_trait]
impl Scanner for TrivyScanner {
    async fn scan(&self, target: &ScanTarget) -> Result<ScanReport> {
        let result = tool::run(self.command(target), SCAN_TIMEOUT, &self.output)
            .await
            .map_err(|message| SyncError::Scan {
                image: target.to_string(),
                message,
            })?;
        serde_json::from_slice(&result.stdout).map_err(|e| SyncError::Scan {
            image: target.to_string(),
            message: format!("unreadable scanner output: {}", e),
        })
    }
}
