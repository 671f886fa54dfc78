//! Signer backed by the `cosign` command line

use crate::config::CosignConfig;
use crate::error::{Result, SyncError};
use crate::logging::Logger;
use crate::registry::Registry;
use crate::sign::Signer;
use crate::tool;
use async_trait::async_trait;
use std::time::Duration;
use tokio::process::Command;

const SIGN_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Environment variable cosign reads the key passphrase from
const PASSWORD_ENV: &str = "COSIGN_PASSWORD";

pub struct CosignSigner {
    executable: String,
    config: CosignConfig,
    output: Logger,
}

impl CosignSigner {
    pub fn new(executable: impl Into<String>, config: CosignConfig, output: Logger) -> Self {
        Self {
            executable: executable.into(),
            config,
            output,
        }
    }

    fn command(&self, reference: &str, registry: &Registry) -> Command {
        let mut command = Command::new(&self.executable);
        command.args(["sign", "--key", &self.config.key_ref, "--yes"]);
        if registry.insecure || self.config.allow_insecure {
            command.arg("--allow-insecure-registry");
        }
        if registry.plain_http || self.config.allow_http_registry {
            command.arg("--allow-http-registry");
        }
        command.arg(reference);
        // An empty passphrase still has to be set or cosign prompts for one
        command.env(
            PASSWORD_ENV,
            self.config.key_ref_pass.as_deref().unwrap_or_default(),
        );
        command
    }
}

#[async_trait]
impl Signer for CosignSigner {
    async fn sign(&self, reference: &str, registry: &Registry) -> Result<()> {
        tool::run(self.command(reference, registry), SIGN_TIMEOUT, &self.output)
            .await
            .map_err(|message| SyncError::Sign {
                image: reference.to_string(),
                message,
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(command: &Command) -> Vec<String> {
        command
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().to_string())
            .collect()
    }

    fn config() -> CosignConfig {
        CosignConfig {
            enabled: true,
            key_ref: "cosign.key".to_string(),
            key_ref_pass: Some("pass".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_allowances_follow_registry_flags() {
        let signer = CosignSigner::new("cosign", config(), Logger::new_quiet());
        let registry = Registry {
            name: "edge".to_string(),
            url: "localhost:5000".to_string(),
            insecure: false,
            plain_http: true,
        };
        let args = args(&signer.command("localhost:5000/library/app:1.0", &registry));
        assert!(args.contains(&"--allow-http-registry".to_string()));
        assert!(!args.contains(&"--allow-insecure-registry".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("localhost:5000/library/app:1.0"));
    }

    #[test]
    fn test_configured_allowance_applies_everywhere() {
        let mut config = config();
        config.allow_insecure = true;
        let signer = CosignSigner::new("cosign", config, Logger::new_quiet());
        let args = args(&signer.command("r.example.com/app:1", &Registry::new("r", "r.example.com")));
        assert!(args.contains(&"--allow-insecure-registry".to_string()));
    }

    #[test]
    fn test_passphrase_passed_through_environment() {
        let signer = CosignSigner::new("cosign", config(), Logger::new_quiet());
        let command = signer.command("r.example.com/app:1", &Registry::new("r", "r.example.com"));
        let password = command
            .as_std()
            .get_envs()
            .find(|(key, _)| *key == PASSWORD_ENV)
            .and_then(|(_, value)| value)
            .map(|v| v.to_string_lossy().to_string());
        assert_eq!(password.as_deref(), Some("pass"));
        assert!(!args(&command).iter().any(|a| a == "pass"));
    }
}
