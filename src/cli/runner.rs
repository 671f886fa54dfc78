//! Wires configuration, collaborators and the pipeline together

use crate::cli::args::Args;
use crate::config::Config;
use crate::error::Result;
use crate::image::ImageCatalog;
use crate::logging::Logger;
use crate::patch::CopaPatcher;
use crate::pipeline::{Mode, Pipeline, PipelineReport, PipelineSettings};
use crate::registry::{CredentialStore, Pusher, RegistryClient, RegistrySet};
use crate::scan::TrivyScanner;
use crate::sign::CosignSigner;
use std::sync::Arc;

pub struct Runner {
    args: Args,
    config: Config,
    output: Logger,
}

impl Runner {
    pub fn new(args: Args) -> Result<Self> {
        let output = if args.quiet {
            Logger::new_quiet()
        } else {
            Logger::new(args.verbose)
        };
        let config = Config::load(&args.config)?;
        Ok(Self {
            args,
            config,
            output,
        })
    }

    pub async fn run(&self) -> Result<PipelineReport> {
        let catalog = self.catalog()?;
        let pipeline = self.pipeline()?;
        let report = pipeline.run(catalog).await?;

        for warning in &report.warnings {
            self.output.detail(&format!("Warning: {}", warning));
        }
        Ok(report)
    }

    /// Discovered images; configured images are added by the pipeline
    fn catalog(&self) -> Result<ImageCatalog> {
        let catalog = match &self.args.catalog {
            Some(path) => {
                self.output
                    .info(&format!("Loading discovered images from {}", path.display()));
                ImageCatalog::load_discovery(path)?
            }
            None => ImageCatalog::new(),
        };
        Ok(catalog)
    }

    fn registry_set(&self) -> Result<RegistrySet> {
        let credentials = Arc::new(CredentialStore::from_environment(
            self.output.for_component("credentials"),
        ));
        let mut clients: Vec<Arc<dyn Pusher>> = Vec::with_capacity(self.config.registries.len());
        for registry in &self.config.registries {
            let client = RegistryClient::new(
                registry.clone(),
                Arc::clone(&credentials),
                self.output.for_component("registry"),
            )?;
            clients.push(Arc::new(client));
        }
        Ok(RegistrySet::new(
            clients,
            self.config.import.concurrency,
            self.config.import.existence,
            self.output.for_component("registries"),
        ))
    }

    fn pipeline(&self) -> Result<Pipeline> {
        let mut settings = PipelineSettings::from_config(&self.config, self.args.dry_run)?;
        settings.include_all |= self.args.all;
        let mode = settings.mode;

        let tools = &self.config.tools;
        let import = &self.config.import;
        let mut builder =
            Pipeline::builder(self.registry_set()?, self.output.clone()).settings(settings);

        if mode == Mode::Patch {
            builder = builder
                .scanner(Arc::new(TrivyScanner::new(
                    &tools.trivy,
                    import.copacetic.trivy.clone(),
                    import.architecture.clone(),
                    self.output.for_component("trivy"),
                )))
                .patcher(Arc::new(CopaPatcher::new(
                    &tools.copa,
                    &tools.docker,
                    import.copacetic.buildkitd.clone(),
                    self.output.for_component("copa"),
                )));
        }
        if mode != Mode::Overview && import.cosign.enabled {
            builder = builder.signer(Arc::new(CosignSigner::new(
                &tools.cosign,
                import.cosign.clone(),
                self.output.for_component("cosign"),
            )));
        }
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn args(config: PathBuf, catalog: Option<PathBuf>) -> Args {
        Args {
            config,
            catalog,
            all: false,
            dry_run: true,
            verbose: false,
            quiet: true,
            log_format: crate::cli::args::LogFormatArg::Text,
        }
    }

    #[test]
    fn test_configured_images_go_to_pipeline_not_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("sync.yaml");
        std::fs::write(&config, "images:\n  - ref: tool:2.3\n").unwrap();
        let discovery = dir.path().join("charts.json");
        std::fs::write(&discovery, r#"{"web@1.2.0": {"nginx:1.25": ["image"]}}"#).unwrap();

        let runner = Runner::new(args(config, Some(discovery))).unwrap();
        let catalog = runner.catalog().unwrap();
        assert_eq!(catalog.image_count(), 1);
        assert_eq!(catalog.packages().count(), 1);

        let pipeline = runner.pipeline().unwrap();
        let images = &pipeline.settings().images;
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].to_string(), "docker.io/library/tool:2.3");
    }

    #[test]
    fn test_missing_config_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Runner::new(args(dir.path().join("absent.yaml"), None)).is_err());
    }
}
