//! Distribution of candidate images into the registries missing them

use crate::error::Result;
use crate::image::{Image, ImageKey};
use crate::logging::Logger;
use crate::registry::manifest::Descriptor;
use crate::registry::platform::Platform;
use crate::registry::set::RegistrySet;
use crate::registry::{Pusher, Registry};
use futures::{StreamExt, TryStreamExt, stream};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

/// One image and where it goes
#[derive(Debug, Clone)]
pub struct ImportPlan {
    pub image: Image,
    pub targets: Vec<Registry>,
    /// Patched archive replacing the source image
    pub archive: Option<PathBuf>,
}

/// A completed push
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushRecord {
    pub key: ImageKey,
    pub registry: String,
    pub descriptor: Descriptor,
}

pub struct Importer {
    set: RegistrySet,
    platform: Option<Platform>,
    output: Logger,
}

impl Importer {
    pub fn new(set: RegistrySet, platform: Option<Platform>, output: Logger) -> Self {
        Self {
            set,
            platform,
            output,
        }
    }

    /// Push every plan to each of its targets, at most `concurrency` at a time.
    /// The first failure aborts the remaining pushes.
    pub async fn run(&self, plans: &[ImportPlan]) -> Result<Vec<PushRecord>> {
        let mut jobs = Vec::new();
        for plan in plans {
            for target in &plan.targets {
                match self.set.client(target) {
                    Some(client) => jobs.push((plan, Arc::clone(client))),
                    None => self.output.warning(&format!(
                        "No client configured for registry {}, skipping {}",
                        target.name, plan.image
                    )),
                }
            }
        }

        let total = jobs.len();
        let start = Instant::now();
        self.output
            .info(&format!("Pushing {} image copies across registries", total));

        let records: Vec<PushRecord> = stream::iter(jobs)
            .map(|(plan, client)| self.push_one(plan, client))
            .buffer_unordered(self.set.concurrency())
            .try_collect()
            .await?;

        self.output.success(&format!(
            "Pushed {} image copies in {}",
            records.len(),
            self.output.format_duration(start.elapsed())
        ));
        Ok(records)
    }

    async fn push_one(&self, plan: &ImportPlan, client: Arc<dyn Pusher>) -> Result<PushRecord> {
        let image = &plan.image;
        let registry = client.registry().clone();

        let descriptor = match &plan.archive {
            Some(archive) => {
                self.output.info(&format!(
                    "Pushing patched {} to {}",
                    image, registry.name
                ));
                client.push_archive(archive, image.name(), &image.tag).await?
            }
            None => {
                self.output
                    .info(&format!("Pushing {} to {}", image, registry.name));
                let platform = match image.architecture.as_deref() {
                    Some(architecture) => Some(Platform::parse(architecture)?),
                    None => self.platform.clone(),
                };
                client
                    .push(
                        &image.registry,
                        image.name(),
                        image.source_reference(),
                        &image.tag,
                        platform.as_ref(),
                    )
                    .await?
            }
        };

        self.output.detail(&format!(
            "{} is {} in {}",
            image, descriptor.digest, registry.name
        ));
        Ok(PushRecord {
            key: image.key(),
            registry: registry.name,
            descriptor,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExistencePolicy;
    use crate::error::SyncError;
    use crate::registry::Exister;
    use crate::registry::manifest::OCI_MANIFEST;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingRegistry {
        registry: Registry,
        pushes: Mutex<Vec<String>>,
        platforms: Mutex<Vec<Option<String>>>,
        fail: bool,
    }

    #[async_trait]
    impl Exister for RecordingRegistry {
        fn registry(&self) -> &Registry {
            &self.registry
        }

        async fn exist(&self, _: &str, _: &str) -> Result<bool> {
            Ok(false)
        }
    }

    #[async_trait]
    impl Pusher for RecordingRegistry {
        async fn push(
            &self,
            source_url: &str,
            name: &str,
            reference: &str,
            tag: &str,
            platform: Option<&Platform>,
        ) -> Result<Descriptor> {
            if self.fail {
                return Err(SyncError::Registry("push refused".to_string()));
            }
            self.pushes
                .lock()
                .unwrap()
                .push(format!("{}/{}:{}->{}", source_url, name, reference, tag));
            self.platforms
                .lock()
                .unwrap()
                .push(platform.map(|p| p.architecture.clone()));
            Ok(Descriptor::for_content(OCI_MANIFEST, name.as_bytes()))
        }

        async fn push_archive(&self, archive: &Path, name: &str, tag: &str) -> Result<Descriptor> {
            self.pushes
                .lock()
                .unwrap()
                .push(format!("{}->{}:{}", archive.display(), name, tag));
            Ok(Descriptor::for_content(OCI_MANIFEST, tag.as_bytes()))
        }
    }

    fn registry(name: &str, fail: bool) -> Arc<RecordingRegistry> {
        Arc::new(RecordingRegistry {
            registry: Registry::new(name, format!("{}.example.com", name)),
            fail,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_pushes_only_to_targets() {
        let a = registry("a", false);
        let b = registry("b", false);
        let set = RegistrySet::new(
            vec![a.clone() as Arc<dyn Pusher>, b.clone()],
            2,
            ExistencePolicy::BestEffort,
            Logger::new_quiet(),
        );
        let plans = vec![
            ImportPlan {
                image: Image::parse("app:1.0").unwrap(),
                targets: vec![b.registry.clone()],
                archive: None,
            },
            ImportPlan {
                image: Image::parse("ghcr.io/org/tool:2.3").unwrap(),
                targets: vec![a.registry.clone(), b.registry.clone()],
                archive: Some(PathBuf::from("tars/tool:2.3.tar")),
            },
        ];

        let importer = Importer::new(set, None, Logger::new_quiet());
        let records = importer.run(&plans).await.unwrap();

        assert_eq!(records.len(), 3);
        assert_eq!(a.pushes.lock().unwrap().len(), 1);
        let b_pushes = b.pushes.lock().unwrap();
        assert!(b_pushes.contains(&"docker.io/library/app:1.0->1.0".to_string()));
        assert!(b_pushes.contains(&"tars/tool:2.3.tar->org/tool:2.3".to_string()));
    }

    #[tokio::test]
    async fn test_image_architecture_overrides_batch_platform() {
        let a = registry("a", false);
        let set = RegistrySet::new(
            vec![a.clone() as Arc<dyn Pusher>],
            1,
            ExistencePolicy::BestEffort,
            Logger::new_quiet(),
        );
        let plans = vec![
            ImportPlan {
                image: Image::parse("app:1.0").unwrap(),
                targets: vec![a.registry.clone()],
                archive: None,
            },
            ImportPlan {
                image: Image::parse("tool:2.3")
                    .unwrap()
                    .with_architecture(Some("linux/arm64".to_string())),
                targets: vec![a.registry.clone()],
                archive: None,
            },
        ];
        let importer = Importer::new(
            set,
            Some(Platform::parse("linux/amd64").unwrap()),
            Logger::new_quiet(),
        );
        importer.run(&plans).await.unwrap();

        let mut platforms = a.platforms.lock().unwrap().clone();
        platforms.sort();
        assert_eq!(
            platforms,
            vec![Some("amd64".to_string()), Some("arm64".to_string())]
        );
    }

    #[tokio::test]
    async fn test_invalid_image_architecture_is_error() {
        let a = registry("a", false);
        let set = RegistrySet::new(vec![a.clone() as Arc<dyn Pusher>], 1, ExistencePolicy::BestEffort, Logger::new_quiet());
        let plans = vec![ImportPlan {
            image: Image::parse("app:1.0")
                .unwrap()
                .with_architecture(Some("linux/arm64:".to_string())),
            targets: vec![a.registry.clone()],
            archive: None,
        }];
        let importer = Importer::new(set, None, Logger::new_quiet());
        assert!(matches!(importer.run(&plans).await, Err(SyncError::InvalidPlatform(_))));
        assert!(a.pushes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_push_failure_is_returned() {
        let a = registry("a", true);
        let set = RegistrySet::new(vec![a.clone() as Arc<dyn Pusher>], 1, ExistencePolicy::BestEffort, Logger::new_quiet());
        let plans = vec![ImportPlan {
            image: Image::parse("app:1.0").unwrap(),
            targets: vec![a.registry.clone()],
            archive: None,
        }];
        let importer = Importer::new(set, None, Logger::new_quiet());
        assert!(matches!(importer.run(&plans).await, Err(SyncError::Registry(_))));
    }
}
