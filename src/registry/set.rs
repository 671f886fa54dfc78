//! Presence probing across every configured registry and import candidate selection

use crate::config::ExistencePolicy;
use crate::error::{Result, SyncError};
use crate::image::{Image, ImageCatalog, ImageKey, Package};
use crate::logging::Logger;
use crate::registry::{Pusher, Registry};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Outcome of probing one registry for one image
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Presence {
    Present,
    /// The registry confirmed the image is missing
    Absent,
    /// The probe failed; the image may or may not be there
    Unreachable(String),
}

impl Presence {
    pub fn is_present(&self) -> bool {
        matches!(self, Presence::Present)
    }
}

/// Presence of one image across the configured registries
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExistenceMatrix {
    entries: BTreeMap<Registry, Presence>,
}

impl ExistenceMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, registry: Registry, presence: Presence) {
        self.entries.insert(registry, presence);
    }

    pub fn get(&self, registry: &Registry) -> Option<&Presence> {
        self.entries.get(registry)
    }

    /// Boolean view: anything but a confirmed presence is `false`
    pub fn exists(&self, registry: &Registry) -> bool {
        self.get(registry).is_some_and(Presence::is_present)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Registry, &Presence)> {
        self.entries.iter()
    }

    /// Registries that did not confirm presence
    pub fn missing(&self) -> impl Iterator<Item = &Registry> {
        self.entries
            .iter()
            .filter(|(_, presence)| !presence.is_present())
            .map(|(registry, _)| registry)
    }

    pub fn unreachable(&self) -> impl Iterator<Item = (&Registry, &str)> {
        self.entries.iter().filter_map(|(registry, presence)| match presence {
            Presence::Unreachable(reason) => Some((registry, reason.as_str())),
            _ => None,
        })
    }
}

/// An image to distribute and the registries it goes to
#[derive(Debug, Clone)]
pub struct ImportCandidate {
    pub image: Image,
    pub targets: Vec<Registry>,
}

#[derive(Debug, Clone, Default)]
pub struct ImportCandidates {
    pub images: BTreeMap<ImageKey, ImportCandidate>,
    /// Packages referencing at least one candidate, with those candidates
    pub packages: BTreeMap<Package, Vec<ImageKey>>,
}

impl ImportCandidates {
    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }
}

/// The configured registries, probed and pushed to through a bounded worker pool
#[derive(Clone)]
pub struct RegistrySet {
    clients: Vec<Arc<dyn Pusher>>,
    concurrency: usize,
    policy: ExistencePolicy,
    output: Logger,
}

impl RegistrySet {
    pub fn new(
        clients: Vec<Arc<dyn Pusher>>,
        concurrency: usize,
        policy: ExistencePolicy,
        output: Logger,
    ) -> Self {
        Self {
            clients,
            concurrency: concurrency.max(1),
            policy,
            output,
        }
    }

    pub fn clients(&self) -> &[Arc<dyn Pusher>] {
        &self.clients
    }

    pub fn registries(&self) -> Vec<Registry> {
        self.clients.iter().map(|c| c.registry().clone()).collect()
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn client(&self, registry: &Registry) -> Option<&Arc<dyn Pusher>> {
        self.clients.iter().find(|c| c.registry() == registry)
    }

    /// Probe every registry for `name:reference` in parallel
    pub async fn exists(&self, name: &str, reference: &str) -> Result<ExistenceMatrix> {
        let probes = vec![(name.to_string(), reference.to_string())];
        let mut matrices = self.probe(probes).await?;
        Ok(matrices.pop().unwrap_or_default())
    }

    /// Probe every image of the catalog against every registry
    pub async fn probe_catalog(
        &self,
        catalog: &ImageCatalog,
    ) -> Result<BTreeMap<ImageKey, ExistenceMatrix>> {
        let images = catalog.unique_images();
        let probes = images
            .values()
            .map(|image| (image.name().to_string(), image.tag.clone()))
            .collect();
        let matrices = self.probe(probes).await?;
        Ok(images.into_keys().zip(matrices).collect())
    }

    /// One matrix per probe, in input order.
    ///
    /// Requests run on a `JoinSet`, so dropping the returned future aborts the
    /// requests still in flight.
    async fn probe(&self, probes: Vec<(String, String)>) -> Result<Vec<ExistenceMatrix>> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();

        for (index, (name, reference)) in probes.iter().enumerate() {
            for client in &self.clients {
                let client = Arc::clone(client);
                let semaphore = Arc::clone(&semaphore);
                let name = name.clone();
                let reference = reference.clone();
                tasks.spawn(async move {
                    let _permit = semaphore
                        .acquire_owned()
                        .await
                        .map_err(|e| SyncError::Task(format!("Failed to acquire permit: {}", e)))?;
                    let result = client.exist(&name, &reference).await;
                    Ok::<_, SyncError>((index, client.registry().clone(), result))
                });
            }
        }

        let mut matrices = vec![ExistenceMatrix::new(); probes.len()];
        while let Some(joined) = tasks.join_next().await {
            let (index, registry, result) = joined??;
            let (name, reference) = &probes[index];
            let presence = match result {
                Ok(true) => Presence::Present,
                Ok(false) => Presence::Absent,
                Err(e) => match self.policy {
                    ExistencePolicy::Strict => return Err(e),
                    ExistencePolicy::BestEffort => {
                        self.output.warning(&format!(
                            "Could not check {}:{} in registry {}: {}",
                            name, reference, registry.name, e
                        ));
                        Presence::Unreachable(e.to_string())
                    }
                },
            };
            self.output.detail(&format!(
                "{}:{} in {}: {:?}",
                name, reference, registry.name, presence
            ));
            matrices[index].insert(registry, presence);
        }
        Ok(matrices)
    }
}

/// Decide which images go to which registries.
///
/// An image is a candidate for every registry that did not confirm its
/// presence, or for all registries when `include_all` is set. Images without a
/// matrix are treated as missing everywhere.
pub fn select_import_candidates(
    catalog: &ImageCatalog,
    matrices: &BTreeMap<ImageKey, ExistenceMatrix>,
    registries: &[Registry],
    include_all: bool,
) -> ImportCandidates {
    let mut candidates = ImportCandidates::default();

    for (key, image) in catalog.unique_images() {
        let targets: Vec<Registry> = registries
            .iter()
            .filter(|registry| {
                include_all
                    || !matrices
                        .get(&key)
                        .is_some_and(|matrix| matrix.exists(registry))
            })
            .cloned()
            .collect();
        if targets.is_empty() {
            continue;
        }

        for package in catalog.packages_of(&key) {
            candidates
                .packages
                .entry(package)
                .or_default()
                .push(key.clone());
        }
        candidates
            .images
            .insert(key, ImportCandidate { image, targets });
    }
    candidates
}

/// Probe the catalog, then select candidates
pub async fn identify_import_candidates(
    set: &RegistrySet,
    catalog: &ImageCatalog,
    include_all: bool,
) -> Result<(BTreeMap<ImageKey, ExistenceMatrix>, ImportCandidates)> {
    let matrices = set.probe_catalog(catalog).await?;
    let candidates = select_import_candidates(catalog, &matrices, &set.registries(), include_all);
    Ok((matrices, candidates))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Descriptor, Exister, Platform};
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct FakeRegistry {
        registry: Registry,
        images: HashSet<String>,
        down: bool,
    }

    impl FakeRegistry {
        fn new(name: &str, images: &[&str]) -> Arc<dyn Pusher> {
            Arc::new(Self {
                registry: Registry::new(name, format!("{}.example.com", name)),
                images: images.iter().map(|s| s.to_string()).collect(),
                down: false,
            })
        }

        fn down(name: &str) -> Arc<dyn Pusher> {
            Arc::new(Self {
                registry: Registry::new(name, format!("{}.example.com", name)),
                images: HashSet::new(),
                down: true,
            })
        }
    }

    #[async_trait]
    impl Exister for FakeRegistry {
        fn registry(&self) -> &Registry {
            &self.registry
        }

        async fn exist(&self, name: &str, reference: &str) -> Result<bool> {
            if self.down {
                return Err(SyncError::Network("connection refused".to_string()));
            }
            Ok(self.images.contains(&format!("{}:{}", name, reference)))
        }
    }

    #[async_trait]
    impl Pusher for FakeRegistry {
        async fn push(&self, _: &str, _: &str, _: &str, _: &str, _: Option<&Platform>) -> Result<Descriptor> {
            Err(SyncError::Registry("read-only fake".to_string()))
        }

        async fn push_archive(&self, _: &Path, _: &str, _: &str) -> Result<Descriptor> {
            Err(SyncError::Registry("read-only fake".to_string()))
        }
    }

    /// Answers after a delay and counts the probes that ran to completion
    struct SlowRegistry {
        registry: Registry,
        completed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Exister for SlowRegistry {
        fn registry(&self) -> &Registry {
            &self.registry
        }

        async fn exist(&self, _: &str, _: &str) -> Result<bool> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            self.completed.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }
    }

    #[async_trait]
    impl Pusher for SlowRegistry {
        async fn push(&self, _: &str, _: &str, _: &str, _: &str, _: Option<&Platform>) -> Result<Descriptor> {
            Err(SyncError::Registry("read-only fake".to_string()))
        }

        async fn push_archive(&self, _: &Path, _: &str, _: &str) -> Result<Descriptor> {
            Err(SyncError::Registry("read-only fake".to_string()))
        }
    }

    fn catalog() -> ImageCatalog {
        let mut catalog = ImageCatalog::new();
        catalog.insert(
            Package::new("web", "1.0.0"),
            Image::parse("app:1.0").unwrap(),
            vec!["image".to_string()],
        );
        catalog
    }

    #[tokio::test]
    async fn test_one_unreachable_registry_does_not_fail_batch() {
        let set = RegistrySet::new(
            vec![
                FakeRegistry::new("a", &["library/app:1.0"]),
                FakeRegistry::down("b"),
                FakeRegistry::new("c", &[]),
            ],
            2,
            ExistencePolicy::BestEffort,
            Logger::new_quiet(),
        );
        let matrix = set.exists("library/app", "1.0").await.unwrap();
        let registries = set.registries();

        assert_eq!(matrix.get(&registries[0]), Some(&Presence::Present));
        assert!(matches!(matrix.get(&registries[1]), Some(Presence::Unreachable(_))));
        assert_eq!(matrix.get(&registries[2]), Some(&Presence::Absent));
        assert!(!matrix.exists(&registries[1]));
        assert_eq!(matrix.unreachable().count(), 1);
    }

    #[tokio::test]
    async fn test_strict_policy_aborts_on_probe_failure() {
        let set = RegistrySet::new(
            vec![FakeRegistry::new("a", &[]), FakeRegistry::down("b")],
            4,
            ExistencePolicy::Strict,
            Logger::new_quiet(),
        );
        assert!(matches!(
            set.exists("library/app", "1.0").await,
            Err(SyncError::Network(_))
        ));
    }

    #[tokio::test]
    async fn test_dropping_existence_check_cancels_requests_in_flight() {
        let completed = Arc::new(AtomicUsize::new(0));
        let clients: Vec<Arc<dyn Pusher>> = (0..3)
            .map(|i| {
                Arc::new(SlowRegistry {
                    registry: Registry::new(format!("r{}", i), format!("r{}.example.com", i)),
                    completed: Arc::clone(&completed),
                }) as Arc<dyn Pusher>
            })
            .collect();
        let set = RegistrySet::new(clients, 3, ExistencePolicy::BestEffort, Logger::new_quiet());

        let outcome =
            tokio::time::timeout(Duration::from_millis(20), set.exists("library/app", "1.0")).await;
        assert!(outcome.is_err());
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(completed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_probing_is_idempotent() {
        let set = RegistrySet::new(
            vec![FakeRegistry::new("a", &["library/app:1.0"]), FakeRegistry::new("b", &[])],
            1,
            ExistencePolicy::BestEffort,
            Logger::new_quiet(),
        );
        let first = set.exists("library/app", "1.0").await.unwrap();
        let second = set.exists("library/app", "1.0").await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_candidate_scoped_to_missing_registry() {
        let set = RegistrySet::new(
            vec![FakeRegistry::new("a", &["library/app:1.0"]), FakeRegistry::new("b", &[])],
            4,
            ExistencePolicy::BestEffort,
            Logger::new_quiet(),
        );
        let catalog = catalog();
        let (_, candidates) = identify_import_candidates(&set, &catalog, false).await.unwrap();

        let key = Image::parse("app:1.0").unwrap().key();
        let candidate = &candidates.images[&key];
        let targets: Vec<&str> = candidate.targets.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(targets, vec!["b"]);
        assert_eq!(candidates.packages[&Package::new("web", "1.0.0")], vec![key]);
    }

    #[test]
    fn test_include_all_targets_every_registry() {
        let registries = vec![Registry::new("a", "a.example.com"), Registry::new("b", "b.example.com")];
        let catalog = catalog();
        let key = Image::parse("app:1.0").unwrap().key();
        let mut matrix = ExistenceMatrix::new();
        matrix.insert(registries[0].clone(), Presence::Present);
        matrix.insert(registries[1].clone(), Presence::Present);
        let matrices = BTreeMap::from([(key.clone(), matrix)]);

        assert!(select_import_candidates(&catalog, &matrices, &registries, false).is_empty());
        let all = select_import_candidates(&catalog, &matrices, &registries, true);
        assert_eq!(all.images[&key].targets.len(), 2);
    }

    #[test]
    fn test_static_images_attributed_to_placeholder() {
        let registries = vec![Registry::new("a", "a.example.com")];
        let mut catalog = ImageCatalog::new();
        catalog.add_static_images(vec![Image::parse("quay.io/org/tool:2.3").unwrap()]);

        let candidates = select_import_candidates(&catalog, &BTreeMap::new(), &registries, false);
        assert_eq!(candidates.len(), 1);
        assert!(candidates.packages.contains_key(&Package::placeholder()));
    }
}
