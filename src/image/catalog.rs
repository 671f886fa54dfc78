//! Discovered images grouped by the package (chart) that references them

use crate::error::Result;
use crate::image::reference::{Image, ImageKey, PatchPolicy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

/// A deployable package bundle, e.g. a chart
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Package {
    pub name: String,
    pub version: String,
}

impl Package {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }

    /// Synthetic package attributing images listed directly in configuration
    pub fn placeholder() -> Self {
        Self::new("images", "0.0.0")
    }
}

impl fmt::Display for Package {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub image: Image,
    /// Value-tree paths inside the package where the reference was found
    pub value_paths: Vec<String>,
}

/// Package → image → value paths. Cloning yields an independent snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageCatalog {
    packages: BTreeMap<Package, BTreeMap<ImageKey, CatalogEntry>>,
}

impl ImageCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an image, merging value paths when the same key already exists
    pub fn insert(&mut self, package: Package, image: Image, value_paths: Vec<String>) {
        let images = self.packages.entry(package).or_default();
        match images.get_mut(&image.key()) {
            Some(entry) => {
                for path in value_paths {
                    if !entry.value_paths.contains(&path) {
                        entry.value_paths.push(path);
                    }
                }
            }
            None => {
                images.insert(image.key(), CatalogEntry { image, value_paths });
            }
        }
    }

    /// Images listed directly in configuration, attributed to the placeholder package
    pub fn add_static_images<I>(&mut self, images: I)
    where
        I: IntoIterator<Item = Image>,
    {
        let placeholder = Package::placeholder();
        self.packages.entry(placeholder.clone()).or_default();
        for image in images {
            self.insert(placeholder.clone(), image, Vec::new());
        }
    }

    pub fn packages(&self) -> impl Iterator<Item = &Package> {
        self.packages.keys()
    }

    pub fn entries(&self, package: &Package) -> impl Iterator<Item = (&ImageKey, &CatalogEntry)> {
        self.packages.get(package).into_iter().flat_map(|images| images.iter())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Package, &ImageKey, &CatalogEntry)> {
        self.packages
            .iter()
            .flat_map(|(package, images)| images.iter().map(move |(key, entry)| (package, key, entry)))
    }

    /// Every distinct image once, in key order
    pub fn unique_images(&self) -> BTreeMap<ImageKey, Image> {
        let mut unique: BTreeMap<ImageKey, Image> = BTreeMap::new();
        for (_, key, entry) in self.iter() {
            match unique.get_mut(key) {
                // An explicit exclusion anywhere wins over an unset policy elsewhere
                Some(existing) if entry.image.patch != PatchPolicy::Unset => {
                    if existing.patch != PatchPolicy::Excluded {
                        existing.patch = entry.image.patch;
                    }
                }
                Some(_) => {}
                None => {
                    unique.insert(key.clone(), entry.image.clone());
                }
            }
        }
        unique
    }

    /// Packages that reference a given image
    pub fn packages_of(&self, key: &ImageKey) -> Vec<Package> {
        self.packages
            .iter()
            .filter(|(_, images)| images.contains_key(key))
            .map(|(package, _)| package.clone())
            .collect()
    }

    pub fn image_count(&self) -> usize {
        self.unique_images().len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.values().all(|images| images.is_empty())
    }

    /// Apply `f` to every entry, re-keying entries whose reference changed.
    /// Entries for which `f` returns `false` are dropped.
    pub fn retain_map<F>(&mut self, mut f: F) -> Result<()>
    where
        F: FnMut(&Package, &mut Image) -> Result<bool>,
    {
        for (package, images) in self.packages.iter_mut() {
            let mut rebuilt: BTreeMap<ImageKey, CatalogEntry> = BTreeMap::new();
            for (_, mut entry) in std::mem::take(images) {
                if !f(package, &mut entry.image)? {
                    continue;
                }
                let key = entry.image.key();
                match rebuilt.get_mut(&key) {
                    Some(existing) => {
                        for path in entry.value_paths {
                            if !existing.value_paths.contains(&path) {
                                existing.value_paths.push(path);
                            }
                        }
                    }
                    None => {
                        rebuilt.insert(key, entry);
                    }
                }
            }
            *images = rebuilt;
        }
        Ok(())
    }

    /// Load discovery output: `{ "chart@1.0.0": { "<image ref>": ["path.to.value"] } }`
    pub fn from_discovery_json(data: &str) -> Result<Self> {
        let raw: BTreeMap<String, BTreeMap<String, Vec<String>>> = serde_json::from_str(data)?;
        let mut catalog = Self::new();
        for (package, images) in raw {
            let package = match package.rsplit_once('@') {
                Some((name, version)) => Package::new(name, version),
                None => Package::new(package, "0.0.0"),
            };
            for (reference, value_paths) in images {
                catalog.insert(package.clone(), Image::parse(&reference)?, value_paths);
            }
        }
        Ok(catalog)
    }

    pub fn load_discovery(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Self::from_discovery_json(&data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chart() -> Package {
        Package::new("web", "1.2.0")
    }

    #[test]
    fn test_insert_merges_value_paths() {
        let mut catalog = ImageCatalog::new();
        let image = Image::parse("nginx:1.25").unwrap();
        catalog.insert(chart(), image.clone(), vec!["image".into()]);
        catalog.insert(chart(), image.clone(), vec!["sidecar.image".into(), "image".into()]);

        let entries: Vec<_> = catalog.entries(&chart()).collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].1.value_paths, vec!["image", "sidecar.image"]);
    }

    #[test]
    fn test_static_images_use_placeholder_package() {
        let mut catalog = ImageCatalog::new();
        catalog.add_static_images(vec![Image::parse("busybox:1.36").unwrap()]);
        assert_eq!(catalog.packages().next(), Some(&Package::placeholder()));
        assert_eq!(catalog.image_count(), 1);
    }

    #[test]
    fn test_unique_images_prefers_exclusion() {
        let mut catalog = ImageCatalog::new();
        let image = Image::parse("redis:7").unwrap();
        catalog.insert(chart(), image.clone(), vec![]);
        catalog.insert(
            Package::new("cache", "0.1.0"),
            image.clone().with_patch(PatchPolicy::Excluded),
            vec![],
        );

        let unique = catalog.unique_images();
        assert_eq!(unique.len(), 1);
        assert_eq!(unique[&image.key()].patch, PatchPolicy::Excluded);
        assert_eq!(catalog.packages_of(&image.key()).len(), 2);
    }

    #[test]
    fn test_retain_map_rekeys_rewritten_images() {
        let mut catalog = ImageCatalog::new();
        catalog.insert(chart(), Image::parse("docker.io/org/app:1.0").unwrap(), vec!["a".into()]);
        catalog.insert(chart(), Image::parse("docker.io/org/drop:1.0").unwrap(), vec![]);

        catalog
            .retain_map(|_, image| {
                if image.repository == "org/drop" {
                    return Ok(false);
                }
                image.registry = "mirror.local".to_string();
                Ok(true)
            })
            .unwrap();

        let keys: Vec<_> = catalog.entries(&chart()).map(|(k, _)| k.to_string()).collect();
        assert_eq!(keys, vec!["mirror.local/org/app:1.0"]);
    }

    #[test]
    fn test_from_discovery_json() {
        let catalog = ImageCatalog::from_discovery_json(
            r#"{"web@1.2.0": {"nginx:1.25": ["image.repository"]}, "bare": {"redis:7": []}}"#,
        )
        .unwrap();
        assert_eq!(catalog.image_count(), 2);
        assert!(catalog.packages().any(|p| p == &Package::new("bare", "0.0.0")));
    }
}
