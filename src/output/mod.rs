//! Overview of the discovered images and where they already exist
//!
//! Rendering works on an owned [`Overview`] snapshot. The pipeline hands the
//! snapshot to a spawned task and keeps mutating its own catalog; the two never
//! share state.

use crate::image::{ImageCatalog, ImageKey};
use crate::logging::Logger;
use crate::registry::{ExistenceMatrix, Presence, Registry};
use std::collections::BTreeMap;
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub struct Overview {
    catalog: ImageCatalog,
    matrices: BTreeMap<ImageKey, ExistenceMatrix>,
    registries: Vec<Registry>,
}

impl Overview {
    pub fn new(
        catalog: ImageCatalog,
        matrices: BTreeMap<ImageKey, ExistenceMatrix>,
        registries: Vec<Registry>,
    ) -> Self {
        Self {
            catalog,
            matrices,
            registries,
        }
    }

    fn cell(&self, key: &ImageKey, registry: &Registry) -> &'static str {
        match self.matrices.get(key).and_then(|m| m.get(registry)) {
            Some(Presence::Present) => "present",
            Some(Presence::Absent) => "missing",
            Some(Presence::Unreachable(_)) => "unreachable",
            None => "unknown",
        }
    }

    /// One line per package and image, each image followed by its presence per registry
    pub fn lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for package in self.catalog.packages() {
            lines.push(package.to_string());
            for (key, entry) in self.catalog.entries(package) {
                let mut line = format!("  {}", entry.image);
                if entry.image.patch.is_excluded() {
                    line.push_str(" [no patch]");
                }
                for registry in &self.registries {
                    line.push_str(&format!(" | {}: {}", registry.name, self.cell(key, registry)));
                }
                lines.push(line);
            }
        }
        lines
    }

    /// Number of images missing from at least one registry
    pub fn missing_count(&self) -> usize {
        self.catalog
            .unique_images()
            .keys()
            .filter(|key| {
                self.registries
                    .iter()
                    .any(|registry| !self.matrices.get(*key).is_some_and(|m| m.exists(registry)))
            })
            .count()
    }

    pub fn render(&self, output: &Logger) {
        let title = format!(
            "{} images in {} packages, {} missing from at least one of {} registries",
            self.catalog.image_count(),
            self.catalog.packages().count(),
            self.missing_count(),
            self.registries.len()
        );
        output.summary(&title, &self.lines());
    }
}

/// Render `overview` on its own task
pub fn spawn_overview(overview: Overview, output: Logger) -> JoinHandle<()> {
    tokio::spawn(async move { overview.render(&output) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{Image, Package, PatchPolicy};

    fn overview() -> Overview {
        let mut catalog = ImageCatalog::new();
        let app = Image::parse("app:1.0").unwrap();
        let tool = Image::parse("tool:2.3").unwrap().with_patch(PatchPolicy::Excluded);
        catalog.insert(Package::new("chart", "1.2.0"), app.clone(), vec!["image".into()]);
        catalog.insert(Package::placeholder(), tool.clone(), Vec::new());

        let a = Registry::new("a", "a.example.com");
        let b = Registry::new("b", "b.example.com");
        let mut matrix = ExistenceMatrix::new();
        matrix.insert(a.clone(), Presence::Present);
        matrix.insert(b.clone(), Presence::Unreachable("timeout".into()));
        let mut full = ExistenceMatrix::new();
        full.insert(a.clone(), Presence::Present);
        full.insert(b.clone(), Presence::Present);

        let matrices = BTreeMap::from([(app.key(), matrix), (tool.key(), full)]);
        Overview::new(catalog, matrices, vec![a, b])
    }

    #[test]
    fn test_lines_show_presence_per_registry() {
        let lines = overview().lines();
        assert!(lines.contains(&"chart@1.2.0".to_string()));
        assert!(lines.contains(&"  docker.io/library/app:1.0 | a: present | b: unreachable".to_string()));
        assert!(lines.iter().any(|l| l.contains("tool:2.3 [no patch]")));
    }

    #[test]
    fn test_missing_count() {
        assert_eq!(overview().missing_count(), 1);
    }

    #[tokio::test]
    async fn test_spawned_render_completes() {
        spawn_overview(overview(), Logger::new_quiet()).await.unwrap();
    }
}
