//! Reference normalization applied once after discovery

use crate::config::{MirrorConfig, RewriteConfig};
use crate::error::Result;
use crate::image::catalog::ImageCatalog;
use crate::image::reference::{Image, PatchPolicy};
use crate::logging::Logger;

/// Applies exclusion, patch-exclusion, reference rewrites and mirror substitution
pub struct Normalizer<'a> {
    rewrites: &'a RewriteConfig,
    mirrors: &'a [MirrorConfig],
    output: Logger,
}

impl<'a> Normalizer<'a> {
    pub fn new(rewrites: &'a RewriteConfig, mirrors: &'a [MirrorConfig], output: Logger) -> Self {
        Self {
            rewrites,
            mirrors,
            output,
        }
    }

    /// Normalize every catalog entry in place; rewritten entries are re-keyed
    pub fn apply(&self, catalog: &mut ImageCatalog) -> Result<()> {
        catalog.retain_map(|_, image| self.normalize(image))
    }

    /// Returns `false` when the image is excluded from the catalog
    pub fn normalize(&self, image: &mut Image) -> Result<bool> {
        let reference = image.reference();

        if self
            .rewrites
            .exclude
            .iter()
            .any(|rule| reference.starts_with(&rule.reference))
        {
            self.output.info(&format!("Excluded image {}", reference));
            return Ok(false);
        }

        if self
            .rewrites
            .exclude_patch
            .iter()
            .any(|rule| reference.starts_with(&rule.reference))
        {
            self.output
                .info(&format!("Excluded image {} from patching", reference));
            image.patch = PatchPolicy::Excluded;
        }

        for rule in &self.rewrites.modify {
            if rule.from.is_empty() || !reference.starts_with(&rule.from) {
                continue;
            }
            let rewritten = Image::parse(&reference.replacen(&rule.from, &rule.to, 1))?;
            let previous = std::mem::replace(image, rewritten);
            image.tag = previous.tag;
            image.digest = previous.digest;
            image.use_digest = previous.use_digest;
            image.patch = previous.patch;
            image.architecture = previous.architecture;
            self.output.info(&format!(
                "Modified image reference {} -> {}",
                reference,
                image.reference()
            ));
            break;
        }

        if let Some(mirror) = self.mirrors.iter().find(|m| m.registry == image.registry) {
            self.output.detail(&format!(
                "Using mirror {} for {}",
                mirror.mirror,
                image.reference()
            ));
            image.registry = mirror.mirror.clone();
        }

        Ok(true)
    }
}
