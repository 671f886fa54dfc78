//! Docker-save archive reading and upload
//!
//! A docker-save tarball holds `manifest.json`, the image config and one tar
//! per layer. Layers are uploaded in the order `manifest.json` lists them,
//! which is the order of the image's `rootfs.diff_ids`.

use crate::error::{Result, SyncError};
use crate::logging::Logger;
use crate::registry::manifest::{
    DOCKER_CONFIG, DOCKER_LAYER, DOCKER_LAYER_GZIP, DOCKER_MANIFEST_V2, Descriptor, ImageManifest,
};
use crate::registry::store::ContentTarget;
use flate2::read::GzDecoder;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use tar::Archive;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ArchiveManifestEntry {
    config: String,
    #[serde(default)]
    repo_tags: Option<Vec<String>>,
    layers: Vec<String>,
}

/// Image content loaded from an archive
#[derive(Debug)]
pub struct ArchiveImage {
    pub config: Vec<u8>,
    pub layers: Vec<Vec<u8>>,
    pub repo_tags: Vec<String>,
}

impl ArchiveImage {
    pub fn total_size(&self) -> u64 {
        self.config.len() as u64 + self.layers.iter().map(|l| l.len() as u64).sum::<u64>()
    }
}

pub struct ArchiveReader {
    path: PathBuf,
    output: Logger,
}

impl ArchiveReader {
    pub fn new(path: impl Into<PathBuf>, output: Logger) -> Self {
        Self {
            path: path.into(),
            output,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the first image of the archive
    pub fn read(&self) -> Result<ArchiveImage> {
        self.output
            .detail(&format!("Reading image archive {}", self.path.display()));

        let manifest_data = self
            .read_entries(|path| path == "manifest.json")?
            .remove("manifest.json")
            .ok_or_else(|| self.error("manifest.json not found"))?;
        let entries: Vec<ArchiveManifestEntry> = serde_json::from_slice(&manifest_data)
            .map_err(|e| self.error(&format!("invalid manifest.json: {}", e)))?;
        let entry = entries
            .into_iter()
            .next()
            .ok_or_else(|| self.error("manifest.json lists no images"))?;

        let mut wanted: Vec<&str> = entry.layers.iter().map(String::as_str).collect();
        wanted.push(&entry.config);
        let mut contents = self.read_entries(|path| wanted.contains(&path))?;

        let config = contents
            .remove(&entry.config)
            .ok_or_else(|| self.error(&format!("config {} not found", entry.config)))?;
        let mut layers = Vec::with_capacity(entry.layers.len());
        for layer_path in &entry.layers {
            // A layer may appear twice; the data is identical
            let data = contents
                .get(layer_path)
                .cloned()
                .ok_or_else(|| self.error(&format!("layer {} not found", layer_path)))?;
            layers.push(data);
        }

        let image = ArchiveImage {
            config,
            layers,
            repo_tags: entry.repo_tags.unwrap_or_default(),
        };
        self.output.detail(&format!(
            "Archive holds {} layers, {}",
            image.layers.len(),
            self.output.format_size(image.total_size())
        ));
        Ok(image)
    }

    fn read_entries<F>(&self, wanted: F) -> Result<HashMap<String, Vec<u8>>>
    where
        F: Fn(&str) -> bool,
    {
        let mut archive = Archive::new(self.open()?);
        let mut found = HashMap::new();
        for entry in archive.entries()? {
            let mut entry = entry?;
            let path = entry.path()?.to_string_lossy().trim_start_matches("./").to_string();
            if !wanted(&path) || found.contains_key(&path) {
                continue;
            }
            let mut data = Vec::with_capacity(entry.size() as usize);
            entry.read_to_end(&mut data)?;
            found.insert(path, data);
        }
        Ok(found)
    }

    /// Open the archive, transparently decompressing gzip
    fn open(&self) -> Result<Box<dyn Read>> {
        let mut magic = [0u8; 2];
        let mut probe = File::open(&self.path).map_err(|e| self.error(&e.to_string()))?;
        let is_gzip = probe.read_exact(&mut magic).is_ok() && magic == GZIP_MAGIC;

        let file = BufReader::new(File::open(&self.path)?);
        if is_gzip {
            Ok(Box::new(GzDecoder::new(file)))
        } else {
            Ok(Box::new(file))
        }
    }

    fn error(&self, message: &str) -> SyncError {
        SyncError::Archive {
            message: message.to_string(),
            path: self.path.clone(),
        }
    }
}

/// Upload config and layers, then a Docker v2 manifest tagged `tag`
pub async fn push_image(
    image: ArchiveImage,
    target: &dyn ContentTarget,
    tag: &str,
    output: &Logger,
) -> Result<Descriptor> {
    let config = Descriptor::for_content(DOCKER_CONFIG, &image.config);
    let layers: Vec<Descriptor> = image
        .layers
        .iter()
        .map(|data| {
            let media_type = if data.starts_with(&GZIP_MAGIC) {
                DOCKER_LAYER_GZIP
            } else {
                DOCKER_LAYER
            };
            Descriptor::for_content(media_type, data)
        })
        .collect();

    for (desc, data) in std::iter::once((&config, image.config))
        .chain(layers.iter().zip(image.layers))
    {
        if target.exists(desc).await? {
            output.detail(&format!("Blob {} already present, skipping", desc.digest));
            continue;
        }
        target.push_blob(desc, data).await?;
        output.detail(&format!(
            "Uploaded blob {} ({})",
            desc.digest,
            output.format_size(desc.size)
        ));
    }

    let manifest = ImageManifest {
        schema_version: 2,
        media_type: Some(DOCKER_MANIFEST_V2.to_string()),
        config,
        layers,
    };
    let data = serde_json::to_vec(&manifest)?;
    let desc = Descriptor::for_content(DOCKER_MANIFEST_V2, &data);
    target.push_manifest(&desc, data, Some(tag)).await?;
    Ok(desc)
}
