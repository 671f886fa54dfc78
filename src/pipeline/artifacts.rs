//! On-disk artifacts of a batch and their scoped removal

use crate::image::Image;
use crate::logging::Logger;
use std::path::{Path, PathBuf};

/// Where one image's reports and patched archive live
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub prescan: PathBuf,
    pub postscan: PathBuf,
    pub archive: PathBuf,
}

impl ArtifactPaths {
    pub fn for_image(image: &Image, reports_dir: &Path, tars_dir: &Path) -> Self {
        let stem = format!("{}:{}", image.familiar_name(), image.tag).replace('/', "-");
        Self {
            prescan: reports_dir.join(format!("prescan-{}.json", stem)),
            postscan: reports_dir.join(format!("postscan-{}.json", stem)),
            archive: tars_dir.join(format!("{}.tar", stem)),
        }
    }
}

/// Removes tracked artifacts when dropped.
///
/// Reports and archives each follow their own flag. Removal failures are
/// logged and otherwise ignored.
pub struct ArtifactCleanup {
    clean_reports: bool,
    clean_archives: bool,
    reports: Vec<PathBuf>,
    archives: Vec<PathBuf>,
    output: Logger,
}

impl ArtifactCleanup {
    pub fn new(clean_reports: bool, clean_archives: bool, output: Logger) -> Self {
        Self {
            clean_reports,
            clean_archives,
            reports: Vec::new(),
            archives: Vec::new(),
            output,
        }
    }

    pub fn track(&mut self, paths: &ArtifactPaths) {
        if self.clean_reports {
            self.reports.push(paths.prescan.clone());
            self.reports.push(paths.postscan.clone());
        }
        if self.clean_archives {
            self.archives.push(paths.archive.clone());
        }
    }

    fn remove(&self, path: &Path) {
        match std::fs::remove_file(path) {
            Ok(()) => self
                .output
                .debug(&format!("Removed {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => self
                .output
                .debug(&format!("Could not remove {}: {}", path.display(), e)),
        }
    }
}

impl Drop for ArtifactCleanup {
    fn drop(&mut self) {
        for path in self.reports.iter().chain(&self.archives) {
            self.remove(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_are_sanitized() {
        let image = Image::parse("quay.io/org/tool:2.3").unwrap();
        let paths = ArtifactPaths::for_image(&image, Path::new("reports"), Path::new("tars"));
        assert_eq!(paths.prescan, Path::new("reports/prescan-org-tool:2.3.json"));
        assert_eq!(paths.postscan, Path::new("reports/postscan-org-tool:2.3.json"));
        assert_eq!(paths.archive, Path::new("tars/org-tool:2.3.tar"));
    }

    #[test]
    fn test_docker_hub_names_are_short() {
        let image = Image::parse("app:1.0").unwrap();
        let paths = ArtifactPaths::for_image(&image, Path::new("r"), Path::new("t"));
        assert_eq!(paths.prescan, Path::new("r/prescan-app:1.0.json"));
        assert_eq!(paths.archive, Path::new("t/app:1.0.tar"));
    }

    #[test]
    fn test_cleanup_follows_flags() {
        let dir = tempfile::tempdir().unwrap();
        let image = Image::parse("app:1.0").unwrap();
        let paths = ArtifactPaths::for_image(&image, dir.path(), dir.path());
        for path in [&paths.prescan, &paths.archive] {
            std::fs::write(path, b"x").unwrap();
        }

        {
            let mut cleanup = ArtifactCleanup::new(true, false, Logger::new_quiet());
            cleanup.track(&paths);
        }
        assert!(!paths.prescan.exists());
        assert!(paths.archive.exists());
    }
}
