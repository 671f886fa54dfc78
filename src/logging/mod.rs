//! Logging handle and subscriber setup
//!
//! This module provides the [`Logger`] that every component receives through its
//! constructor. It carries verbosity flags and a component name and emits
//! structured `tracing` events, so nothing in the library depends on a logger
//! configured globally by the library itself. The binary installs the subscriber
//! with [`init_tracing`].

use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Environment variable holding a `tracing` filter directive
pub const LOG_ENV: &str = "IMAGE_SYNC_LOG";

/// Logger responsible for all diagnostic output of one component
#[derive(Debug, Clone)]
pub struct Logger {
    pub verbose: bool,
    pub quiet: bool,
    component: &'static str,
}

impl Logger {
    pub fn new(verbose: bool) -> Self {
        Self {
            verbose,
            quiet: false,
            component: "image-sync",
        }
    }

    pub fn new_quiet() -> Self {
        Self {
            verbose: false,
            quiet: true,
            component: "image-sync",
        }
    }

    /// Same flags, different component field
    pub fn for_component(&self, component: &'static str) -> Self {
        Self {
            component,
            ..self.clone()
        }
    }

    pub fn component(&self) -> &'static str {
        self.component
    }

    /// Main section heading
    pub fn section(&self, title: &str) {
        if !self.quiet {
            tracing::info!(component = self.component, section = title, "=== {} ===", title);
        }
    }

    pub fn debug(&self, message: &str) {
        if !self.quiet {
            tracing::debug!(component = self.component, "{}", message);
        }
    }

    /// Detailed information, only shown in verbose mode
    pub fn detail(&self, message: &str) {
        if self.verbose && !self.quiet {
            tracing::debug!(component = self.component, "{}", message);
        }
    }

    pub fn info(&self, message: &str) {
        if !self.quiet {
            tracing::info!(component = self.component, "{}", message);
        }
    }

    pub fn success(&self, message: &str) {
        if !self.quiet {
            tracing::info!(component = self.component, outcome = "success", "{}", message);
        }
    }

    pub fn warning(&self, message: &str) {
        if !self.quiet {
            tracing::warn!(component = self.component, "{}", message);
        }
    }

    /// Errors are emitted even in quiet mode
    pub fn error(&self, message: &str) {
        tracing::error!(component = self.component, "{}", message);
    }

    /// Structured list output
    pub fn summary(&self, title: &str, items: &[String]) {
        if self.quiet {
            return;
        }
        tracing::info!(component = self.component, "{}", title);
        if items.is_empty() {
            tracing::info!(component = self.component, "  (No items to display)");
        }
        for item in items {
            tracing::info!(component = self.component, "  • {}", item);
        }
    }

    /// Format duration in human-readable format
    pub fn format_duration(&self, duration: Duration) -> String {
        let secs = duration.as_secs();
        if secs < 60 {
            format!("{}.{:01}s", secs, duration.subsec_millis() / 100)
        } else if secs < 3600 {
            format!("{}m{}s", secs / 60, secs % 60)
        } else {
            format!("{}h{}m{}s", secs / 3600, (secs % 3600) / 60, secs % 60)
        }
    }

    /// Format byte counts in human-readable units
    pub fn format_size(&self, bytes: u64) -> String {
        if bytes < 1024 {
            format!("{} B", bytes)
        } else if bytes < 1024 * 1024 {
            format!("{:.1} KB", bytes as f64 / 1024.0)
        } else if bytes < 1024 * 1024 * 1024 {
            format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
        } else {
            format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
        }
    }
}

/// Output format of the installed subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Install the process subscriber. Called once by the binary.
///
/// The filter comes from [`LOG_ENV`] when set, otherwise `debug` in verbose mode
/// and `info` elsewhere. Returns quietly if a subscriber is already installed.
pub fn init_tracing(verbose: bool, format: LogFormat) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(format!("image_sync={}", default_level)));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    let _ = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        let logger = Logger::new_quiet();
        assert_eq!(logger.format_size(512), "512 B");
        assert_eq!(logger.format_size(1536), "1.5 KB");
        assert_eq!(logger.format_size(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn test_format_duration() {
        let logger = Logger::new_quiet();
        assert_eq!(logger.format_duration(Duration::from_millis(2500)), "2.5s");
        assert_eq!(logger.format_duration(Duration::from_secs(125)), "2m5s");
        assert_eq!(logger.format_duration(Duration::from_secs(3725)), "1h2m5s");
    }

    #[test]
    fn test_component_keeps_flags() {
        let logger = Logger::new(true).for_component("scan");
        assert!(logger.verbose);
        assert_eq!(logger.component(), "scan");
    }
}
