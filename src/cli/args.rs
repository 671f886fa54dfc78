//! Command-line argument parsing

use crate::logging::LogFormat;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "image-sync")]
#[command(about = "Distribute container images to registries, patching and signing them on the way")]
#[command(version, author)]
pub struct Args {
    /// Configuration file
    #[arg(
        long = "config",
        short = 'f',
        default_value = "image-sync.yaml",
        help = "Path to the YAML configuration file"
    )]
    pub config: PathBuf,

    /// Discovery output listing the images of each package
    #[arg(
        long = "catalog",
        short = 'c',
        help = "JSON file mapping packages to discovered images and value paths"
    )]
    pub catalog: Option<PathBuf>,

    #[arg(
        long = "all",
        help = "Import every image into every registry, even where it already exists"
    )]
    pub all: bool,

    #[arg(
        long = "dry-run",
        help = "Only check which images exist where; do not push, patch or sign"
    )]
    pub dry_run: bool,

    #[arg(long = "verbose", short = 'v', help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(
        long = "quiet",
        short = 'q',
        conflicts_with = "verbose",
        help = "Only print errors"
    )]
    pub quiet: bool,

    #[arg(
        long = "log-format",
        value_enum,
        default_value_t = LogFormatArg::Text,
        help = "Format of log output"
    )]
    pub log_format: LogFormatArg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormatArg {
    Text,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(value: LogFormatArg) -> Self {
        match value {
            LogFormatArg::Text => LogFormat::Text,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}
