//! Image sync library
//!
//! Distributes container images into a set of registries. Images missing from
//! a registry are pushed to it; with patching enabled each image is scanned
//! first and, when its OS packages have fixable findings, patched and pushed
//! from the patched archive. Pushed images can be signed afterwards.

pub mod cli;
pub mod config;
pub mod error;
pub mod image;
pub mod logging;
pub mod output;
pub mod patch;
pub mod pipeline;
pub mod registry;
pub mod scan;
pub mod sign;
pub mod tool;

pub use config::Config;
pub use error::{Result, SyncError};
pub use logging::Logger;
pub use pipeline::{Pipeline, PipelineReport};
