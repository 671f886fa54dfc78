//! Image model: references, the discovered catalog and its normalization

pub mod catalog;
pub mod reference;
pub mod rewrite;

pub use catalog::{CatalogEntry, ImageCatalog, Package};
pub use reference::{Image, ImageKey, PatchPolicy};
pub use rewrite::Normalizer;
