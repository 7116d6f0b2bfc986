//! Utility modules for the asset mirror.

pub mod errors;
pub mod logger;

pub use errors::{ManifestError, MirrorError, Result};
