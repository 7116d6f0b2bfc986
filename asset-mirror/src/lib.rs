//! Asset Mirror Library
//!
//! Mirrors a versioned remote asset catalog: diffs two manifest documents,
//! downloads only the new assets with a load-aware worker pool, and hands
//! them to an optional extraction step.

pub mod config;
pub mod daemon;
pub mod executor;
pub mod fs;
pub mod manifest;
pub mod resources;
pub mod transfer;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use utils::errors::{ManifestError, MirrorError};
pub use utils::Result;
