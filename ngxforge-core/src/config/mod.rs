//! Structured nginx configuration model

mod loader;
mod patch;
mod types;

pub use loader::{ConfigLoader, SnapshotFormat};
pub use patch::ConfigPatch;
pub use types::*;
