//! ngxforge Core Library
//!
//! This crate holds the structured nginx domain model shared by the parser,
//! the audit engine and the CLI, together with the location matcher that
//! reproduces nginx's request routing priority.

pub mod config;
pub mod error;
pub mod matcher;

pub use error::{Error, Result};
pub use matcher::{LocationMatcher, MatchKind, MatchResult, match_location};

/// ngxforge version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
