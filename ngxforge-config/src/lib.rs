//! ngxforge Configuration Parser
//!
//! This crate turns nginx configuration text into the structured model of
//! `ngxforge-core`: a logos-based lexer, a recursive descent parser producing
//! a generic directive/block AST, and a model builder that maps known
//! directives onto typed fields and keeps everything else as passthrough.
//!
//! # Example
//!
//! ```rust,ignore
//! use ngxforge_config::parse_config;
//!
//! let source = r#"
//!     http {
//!         server {
//!             listen 80;
//!             server_name example.com;
//!             location / { proxy_pass http://127.0.0.1:3000; }
//!         }
//!     }
//! "#;
//!
//! let config = parse_config(source).unwrap();
//! assert_eq!(config.servers[0].server_name, "example.com");
//! ```

pub mod builder;
pub mod parser;

pub use builder::ModelBuilder;
pub use parser::{Ast, Block, Directive, Node, ParseError, Parser, Token, TokenKind, parse, tokenize};

use ngxforge_core::config::{Config, ConfigLoader, SnapshotFormat};
use std::path::Path;

/// Full pipeline: nginx text -> Config. The source text is kept on the
/// returned config.
pub fn parse_config(source: &str) -> Result<Config, ParseError> {
    let ast = parse(source)?;
    let mut config = ModelBuilder::new().build(&ast);
    config.source = Some(source.to_string());

    tracing::debug!(
        "Parsed {} servers, {} locations, {} upstreams",
        config.servers.len(),
        config.locations.len(),
        config.upstreams.len()
    );
    Ok(config)
}

/// Read and parse an nginx configuration file
pub fn parse_config_file(path: impl AsRef<Path>) -> Result<Config, LoadError> {
    let source = std::fs::read_to_string(path.as_ref())?;
    Ok(parse_config(&source)?)
}

/// Load a config from disk: `.json` and `.toml` files are model snapshots,
/// anything else is nginx text
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, LoadError> {
    let path = path.as_ref();
    match SnapshotFormat::from_path(path) {
        Some(_) => Ok(ConfigLoader::load(path)?),
        None => parse_config_file(path),
    }
}

/// Failure to load a configuration from disk
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Snapshot error: {0}")]
    Snapshot(#[from] ngxforge_core::Error),
}
