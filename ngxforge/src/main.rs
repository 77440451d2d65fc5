//! ngxforge - nginx configuration parser, auditor and repairer

use anyhow::{Context, bail};
use ariadne::{Color, IndexType, Label, Report, ReportKind, Source};
use clap::{Parser, Subcommand};
use ngxforge_audit::{AuditReport, Severity, apply_all_fixes, run_audit};
use ngxforge_config::{LoadError, ParseError, load_config};
use ngxforge_core::LocationMatcher;
use ngxforge_core::config::{Config, ConfigLoader, LocationConfig, ServerConfig};
use std::path::{Path, PathBuf};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// ngxforge - Parse, match, audit and repair nginx configurations
#[derive(Parser)]
#[command(name = "ngxforge")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a configuration and print the model
    Parse {
        /// nginx config, or a .json/.toml snapshot
        file: PathBuf,

        /// Print the syntax tree instead of the model
        #[arg(long)]
        ast: bool,

        /// Print JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate a configuration file
    Validate {
        /// nginx config, or a .json/.toml snapshot
        file: PathBuf,
    },

    /// Show which location serves a request path
    Match {
        /// nginx config, or a .json/.toml snapshot
        file: PathBuf,

        /// Request path, e.g. /api/users
        path: String,

        /// Server to match in (default: the first one)
        #[arg(long)]
        server: Option<String>,

        /// Print JSON
        #[arg(long)]
        json: bool,
    },

    /// Score a configuration against the audit rules
    Audit {
        /// nginx config, or a .json/.toml snapshot
        file: PathBuf,

        /// Print JSON
        #[arg(long)]
        json: bool,
    },

    /// Apply every automatic fix
    Fix {
        /// nginx config, or a .json/.toml snapshot
        file: PathBuf,

        /// Write the fixed model to a .json or .toml snapshot instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show version information
    Version,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing; RUST_LOG wins unless --verbose is given
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    match cli.command {
        Commands::Parse { file, ast, json } => {
            if ast {
                print_ast(&file, json)?;
            } else {
                let config = load(&file)?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&config)?);
                } else {
                    print_summary(&config);
                }
            }
        }

        Commands::Validate { file } => {
            tracing::info!("Validating config: {}", file.display());

            let result = load(&file).and_then(|config| {
                config.check_references()?;
                Ok(config)
            });
            match result {
                Ok(config) => {
                    println!(
                        "✅ Configuration '{}' is valid! ({} servers, {} locations, {} upstreams)",
                        file.display(),
                        config.servers.len(),
                        config.locations.len(),
                        config.upstreams.len()
                    );
                }
                Err(e) => {
                    eprintln!("❌ Configuration Error: {:#}", e);
                    std::process::exit(1);
                }
            }
        }

        Commands::Match {
            file,
            path,
            server,
            json,
        } => {
            let config = load(&file)?;
            let server = select_server(&config, server.as_deref())?;
            let locations: Vec<LocationConfig> = config.locations_of(&server.id).cloned().collect();

            let matcher = LocationMatcher::new(&locations);
            for diagnostic in matcher.diagnostics() {
                tracing::warn!("{}", diagnostic);
            }
            let result = matcher.match_path(&path);

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                match result.matched {
                    Some(location) => println!(
                        "{} -> location {}{} ({:?})",
                        path,
                        location_prefix(location),
                        location.path,
                        result.kind
                    ),
                    None => println!("{} -> no location", path),
                }
                println!("   {}", result.explanation);
            }
        }

        Commands::Audit { file, json } => {
            let config = load(&file)?;
            let report = run_audit(&config);
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }
        }

        Commands::Fix { file, output } => {
            let config = load(&file)?;
            let before = run_audit(&config);
            let outcome = apply_all_fixes(&config);
            let after = run_audit(&outcome.config);

            tracing::info!(
                "Fixes finished after {} passes (converged: {})",
                outcome.iterations,
                outcome.converged
            );

            match output {
                Some(path) => {
                    ConfigLoader::save(&outcome.config, &path)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    println!(
                        "✅ Score {} ({}) -> {} ({}), saved to '{}'",
                        before.score,
                        before.grade,
                        after.score,
                        after.grade,
                        path.display()
                    );
                }
                None => {
                    println!("{}", serde_json::to_string_pretty(&outcome.config)?);
                    eprintln!(
                        "Score {} ({}) -> {} ({})",
                        before.score, before.grade, after.score, after.grade
                    );
                }
            }

            if !outcome.converged {
                eprintln!(
                    "⚠️ Fixes did not settle after {} passes; run `ngxforge audit` on the result",
                    outcome.iterations
                );
            }
        }

        Commands::Version => {
            println!("ngxforge v{}", ngxforge_core::VERSION);
            println!("Built with ❤️ in Rust");
        }
    }

    Ok(())
}

/// Load a config, rendering parse errors against the source on stderr
fn load(path: &Path) -> anyhow::Result<Config> {
    match load_config(path) {
        Ok(config) => Ok(config),
        Err(LoadError::Parse(err)) => {
            if let Ok(source) = std::fs::read_to_string(path) {
                report_parse_error(path, &source, &err);
            }
            Err(err).with_context(|| format!("Failed to parse {}", path.display()))
        }
        Err(e) => Err(e).with_context(|| format!("Failed to load {}", path.display())),
    }
}

fn report_parse_error(path: &Path, source: &str, err: &ParseError) {
    let name = path.display().to_string();
    let start = err.offset.min(source.len());
    let end = (start + 1).min(source.len());

    let report = Report::build(ReportKind::Error, (name.as_str(), start..end))
        .with_config(ariadne::Config::default().with_index_type(IndexType::Byte))
        .with_message(&err.message)
        .with_label(
            Label::new((name.as_str(), start..end))
                .with_message(format!("line {}, column {}", err.line, err.column))
                .with_color(Color::Red),
        )
        .finish();

    if let Err(e) = report.eprint((name.as_str(), Source::from(source))) {
        tracing::warn!("Failed to render parse error: {}", e);
    }
}

fn print_ast(path: &Path, json: bool) -> anyhow::Result<()> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let ast = match ngxforge_config::parse(&source) {
        Ok(ast) => ast,
        Err(err) => {
            report_parse_error(path, &source, &err);
            return Err(err).with_context(|| format!("Failed to parse {}", path.display()));
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&ast)?);
    } else {
        for node in &ast.nodes {
            println!("{}", node.to_source(0));
        }
    }
    Ok(())
}

fn print_summary(config: &Config) {
    println!("📋 {} servers, {} upstreams", config.servers.len(), config.upstreams.len());

    for server in &config.servers {
        let tls = if server.ssl.enabled { " ssl" } else { "" };
        let listen = match &server.listen.address {
            Some(address) => format!("{}:{}", address, server.listen.port),
            None => server.listen.port.to_string(),
        };
        println!("  server {} (listen {}{})", server.display_name(), listen, tls);
        for location in config.locations_of(&server.id) {
            println!("    location {}{}", location_prefix(location), location.path);
        }
    }

    for upstream in &config.upstreams {
        println!(
            "  upstream {} ({} servers, {:?})",
            upstream.name,
            upstream.servers.len(),
            upstream.strategy
        );
    }
}

fn print_report(report: &AuditReport) {
    println!("📊 Score: {}/100 (grade {})", report.score, report.grade);
    println!(
        "   {} of {} rules passed; {} critical, {} warnings, {} info",
        report.passed_rules,
        report.total_rules,
        report.count(Severity::Critical),
        report.count(Severity::Warning),
        report.count(Severity::Info)
    );

    for issue in &report.issues {
        let icon = match issue.severity {
            Severity::Critical => "❌",
            Severity::Warning => "⚠️",
            Severity::Info => "💡",
        };
        let fixable = if issue.can_auto_fix { " [fixable]" } else { "" };
        println!("{} [{}] {}: {}{}", icon, issue.rule_id, issue.title, issue.message, fixable);
    }
}

/// `=` / `^~` / `~` / `~*` followed by a space, or nothing for plain prefixes
fn location_prefix(location: &LocationConfig) -> String {
    let modifier = location.modifier.as_str();
    if modifier.is_empty() {
        String::new()
    } else {
        format!("{} ", modifier)
    }
}

fn select_server<'a>(config: &'a Config, name: Option<&str>) -> anyhow::Result<&'a ServerConfig> {
    let found = match name {
        Some(name) => config
            .servers
            .iter()
            .find(|s| s.server_name.split_whitespace().any(|n| n == name)),
        None => config.servers.first(),
    };
    match (found, name) {
        (Some(server), _) => Ok(server),
        (None, Some(name)) => bail!("No server named '{}'", name),
        (None, None) => bail!("Configuration has no servers"),
    }
}
