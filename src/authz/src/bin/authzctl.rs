//! authzctl - operator CLI for the tenant authorization engine
//!
//! Loads a JSON fixture of roles, permissions, policies and relationships
//! into an in-memory data source and runs checks against it.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use tenant_authz::engine::{CallContext, TracingAuditEmitter};
use tenant_authz::{AccessRequest, EngineConfig, InMemoryDataSource, PolicyEngine, SnapshotData};

/// Tenant authorization engine CLI
#[derive(Parser)]
#[command(name = "authzctl")]
#[command(about = "Evaluate authorization decisions against a data fixture")]
#[command(version)]
struct Cli {
    /// Path to engine configuration (TOML)
    #[arg(short, long, env = "AUTHZ_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Parser)]
enum Command {
    /// Evaluate one request and print the decision as JSON
    Check {
        /// Fixture with roles, permissions, policies and relationships
        #[arg(short, long)]
        fixture: PathBuf,

        /// Request as a JSON file or inline JSON
        #[arg(short, long)]
        request: String,

        /// Per-call deadline in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Evaluate a JSON array of requests
    Batch {
        #[arg(short, long)]
        fixture: PathBuf,

        /// JSON file holding an array of requests
        #[arg(short, long)]
        requests: PathBuf,
    },

    /// Load a fixture and print the health report
    Health {
        #[arg(short, long)]
        fixture: PathBuf,

        /// Organizations to preload
        #[arg(long)]
        org: Vec<String>,
    },

    /// Show version
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{},tenant_authz={}", log_level, log_level).into()),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("Failed to load configuration from {:?}", path))?,
        None => {
            let mut config = EngineConfig::default();
            config.apply_env_overrides()?;
            config.validate()?;
            config
        }
    };

    match cli.command {
        Command::Version => {
            println!("authzctl v{}", tenant_authz::VERSION);
        }
        Command::Check {
            fixture,
            request,
            timeout_ms,
        } => {
            let engine = build_engine(config, &fixture)?;
            let request: AccessRequest = parse_json_arg(&request).context("Invalid request")?;

            let ctx = match timeout_ms {
                Some(ms) => CallContext::with_timeout(Duration::from_millis(ms)),
                None => CallContext::default(),
            };
            let decision = engine.check_access_with(&request, ctx).await?;
            println!("{}", serde_json::to_string_pretty(&decision)?);
        }
        Command::Batch { fixture, requests } => {
            let engine = build_engine(config, &fixture)?;
            let raw = std::fs::read_to_string(&requests)
                .with_context(|| format!("Failed to read {:?}", requests))?;
            let requests: Vec<AccessRequest> =
                serde_json::from_str(&raw).context("Invalid request list")?;

            let mut output = Vec::with_capacity(requests.len());
            for result in engine.check_batch_access(&requests).await {
                output.push(match result {
                    Ok(decision) => serde_json::to_value(decision)?,
                    Err(e) => serde_json::json!({ "error": e.to_string() }),
                });
            }
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Command::Health { fixture, org } => {
            let engine = build_engine(config, &fixture)?;

            let mut scopes = vec![tenant_authz::ScopeKey::global()];
            scopes.extend(
                org.into_iter()
                    .map(|o| tenant_authz::ScopeKey::new(Some(o), None)),
            );
            for scope in &scopes {
                // Load failures surface in the report
                let _ = engine.snapshot(scope).await;
            }

            println!("{}", serde_json::to_string_pretty(&engine.health())?);
        }
    }

    Ok(())
}

fn build_engine(config: EngineConfig, fixture: &Path) -> Result<PolicyEngine> {
    let data = SnapshotData::from_json_file(fixture)
        .with_context(|| format!("Failed to load fixture {:?}", fixture))?;

    info!(
        "Loaded fixture: {} roles, {} permissions, {} policies, {} relationships",
        data.roles.len(),
        data.permissions.len(),
        data.policies.len(),
        data.relationships.len()
    );

    let source = Arc::new(InMemoryDataSource::with_data(data));
    Ok(PolicyEngine::new(config, source, Arc::new(TracingAuditEmitter))?)
}

/// Parse inline JSON, or read it from a file path
fn parse_json_arg<T: serde::de::DeserializeOwned>(arg: &str) -> Result<T> {
    let trimmed = arg.trim_start();
    let raw = if trimmed.starts_with('{') || trimmed.starts_with('[') {
        arg.to_string()
    } else {
        std::fs::read_to_string(arg).with_context(|| format!("Failed to read {}", arg))?
    };
    Ok(serde_json::from_str(&raw)?)
}
