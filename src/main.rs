//! nascfg - Declarative NAS Cluster Configuration CLI
//!
//! Reads a desired-state plan (YAML), reconciles every entry against the
//! cluster management API, and prints a JSON report with a `changed`
//! flag and the post-apply snapshot per resource.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use nas_config_manager::{
    apply_plan, CheckMode, ClusterConfig, Credentials, Plan, RestClient,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Declarative configuration manager for scale-out NAS clusters
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Desired-state plan file (YAML)
    #[arg(long, short = 'f', env = "NASCFG_PLAN")]
    plan: PathBuf,

    /// Cluster management endpoint host
    #[arg(long, env = "NASCFG_HOST")]
    host: String,

    /// Cluster management endpoint port
    #[arg(long, env = "NASCFG_PORT", default_value = "8080")]
    port: u16,

    /// API username (Basic authentication)
    #[arg(long, env = "NASCFG_USERNAME")]
    username: Option<String>,

    /// API password (Basic authentication)
    #[arg(long, env = "NASCFG_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Bearer token (session-based deployments)
    #[arg(long, env = "NASCFG_TOKEN", hide_env_values = true, conflicts_with_all = ["username", "password"])]
    token: Option<String>,

    /// Skip TLS certificate verification
    #[arg(long, env = "NASCFG_NO_VERIFY_SSL")]
    no_verify_ssl: bool,

    /// Per-request timeout in seconds
    #[arg(long, env = "NASCFG_TIMEOUT", default_value = "120")]
    timeout_secs: u64,

    /// Compute and report changes without applying them
    #[arg(long)]
    check: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn credentials(&self) -> anyhow::Result<Credentials> {
        if let Some(token) = &self.token {
            return Ok(Credentials::Bearer(token.clone()));
        }
        match (&self.username, &self.password) {
            (Some(username), Some(password)) => Ok(Credentials::Basic {
                username: username.clone(),
                password: password.clone(),
            }),
            _ => anyhow::bail!("either --token or both --username and --password are required"),
        }
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args);

    info!("Starting nascfg");
    info!("  Version: {}", nas_config_manager::VERSION);
    info!("  Cluster: {}:{}", args.host, args.port);
    info!("  Plan: {}", args.plan.display());
    info!("  Check mode: {}", args.check);

    let config = ClusterConfig {
        host: args.host.clone(),
        port: args.port,
        credentials: args.credentials()?,
        verify_ssl: !args.no_verify_ssl,
        timeout: Duration::from_secs(args.timeout_secs),
    };

    let plan = Plan::load(&args.plan)
        .with_context(|| format!("loading plan {}", args.plan.display()))?;
    info!("Plan loaded: {} resources", plan.resources.len());

    let client = RestClient::connect(&config)?;
    let mode = if args.check {
        CheckMode::Check
    } else {
        CheckMode::Apply
    };

    match apply_plan(&client, &plan, mode).await {
        Ok(reports) => {
            let changed = reports.iter().filter(|report| report.changed).count();
            info!(
                "Plan applied: {} resources, {} changed",
                reports.len(),
                changed
            );
            println!("{}", serde_json::to_string_pretty(&reports)?);
            Ok(())
        }
        Err(e) => {
            error!("Plan failed: {}", e);
            Err(e.into())
        }
    }
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("hyper=warn".parse().unwrap())
        .add_directive("reqwest=info".parse().unwrap());

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}
