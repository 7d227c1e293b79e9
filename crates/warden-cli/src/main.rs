#![deny(unsafe_code)]

//! Warden CLI: operator tooling over the authorization engine.

mod trace;

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};
use warden_config::{AppConfig, parse_document};
use warden_core::{
    ExplainRequest, PolicySnapshot, Scope, SimpleIdentity, build_info, decode_policy_document,
    encode_policy_document,
};

use crate::trace::{MatchTraceCollector, TraceReader};

const TRACE_CAPACITY: usize = 1024;

/// Warden: evaluate and govern tag-scoped RBAC policies.
#[derive(Parser)]
#[command(name = "warden", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, default_value = "warden.toml")]
    config: PathBuf,

    /// Increase log verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the configuration and decode every policy.
    Check {
        /// Show the resolved configuration.
        #[arg(long)]
        show: bool,
    },

    /// Evaluate one request for an identity.
    Allow {
        #[command(flatten)]
        identity: IdentityArgs,

        /// Evaluate System-scope policies.
        #[arg(long)]
        admin: bool,

        /// Scopes to evaluate; several are AND-ed together.
        #[arg(long = "scope")]
        scopes: Vec<Scope>,

        service: String,
        resource: Option<String>,
        action: Option<String>,
        extra: Vec<String>,
    },

    /// Evaluate a batch of `key:scope:service[:resource[:action[:extra...]]]` requests.
    Explain {
        #[command(flatten)]
        identity: IdentityArgs,

        /// Print the engine's decision events for each request.
        #[arg(long)]
        trace: bool,

        #[arg(required = true)]
        requests: Vec<String>,
    },

    /// Print the reduced, canonical form of a policy document.
    Reduce {
        /// A `.json` or `.toml` policy document.
        file: PathBuf,
    },

    /// Check that holders of the operator policies may assign the others.
    Contains {
        /// Policies held by the operator.
        #[arg(long = "operator", required = true)]
        operator: Vec<String>,

        /// Policies to assign.
        #[arg(long = "assigned", required = true)]
        assigned: Vec<String>,
    },

    /// Print version and build information.
    Version,
}

#[derive(Args, Debug, Clone)]
struct IdentityArgs {
    /// Domain of the caller.
    #[arg(long, default_value = "default")]
    domain: String,

    /// Project of the caller.
    #[arg(long, default_value = "")]
    project: String,

    /// Role held by the caller (repeatable).
    #[arg(long = "role")]
    roles: Vec<String>,

    /// Login address of the caller.
    #[arg(long)]
    ip: Option<IpAddr>,

    /// Treat the caller as unauthenticated.
    #[arg(long)]
    anonymous: bool,
}

impl IdentityArgs {
    fn to_identity(&self) -> SimpleIdentity {
        let mut identity = SimpleIdentity::new(&self.domain)
            .with_project(&self.project)
            .with_roles(&self.roles);
        if let Some(ip) = self.ip {
            identity = identity.with_login_ip(ip);
        }
        if self.anonymous {
            identity = identity.anonymous();
        }
        identity
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up tracing subscriber with verbosity level
    let filter = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let collector = MatchTraceCollector::new(TRACE_CAPACITY);
    let reader = collector.reader();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer().with_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
            ),
        )
        .with(collector.with_filter(EnvFilter::new("warden_core=trace")))
        .init();

    let output = match cli.command {
        Commands::Check { show } => cmd_check(&cli.config, show).await?,
        Commands::Allow {
            identity,
            admin,
            scopes,
            service,
            resource,
            action,
            extra,
        } => {
            let config = load_config(&cli.config).await?;
            let snapshot = config.build_snapshot().await?;
            let request = Request {
                service,
                resource,
                action,
                extra,
            };
            cmd_allow(&config, &snapshot, &identity.to_identity(), admin, &scopes, &request)
        }
        Commands::Explain {
            identity,
            trace,
            requests,
        } => {
            let snapshot = load_config(&cli.config).await?.build_snapshot().await?;
            let reader = trace.then_some(&reader);
            cmd_explain(&snapshot, &identity.to_identity(), &requests, reader)?
        }
        Commands::Reduce { file } => cmd_reduce(&file).await?,
        Commands::Contains { operator, assigned } => {
            let config = load_config(&cli.config).await?;
            let snapshot = config.build_snapshot().await?;
            cmd_contains(&config, &snapshot, &operator, &assigned)?
        }
        Commands::Version => build_info::version_string(),
    };
    println!("{output}");

    Ok(())
}

/// The request tuple given on the command line.
struct Request {
    service: String,
    resource: Option<String>,
    action: Option<String>,
    extra: Vec<String>,
}

async fn cmd_check(config_path: &Path, show: bool) -> Result<String> {
    let config = load_config(config_path).await?;
    let snapshot = config.build_snapshot().await?;
    if show {
        return toml::to_string_pretty(&config).context("failed to render configuration");
    }
    Ok(format!(
        "Configuration at '{}' is valid: {} policies.",
        config_path.display(),
        snapshot.len()
    ))
}

fn cmd_allow(
    config: &AppConfig,
    snapshot: &PolicySnapshot,
    identity: &SimpleIdentity,
    admin: bool,
    scopes: &[Scope],
    request: &Request,
) -> String {
    let scopes = match (scopes.is_empty(), admin) {
        (false, _) => scopes.to_vec(),
        (true, true) => vec![Scope::System],
        (true, false) => vec![config.engine.default_scope],
    };
    let extra: Vec<&str> = request.extra.iter().map(String::as_str).collect();
    let result = snapshot.allow_merged(
        &scopes,
        identity,
        &request.service,
        request.resource.as_deref().unwrap_or("*"),
        request.action.as_deref().unwrap_or("*"),
        &extra,
    );
    result.to_string()
}

fn cmd_explain(
    snapshot: &PolicySnapshot,
    identity: &SimpleIdentity,
    requests: &[String],
    trace: Option<&TraceReader>,
) -> Result<String> {
    let requests = requests
        .iter()
        .map(|r| ExplainRequest::parse(r))
        .collect::<Result<Vec<_>, _>>()?;

    if let Some(reader) = trace {
        reader.drain();
        let mut lines = Vec::new();
        for request in &requests {
            let result = request.evaluate(snapshot, identity);
            lines.push(format!("{}: {result}", request.key));
            lines.extend(reader.drain().iter().map(|e| format!("    {e}")));
        }
        return Ok(lines.join("\n"));
    }

    let batch: BTreeMap<String, Vec<String>> = requests
        .into_iter()
        .map(|r| {
            let mut item = vec![r.scope.to_string(), r.service, r.resource, r.action];
            item.extend(r.extra);
            (r.key, item)
        })
        .collect();
    let verdicts = snapshot.explain(identity, &batch)?;
    Ok(verdicts
        .iter()
        .map(|(key, allowed)| format!("{key}: {}", if *allowed { "allow" } else { "deny" }))
        .collect::<Vec<_>>()
        .join("\n"))
}

async fn cmd_reduce(file: &Path) -> Result<String> {
    let content = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("failed to read {}", file.display()))?;
    let document = parse_document(file, &content)?;
    let policy = decode_policy_document(&document)?;
    let encoded = encode_policy_document(&policy)?;
    Ok(serde_json::to_string_pretty(&encoded)?)
}

fn cmd_contains(
    config: &AppConfig,
    snapshot: &PolicySnapshot,
    operator: &[String],
    assigned: &[String],
) -> Result<String> {
    config.validate_assignment(snapshot, operator, assigned)?;
    Ok(format!(
        "[{}] may assign [{}]",
        operator.join(", "),
        assigned.join(", ")
    ))
}

async fn load_config(path: &Path) -> Result<AppConfig> {
    if tokio::fs::try_exists(path).await.unwrap_or(false) {
        Ok(AppConfig::load(path).await?)
    } else {
        info!(path = %path.display(), "Config file not found, using defaults");
        Ok(AppConfig::default())
    }
}
