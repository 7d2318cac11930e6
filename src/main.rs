use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use authgate::config::{AppConfig, LoggingConfig};
use authgate::identity::IdentifierHasher;
use authgate::ratelimit::{
    BoundedMemoryStore, PolicyEngine, PolicySet, RequestContext, SystemClock,
};

#[derive(Parser)]
#[command(name = "authgate", version, about = "Rate limit decisions for authentication actions")]
struct Cli {
    /// Configuration file (YAML, TOML or JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load a policy file and print a summary
    Validate {
        /// Policy file; defaults to `policies_path` from the configuration
        #[arg(long)]
        policies: Option<PathBuf>,
    },
    /// Evaluate a request against a fresh in-memory store
    Check(CheckArgs),
}

#[derive(Args)]
struct CheckArgs {
    /// Policy file; defaults to `policies_path` from the configuration
    #[arg(long)]
    policies: Option<PathBuf>,

    /// Action id, e.g. `login`
    #[arg(long)]
    action: String,

    #[arg(long)]
    ip: Option<String>,

    /// Email address, hashed with the configured identity secret
    #[arg(long)]
    email: Option<String>,

    /// Phone number, hashed with the configured identity secret
    #[arg(long)]
    phone: Option<String>,

    #[arg(long)]
    user_id: Option<String>,

    #[arg(long)]
    session_id: Option<String>,

    #[arg(long)]
    route: Option<String>,

    /// Custom dimension as `tag=value`; may be repeated
    #[arg(long = "custom", value_parser = parse_custom)]
    custom: Vec<(String, String)>,

    /// Number of identical requests to send
    #[arg(long, default_value_t = 1)]
    repeat: u32,
}

fn parse_custom(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((tag, value)) if !tag.is_empty() => Ok((tag.to_string(), value.to_string())),
        _ => Err(format!("expected tag=value, got '{}'", raw)),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref())?;

    init_tracing(&config.logging)?;
    info!(version = env!("CARGO_PKG_VERSION"), "Starting authgate");

    match cli.command {
        Command::Validate { policies } => {
            let policies = load_policies(policies, &config)?;
            print_summary(&policies);
        }
        Command::Check(args) => run_check(args, &config).await?,
    }

    Ok(())
}

fn init_tracing(logging: &LoggingConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .with_context(|| format!("invalid log level '{}'", logging.level))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

fn load_policies(path: Option<PathBuf>, config: &AppConfig) -> anyhow::Result<PolicySet> {
    let path = path
        .or_else(|| config.policies_path.as_ref().map(PathBuf::from))
        .context("no policy file given; pass --policies or set policies_path")?;

    PolicySet::from_file(&path)
        .with_context(|| format!("failed to load policies from {}", path.display()))
}

fn print_summary(policies: &PolicySet) {
    let mut actions: Vec<_> = policies.actions.values().collect();
    actions.sort_by(|a, b| a.id.cmp(&b.id));

    for policy in actions {
        println!(
            "{} (fail_mode: {:?}, {} rules)",
            policy.id,
            policy.fail_mode,
            policy.rules.len()
        );
        for rule in &policy.rules {
            let dimensions: Vec<String> = rule.dimensions.iter().map(|d| d.to_string()).collect();
            println!(
                "  - {} [{}] capacity={} refill={}/{}ms cost={} mode={:?}",
                rule.name,
                dimensions.join(", "),
                rule.capacity,
                rule.refill_tokens,
                rule.refill_interval_ms,
                rule.cost,
                rule.mode
            );
        }
    }
}

async fn run_check(args: CheckArgs, config: &AppConfig) -> anyhow::Result<()> {
    let policies = load_policies(args.policies.clone(), config)?;
    let hasher = config
        .identity
        .secret
        .as_deref()
        .map(IdentifierHasher::new)
        .transpose()?;

    let mut context = RequestContext::new(args.action.as_str());
    if let Some(ip) = args.ip {
        context = context.with_ip(ip);
    }
    if let Some(email) = args.email.as_deref() {
        let hasher = hasher
            .as_ref()
            .context("--email needs identity.secret to be configured")?;
        context = context.with_email_hash(hasher.hash_email(email));
    }
    if let Some(phone) = args.phone.as_deref() {
        let hasher = hasher
            .as_ref()
            .context("--phone needs identity.secret to be configured")?;
        context = context.with_phone_hash(hasher.hash_phone(phone));
    }
    if let Some(user_id) = args.user_id {
        context = context.with_user_id(user_id);
    }
    if let Some(session_id) = args.session_id {
        context = context.with_session_id(session_id);
    }
    if let Some(route) = args.route {
        context = context.with_route(route);
    }
    for (tag, value) in args.custom {
        context = context.with_custom(tag, value);
    }

    let clock = Arc::new(SystemClock::new());
    let store = Arc::new(BoundedMemoryStore::new(&config.store, clock.clone()));
    let engine = PolicyEngine::new(policies, store, clock);

    for _ in 0..args.repeat {
        let decision = engine.check(&context).await;
        println!("{}", serde_json::to_string(&decision)?);
    }

    info!(stats = ?engine.store().stats(), "Checks complete");
    engine.shutdown().await?;
    Ok(())
}
