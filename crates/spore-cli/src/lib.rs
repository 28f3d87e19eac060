#![allow(clippy::print_stdout)]

use anyhow::{Context, Result};
use clap::{Args, Parser};
use spore::KeyPair;
use spore_client::ClientConfig;
use tracing_subscriber::EnvFilter;

mod keys_cli;
mod relay_cli;

#[derive(Parser)]
#[command(name = "spore")]
#[command(about = "Publish and subscribe to signed events across many relays")]
pub struct SporeCli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug, Default)]
pub struct GlobalArgs {
    /// Relay URL (repeatable). Overrides SPORE_RELAYS.
    #[arg(long = "relay", global = true)]
    pub relays: Vec<String>,

    /// Secret key as hex or nsec. Overrides SPORE_SECRET_KEY.
    #[arg(long, global = true)]
    pub secret_key: Option<String>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, short, global = true)]
    pub verbose: bool,
}

#[derive(clap::Subcommand)]
pub enum Commands {
    /// Key utilities (generate, public, encode, decode)
    Keys(keys_cli::KeysArgs),
    /// Sign and publish an event
    Publish(relay_cli::PublishArgs),
    /// Print events matching a filter
    Subscribe(relay_cli::SubscribeArgs),
    /// Read or publish profile metadata
    Profile(relay_cli::ProfileArgs),
    /// List the public keys an author follows
    Contacts(relay_cli::ContactsArgs),
    /// Resolve a DNS identifier such as bob@example.com
    Nip05(Nip05Args),
}

#[derive(Args, Debug)]
pub struct Nip05Args {
    /// Identifier in name@domain form
    pub identifier: String,
}

pub async fn run() -> Result<()> {
    let cli = SporeCli::parse();
    init_tracing(cli.global.verbose);
    match cli.command {
        Commands::Keys(args) => keys_cli::run(args, &cli.global),
        Commands::Publish(args) => relay_cli::publish(args, client_config(&cli.global)?).await,
        Commands::Subscribe(args) => {
            relay_cli::subscribe(args, client_config(&cli.global)?).await
        }
        Commands::Profile(args) => relay_cli::profile(args, client_config(&cli.global)?).await,
        Commands::Contacts(args) => relay_cli::contacts(args, client_config(&cli.global)?).await,
        Commands::Nip05(args) => run_nip05(args).await,
    }
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "debug" } else { "info" };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

/// Environment configuration with command line flags laid over it.
pub fn client_config(global: &GlobalArgs) -> Result<ClientConfig> {
    let config = ClientConfig::from_env().context("failed to read SPORE_* environment")?;
    apply_overrides(config, global)
}

fn apply_overrides(mut config: ClientConfig, global: &GlobalArgs) -> Result<ClientConfig> {
    if !global.relays.is_empty() {
        config.relays.clone_from(&global.relays);
    }
    if let Some(secret) = global.secret_key.as_deref() {
        config.secret_key = Some(KeyPair::parse(secret).context("invalid --secret-key")?);
    }
    Ok(config)
}

async fn run_nip05(args: Nip05Args) -> Result<()> {
    let user = spore_client::nip05::verify(&args.identifier)
        .await
        .with_context(|| format!("failed to verify {}", args.identifier))?;
    let output = serde_json::json!({
        "identifier": args.identifier,
        "pubkey": user.public_key,
        "relays": user.relays,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
