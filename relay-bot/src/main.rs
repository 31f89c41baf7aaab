//! Relay Bot - Main entry point.

use anyhow::{Context, Result};
use clap::Parser;
use relay_bot::{CliChannel, DiscordChannel, ModelPolicy};
use relay_common::config::expand_path;
use relay_common::logging::{init_logging_to, LogTarget};
use relay_common::Config;
use std::path::PathBuf;
use std::time::Duration;

/// Discord direct-message relay to a remote LLM chat API.
#[derive(Debug, Parser)]
#[command(name = "relay-bot", version, about)]
struct Cli {
    /// Configuration file (default: ~/.dm-relay/config.json)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Read messages from stdin and reply on stdout instead of Discord
    #[arg(long)]
    console: bool,

    /// Load and validate the configuration, print a summary, then exit
    #[arg(long)]
    check_config: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .as_deref()
        .map(|p| expand_path(&p.to_string_lossy()));
    let mut config =
        Config::load_with_env(config_path.as_deref()).context("Failed to load configuration")?;
    if cli.console {
        config.discord.enabled = false;
    }

    // Console replies own stdout.
    let log_target = if cli.console {
        LogTarget::Stderr
    } else {
        LogTarget::Stdout
    };
    init_logging_to(&config.observability, log_target);

    config.validate().context("Invalid configuration")?;
    let policy = ModelPolicy::from_config(&config.inference).context("Invalid configuration")?;

    if cli.check_config {
        print_summary(&config, &policy);
        return Ok(());
    }

    tracing::info!("Relay Bot v{}", env!("CARGO_PKG_VERSION"));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    let result = runtime.block_on(async {
        if cli.console {
            relay_bot::run(CliChannel::new(), &config).await
        } else {
            let discord = DiscordChannel::from_config(&config.discord)?;
            relay_bot::run(discord, &config).await
        }
    });

    // A pending stdin read would otherwise hold the runtime open.
    runtime.shutdown_timeout(Duration::from_secs(1));
    result
}

fn print_summary(config: &Config, policy: &ModelPolicy) {
    println!("Configuration OK");
    println!(
        "  discord:   {}",
        if config.discord.enabled {
            config.discord.api_base.as_str()
        } else {
            "disabled"
        }
    );
    println!("  provider:  {}", config.inference.provider.display_name());
    println!("  endpoint:  {}", config.inference.endpoint());
    println!("  model:     {}", config.inference.default_model());
    println!("  timeout:   {}s", config.inference.timeout_secs());
    match policy.catalog() {
        Some(catalog) => println!("  models:    {} catalog aliases", catalog.len()),
        None => println!("  models:    any (not validated)"),
    }
    println!(
        "  logging:   {} ({})",
        config.observability.log_level, config.observability.log_format
    );
}
