//! Threadline - streaming chat client
//!
#![doc = "Main entry point for the Threadline terminal client."]

use anyhow::Result;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use threadline::cli::{Cli, Commands};
use threadline::commands;
use threadline::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    init_tracing(cli.verbose, cli.json_logs);
    threadline::metrics::init_metrics_exporter();

    // Load configuration
    let config_path = cli.config.as_deref().unwrap_or("config/config.yaml");
    let config = Config::load(config_path, &cli)?;

    // Validate configuration
    config.validate()?;

    match cli.command {
        Commands::Chat {
            model,
            thread,
            ephemeral,
        } => {
            tracing::info!("Starting interactive chat");
            if let Some(m) = &model {
                tracing::debug!("Using model override: {}", m);
            }
            commands::chat::run_chat(config, model, thread, ephemeral).await?;
            Ok(())
        }
        Commands::Ask {
            prompt,
            model,
            ephemeral,
        } => {
            tracing::info!("Sending one-shot prompt");
            commands::ask::run_ask(config, prompt, model, ephemeral).await?;
            Ok(())
        }
        Commands::Threads { command } => {
            commands::threads::handle_threads(&config, command)?;
            Ok(())
        }
    }
}

fn init_tracing(verbose: bool, json_logs: bool) {
    let default_filter = if verbose {
        "threadline=debug"
    } else {
        "threadline=info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    // stderr keeps logs out of the rendered reply
    if json_logs {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
