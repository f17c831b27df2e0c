use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;

use code_switch::app_state::{build_state, default_data_dir, load_or_init_config, AppState};
use code_switch::constants::APP_CONFIG_FILE;
use code_switch::logging::setup_logger;
use code_switch::orchestrator::session::Platform;

#[derive(Parser)]
#[command(name = "code_switch")]
#[command(about = "Session routing state and usage analytics for the local relay")]
#[command(version)]
struct Cli {
    /// Data directory holding config.toml, app.db, app.json and app.log
    #[arg(long)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the session sweep until Ctrl-C
    Serve,

    /// Recent request logs, newest first
    Logs {
        #[arg(long, default_value = "")]
        platform: String,
        #[arg(long, default_value = "")]
        provider: String,
        #[arg(long, default_value_t = 100)]
        limit: i64,
    },

    /// Providers that appear in the request log
    Providers {
        #[arg(long, default_value = "")]
        platform: String,
    },

    /// Hourly request heatmap
    Heatmap {
        #[arg(long, default_value_t = 30)]
        days: i64,
    },

    /// Today's totals and hourly series
    Stats {
        #[arg(long, default_value = "")]
        platform: String,
    },

    /// Today's per-provider rollup
    ProviderStats {
        #[arg(long, default_value = "")]
        platform: String,
    },

    /// Live sessions pinned to a provider
    Sessions { provider: String },

    /// Provider currently bound to a session
    Lookup { platform: Platform, session: String },

    /// Drop a session binding
    Unbind { platform: Platform, session: String },

    /// Show application preferences
    Settings,

    /// Claude CLI proxy settings
    Proxy {
        #[command(subcommand)]
        action: ProxyCommands,
    },
}

#[derive(Subcommand)]
enum ProxyCommands {
    Status,
    Enable,
    Disable,
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn serve(state: &AppState) -> anyhow::Result<()> {
    let sweep = state.start_background_tasks();
    log::info!(
        "serving from {} (relay {})",
        state.data_dir.display(),
        state.config.relay.addr
    );
    tokio::signal::ctrl_c()
        .await
        .context("wait for ctrl-c")?;
    log::info!("shutting down");
    sweep.stop().await;
    Ok(())
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let data_dir = cli.data_dir.unwrap_or_else(default_data_dir);
    let config_path = data_dir.join(APP_CONFIG_FILE);
    let config = load_or_init_config(&config_path)?;
    setup_logger(&data_dir, &config.log, matches!(cli.command, Commands::Serve))?;

    let state = build_state(config_path, data_dir)?;
    match cli.command {
        Commands::Serve => serve(&state).await,
        Commands::Logs {
            platform,
            provider,
            limit,
        } => print_json(&state.logs.list_request_logs(&platform, &provider, limit)?),
        Commands::Providers { platform } => print_json(&state.logs.list_providers(&platform)?),
        Commands::Heatmap { days } => print_json(&state.logs.heatmap_stats(days)?),
        Commands::Stats { platform } => print_json(&state.logs.stats_since(&platform)?),
        Commands::ProviderStats { platform } => {
            print_json(&state.logs.provider_daily_stats(&platform)?)
        }
        Commands::Sessions { provider } => {
            print_json(&state.sessions.list_by_provider(&provider)?)
        }
        Commands::Lookup { platform, session } => {
            print_json(&state.sessions.lookup(platform, &session)?)
        }
        Commands::Unbind { platform, session } => {
            state.sessions.unbind(platform, &session)?;
            print_json(&serde_json::json!({ "ok": true }))
        }
        Commands::Settings => print_json(&state.settings.get()?),
        Commands::Proxy { action } => {
            match action {
                ProxyCommands::Status => {}
                ProxyCommands::Enable => state.claude.enable_proxy()?,
                ProxyCommands::Disable => state.claude.disable_proxy()?,
            }
            print_json(&state.claude.proxy_status()?)
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        log::error!("{e:#}");
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
