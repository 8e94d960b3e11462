// Estate property-search assistant
// Main entry point for the estate binary

use clap::Parser;
use estate_engine::cli::{Cli, Command};
use estate_engine::config::Config;
use estate_engine::handlers::{
    handle_ask, handle_forget, handle_history, handle_plan, handle_prefer, handle_render,
    handle_save, handle_saved, OutputFormat,
};
use estate_engine::telemetry::init_telemetry_with_level;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = if let Some(config_path) = &cli.config {
        Config::load_from_path(config_path)?
    } else {
        Config::load_or_create()?
    };

    // RUST_LOG > --log > config
    match &cli.log {
        Some(level) => init_telemetry_with_level(level),
        None => init_telemetry_with_level(&config.core.log_level),
    }

    let version = env!("CARGO_PKG_VERSION");
    let commit = env!("GIT_COMMIT_HASH");
    let timestamp = env!("BUILD_TIMESTAMP");

    tracing::debug!("Estate v{} ({} - {})", version, commit, timestamp);

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    match cli.command {
        Command::Ask {
            session,
            catalog,
            query,
        } => {
            tracing::info!("Answering turn for session {}", session);
            handle_ask(&session, &query, catalog.as_deref(), &config, format).await
        }

        Command::Plan { query, session } => handle_plan(&session, &query, &config, format).await,

        Command::History { session, limit } => {
            handle_history(&session, limit, &config, format).await
        }

        Command::Forget { session } => {
            tracing::info!("Forgetting session {}", session);
            handle_forget(&session, &config, format).await
        }

        Command::Save {
            session,
            property_id,
        } => handle_save(&session, &property_id, &config, format).await,

        Command::Saved { session } => handle_saved(&session, &config, format).await,

        Command::Prefer {
            session,
            name,
            value,
        } => handle_prefer(&session, &name, &value, &config, format).await,

        Command::Render { session, out } => handle_render(&session, &out, &config, format).await,
    }
}
