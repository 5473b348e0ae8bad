mod banner;
mod commands;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hourglass_config::{AppConfig, ConfigLoader};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "hourglass", version, about = "Hourglass - coding activity tracker")]
struct Cli {
    /// Config file location (YAML or TOML)
    #[arg(short, long, env = "HOURGLASS_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Apply pending schema migrations (default)
    Migrate,
    /// Show registered migrations and when they completed
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Validate configuration and the migration registry
    Check,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config_path = ConfigLoader::resolve_path(cli.config.as_deref());
    let config = ConfigLoader::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    // Nothing logged before this point is recorded.
    init_tracing(&config, cli.log_json);
    info!("Hourglass {}", env!("CARGO_PKG_VERSION"));
    info!("{}", describe_source(&config_path));
    debug!("effective config: {config:?}");

    match cli.command.unwrap_or(Command::Migrate) {
        Command::Migrate => commands::run_migrate(&config, &config_path),
        Command::Status { json } => commands::run_status(&config, json),
        Command::Check => commands::run_check(&config),
    }
}

fn describe_source(path: &Path) -> String {
    if path.exists() {
        format!("loaded config from {}", path.display())
    } else {
        format!("no config file at {}, using defaults", path.display())
    }
}

fn init_tracing(config: &AppConfig, log_json: bool) {
    let default_level = if config.is_dev() { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    if log_json || config.log.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn config_source_names_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("config.yml");
        assert!(describe_source(&missing).starts_with("no config file at"));

        std::fs::write(&missing, "env: dev\n").unwrap();
        assert!(describe_source(&missing).starts_with("loaded config from"));
    }

    #[test]
    fn defaults_to_migrate() {
        let cli = Cli::try_parse_from(["hourglass"]).unwrap();
        assert!(cli.command.is_none());

        let cli = Cli::try_parse_from(["hourglass", "--config", "x.toml", "status", "--json"])
            .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("x.toml")));
        assert!(matches!(cli.command, Some(Command::Status { json: true })));
    }
}
