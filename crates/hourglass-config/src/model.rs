use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// The only database dialect the bundled storage layer speaks.
pub const SQLITE_DIALECT: &str = "sqlite3";

/// Top-level Hourglass configuration, loaded from `config.yml` or `config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Deployment environment, `production` or `dev`.
    pub env: String,
    /// Skip the schema migration pass entirely.
    pub skip_migrations: bool,
    pub db: DatabaseConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub dialect: String,
    /// Database file path. Relative paths resolve against the working directory.
    pub name: PathBuf,
    /// How long a connection waits on a locked database before giving up.
    pub busy_timeout_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Emit JSON log lines instead of the human-readable format.
    pub json: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            env: "production".to_string(),
            skip_migrations: false,
            db: DatabaseConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            dialect: SQLITE_DIALECT.to_string(),
            name: PathBuf::from("hourglass.db"),
            busy_timeout_ms: 5_000,
        }
    }
}

impl AppConfig {
    pub fn is_dev(&self) -> bool {
        matches!(self.env.as_str(), "dev" | "development" | "local")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_target_sqlite_in_production() {
        let config = AppConfig::default();
        assert_eq!(config.db.dialect, SQLITE_DIALECT);
        assert!(!config.skip_migrations);
        assert!(!config.is_dev());
    }

    #[test]
    fn partial_yaml_keeps_defaults_for_missing_sections() {
        let config: AppConfig = serde_yaml::from_str("skip_migrations: true\nenv: dev\n").unwrap();
        assert!(config.skip_migrations);
        assert!(config.is_dev());
        assert_eq!(config.db, DatabaseConfig::default());
    }

    #[test]
    fn retired_keys_in_old_config_files_are_ignored() {
        let yaml = "db:\n  name: legacy.db\n  max_conn: 4\napp:\n  leaderboard_enabled: true\n";
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.db.name, PathBuf::from("legacy.db"));
        assert_eq!(config.db.busy_timeout_ms, DatabaseConfig::default().busy_timeout_ms);
    }
}
