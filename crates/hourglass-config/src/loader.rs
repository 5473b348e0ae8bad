use std::path::{Path, PathBuf};

use hourglass_common::{Error, Result};

use crate::model::{AppConfig, SQLITE_DIALECT};

pub const DEFAULT_CONFIG_FILE: &str = "config.yml";

const ENV_PREFIX: &str = "HOURGLASS_";

/// Loads `AppConfig` from YAML or TOML and layers environment overrides on top.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Pick the config file to read: an explicit path wins, then `config.yml` in the
    /// working directory, then `<config dir>/hourglass/config.yml`.
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(path) = explicit {
            return path.to_path_buf();
        }
        let local = PathBuf::from(DEFAULT_CONFIG_FILE);
        if local.exists() {
            return local;
        }
        dirs::config_dir()
            .map(|dir| dir.join("hourglass").join(DEFAULT_CONFIG_FILE))
            .unwrap_or(local)
    }

    /// Read `path` (missing file means defaults), apply `HOURGLASS_*` environment
    /// overrides and validate the result.
    pub fn load(path: &Path) -> Result<AppConfig> {
        let config = if path.exists() {
            parse_file(path)?
        } else {
            AppConfig::default()
        };

        let config = apply_overrides(config, |key| std::env::var(key).ok())?;
        validate(&config)?;
        Ok(config)
    }
}

fn parse_file(path: &Path) -> Result<AppConfig> {
    let contents = std::fs::read_to_string(path)?;

    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    match ext {
        "yml" | "yaml" => serde_yaml::from_str(&contents)
            .map_err(|e| Error::Config(format!("YAML parse error in {}: {e}", path.display()))),
        "toml" => toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("TOML parse error in {}: {e}", path.display()))),
        other => Err(Error::Config(format!(
            "unsupported config extension: {other}"
        ))),
    }
}

/// Layer environment values over the file config. `lookup` is injected so the
/// override rules can be exercised without mutating the process environment.
pub fn apply_overrides<F>(mut config: AppConfig, lookup: F) -> Result<AppConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

    if let Some(env) = var("ENV") {
        config.env = env;
    }
    if let Some(raw) = var("SKIP_MIGRATIONS") {
        config.skip_migrations = parse_bool("SKIP_MIGRATIONS", &raw)?;
    }
    if let Some(name) = var("DB_NAME") {
        config.db.name = PathBuf::from(name);
    }
    if let Some(dialect) = var("DB_DIALECT") {
        config.db.dialect = dialect;
    }
    if let Some(raw) = var("LOG_JSON") {
        config.log.json = parse_bool("LOG_JSON", &raw)?;
    }

    Ok(config)
}

fn parse_bool(name: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(Error::Config(format!(
            "{ENV_PREFIX}{name} must be a boolean, got '{raw}'"
        ))),
    }
}

fn validate(config: &AppConfig) -> Result<()> {
    if config.db.dialect != SQLITE_DIALECT {
        return Err(Error::Config(format!(
            "unsupported database dialect '{}', only '{SQLITE_DIALECT}' is available",
            config.db.dialect
        )));
    }
    if config.db.name.as_os_str().is_empty() {
        return Err(Error::Config("db.name must not be empty".into()));
    }
    Ok(())
}
