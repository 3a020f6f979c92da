//! Handles settings for the application. Configuration is read from an
//! optional `settings.toml` (or the file passed with `--config`) and from
//! `SIMPLEBANK__*` environment variables, which take precedence.
//!
//! See `settings.example.toml` for the configuration.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct App {
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for App {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}

#[derive(Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Database {
    Memory,
    Sqlite(String),
}

impl Default for Database {
    fn default() -> Self {
        Database::Sqlite("./simplebank.db".to_string())
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct Ledger {
    #[serde(default)]
    pub allow_overdraft: bool,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub app: App,
    #[serde(default)]
    pub database: Database,
    #[serde(default)]
    pub ledger: Ledger,
}

impl Settings {
    pub fn new(path: Option<&str>) -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(File::with_name(path.unwrap_or("settings")).required(path.is_some()))
            .add_source(
                Environment::with_prefix("SIMPLEBANK")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        settings.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use config::FileFormat;

    use super::*;

    fn parse(toml: &str) -> Settings {
        Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn empty_file_uses_defaults() {
        let settings = parse("");
        assert_eq!(settings.app.level, "info");
        assert_eq!(settings.database, Database::default());
        assert!(!settings.ledger.allow_overdraft);
        assert_eq!(settings.ledger.timeout_ms, None);
    }

    #[test]
    fn database_accepts_memory_and_sqlite() {
        let settings = parse("database = \"memory\"");
        assert_eq!(settings.database, Database::Memory);

        let settings = parse(
            r#"
            [app]
            level = "debug"

            [database]
            sqlite = "/tmp/bank.db"

            [ledger]
            allow_overdraft = true
            timeout_ms = 250
            "#,
        );
        assert_eq!(settings.app.level, "debug");
        assert_eq!(settings.database, Database::Sqlite("/tmp/bank.db".to_string()));
        assert!(settings.ledger.allow_overdraft);
        assert_eq!(settings.ledger.timeout_ms, Some(250));
    }
}
