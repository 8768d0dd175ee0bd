//! Configuration loader and validator for the camp mailer.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
    #[error("Missing required credential: {0}")]
    Missing(&'static str),
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    #[serde(default)]
    pub supabase: Supabase,
    #[serde(default)]
    pub relay: Relay,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    /// Pause between two sends of a batch, in milliseconds.
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
    /// Run history database; defaults to a SQLite file under `data_dir`.
    #[serde(default)]
    pub database_url: Option<String>,
}

/// Supabase project holding the `children`, `parents` and `email_logs` tables.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Supabase {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub anon_key: String,
}

/// Mail relay (Pica passthrough) credentials.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Relay {
    #[serde(default)]
    pub secret_key: String,
    #[serde(default)]
    pub connection_key: String,
    /// Overrides the relay API root; mostly useful against a local stub.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub action_id: Option<String>,
}

fn default_delay_ms() -> u64 {
    2000
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    /// Overlay credentials from the environment (or any other lookup).
    /// Non-empty values win over what the YAML file holds.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let pick = |key: &str, slot: &mut String| {
            if let Some(v) = lookup(key).filter(|v| !v.trim().is_empty()) {
                *slot = v;
            }
        };
        pick("SUPABASE_URL", &mut self.supabase.url);
        pick("SUPABASE_ANON_KEY", &mut self.supabase.anon_key);
        pick("PICA_SECRET_KEY", &mut self.relay.secret_key);
        pick("PICA_CONNECTION_KEY", &mut self.relay.connection_key);
        if let Some(url) = lookup("DATABASE_URL").filter(|v| !v.trim().is_empty()) {
            self.app.database_url = Some(url);
        }
    }

    /// SQLite URL of the local run history.
    pub fn history_database_url(&self) -> String {
        self.app
            .database_url
            .clone()
            .unwrap_or_else(|| format!("sqlite://{}/camp-mailer.db", self.app.data_dir))
    }

    pub fn delay(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.app.delay_ms)
    }
}

/// Load configuration from a YAML file, apply environment overrides and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let mut cfg: Config = serde_yaml::from_str(&content)?;
    cfg.apply_overrides(|key| std::env::var(key).ok());
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate the non-secret part of a configuration. Credentials are checked by
/// the client constructors so that offline tools (preview) run without them.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if let Some(base) = cfg.relay.base_url.as_deref() {
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(ConfigError::Invalid("relay.base_url must be an http(s) URL"));
        }
    }
    if !cfg.supabase.url.is_empty()
        && !(cfg.supabase.url.starts_with("http://") || cfg.supabase.url.starts_with("https://"))
    {
        return Err(ConfigError::Invalid("supabase.url must be an http(s) URL"));
    }
    Ok(())
}

/// Sample configuration file.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  delay_ms: 2000

supabase:
  url: "https://YOUR_PROJECT.supabase.co"
  anon_key: "YOUR_SUPABASE_ANON_KEY"

relay:
  secret_key: "YOUR_PICA_SECRET_KEY"
  connection_key: "YOUR_PICA_GMAIL_CONNECTION_KEY"
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn parse_example_ok() {
        let cfg: Config = serde_yaml::from_str(example()).unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.app.delay_ms, 2000);
        assert!(cfg.relay.base_url.is_none());
    }

    #[test]
    fn delay_defaults_when_absent() {
        let cfg: Config = serde_yaml::from_str("app:\n  data_dir: \"./data\"\n").unwrap();
        assert_eq!(cfg.delay(), std::time::Duration::from_millis(2000));
        assert!(cfg.supabase.url.is_empty());
        assert!(cfg.relay.secret_key.is_empty());
    }

    #[test]
    fn invalid_data_dir() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.data_dir = "  ".into();
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("app.data_dir")),
            _ => panic!("wrong error"),
        }
    }

    #[test]
    fn invalid_urls() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.relay.base_url = Some("ftp://relay".into());
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.supabase.url = "db.example.com".into();
        match validate(&cfg).unwrap_err() {
            ConfigError::Invalid(msg) => assert!(msg.contains("supabase.url")),
            _ => panic!("wrong error"),
        }
    }

    #[test]
    fn overrides_replace_non_empty_values_only() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        let env: HashMap<&str, &str> = [
            ("PICA_SECRET_KEY", "sk-env"),
            ("SUPABASE_ANON_KEY", "   "),
        ]
        .into_iter()
        .collect();
        cfg.apply_overrides(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.relay.secret_key, "sk-env");
        assert_eq!(cfg.supabase.anon_key, "YOUR_SUPABASE_ANON_KEY");
        assert_eq!(cfg.relay.connection_key, "YOUR_PICA_GMAIL_CONNECTION_KEY");
        assert_eq!(cfg.history_database_url(), "sqlite://./data/camp-mailer.db");

        cfg.apply_overrides(|k| (k == "DATABASE_URL").then(|| "sqlite::memory:".to_string()));
        assert_eq!(cfg.history_database_url(), "sqlite::memory:");
    }

    #[test]
    fn ensure_dirs_creates_data_dir() {
        let td = tempdir().unwrap();
        let data_path = td.path().join("data");
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.data_dir = data_path.to_string_lossy().to_string();
        cfg.ensure_dirs().unwrap();
        assert!(data_path.exists());
    }

    #[test]
    fn load_from_file_ok() {
        let td = tempdir().unwrap();
        let p = td.path().join("config.yaml");
        fs::write(&p, example()).unwrap();
        let cfg = load(Some(&p)).unwrap();
        assert_eq!(cfg.app.data_dir, "./data");
    }
}
