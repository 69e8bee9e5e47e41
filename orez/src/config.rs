//! Runtime configuration.
//!
//! Loaded once from `orez.toml` (all keys optional), overlaid with
//! command-line flags, and swapped into a process-wide slot. The config is
//! immutable after startup with one exception: the ports are rewritten a
//! single time once the supervisor has probed which ones were actually free.

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use arc_swap::ArcSwap;
use once_cell::sync::Lazy;
use serde::Deserialize;
use thiserror::Error;

use crate::supervisor::hooks::Hook;

static CONFIG: Lazy<ArcSwap<Config>> = Lazy::new(|| ArcSwap::from_pointee(Config::default()));

/// Get the process-wide configuration.
pub fn config() -> Arc<Config> {
    CONFIG.load_full()
}

/// Install the process-wide configuration.
pub fn set(config: Config) {
    CONFIG.store(Arc::new(config));
}

/// Environment variable overriding the publication set the consumer reads from.
pub const PUBLICATIONS_VAR: &str = "ZERO_APP_PUBLICATIONS";

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Toml(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding instance storage, the consumer replica and pid files.
    pub data_dir: PathBuf,
    /// PostgreSQL-compatible listener port.
    pub pg_port: u16,
    /// Port the consumer subprocess serves on.
    pub consumer_port: u16,
    /// Dashboard port, recorded in `orez.admin` when the dashboard is enabled.
    pub admin_port: u16,
    /// The single accepted user.
    pub user: String,
    /// Cleartext password for `user`.
    pub password: String,
    /// Directory of SQL migrations, optional.
    pub migrations_dir: Option<PathBuf>,
    /// Seed SQL file applied to an empty database, optional.
    pub seed_file: Option<PathBuf>,
    /// Don't launch the consumer subprocess.
    pub skip_consumer: bool,
    /// Write the admin-port file for the dashboard.
    pub dashboard: bool,
    /// Log level filter, e.g. "info" or "orez=debug,info".
    pub log_level: String,
    /// Plain or JSON log lines.
    pub log_format: LogFormat,
    /// Command used to launch the consumer subprocess.
    pub consumer_command: String,
    /// Application id, part of the synthesized publication name.
    pub app_id: String,
    /// User-supplied publications. When empty, a managed publication is
    /// created and its membership kept in sync automatically.
    pub publications: Vec<String>,
    /// How long to wait for the consumer health check, in seconds.
    pub health_timeout_secs: u64,
    /// Runs after migrations, before the consumer starts.
    pub on_db_ready: Option<Hook>,
    /// Runs once the consumer passes its health check.
    pub on_healthy: Option<Hook>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: ".orez".into(),
            pg_port: 5632,
            consumer_port: 4848,
            admin_port: 4850,
            user: "user".into(),
            password: "password".into(),
            migrations_dir: None,
            seed_file: None,
            skip_consumer: false,
            dashboard: false,
            log_level: "info".into(),
            log_format: LogFormat::Plain,
            consumer_command: "zero-cache".into(),
            app_id: "zero".into(),
            publications: vec![],
            health_timeout_secs: 60,
            on_db_ready: None,
            on_healthy: None,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file. A missing file is not an error:
    /// the defaults are a working local setup.
    pub fn load(path: &PathBuf) -> Result<Config, Error> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    /// Publications the replication source captures from, and whether the
    /// set is managed by us. `ZERO_APP_PUBLICATIONS` wins over the config
    /// file; with neither, a managed publication name is synthesized.
    pub fn publications(&self) -> (Vec<String>, bool) {
        if let Ok(value) = env::var(PUBLICATIONS_VAR) {
            let names = value
                .split(',')
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty())
                .collect::<Vec<_>>();
            if !names.is_empty() {
                return (names, false);
            }
        }

        if !self.publications.is_empty() {
            return (self.publications.clone(), false);
        }

        (vec![format!("orez_{}_public", self.app_id)], true)
    }

    /// The publication whose membership we maintain, if any.
    pub fn managed_publication(&self) -> Option<String> {
        let (names, managed) = self.publications();
        managed.then(|| names[0].clone())
    }

    /// Rewrite the ports after allocation. Called exactly once, before the
    /// config is installed process-wide.
    pub fn with_ports(mut self, pg_port: u16, consumer_port: u16, admin_port: u16) -> Self {
        self.pg_port = pg_port;
        self.consumer_port = consumer_port;
        self.admin_port = admin_port;
        self
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_parse_from_empty_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.pg_port, 5632);
        assert_eq!(config.consumer_port, 4848);
        assert_eq!(config.health_timeout_secs, 60);
        assert_eq!(config.log_format, LogFormat::Plain);
        assert!(config.on_db_ready.is_none());
    }

    #[test]
    fn hooks_parse_as_shell_commands() {
        let config: Config = toml::from_str(
            r#"
            pg_port = 6000
            log_format = "json"
            on_db_ready = "psql -f extra.sql"
        "#,
        )
        .unwrap();

        assert_eq!(config.pg_port, 6000);
        assert_eq!(config.log_format, LogFormat::Json);
        assert!(matches!(config.on_db_ready, Some(Hook::Shell(_))));
    }

    #[test]
    fn synthesized_publication_uses_app_id() {
        let config = Config {
            app_id: "myapp".into(),
            ..Default::default()
        };
        let (names, managed) = config.publications();
        assert_eq!(names, vec!["orez_myapp_public".to_string()]);
        assert!(managed);
        assert_eq!(
            config.managed_publication(),
            Some("orez_myapp_public".into())
        );
    }

    #[test]
    fn user_publications_are_not_managed() {
        let config = Config {
            publications: vec!["custom_pub".into()],
            ..Default::default()
        };
        let (names, managed) = config.publications();
        assert_eq!(names, vec!["custom_pub".to_string()]);
        assert!(!managed);
        assert!(config.managed_publication().is_none());
    }

    #[test]
    fn port_rewrite() {
        let config = Config::default().with_ports(6001, 6002, 6003);
        assert_eq!(config.pg_port, 6001);
        assert_eq!(config.consumer_port, 6002);
        assert_eq!(config.admin_port, 6003);
    }
}
