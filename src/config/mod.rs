//! Configuration management.
//!
//! tallerflow configuration can come from:
//! - Environment variables (TALLER_*)
//! - Config file (~/.config/tallerflow/config.toml)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// tallerflow configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// SLA sweep configuration
    #[serde(default)]
    pub sla: SlaConfig,

    /// Stage catalog source
    #[serde(default)]
    pub catalog: CatalogConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
        }
    }
}

fn default_port() -> u16 {
    8080
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

/// Storage configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to SQLite database
    #[serde(default)]
    pub database_path: Option<PathBuf>,
}

/// SLA sweep configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlaConfig {
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,

    #[serde(default = "default_sweep_enabled")]
    pub sweep_enabled: bool,
}

impl Default for SlaConfig {
    fn default() -> Self {
        Self {
            sweep_interval_seconds: default_sweep_interval(),
            sweep_enabled: default_sweep_enabled(),
        }
    }
}

fn default_sweep_interval() -> u64 {
    crate::sweep::DEFAULT_SWEEP_INTERVAL_SECS
}

fn default_sweep_enabled() -> bool {
    true
}

/// Stage catalog source.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// YAML catalog imported at startup. Without it the stored catalog is used.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from default locations.
    pub fn load() -> Self {
        let mut config = Self::default();

        let primary_path = Self::config_dir().join("config.toml");
        if let Ok(partial) = Self::load_partial_from_path(&primary_path) {
            config.apply_partial(partial);
        }

        config.apply_env_overrides(|key| std::env::var(key).ok());
        config
    }

    /// Get the data directory.
    pub fn data_dir() -> PathBuf {
        dirs::data_dir()
            .map(|d| d.join("tallerflow"))
            .unwrap_or_else(|| PathBuf::from(".tallerflow"))
    }

    /// Get the config directory.
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("tallerflow"))
            .unwrap_or_else(|| PathBuf::from(".tallerflow"))
    }

    /// Database path, falling back to the data directory.
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| Self::data_dir().join("tallerflow.db"))
    }

    fn apply_env_overrides<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = var("TALLER_SERVER_PORT") {
            if let Ok(parsed) = port.parse::<u16>() {
                self.server.port = parsed;
            }
        }
        if let Some(host) = var("TALLER_SERVER_HOST") {
            self.server.host = host;
        }
        if let Some(path) = var("TALLER_DATABASE_PATH") {
            self.storage.database_path = Some(PathBuf::from(path));
        }
        if let Some(interval) = var("TALLER_SWEEP_INTERVAL_SECONDS") {
            if let Ok(parsed) = interval.parse::<u64>() {
                self.sla.sweep_interval_seconds = parsed;
            }
        }
        if let Some(enabled) = var("TALLER_SWEEP_ENABLED") {
            match enabled.to_lowercase().as_str() {
                "true" | "1" | "yes" => self.sla.sweep_enabled = true,
                "false" | "0" | "no" => self.sla.sweep_enabled = false,
                _ => {}
            }
        }
        if let Some(path) = var("TALLER_CATALOG_PATH") {
            self.catalog.path = Some(PathBuf::from(path));
        }
    }

    fn load_partial_from_path(path: &Path) -> std::result::Result<PartialConfig, ()> {
        let content = std::fs::read_to_string(path).map_err(|_| ())?;
        toml::from_str(&content).map_err(|_| ())
    }

    fn apply_partial(&mut self, partial: PartialConfig) {
        if let Some(server) = partial.server {
            self.server = server;
        }
        if let Some(storage) = partial.storage {
            self.storage = storage;
        }
        if let Some(sla) = partial.sla {
            self.sla = sla;
        }
        if let Some(catalog) = partial.catalog {
            self.catalog = catalog;
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct PartialConfig {
    server: Option<ServerConfig>,
    storage: Option<StorageConfig>,
    sla: Option<SlaConfig>,
    catalog: Option<CatalogConfig>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.sla.sweep_interval_seconds, 60);
        assert!(config.sla.sweep_enabled);
        assert!(config.catalog.path.is_none());
        assert!(config.database_path().ends_with("tallerflow.db"));
    }

    #[test]
    fn test_partial_file_keeps_other_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[sla]\nsweep_interval_seconds = 15\n\n[catalog]\npath = \"/etc/taller/catalog.yaml\"\n",
        )
        .unwrap();

        let mut config = Config::default();
        config.apply_partial(Config::load_partial_from_path(&path).unwrap());
        assert_eq!(config.sla.sweep_interval_seconds, 15);
        assert!(config.sla.sweep_enabled);
        assert_eq!(
            config.catalog.path.as_deref(),
            Some(Path::new("/etc/taller/catalog.yaml"))
        );
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn test_invalid_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[server\nport = ").unwrap();
        assert!(Config::load_partial_from_path(&path).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_env_overrides(env(&[
            ("TALLER_SERVER_PORT", "9090"),
            ("TALLER_SERVER_HOST", "0.0.0.0"),
            ("TALLER_DATABASE_PATH", "/tmp/taller.db"),
            ("TALLER_SWEEP_INTERVAL_SECONDS", "30"),
            ("TALLER_SWEEP_ENABLED", "false"),
            ("TALLER_CATALOG_PATH", "catalog.yaml"),
        ]));
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.database_path(), PathBuf::from("/tmp/taller.db"));
        assert_eq!(config.sla.sweep_interval_seconds, 30);
        assert!(!config.sla.sweep_enabled);
        assert_eq!(config.catalog.path, Some(PathBuf::from("catalog.yaml")));
    }

    #[test]
    fn test_unparsable_env_values_ignored() {
        let mut config = Config::default();
        config.apply_env_overrides(env(&[
            ("TALLER_SERVER_PORT", "eighty"),
            ("TALLER_SWEEP_INTERVAL_SECONDS", "-5"),
            ("TALLER_SWEEP_ENABLED", "maybe"),
        ]));
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.sla.sweep_interval_seconds, 60);
        assert!(config.sla.sweep_enabled);
    }
}
