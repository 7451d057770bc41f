use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// File name looked up under the Nuggit directory.
pub const CONFIG_FILE: &str = "nuggit.toml";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub nuggit_dir: PathBuf,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl ServerConfig {
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    9402
}
fn default_request_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    Sqlite,
    Inmemory,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct StorageConfig {
    #[serde(default)]
    pub kind: StorageKind,
    #[serde(default)]
    pub db_path: Option<PathBuf>,
}

impl Config {
    /// Defaults rooted at `nuggit_dir`.
    pub fn with_dir(nuggit_dir: &Path) -> Self {
        let mut config = Self {
            nuggit_dir: nuggit_dir.to_path_buf(),
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
        };
        config.apply_defaults(nuggit_dir);
        config
    }

    pub fn inmemory(mut self) -> Self {
        self.storage.kind = StorageKind::Inmemory;
        self
    }

    fn apply_defaults(&mut self, nuggit_dir: &Path) {
        if self.nuggit_dir.as_os_str().is_empty() {
            self.nuggit_dir = nuggit_dir.to_path_buf();
        }
        if self.storage.kind == StorageKind::Sqlite && self.storage.db_path.is_none() {
            self.storage.db_path = Some(self.nuggit_dir.join("nuggit.sqlite"));
        }
    }
}

/// The default Nuggit directory, `~/.nuggit`.
pub fn default_nuggit_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory; set NUGGIT_DIR")?;
    Ok(home.join(".nuggit"))
}

/// Load `<nuggit_dir>/nuggit.toml`, or defaults when it does not exist.
pub fn load_config(nuggit_dir: &Path) -> Result<Config> {
    let path = nuggit_dir.join(CONFIG_FILE);
    let mut config = if path.exists() {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str::<Config>(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?
    } else {
        Config::with_dir(nuggit_dir)
    };
    config.apply_defaults(nuggit_dir);
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.server.port == 0 {
        anyhow::bail!("server.port must be > 0");
    }
    if config.server.request_timeout_secs == 0 {
        anyhow::bail!("server.request_timeout_secs must be > 0");
    }
    if config.storage.kind == StorageKind::Sqlite && config.storage.db_path.is_none() {
        anyhow::bail!("storage.db_path is required when storage.kind is 'sqlite'");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(dir.path()).unwrap();
        assert_eq!(config.nuggit_dir, dir.path());
        assert_eq!(config.server.port, 9402);
        assert_eq!(config.storage.kind, StorageKind::Sqlite);
        assert_eq!(
            config.storage.db_path.as_deref(),
            Some(dir.path().join("nuggit.sqlite").as_path())
        );
    }

    #[test]
    fn test_parse_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "[server]\nport = 8080\nrequest_timeout_secs = 5\n\n[storage]\nkind = \"inmemory\"\n",
        )
        .unwrap();
        let config = load_config(dir.path()).unwrap();
        assert_eq!(config.server.bind(), "127.0.0.1:8080");
        assert_eq!(config.server.request_timeout_secs, 5);
        assert_eq!(config.storage.kind, StorageKind::Inmemory);
        assert!(config.storage.db_path.is_none());
    }

    #[test]
    fn test_invalid_port() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "[server]\nport = 0\n").unwrap();
        assert!(load_config(dir.path()).is_err());
    }

    #[test]
    fn test_unknown_storage_kind() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "[storage]\nkind = \"postgres\"\n").unwrap();
        assert!(load_config(dir.path()).is_err());
    }
}
