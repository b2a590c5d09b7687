use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub backend: BackendConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub log: LogConfig,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
  /// Durable SQLite store on this device
  #[default]
  Local,
  /// Hosted database reached over REST
  Remote,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BackendConfig {
  #[serde(default)]
  pub kind: BackendKind,
  /// Database file for the local backend (defaults to the data directory)
  pub path: Option<PathBuf>,
  /// Project URL of the hosted database, required for the remote backend
  pub url: Option<String>,
  /// Request timeout for the remote backend; none by default
  pub timeout_secs: Option<u64>,
}

impl BackendConfig {
  pub fn timeout(&self) -> Option<Duration> {
    self.timeout_secs.map(Duration::from_secs)
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Origin the precache manifest and relative fetches resolve against
  #[serde(default = "default_origin")]
  pub origin: String,
  /// Name of the current cache generation; bump it on every deployment
  #[serde(default = "default_generation")]
  pub generation: String,
  /// Shell resources stored on install
  #[serde(default = "default_precache")]
  pub precache: Vec<String>,
  /// Network timeout before falling back to the cache
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      origin: default_origin(),
      generation: default_generation(),
      precache: default_precache(),
      timeout_secs: default_timeout_secs(),
    }
  }
}

impl CacheConfig {
  pub fn origin_url(&self) -> Result<Url> {
    Url::parse(&self.origin).map_err(|e| eyre!("Invalid cache origin {}: {}", self.origin, e))
  }

  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }
}

fn default_origin() -> String {
  "http://localhost:3000".to_string()
}

fn default_generation() -> String {
  "airport-announcements-v2".to_string()
}

fn default_precache() -> Vec<String> {
  vec![
    "/".to_string(),
    "/manifest.webmanifest".to_string(),
    "/icon.svg".to_string(),
  ]
}

fn default_timeout_secs() -> u64 {
  10
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogConfig {
  /// Directory for log files (defaults to the data directory)
  pub directory: Option<PathBuf>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./gatecall.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/gatecall/config.yaml
  ///
  /// Without any file the defaults apply (local backend, stock precache).
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("gatecall.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("gatecall").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;

    if config.backend.kind == BackendKind::Remote && config.backend.url.is_none() {
      return Err(eyre!("backend.url is required for the remote backend"));
    }
    config.cache.origin_url()?;

    Ok(config)
  }

  /// Get the hosted database API key from environment variables.
  ///
  /// Checks GATECALL_API_KEY first, then SUPABASE_ANON_KEY as fallback.
  pub fn get_api_key() -> Result<String> {
    std::env::var("GATECALL_API_KEY")
      .or_else(|_| std::env::var("SUPABASE_ANON_KEY"))
      .map_err(|_| {
        eyre!("Database API key not found. Set GATECALL_API_KEY or SUPABASE_ANON_KEY environment variable.")
      })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_empty_config_uses_defaults() {
    let config = Config::parse("{}").unwrap();
    assert_eq!(config.backend.kind, BackendKind::Local);
    assert_eq!(config.cache.generation, "airport-announcements-v2");
    assert_eq!(
      config.cache.precache,
      vec!["/", "/manifest.webmanifest", "/icon.svg"]
    );
    assert_eq!(config.cache.timeout(), Duration::from_secs(10));
    assert!(config.backend.timeout().is_none());
  }

  #[test]
  fn test_remote_config() {
    let config = Config::parse(
      r#"
backend:
  kind: remote
  url: https://project.supabase.co
  timeout_secs: 5
cache:
  origin: https://gate.example
  generation: airport-announcements-v3
log:
  directory: /var/log/gatecall
"#,
    )
    .unwrap();

    assert_eq!(config.backend.kind, BackendKind::Remote);
    assert_eq!(config.backend.url.as_deref(), Some("https://project.supabase.co"));
    assert_eq!(config.backend.timeout(), Some(Duration::from_secs(5)));
    assert_eq!(config.cache.origin_url().unwrap().as_str(), "https://gate.example/");
    assert_eq!(config.cache.generation, "airport-announcements-v3");
    assert_eq!(config.cache.precache.len(), 3);
    assert_eq!(config.log.directory, Some(PathBuf::from("/var/log/gatecall")));
  }

  #[test]
  fn test_remote_without_url_rejected() {
    assert!(Config::parse("backend:\n  kind: remote\n").is_err());
  }

  #[test]
  fn test_invalid_origin_rejected() {
    assert!(Config::parse("cache:\n  origin: not a url\n").is_err());
  }
}
