use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Origin the app is served from; manifest paths resolve against it
  pub origin: String,
  pub cache: CacheConfig,
  pub network: NetworkConfig,
  /// SQLite file for the cache stores (defaults to the data directory)
  pub database: Option<PathBuf>,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: "http://localhost:8080".to_string(),
      cache: CacheConfig::default(),
      network: NetworkConfig::default(),
      database: None,
    }
  }
}

/// Version registry: everything the worker treats as deployment-specific.
///
/// Bumping either version tag is the only way to invalidate previously cached
/// responses: the next activation deletes every store not named by a current
/// tag.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CacheConfig {
  /// Store name for documents and API payloads
  pub dynamic_version: String,
  /// Store name for images, icons and fonts
  pub static_version: String,
  /// Root document served when a route is neither reachable nor cached
  pub app_shell: String,
  /// Paths warmed into the dynamic store on install, in order
  pub precache: Vec<String>,
  /// Path suffixes that mark a static asset (lowercase, leading dot)
  #[serde(deserialize_with = "deserialize_extension_set")]
  pub static_extensions: BTreeSet<String>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      dynamic_version: "kintai-dynamic-v1".to_string(),
      static_version: "kintai-static-v1".to_string(),
      app_shell: "/index.html".to_string(),
      precache: vec![
        "/".to_string(),
        "/index.html".to_string(),
        "/manifest.json".to_string(),
      ],
      static_extensions: [
        ".png", ".jpg", ".jpeg", ".gif", ".svg", ".ico", ".webp", ".woff", ".woff2",
      ]
      .into_iter()
      .map(String::from)
      .collect(),
    }
  }
}

impl CacheConfig {
  /// Whether a store name belongs to the current generation.
  pub fn is_current(&self, store: &str) -> bool {
    store == self.dynamic_version || store == self.static_version
  }

  /// Case-insensitive suffix match against the static extension set.
  pub fn is_static_path(&self, path: &str) -> bool {
    let path = path.to_lowercase();
    self
      .static_extensions
      .iter()
      .any(|ext| path.ends_with(ext.as_str()))
  }

  pub fn validate(&self) -> Result<()> {
    if self.dynamic_version.trim().is_empty() || self.static_version.trim().is_empty() {
      return Err(eyre!("cache version tags must not be empty"));
    }
    if self.dynamic_version == self.static_version {
      return Err(eyre!(
        "dynamic_version and static_version must differ (both are '{}')",
        self.dynamic_version
      ));
    }
    if self.precache.is_empty() {
      return Err(eyre!("precache must list at least the app shell"));
    }
    if !self.precache.contains(&self.app_shell) {
      return Err(eyre!(
        "app_shell '{}' must be listed in precache",
        self.app_shell
      ));
    }
    if self.static_extensions.iter().any(|ext| ext == ".") {
      return Err(eyre!("static_extensions must not contain empty entries"));
    }
    Ok(())
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
  /// Request timeout; unset leaves the HTTP client's defaults in place
  pub timeout_secs: Option<u64>,
}

impl NetworkConfig {
  pub fn timeout(&self) -> Option<Duration> {
    self.timeout_secs.map(Duration::from_secs)
  }
}

fn deserialize_extension_set<'de, D>(deserializer: D) -> Result<BTreeSet<String>, D::Error>
where
  D: serde::Deserializer<'de>,
{
  let v: Vec<String> = Vec::deserialize(deserializer)?;
  Ok(v.iter().map(|s| normalize_extension(s)).collect())
}

/// `PNG` and `.png` both become `.png`.
fn normalize_extension(ext: &str) -> String {
  let ext = ext.trim().to_lowercase();
  if ext.starts_with('.') {
    ext
  } else {
    format!(".{}", ext)
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./swcache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/swcache/config.yaml
  ///
  /// Built-in defaults are used when no file is found.
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
      None => {
        tracing::debug!("No configuration file found, using defaults");
        Ok(Self::default())
      }
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("swcache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("swcache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }

  /// Parsed origin. Must be an http(s) URL.
  pub fn origin_url(&self) -> Result<Url> {
    let url = Url::parse(&self.origin)
      .map_err(|e| eyre!("Invalid origin '{}': {}", self.origin, e))?;
    if !matches!(url.scheme(), "http" | "https") {
      return Err(eyre!("Origin '{}' must use http or https", self.origin));
    }
    Ok(url)
  }

  pub fn validate(&self) -> Result<()> {
    self.origin_url()?;
    self.cache.validate()
  }

  /// Database path, falling back to the per-user data directory.
  pub fn database_path(&self) -> Result<PathBuf> {
    match &self.database {
      Some(path) => Ok(path.clone()),
      None => crate::cache::SqliteStorage::default_path(),
    }
  }
}
