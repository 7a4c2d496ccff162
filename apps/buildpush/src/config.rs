//! Client configuration.
//!
//! Stored as TOML:
//! - Linux/macOS: `~/.config/buildpush/config.toml`
//! - Windows: `%APPDATA%/buildpush/config.toml`

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use buildpush_protocol::constants::{DEFAULT_API_BASE_URL, DEFAULT_MAX_CHUNK_GROUP};
use serde::{Deserialize, Serialize};

/// Environment variable that overrides every other API key source.
pub const API_KEY_ENV: &str = "BUILDPUSH_API_KEY";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Build service API root.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// API key. Prefer the identity file over storing it here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// File holding the API key.
    #[serde(default = "default_identity")]
    pub identity: String,

    /// Upload chunks (256 KiB each) grouped into one request.
    #[serde(default = "default_max_chunk_group")]
    pub max_chunk_group: usize,
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.into()
}

fn default_identity() -> String {
    "~/.config/buildpush/credentials".into()
}

fn default_max_chunk_group() -> usize {
    DEFAULT_MAX_CHUNK_GROUP
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            api_key: None,
            identity: default_identity(),
            max_chunk_group: default_max_chunk_group(),
        }
    }
}

impl Config {
    /// Loads the configuration at `path` (the default location when
    /// `None`), writing a default one first if the file is missing.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => config_path(),
        };

        if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("parsing {}", path.display()))?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save(&path)?;
            Ok(config)
        }
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        // May hold an API key.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    /// Resolves the API key: `BUILDPUSH_API_KEY`, then `api_key`, then the
    /// identity file.
    pub fn api_key(&self) -> anyhow::Result<String> {
        self.resolve_api_key(std::env::var(API_KEY_ENV).ok())
    }

    fn resolve_api_key(&self, from_env: Option<String>) -> anyhow::Result<String> {
        let inline = from_env
            .into_iter()
            .chain(self.api_key.clone())
            .map(|key| key.trim().to_string())
            .find(|key| !key.is_empty());
        if let Some(key) = inline {
            return Ok(key);
        }

        let identity = expand_home(&self.identity);
        let key = match std::fs::read_to_string(&identity) {
            Ok(content) => content.trim().to_string(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => {
                return Err(e).with_context(|| format!("reading {}", identity.display()));
            }
        };
        if key.is_empty() {
            bail!(
                "no API key: set {API_KEY_ENV}, api_key in the config, or write it to {}",
                identity.display()
            );
        }
        Ok(key)
    }
}

fn home_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    let home = std::env::var("USERPROFILE");
    #[cfg(not(target_os = "windows"))]
    let home = std::env::var("HOME");

    PathBuf::from(home.unwrap_or_else(|_| ".".into()))
}

fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => home_dir().join(rest),
        None => PathBuf::from(path),
    }
}

/// Returns the platform-specific configuration file path.
pub fn config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata).join("buildpush").join("config.toml")
    }

    #[cfg(not(target_os = "windows"))]
    {
        home_dir().join(".config").join("buildpush").join("config.toml")
    }
}
