//! Configuration management for keg.
//!
//! Parses `kegs.toml` files with serde and resolves them into a
//! [`ResolvedConfig`]: a table of keg aliases, each mapped to a url and the
//! protocol used to reach it.
//!
//! ```toml
//! default_keg = "notes"
//!
//! [kegs.notes]
//! url = "~/notes"
//!
//! [kegs.pub]
//! url = "https://keg.example.com/api/pub"
//!
//! [kegs.scratch]
//! url = "memory:scratch"
//!
//! [api]
//! timeout_secs = 30
//! ```
//!
//! ## Environment Variable Expansion
//!
//! String configuration values support environment variable expansion:
//!
//! - `${VAR}` - expands to the value of VAR, errors if unset
//! - `${VAR:-default}` - expands to VAR if set, otherwise uses default
//!
//! Expanded fields:
//! - `default_keg`
//! - `kegs.<alias>.url`
//!
//! Local paths additionally expand a leading `~` and are resolved against
//! the directory of the config file.

mod expand;

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration filename to search for.
pub const CONFIG_FILENAME: &str = "kegs.toml";

/// Default timeout for the remote API backend, in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// How a keg's url is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Local directory (`file://` or a bare path).
    File,
    /// Remote API over `http://`.
    Http,
    /// Remote API over `https://`.
    Https,
    /// In-process memory subtree (`memory:<name>`).
    Memory,
    /// Browser-local storage namespace (`web:<name>`).
    Web,
}

impl Protocol {
    const SCHEMES: [(&'static str, Self); 5] = [
        ("file://", Self::File),
        ("http://", Self::Http),
        ("https://", Self::Https),
        ("memory:", Self::Memory),
        ("web:", Self::Web),
    ];

    /// Protocol named by the url's scheme, or `None` when the url has no
    /// recognised scheme.
    #[must_use]
    pub fn from_url(url: &str) -> Option<Self> {
        Self::SCHEMES
            .iter()
            .find(|(prefix, _)| url.starts_with(prefix))
            .map(|(_, protocol)| *protocol)
    }

    /// Whether the keg is served by a remote API.
    #[must_use]
    pub fn is_remote(self) -> bool {
        matches!(self, Self::Http | Self::Https)
    }

    fn scheme_prefix(self) -> &'static str {
        match self {
            Self::File => "file://",
            Self::Http => "http://",
            Self::Https => "https://",
            Self::Memory => "memory:",
            Self::Web => "web:",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::File => "file",
            Self::Http => "http",
            Self::Https => "https",
            Self::Memory => "memory",
            Self::Web => "web",
        };
        f.write_str(name)
    }
}

/// A resolved keg location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KegTarget {
    /// Absolute path for [`Protocol::File`], the configured url otherwise.
    pub url: String,
    /// How the url is reached.
    pub protocol: Protocol,
}

impl KegTarget {
    /// Target for `url`, with the protocol inferred from its scheme.
    ///
    /// A url without a recognised scheme is a local path.
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        let protocol = Protocol::from_url(&url).unwrap_or(Protocol::File);
        Self { url, protocol }
    }

    /// Local directory of a [`Protocol::File`] target.
    #[must_use]
    pub fn local_path(&self) -> Option<PathBuf> {
        (self.protocol == Protocol::File).then(|| {
            PathBuf::from(self.url.strip_prefix("file://").unwrap_or(&self.url))
        })
    }

    /// The url with its scheme removed, e.g. `scratch` for `memory:scratch`.
    #[must_use]
    pub fn name(&self) -> &str {
        self.url
            .strip_prefix(self.protocol.scheme_prefix())
            .unwrap_or(&self.url)
            .trim_matches('/')
    }
}

/// Settings of the remote API backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiSettings {
    /// Upper bound on every request.
    pub timeout: Duration,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

/// The configuration record consumed by backend resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedConfig {
    /// Alias to keg location.
    pub kegs: BTreeMap<String, KegTarget>,
    /// Alias used when none is given.
    pub default_keg: Option<String>,
    /// Remote API settings.
    pub api: ApiSettings,
}

impl ResolvedConfig {
    /// Location configured for `alias`.
    #[must_use]
    pub fn get(&self, alias: &str) -> Option<&KegTarget> {
        self.kegs.get(alias)
    }

    /// Configured aliases in sorted order.
    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.kegs.keys().map(String::as_str)
    }

    /// Add or replace the keg configured under `alias`.
    #[must_use]
    pub fn with_keg(mut self, alias: impl Into<String>, target: KegTarget) -> Self {
        self.kegs.insert(alias.into(), target);
        self
    }
}

/// Raw keg entry as parsed from TOML.
#[derive(Debug, Deserialize)]
struct KegEntryRaw {
    url: String,
    protocol: Option<Protocol>,
}

/// Raw API configuration as parsed from TOML.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ApiConfigRaw {
    timeout_secs: Option<u64>,
}

/// Application configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Alias used when none is given on the command line.
    pub default_keg: Option<String>,
    /// Keg table (urls are unexpanded strings from TOML).
    kegs: BTreeMap<String, KegEntryRaw>,
    /// API configuration.
    api: ApiConfigRaw,

    /// Resolved configuration (set after loading).
    #[serde(skip)]
    pub resolved: ResolvedConfig,
    /// Path to the config file (set after loading).
    #[serde(skip)]
    pub config_path: Option<PathBuf>,
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File not found.
    #[error("Configuration file not found: {}", .0.display())]
    NotFound(PathBuf),
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// TOML parsing error.
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),
    /// Validation error.
    #[error("Configuration error: {0}")]
    Validation(String),
    /// Environment variable error during expansion.
    #[error("Environment variable error in {field}: {message}")]
    EnvVar {
        /// Config field path (e.g., "`kegs.pub.url`").
        field: String,
        /// Error message (e.g., "${`KEG_HOST`} not set").
        message: String,
    },
}

/// Require a string field to be non-empty.
fn require_non_empty(value: &str, field: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::Validation(format!("{field} cannot be empty")));
    }
    Ok(())
}

/// Reject `<scheme>://` urls whose scheme no protocol handles.
fn require_known_scheme(url: &str, field: &str) -> Result<(), ConfigError> {
    if Protocol::from_url(url).is_some() {
        return Ok(());
    }
    if let Some((scheme, _)) = url.split_once("://")
        && !scheme.is_empty()
        && scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
    {
        return Err(ConfigError::Validation(format!(
            "{field} has unsupported scheme {scheme}://"
        )));
    }
    Ok(())
}

impl Config {
    /// Load configuration from file.
    ///
    /// If `config_path` is provided, loads from that file. Otherwise searches
    /// for `kegs.toml` in the current directory and its parents, then in the
    /// user config directory. Falls back to an empty configuration.
    ///
    /// # Errors
    ///
    /// Returns error if explicit `config_path` doesn't exist or loading fails.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = config_path {
            if !path.exists() {
                return Err(ConfigError::NotFound(path.to_path_buf()));
            }
            return Self::load_from_file(path);
        }

        match Self::discover_config().or_else(Self::user_config) {
            Some(discovered) => Self::load_from_file(&discovered),
            None => {
                tracing::debug!("No {CONFIG_FILENAME} found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Parse a configuration document.
    ///
    /// Relative local paths are resolved against `base_dir`.
    ///
    /// # Errors
    ///
    /// Returns error if the document doesn't parse, references an unset
    /// environment variable, or fails validation.
    pub fn from_toml(text: &str, base_dir: &Path) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(text)?;

        // Expand environment variables before path resolution
        config.expand_env_vars()?;
        config.resolve(base_dir)?;
        config.validate()?;

        Ok(config)
    }

    /// Search for config file in current directory and parents.
    fn discover_config() -> Option<PathBuf> {
        let mut current = std::env::current_dir().ok()?;
        loop {
            let candidate = current.join(CONFIG_FILENAME);
            if candidate.exists() {
                return Some(candidate);
            }
            if !current.pop() {
                return None;
            }
        }
    }

    /// Config file in the platform's user config directory, if present.
    fn user_config() -> Option<PathBuf> {
        let dirs = directories::ProjectDirs::from("", "", "keg")?;
        let candidate = dirs.config_dir().join(CONFIG_FILENAME);
        candidate.exists().then_some(candidate)
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config_dir = path.parent().unwrap_or(Path::new("."));
        let mut config = Self::from_toml(&content, config_dir)?;
        config.config_path = Some(path.to_path_buf());
        tracing::debug!(
            path = %path.display(),
            kegs = config.resolved.kegs.len(),
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// Called automatically after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Validation` if any validation fails.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(alias) = &self.resolved.default_keg
            && !self.resolved.kegs.contains_key(alias)
        {
            return Err(ConfigError::Validation(format!(
                "default_keg {alias:?} is not a configured keg"
            )));
        }

        if self.resolved.api.timeout.is_zero() {
            return Err(ConfigError::Validation(
                "api.timeout_secs must be greater than 0".to_owned(),
            ));
        }

        Ok(())
    }

    /// Expand environment variable references in configuration strings.
    fn expand_env_vars(&mut self) -> Result<(), ConfigError> {
        if let Some(ref alias) = self.default_keg {
            self.default_keg = Some(expand::expand_env(alias, "default_keg")?);
        }

        for (alias, entry) in &mut self.kegs {
            entry.url = expand::expand_env(&entry.url, &format!("kegs.{alias}.url"))?;
        }

        Ok(())
    }

    /// Resolve raw keg entries into targets.
    fn resolve(&mut self, config_dir: &Path) -> Result<(), ConfigError> {
        let kegs = self
            .kegs
            .iter()
            .map(|(alias, entry)| {
                resolve_target(alias, entry, config_dir).map(|target| (alias.clone(), target))
            })
            .collect::<Result<BTreeMap<_, _>, _>>()?;

        self.resolved = ResolvedConfig {
            kegs,
            default_keg: self.default_keg.clone(),
            api: ApiSettings {
                timeout: Duration::from_secs(
                    self.api.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
                ),
            },
        };

        Ok(())
    }
}

/// Resolve one keg entry.
///
/// An explicit protocol must agree with the url's scheme. A url without a
/// scheme takes the explicit protocol, or is a local path.
fn resolve_target(
    alias: &str,
    entry: &KegEntryRaw,
    config_dir: &Path,
) -> Result<KegTarget, ConfigError> {
    let field = format!("kegs.{alias}.url");
    require_non_empty(&entry.url, &field)?;
    require_known_scheme(&entry.url, &field)?;

    let protocol = match (entry.protocol, Protocol::from_url(&entry.url)) {
        (Some(explicit), Some(inferred)) if explicit != inferred => {
            return Err(ConfigError::Validation(format!(
                "kegs.{alias}.protocol is {explicit} but the url scheme is {inferred}"
            )));
        }
        (Some(protocol), _) | (None, Some(protocol)) => protocol,
        (None, None) => Protocol::File,
    };

    let url = match protocol {
        Protocol::File => {
            let raw = entry.url.strip_prefix("file://").unwrap_or(&entry.url);
            let path = PathBuf::from(expand::expand_tilde(raw));
            let path = if path.is_absolute() {
                path
            } else {
                config_dir.join(path)
            };
            path.to_string_lossy().into_owned()
        }
        _ => entry.url.clone(),
    };

    Ok(KegTarget { url, protocol })
}
