//! The process-wide bundle of storages and the alias resolver.
//!
//! A [`Backend`] is built once, either explicitly or from the environment
//! with [`Backend::detect`], and passed down to everything that needs storage.
//! It owns three process-scoped storages and a [`KegLoader`]:
//!
//! | storage    | filesystem backend   | other backends        |
//! |------------|----------------------|-----------------------|
//! | `config`   | user config dir      | `config/` under root  |
//! | `cache`    | user cache dir       | `cache/` under root   |
//! | `variable` | user state dir       | `state/` under root   |
//!
//! Keg aliases are resolved against a [`ResolvedConfig`]. The loader decides
//! which protocols the backend can serve and where each keg is rooted.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use keg_config::{Config, ConfigError, KegTarget, Protocol, ResolvedConfig};
use keg_storage::{MemoryStorage, Storage, StorageError};
use keg_storage_api::ApiStorage;
use keg_storage_fs::FsStorage;
use keg_storage_web::{AreaError, FileArea, KvStorage, StorageArea};

use crate::error::KegError;
use crate::keg::Keg;

/// Backend configuration document in the `config` storage.
pub const CONFIG_FILE: &str = "config.toml";

/// Namespace of every key the web backend stores.
const WEB_NAMESPACE: &str = "keg";

/// Why an alias could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoaderErrorReason {
    /// The alias is not in the keg table.
    #[error("alias not found")]
    AliasNotFound,
    /// The backend can't serve the keg's protocol.
    #[error("{backend} backend can't load {protocol} kegs")]
    UnsupportedProtocol {
        /// Protocol of the keg url.
        protocol: Protocol,
        /// Backend that was asked.
        backend: &'static str,
    },
    /// The keg's local root doesn't exist.
    #[error("keg root {} is unreachable", path.display())]
    Unreachable {
        /// Local root that was looked for.
        path: PathBuf,
    },
}

/// Failure to resolve a keg alias to a storage.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{reason}: {alias}")]
pub struct LoaderError {
    /// Alias that failed.
    pub alias: String,
    /// Why it failed.
    pub reason: LoaderErrorReason,
}

impl LoaderError {
    /// Error for `alias`.
    pub fn new(alias: impl Into<String>, reason: LoaderErrorReason) -> Self {
        Self {
            alias: alias.into(),
            reason,
        }
    }

    fn unsupported(alias: &str, target: &KegTarget, backend: &'static str) -> Self {
        Self::new(
            alias,
            LoaderErrorReason::UnsupportedProtocol {
                protocol: target.protocol,
                backend,
            },
        )
    }
}

/// Failure to turn an alias into a loaded [`Keg`].
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// The alias didn't resolve to a storage.
    #[error(transparent)]
    Loader(#[from] LoaderError),
    /// The storage didn't hold a loadable keg.
    #[error(transparent)]
    Keg(#[from] KegError),
}

/// Failure to construct a backend or read its configuration.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// `KEG_BACKEND` names no known backend.
    #[error("unknown KEG_BACKEND {0:?}, expected fs, memory, web or api")]
    UnknownBackend(String),
    /// The api backend was selected without a base url.
    #[error("KEG_API_URL must be set when KEG_BACKEND=api")]
    MissingApiUrl,
    /// No platform directories to keep config, cache and state in.
    #[error("could not determine user directories for keg")]
    NoUserDirs,
    /// The web backend's storage area failed to open.
    #[error("failed to open storage area: {0}")]
    Area(#[from] AreaError),
    /// Reading backend configuration failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// Backend configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Directories of the filesystem backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendDirs {
    /// Configuration (`config.toml`).
    pub config: PathBuf,
    /// Disposable caches.
    pub cache: PathBuf,
    /// Persistent state.
    pub state: PathBuf,
}

impl BackendDirs {
    /// Platform directories for keg, e.g. `~/.config/keg` on Linux.
    ///
    /// Returns `None` when no home directory can be determined.
    #[must_use]
    pub fn discover() -> Option<Self> {
        let dirs = directories::ProjectDirs::from("", "", "keg")?;
        let state = dirs
            .state_dir()
            .unwrap_or_else(|| dirs.data_local_dir())
            .to_path_buf();
        Some(Self {
            config: dirs.config_dir().to_path_buf(),
            cache: dirs.cache_dir().to_path_buf(),
            state,
        })
    }

    /// `config`, `cache` and `state` directories under `root`.
    #[must_use]
    pub fn under(root: &Path) -> Self {
        Self {
            config: root.join("config"),
            cache: root.join("cache"),
            state: root.join("state"),
        }
    }
}

/// Resolves one keg target to a storage rooted at the keg.
///
/// Each backend has its own loader. The loader is stateless apart from the
/// storage roots it was built with.
pub trait KegLoader: Send + Sync {
    /// Storage for the keg configured as `alias`.
    ///
    /// # Errors
    ///
    /// Returns [`LoaderError`] if the protocol isn't served by this backend
    /// or the keg root can't be reached.
    fn load(
        &self,
        alias: &str,
        target: &KegTarget,
        config: &ResolvedConfig,
    ) -> Result<Arc<dyn Storage>, LoaderError>;
}

/// Name a keg is stored under inside a shared `kegs` root.
fn keg_name<'a>(alias: &'a str, target: &'a KegTarget) -> &'a str {
    match target.protocol {
        Protocol::Memory | Protocol::Web if !target.name().is_empty() => target.name(),
        _ => alias,
    }
}

fn remote(target: &KegTarget, config: &ResolvedConfig) -> Arc<dyn Storage> {
    Arc::new(ApiStorage::with_timeout(&target.url, config.api.timeout))
}

/// Local directories and remote APIs.
#[derive(Debug)]
struct FsLoader;

impl KegLoader for FsLoader {
    fn load(
        &self,
        alias: &str,
        target: &KegTarget,
        config: &ResolvedConfig,
    ) -> Result<Arc<dyn Storage>, LoaderError> {
        if target.protocol.is_remote() {
            return Ok(remote(target, config));
        }
        let Some(path) = target.local_path() else {
            return Err(LoaderError::unsupported(alias, target, "Fs"));
        };
        if !path.is_dir() {
            return Err(LoaderError::new(
                alias,
                LoaderErrorReason::Unreachable { path },
            ));
        }
        Ok(Arc::new(FsStorage::new(path)))
    }
}

/// Subtrees of an in-process memory store.
struct MemoryLoader {
    kegs: Arc<dyn Storage>,
}

impl KegLoader for MemoryLoader {
    fn load(
        &self,
        alias: &str,
        target: &KegTarget,
        _config: &ResolvedConfig,
    ) -> Result<Arc<dyn Storage>, LoaderError> {
        match target.protocol {
            Protocol::Memory => Ok(self.kegs.child(keg_name(alias, target))),
            _ => Err(LoaderError::unsupported(alias, target, "Memory")),
        }
    }
}

/// Namespaces of a browser-local area, or remote APIs.
struct WebLoader {
    kegs: Arc<dyn Storage>,
}

impl KegLoader for WebLoader {
    fn load(
        &self,
        alias: &str,
        target: &KegTarget,
        config: &ResolvedConfig,
    ) -> Result<Arc<dyn Storage>, LoaderError> {
        match target.protocol {
            Protocol::Web => Ok(self.kegs.child(keg_name(alias, target))),
            Protocol::Http | Protocol::Https => Ok(remote(target, config)),
            _ => Err(LoaderError::unsupported(alias, target, "Web")),
        }
    }
}

/// Remote API: explicit urls, everything else under the server's `kegs/`.
struct ApiLoader {
    root: Arc<dyn Storage>,
}

impl KegLoader for ApiLoader {
    fn load(
        &self,
        alias: &str,
        target: &KegTarget,
        config: &ResolvedConfig,
    ) -> Result<Arc<dyn Storage>, LoaderError> {
        if target.protocol.is_remote() {
            return Ok(remote(target, config));
        }
        Ok(self
            .root
            .child(&format!("kegs/{}", keg_name(alias, target))))
    }
}

/// Storages of one runtime environment plus the alias resolver.
///
/// The shape is fixed at construction. Storages may be written through.
#[derive(Clone)]
pub struct Backend {
    config: Arc<dyn Storage>,
    cache: Arc<dyn Storage>,
    variable: Arc<dyn Storage>,
    loader: Arc<dyn KegLoader>,
    /// Base for relative paths in `config.toml`.
    config_dir: Option<PathBuf>,
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("config", &self.config.backend())
            .field("cache", &self.cache.backend())
            .field("variable", &self.variable.backend())
            .field("config_dir", &self.config_dir)
            .finish_non_exhaustive()
    }
}

impl Backend {
    /// Build a backend from its parts.
    pub fn new(
        config: Arc<dyn Storage>,
        cache: Arc<dyn Storage>,
        variable: Arc<dyn Storage>,
        loader: Arc<dyn KegLoader>,
    ) -> Self {
        Self {
            config,
            cache,
            variable,
            loader,
            config_dir: None,
        }
    }

    /// Local directories, with kegs on disk or behind remote APIs.
    #[must_use]
    pub fn filesystem(dirs: BackendDirs) -> Self {
        Self {
            config: Arc::new(FsStorage::new(&dirs.config)),
            cache: Arc::new(FsStorage::new(&dirs.cache)),
            variable: Arc::new(FsStorage::new(&dirs.state)),
            loader: Arc::new(FsLoader),
            config_dir: Some(dirs.config),
        }
    }

    /// A fresh in-process store.
    #[must_use]
    pub fn memory() -> Self {
        Self::memory_from(&MemoryStorage::new())
    }

    /// In-process backend over `root`. Kegs live under `kegs/<name>`.
    #[must_use]
    pub fn memory_from(root: &MemoryStorage) -> Self {
        let loader = MemoryLoader {
            kegs: root.child("kegs"),
        };
        Self::new(
            root.child("config"),
            root.child("cache"),
            root.child("state"),
            Arc::new(loader),
        )
    }

    /// Browser-local storage over `area`. Kegs live under `kegs/<name>`.
    #[must_use]
    pub fn web(area: Arc<dyn StorageArea>) -> Self {
        let root = KvStorage::new(area, WEB_NAMESPACE);
        let loader = WebLoader {
            kegs: root.child("kegs"),
        };
        Self::new(
            root.child("config"),
            root.child("cache"),
            root.child("state"),
            Arc::new(loader),
        )
    }

    /// Remote API at `base_url`.
    #[must_use]
    pub fn api(base_url: &str, timeout: std::time::Duration) -> Self {
        let root: Arc<dyn Storage> = Arc::new(ApiStorage::with_timeout(base_url, timeout));
        let loader = ApiLoader {
            root: Arc::clone(&root),
        };
        Self::new(
            root.child("config"),
            root.child("cache"),
            root.child("state"),
            Arc::new(loader),
        )
    }

    /// Backend selected by the environment.
    ///
    /// `KEG_BACKEND` is `fs` (default), `memory`, `web` (area file from
    /// `KEG_WEB_AREA`, defaulting to the state directory) or `api` (base url
    /// from `KEG_API_URL`).
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] for an unknown backend or missing settings.
    pub fn detect() -> Result<Self, BackendError> {
        Self::detect_with(|name| std::env::var(name).ok())
    }

    /// [`Backend::detect`] with an explicit variable lookup.
    pub fn detect_with(var: impl Fn(&str) -> Option<String>) -> Result<Self, BackendError> {
        let selected = var("KEG_BACKEND").unwrap_or_else(|| "fs".to_owned());
        tracing::debug!(backend = %selected, "Detecting backend");

        match selected.trim().to_ascii_lowercase().as_str() {
            "" | "fs" => Ok(Self::filesystem(
                BackendDirs::discover().ok_or(BackendError::NoUserDirs)?,
            )),
            "memory" => Ok(Self::memory()),
            "web" => {
                let path = match var("KEG_WEB_AREA") {
                    Some(path) => PathBuf::from(path),
                    None => BackendDirs::discover()
                        .ok_or(BackendError::NoUserDirs)?
                        .state
                        .join("web-area.json"),
                };
                Ok(Self::web(Arc::new(FileArea::open(path)?)))
            }
            "api" => {
                let url = var("KEG_API_URL").ok_or(BackendError::MissingApiUrl)?;
                Ok(Self::api(&url, keg_storage_api::DEFAULT_TIMEOUT))
            }
            _ => Err(BackendError::UnknownBackend(selected)),
        }
    }

    /// Process-scoped configuration storage.
    #[must_use]
    pub fn config(&self) -> &Arc<dyn Storage> {
        &self.config
    }

    /// Process-scoped cache storage.
    #[must_use]
    pub fn cache(&self) -> &Arc<dyn Storage> {
        &self.cache
    }

    /// Process-scoped state storage.
    #[must_use]
    pub fn variable(&self) -> &Arc<dyn Storage> {
        &self.variable
    }

    /// Read `config.toml` from the config storage.
    ///
    /// Returns `Ok(None)` when the backend has no configuration document.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the document can't be read or is invalid.
    pub fn load_config(&self) -> Result<Option<Config>, BackendError> {
        let Some(text) = self.config.read(CONFIG_FILE)? else {
            return Ok(None);
        };
        let base_dir = self.config_dir.as_deref().unwrap_or(Path::new("."));
        Ok(Some(Config::from_toml(&text, base_dir)?))
    }

    /// Resolve `alias` to the storage rooted at its keg.
    ///
    /// Failures are returned as-is and never retried.
    ///
    /// # Errors
    ///
    /// Returns [`LoaderError`] naming the alias if it isn't configured or
    /// can't be served by this backend.
    pub fn resolve(
        &self,
        alias: &str,
        config: &ResolvedConfig,
    ) -> Result<Arc<dyn Storage>, LoaderError> {
        let target = config
            .get(alias)
            .ok_or_else(|| LoaderError::new(alias, LoaderErrorReason::AliasNotFound))?;
        let storage = self.loader.load(alias, target, config)?;
        tracing::debug!(
            alias,
            url = %target.url,
            protocol = %target.protocol,
            backend = storage.backend(),
            "Resolved keg"
        );
        Ok(storage)
    }

    /// Resolve `alias` and load its keg.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError`] if resolution or loading fails.
    pub fn load_keg(&self, alias: &str, config: &ResolvedConfig) -> Result<Keg, ResolveError> {
        let storage = self.resolve(alias, config)?;
        Ok(Keg::from_storage(storage)?)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use keg_storage_web::MemoryArea;
    use pretty_assertions::assert_eq;

    use super::*;

    static_assertions::assert_impl_all!(Backend: Send, Sync);

    const MANIFEST: &str = "title: t\ncreator: c\nurl: u\n";

    #[test]
    fn test_alias_not_found_names_alias() {
        let backend = Backend::memory();

        let err = backend
            .resolve("missing-alias", &ResolvedConfig::default())
            .err().unwrap();

        assert_eq!(err.alias, "missing-alias");
        assert_eq!(err.reason, LoaderErrorReason::AliasNotFound);
        assert_eq!(err.to_string(), "alias not found: missing-alias");
    }

    #[test]
    fn test_memory_backend_roots_kegs_under_kegs() {
        let root = MemoryStorage::new().with_file("kegs/scratch/keg", MANIFEST);
        let backend = Backend::memory_from(&root);
        let config = ResolvedConfig::default().with_keg("s", KegTarget::new("memory:scratch"));

        let keg = backend.load_keg("s", &config).unwrap();

        assert_eq!(keg.keg_file().title, "t");
    }

    #[test]
    fn test_memory_backend_rejects_file_kegs() {
        let backend = Backend::memory();
        let config = ResolvedConfig::default().with_keg("notes", KegTarget::new("/srv/notes"));

        let err = backend.resolve("notes", &config).err().unwrap();

        assert!(matches!(
            err.reason,
            LoaderErrorReason::UnsupportedProtocol {
                protocol: Protocol::File,
                backend: "Memory",
            }
        ));
    }

    #[test]
    fn test_web_backend_namespaces_kegs() {
        let area = Arc::new(MemoryArea::new());
        let backend = Backend::web(Arc::clone(&area) as Arc<dyn StorageArea>);
        let config = ResolvedConfig::default().with_keg("n", KegTarget::new("web:notes"));

        backend.resolve("n", &config).unwrap().write("keg", MANIFEST).unwrap();

        assert_eq!(area.keys().unwrap(), vec!["keg/kegs/notes/keg"]);
        assert!(backend.load_keg("n", &config).is_ok());
    }

    #[test]
    fn test_web_backend_serves_remote_kegs() {
        let backend = Backend::web(Arc::new(MemoryArea::new()));
        let config = ResolvedConfig::default()
            .with_keg("pub", KegTarget::new("https://keg.example.com/api/pub"));

        let storage = backend.resolve("pub", &config).unwrap();

        assert_eq!(storage.backend(), "Api");
    }

    #[test]
    fn test_filesystem_backend_loads_local_keg() {
        let temp_dir = tempfile::tempdir().unwrap();
        let keg_dir = temp_dir.path().join("notes");
        std::fs::create_dir_all(&keg_dir).unwrap();
        std::fs::write(keg_dir.join("keg"), MANIFEST).unwrap();
        let backend = Backend::filesystem(BackendDirs::under(temp_dir.path()));
        let config = ResolvedConfig::default()
            .with_keg("notes", KegTarget::new(keg_dir.to_string_lossy()));

        let keg = backend.load_keg("notes", &config).unwrap();

        assert_eq!(keg.storage().backend(), "Fs");
    }

    #[test]
    fn test_filesystem_backend_missing_root_is_unreachable() {
        let temp_dir = tempfile::tempdir().unwrap();
        let missing = temp_dir.path().join("gone");
        let backend = Backend::filesystem(BackendDirs::under(temp_dir.path()));
        let config =
            ResolvedConfig::default().with_keg("gone", KegTarget::new(missing.to_string_lossy()));

        let err = backend.resolve("gone", &config).err().unwrap();

        assert_eq!(err.reason, LoaderErrorReason::Unreachable { path: missing });
    }

    #[test]
    fn test_filesystem_backend_rejects_memory_kegs() {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = Backend::filesystem(BackendDirs::under(temp_dir.path()));
        let config = ResolvedConfig::default().with_keg("m", KegTarget::new("memory:m"));

        let err = backend.resolve("m", &config).err().unwrap();

        assert!(matches!(err.reason, LoaderErrorReason::UnsupportedProtocol { .. }));
    }

    #[test]
    fn test_load_config_from_config_storage() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dirs = BackendDirs::under(temp_dir.path());
        std::fs::create_dir_all(&dirs.config).unwrap();
        std::fs::write(
            dirs.config.join(CONFIG_FILE),
            "default_keg = \"notes\"\n[kegs.notes]\nurl = \"notes\"\n",
        )
        .unwrap();
        let backend = Backend::filesystem(dirs.clone());

        let config = backend.load_config().unwrap().unwrap();

        assert_eq!(
            config.resolved.get("notes").unwrap().local_path(),
            Some(dirs.config.join("notes"))
        );
    }

    #[test]
    fn test_load_config_absent() {
        assert!(Backend::memory().load_config().unwrap().is_none());
    }

    fn env(pairs: &'static [(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
        move |name| {
            pairs
                .iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| (*value).to_owned())
        }
    }

    #[test]
    fn test_detect_memory_and_errors() {
        let backend = Backend::detect_with(env(&[("KEG_BACKEND", "memory")])).unwrap();
        assert_eq!(backend.config().backend(), "Memory");

        let err = Backend::detect_with(env(&[("KEG_BACKEND", "api")])).unwrap_err();
        assert!(matches!(err, BackendError::MissingApiUrl));

        let err = Backend::detect_with(env(&[("KEG_BACKEND", "ftp")])).unwrap_err();
        assert!(matches!(err, BackendError::UnknownBackend(ref name) if name == "ftp"));

        let backend = Backend::detect_with(env(&[
            ("KEG_BACKEND", "api"),
            ("KEG_API_URL", "http://127.0.0.1:9/api"),
        ]))
        .unwrap();
        assert_eq!(backend.cache().backend(), "Api");
    }

    #[test]
    fn test_api_backend_scopes_non_remote_kegs() {
        let backend = Backend::api("http://127.0.0.1:9/api", Duration::from_millis(50));
        let config = ResolvedConfig::default().with_keg("n", KegTarget::new("notes"));

        let storage = backend.resolve("n", &config).unwrap();

        assert_eq!(storage.backend(), "Api");
    }

    #[test]
    fn test_detect_web_uses_area_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let area_path = temp_dir.path().join("area.json");
        let area = area_path.to_string_lossy().into_owned();

        let backend = Backend::detect_with(|name| match name {
            "KEG_BACKEND" => Some("web".to_owned()),
            "KEG_WEB_AREA" => Some(area.clone()),
            _ => None,
        })
        .unwrap();
        backend.variable().write("last", "1").unwrap();

        assert!(area_path.exists());
    }
}
