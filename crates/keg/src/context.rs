//! Backend and keg configuration shared by every command.

use std::path::Path;

use keg_config::{Config, KegTarget, ResolvedConfig};
use keg_core::Backend;
use keg_storage_fs::find_nearest_keg_root;

use crate::error::CliError;

/// Alias given to the keg found around the working directory when its
/// directory name is already taken.
const CWD_ALIAS: &str = ".";

/// What a command runs against.
pub(crate) struct Context {
    pub(crate) backend: Backend,
    pub(crate) config: ResolvedConfig,
}

impl Context {
    /// Detect the backend and load configuration.
    ///
    /// An explicit `config_path` wins. Otherwise a discovered `kegs.toml` is
    /// used, then the backend's own `config.toml`, then an empty configuration.
    pub(crate) fn load(config_path: Option<&Path>) -> Result<Self, CliError> {
        let backend = Backend::detect()?;
        let config = match config_path {
            Some(path) => Config::load(Some(path))?,
            None => {
                let discovered = Config::load(None)?;
                if discovered.config_path.is_some() {
                    discovered
                } else {
                    backend.load_config()?.unwrap_or(discovered)
                }
            }
        };
        tracing::debug!(
            path = ?config.config_path,
            kegs = config.resolved.kegs.len(),
            backend = ?backend,
            "Loaded configuration"
        );
        Ok(Self {
            backend,
            config: config.resolved,
        })
    }

    /// `requested` aliases, or the default alias when none were given.
    pub(crate) fn aliases(&mut self, requested: &[String]) -> Result<Vec<String>, CliError> {
        if !requested.is_empty() {
            return Ok(requested.to_vec());
        }
        Ok(vec![self.default_alias()?])
    }

    /// `requested` alias, or the default alias.
    pub(crate) fn alias(&mut self, requested: Option<String>) -> Result<String, CliError> {
        match requested {
            Some(alias) => Ok(alias),
            None => self.default_alias(),
        }
    }

    fn default_alias(&mut self) -> Result<String, CliError> {
        let cwd = std::env::current_dir()?;
        self.default_alias_from(&cwd)
    }

    /// `default_keg`, else the nearest keg root above `cwd`, registered
    /// under its directory name.
    fn default_alias_from(&mut self, cwd: &Path) -> Result<String, CliError> {
        if let Some(alias) = &self.config.default_keg {
            return Ok(alias.clone());
        }

        let root = find_nearest_keg_root(cwd).ok_or_else(|| {
            CliError::Validation(
                "no keg given: pass --keg, set default_keg in kegs.toml, or run inside a keg"
                    .to_owned(),
            )
        })?;
        let alias = root
            .file_name()
            .and_then(|name| name.to_str())
            .filter(|name| self.config.get(name).is_none())
            .unwrap_or(CWD_ALIAS)
            .to_owned();

        tracing::debug!(alias = %alias, root = %root.display(), "Using keg around working directory");
        self.config = std::mem::take(&mut self.config)
            .with_keg(alias.clone(), KegTarget::new(root.to_string_lossy()));
        Ok(alias)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn context(config: ResolvedConfig) -> Context {
        Context {
            backend: Backend::memory(),
            config,
        }
    }

    #[test]
    fn test_explicit_aliases_win() {
        let mut ctx = context(ResolvedConfig {
            default_keg: Some("notes".to_owned()),
            ..ResolvedConfig::default()
        });

        let aliases = ctx.aliases(&["a".to_owned(), "b".to_owned()]).unwrap();

        assert_eq!(aliases, vec!["a", "b"]);
    }

    #[test]
    fn test_default_keg_used_when_no_alias() {
        let mut ctx = context(ResolvedConfig {
            default_keg: Some("notes".to_owned()),
            ..ResolvedConfig::default()
        });

        assert_eq!(ctx.alias(None).unwrap(), "notes");
    }

    #[test]
    fn test_nearest_keg_root_registered() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path().join("field");
        let nested = root.join("12");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(root.join("keg"), "title: t\ncreator: c\nurl: u\n").unwrap();
        let mut ctx = context(ResolvedConfig::default());

        let alias = ctx.default_alias_from(&nested).unwrap();

        assert_eq!(alias, "field");
        assert_eq!(ctx.config.get("field").unwrap().local_path(), Some(root));
    }

    #[test]
    fn test_nearest_keg_root_avoids_taken_alias() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path().join("field");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("keg"), "title: t\ncreator: c\nurl: u\n").unwrap();
        let mut ctx = context(
            ResolvedConfig::default().with_keg("field", KegTarget::new("memory:field")),
        );

        let alias = ctx.default_alias_from(&root).unwrap();

        assert_eq!(alias, CWD_ALIAS);
    }

    #[test]
    fn test_no_keg_anywhere() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut ctx = context(ResolvedConfig::default());

        let err = ctx.default_alias_from(temp_dir.path()).unwrap_err();

        assert!(matches!(err, CliError::Validation(_)));
    }
}
