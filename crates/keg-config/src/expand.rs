//! Substitution of `${VAR}`, `${VAR:-fallback}` and a leading `~` in
//! `kegs.toml` values.

use std::borrow::Cow;

use crate::ConfigError;

/// Name of a referenced variable that has no value in the environment.
struct Unset(String);

/// Replace every braced variable reference in `value`.
///
/// `$name` without braces is left alone so literal dollars in paths survive.
/// `field` names the config key in the error when a variable is unset.
pub(crate) fn expand_env(value: &str, field: &str) -> Result<String, ConfigError> {
    if !value.contains("${") {
        return Ok(value.to_owned());
    }

    let lookup = |name: &str| match std::env::var(name) {
        Ok(found) => Ok(Some(found)),
        Err(_) => Err(Unset(name.to_owned())),
    };
    shellexpand::env_with_context(value, lookup)
        .map(Cow::into_owned)
        .map_err(|e| ConfigError::EnvVar {
            field: field.to_owned(),
            message: format!("${{{}}} not set", e.cause.0),
        })
}

pub(crate) fn expand_tilde(value: &str) -> String {
    shellexpand::tilde(value).into_owned()
}
