//! Colored status lines on stderr and command results on stdout.

use clap::ValueEnum;
use console::{Style, Term};
use serde::Serialize;

use crate::error::CliError;

/// Encoding of command results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub(crate) enum Format {
    /// Human-readable lines.
    #[default]
    Text,
    /// Pretty-printed JSON.
    Json,
    /// YAML document.
    Yaml,
}

impl Format {
    /// Encode `value` for a structured format, `None` for text.
    pub(crate) fn encode<T: Serialize>(self, value: &T) -> Result<Option<String>, CliError> {
        match self {
            Self::Text => Ok(None),
            Self::Json => Ok(Some(serde_json::to_string_pretty(value)? + "\n")),
            Self::Yaml => Ok(Some(serde_yaml::to_string(value)?)),
        }
    }
}

/// Status messages go to stderr, styled by tone; results go to stdout.
pub(crate) struct Output {
    status: Term,
    results: Term,
    ok: Style,
    warn: Style,
    fail: Style,
    quiet: Style,
}

impl Output {
    #[must_use]
    pub(crate) fn new() -> Self {
        Self {
            status: Term::stderr(),
            results: Term::stdout(),
            ok: Style::new().green(),
            warn: Style::new().yellow(),
            fail: Style::new().red().bold(),
            quiet: Style::new().dim(),
        }
    }

    // A status line that can't be written is dropped.
    fn status_line(&self, style: Option<&Style>, msg: &str) {
        let line = match style {
            Some(style) => style.apply_to(msg).to_string(),
            None => msg.to_owned(),
        };
        self.status.write_line(&line).ok();
    }

    pub(crate) fn info(&self, msg: &str) {
        self.status_line(None, msg);
    }

    pub(crate) fn success(&self, msg: &str) {
        self.status_line(Some(&self.ok), msg);
    }

    pub(crate) fn warning(&self, msg: &str) {
        self.status_line(Some(&self.warn), msg);
    }

    pub(crate) fn error(&self, msg: &str) {
        self.status_line(Some(&self.fail), msg);
    }

    pub(crate) fn muted(&self, msg: &str) {
        self.status_line(Some(&self.quiet), msg);
    }

    /// One line of command output.
    pub(crate) fn result(&self, line: &str) -> Result<(), CliError> {
        Ok(self.results.write_line(line)?)
    }

    /// A whole encoded document, written as is.
    pub(crate) fn document(&self, text: &str) -> Result<(), CliError> {
        Ok(self.results.write_str(text)?)
    }
}
