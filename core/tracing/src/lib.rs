// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Diagnostic logging for the trustbundle CLI.
//!
//! Logs always go to stderr; stdout is reserved for command output so that
//! `--json` stays machine-readable.

use std::io::IsTerminal;
use std::str::FromStr;

use serde::Deserialize;
use tracing::Level;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const FALLBACK_LEVEL: Level = Level::INFO;

/// Line layout of stderr log events.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Single line, fields inline.
    #[default]
    Compact,
    /// tracing-subscriber's default layout, with span context.
    Full,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct TracingConfiguration {
    log_level: String,
    filter: String,
    format: LogFormat,
    display_thread_names: bool,
    display_thread_ids: bool,
    display_target: bool,
    /// `None` colours output only when stderr is a terminal.
    ansi: Option<bool>,
}

impl Default for TracingConfiguration {
    fn default() -> Self {
        TracingConfiguration {
            log_level: "info".to_string(),
            filter: "info".to_string(),
            format: LogFormat::default(),
            display_thread_names: true,
            display_thread_ids: false,
            display_target: false,
            ansi: None,
        }
    }
}

/// Unknown level names fall back to info.
fn parse_level(level: &str) -> Level {
    Level::from_str(level.trim()).unwrap_or(FALLBACK_LEVEL)
}

// RUST_LOG wins over the configured directives
fn env_filter(directives: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(directives))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

impl TracingConfiguration {
    pub fn with_log_level(self, log_level: String) -> Self {
        TracingConfiguration { log_level, ..self }
    }

    pub fn with_filter(self, filter: String) -> Self {
        TracingConfiguration { filter, ..self }
    }

    pub fn with_format(self, format: LogFormat) -> Self {
        TracingConfiguration { format, ..self }
    }

    pub fn with_display_thread_names(self, display_thread_names: bool) -> Self {
        TracingConfiguration {
            display_thread_names,
            ..self
        }
    }

    pub fn with_display_thread_ids(self, display_thread_ids: bool) -> Self {
        TracingConfiguration {
            display_thread_ids,
            ..self
        }
    }

    pub fn with_display_target(self, display_target: bool) -> Self {
        TracingConfiguration {
            display_target,
            ..self
        }
    }

    pub fn with_ansi(self, ansi: bool) -> Self {
        TracingConfiguration {
            ansi: Some(ansi),
            ..self
        }
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn level(&self) -> Level {
        parse_level(&self.log_level)
    }

    pub fn filter(&self) -> &str {
        &self.filter
    }

    pub fn format(&self) -> LogFormat {
        self.format
    }

    pub fn display_thread_names(&self) -> bool {
        self.display_thread_names
    }

    pub fn display_thread_ids(&self) -> bool {
        self.display_thread_ids
    }

    pub fn display_target(&self) -> bool {
        self.display_target
    }

    fn use_ansi(&self) -> bool {
        self.ansi.unwrap_or_else(|| std::io::stderr().is_terminal())
    }

    /// Install the global stderr subscriber. A second call is a no-op.
    pub fn setup_tracing_subscriber(&self) {
        let layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(self.use_ansi())
            .with_target(self.display_target)
            .with_thread_names(self.display_thread_names)
            .with_thread_ids(self.display_thread_ids);
        let layer = match self.format {
            LogFormat::Compact => layer.compact().boxed(),
            LogFormat::Full => layer.boxed(),
        };

        let _ = tracing_subscriber::registry()
            .with(layer)
            .with(env_filter(&self.filter))
            .with(LevelFilter::from_level(self.level()))
            .try_init();
    }
}
