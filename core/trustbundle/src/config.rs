// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0
//
// ConfigLoader reads the optional configuration file once and exposes lazy,
// cached accessors for the tracing and store sections. A broken tracing
// section falls back to defaults; a broken store section is an error.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use lazy_static::lazy_static;
use serde_yaml::{Mapping, Value, from_str};
use thiserror::Error;
use tracing::{debug, warn};

use trustbundle_certstore::StoreConfig;
use trustbundle_tracing::TracingConfiguration;

/// Directory under the user's home used when no store root is given.
pub const DEFAULT_HOME_DIR: &str = ".trustbundle";

#[derive(Error, Debug)]
pub enum ConfigError {
    // File / I/O
    #[error("not found: {0}")]
    NotFound(String),

    // Parsing / structural validity
    #[error("invalid configuration - impossible to parse yaml")]
    InvalidYaml,
    #[error("invalid configuration - key {0} not valid")]
    InvalidKey(String),
    #[error("invalid configuration - {0}")]
    Invalid(String),

    // YAML decoding (typed propagation)
    #[error("yaml parse error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    // Store location
    #[error("cannot determine the home directory, use --home or TRUSTBUNDLE_HOME")]
    NoHome,
}

lazy_static! {
    static ref CONFIG_KEYS: HashSet<&'static str> = {
        let mut s = HashSet::new();
        s.insert("tracing");
        s.insert("store");
        s
    };
}

pub struct ConfigLoader {
    root: Value,
    tracing: Option<TracingConfiguration>,
    store: Option<StoreConfig>,
}

impl std::fmt::Debug for ConfigLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let root_keys = self
            .root
            .as_mapping()
            .map(|m| {
                m.keys()
                    .filter_map(|k| k.as_str())
                    .map(|s| s.to_string())
                    .collect::<Vec<String>>()
            })
            .unwrap_or_default();

        f.debug_struct("ConfigLoader")
            .field("root_keys", &root_keys)
            .field("tracing_loaded", &self.tracing.is_some())
            .field("store_loaded", &self.store.is_some())
            .finish()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        ConfigLoader::from_value(Value::Mapping(Mapping::new()))
    }
}

impl ConfigLoader {
    pub fn new(file_path: &Path) -> Result<Self, ConfigError> {
        let config_str = std::fs::read_to_string(file_path)
            .map_err(|e| ConfigError::NotFound(format!("{}: {}", file_path.display(), e)))?;
        let root: Value = from_str(&config_str).map_err(|_| ConfigError::InvalidYaml)?;

        // an empty file is an empty configuration
        let root = match root {
            Value::Null => Value::Mapping(Mapping::new()),
            other => other,
        };

        let mapping = root.as_mapping().ok_or(ConfigError::InvalidYaml)?;
        for key in mapping.keys() {
            let k = key.as_str().ok_or(ConfigError::InvalidYaml)?;
            if !CONFIG_KEYS.contains(k) {
                return Err(ConfigError::InvalidKey(k.to_string()));
            }
        }

        debug!(path = %file_path.display(), "configuration file loaded");
        Ok(ConfigLoader::from_value(root))
    }

    /// Load `file_path` if given, otherwise use built-in defaults.
    pub fn load(file_path: Option<&Path>) -> Result<Self, ConfigError> {
        match file_path {
            Some(path) => ConfigLoader::new(path),
            None => Ok(ConfigLoader::default()),
        }
    }

    fn from_value(root: Value) -> Self {
        ConfigLoader {
            root,
            tracing: None,
            store: None,
        }
    }

    fn section(&self, key: &str) -> Option<Value> {
        match self.root.get(key) {
            None | Some(Value::Null) => None,
            Some(v) => Some(v.clone()),
        }
    }

    pub fn tracing(&mut self) -> &TracingConfiguration {
        let cfg = match self.tracing.take() {
            Some(cfg) => cfg,
            None => {
                let cfg = self
                    .section("tracing")
                    .map(|v| {
                        serde_yaml::from_value(v).unwrap_or_else(|e| {
                            warn!(error = ?e, "invalid tracing config, falling back to default");
                            TracingConfiguration::default()
                        })
                    })
                    .unwrap_or_default();
                debug!(?cfg, "Tracing configuration loaded");
                cfg
            }
        };
        self.tracing.insert(cfg)
    }

    pub fn store(&mut self) -> Result<&StoreConfig, ConfigError> {
        let cfg = match self.store.take() {
            Some(cfg) => cfg,
            None => {
                let cfg: StoreConfig = match self.section("store") {
                    Some(v) => serde_yaml::from_value(v)?,
                    None => StoreConfig::default(),
                };
                cfg.validate().map_err(|e| {
                    debug!(error = ?e, "store configuration validation failed");
                    ConfigError::Invalid(e.to_string())
                })?;
                debug!(?cfg, "Store configuration loaded");
                cfg
            }
        };
        Ok(self.store.insert(cfg))
    }
}

/// The store root: the explicit directory if given, else `~/.trustbundle`.
pub fn resolve_home(home: Option<PathBuf>) -> Result<PathBuf, ConfigError> {
    match home {
        Some(path) => Ok(path),
        None => dirs::home_dir()
            .map(|h| h.join(DEFAULT_HOME_DIR))
            .ok_or(ConfigError::NoHome),
    }
}
