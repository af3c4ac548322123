#![forbid(unsafe_code)]

//! Loading [`StoreQueryConfig`] from TOML or JSON.
//!
//! ```toml
//! setup_listeners = true
//! base_url = "https://api.example.test"
//! refetch_on_mount_or_arg_change = 30   # seconds, or true / false
//! refetch_on_focus = true
//! ```
//!
//! Unknown keys are rejected.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use storeq_core::RefetchOnMountOrArgChange;

use crate::module::StoreQueryConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse TOML config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("failed to parse JSON config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid config: {message}")]
    Invalid { message: String },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RefetchPolicyFile {
    Flag(bool),
    Seconds(f64),
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    setup_listeners: bool,
    base_url: String,
    refetch_on_mount_or_arg_change: Option<RefetchPolicyFile>,
    refetch_on_focus: Option<bool>,
    refetch_on_reconnect: Option<bool>,
}

impl TryFrom<ConfigFile> for StoreQueryConfig {
    type Error = ConfigError;

    fn try_from(file: ConfigFile) -> Result<Self, ConfigError> {
        let refetch_on_mount_or_arg_change = match file.refetch_on_mount_or_arg_change {
            None => RefetchOnMountOrArgChange::Never,
            Some(RefetchPolicyFile::Flag(flag)) => flag.into(),
            Some(RefetchPolicyFile::Seconds(secs)) => {
                let max_age = Duration::try_from_secs_f64(secs).map_err(|err| {
                    ConfigError::Invalid {
                        message: format!("refetch_on_mount_or_arg_change = {secs}: {err}"),
                    }
                })?;
                RefetchOnMountOrArgChange::OlderThan(max_age)
            }
        };
        Ok(Self {
            setup_listeners: file.setup_listeners,
            base_url: file.base_url,
            refetch_on_mount_or_arg_change,
            refetch_on_focus: file.refetch_on_focus,
            refetch_on_reconnect: file.refetch_on_reconnect,
        })
    }
}

impl StoreQueryConfig {
    /// Parse a TOML document.
    ///
    /// # Errors
    ///
    /// Syntax errors, unknown keys, negative ages.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        toml::from_str::<ConfigFile>(text)?.try_into()
    }

    /// Parse a JSON document.
    ///
    /// # Errors
    ///
    /// Syntax errors, unknown keys, negative ages.
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        serde_json::from_str::<ConfigFile>(text)?.try_into()
    }

    /// Read a config file; `.json` files are parsed as JSON, anything else
    /// as TOML.
    ///
    /// # Errors
    ///
    /// I/O failures and everything [`Self::from_toml_str`] reports.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = if path.extension().is_some_and(|ext| ext == "json") {
            Self::from_json_str(&text)?
        } else {
            Self::from_toml_str(&text)?
        };
        tracing::debug!(path = %path.display(), "loaded store query config");
        Ok(config)
    }
}
