//! Domain types and validators for installation configuration.
//!
//! Pure functions only: no I/O, no async, no filesystem access.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::domain::error::ConfigError;

// ── Constants ────────────────────────────────────────────────────────────────

pub const DEFAULT_DRIVER: &str = "multipass";
pub const DEFAULT_INSTALLATION_NAME: &str = "shipyard";

/// Installation names become machine-name prefixes and directory names.
pub static INSTALLATION_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    // Safety: this is a compile-time constant pattern and cannot fail.
    #[allow(clippy::expect_used)]
    Regex::new(r"^[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?$").expect("valid regex")
});

/// Hypervisor-specific key/value parameters handed to the machine backend.
///
/// Ordered so that merged option sets render deterministically in logs.
pub type DriverOptions = BTreeMap<String, serde_json::Value>;

// ── Config schema ────────────────────────────────────────────────────────────

/// One installation's identity and storage location.
///
/// Stored in `~/.shipyard/config.yaml`; every field is optional there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ProvisionerConfig {
    /// Machine driver, e.g. `multipass`.
    #[serde(rename = "driver")]
    pub driver_name: String,
    /// Directory holding CA material to seed the installation's cert store.
    pub ca_path: Option<PathBuf>,
    /// Installation name; prefixes machine names and keys the store directory.
    pub name: String,
    /// Options applied to every machine of this installation.
    pub driver_options: DriverOptions,
    /// Docker Hub mirror configured on every machine.
    pub registry_mirror: Option<Url>,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            driver_name: DEFAULT_DRIVER.to_string(),
            ca_path: None,
            name: DEFAULT_INSTALLATION_NAME.to_string(),
            driver_options: DriverOptions::new(),
            registry_mirror: None,
        }
    }
}

// ── Validators ───────────────────────────────────────────────────────────────

/// Validates a configuration before any backend is contacted.
///
/// # Errors
///
/// Returns a [`ConfigError`] naming the first invalid field.
pub fn validate_config(config: &ProvisionerConfig) -> Result<(), ConfigError> {
    if !INSTALLATION_NAME_RE.is_match(&config.name) {
        return Err(ConfigError::InvalidName(config.name.clone()));
    }
    if config.driver_name.trim().is_empty() {
        return Err(ConfigError::MissingDriver);
    }
    if config.driver_options.keys().any(|k| k.trim().is_empty()) {
        return Err(ConfigError::EmptyOptionKey);
    }
    Ok(())
}

/// Parses a `KEY=VALUE` driver option from the command line.
///
/// `true`, `false` and canonical integers become JSON booleans and numbers;
/// everything else is kept verbatim as a string, so `image=24.10` stays
/// `"24.10"` and `memory=4G` yields `"4G"`.
///
/// # Errors
///
/// Returns [`ConfigError::MalformedOption`] when `=` is missing and
/// [`ConfigError::EmptyOptionKey`] when the key is blank.
pub fn parse_driver_option(raw: &str) -> Result<(String, serde_json::Value), ConfigError> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| ConfigError::MalformedOption(raw.to_string()))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(ConfigError::EmptyOptionKey);
    }
    Ok((key.to_string(), option_scalar(value)))
}

fn option_scalar(raw: &str) -> serde_json::Value {
    match raw {
        "true" => return serde_json::Value::Bool(true),
        "false" => return serde_json::Value::Bool(false),
        _ => {}
    }
    match raw.parse::<i64>() {
        // "007" and "+2" would not render back to what the user typed.
        Ok(n) if n.to_string() == raw => serde_json::Value::from(n),
        _ => serde_json::Value::String(raw.to_string()),
    }
}

// ── Unit tests ───────────────────────────────────────────────────────────────
