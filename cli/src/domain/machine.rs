//! Machine naming, driver-option merging, auth options and store layout.
//!
//! Pure functions only: no I/O, no async.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::config::DriverOptions;

/// Cluster-coordination options forced on every machine.
///
/// Machines are always standalone engine hosts: no swarm master, no swarm
/// host or discovery, and no engine auto-install.
#[must_use]
pub fn standalone_overrides() -> [(&'static str, Value); 4] {
    [
        ("swarm-master", Value::Bool(false)),
        ("swarm-host", Value::String(String::new())),
        ("engine-install-url", Value::String(String::new())),
        ("swarm-discovery", Value::String(String::new())),
    ]
}

/// Builds the option set handed to the backend.
///
/// `global` is the base layer, `call` wins on collisions, and the
/// [`standalone_overrides`] win over both.
#[must_use]
pub fn merge_driver_options(global: &DriverOptions, call: &DriverOptions) -> DriverOptions {
    let mut merged = global.clone();
    merged.extend(call.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged.extend(
        standalone_overrides()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v)),
    );
    merged
}

/// `"<installation>-<sequence>"`.
#[must_use]
pub fn machine_name(installation: &str, sequence: u64) -> String {
    format!("{installation}-{sequence}")
}

/// Mutual-TLS settings of a machine's container engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthOptions {
    pub ca_cert_path: PathBuf,
    pub ca_key_path: PathBuf,
    pub server_cert_path: PathBuf,
    pub server_key_path: PathBuf,
    /// Extra subject-alternative-names for the engine's server certificate.
    #[serde(default)]
    pub server_cert_sans: Vec<String>,
}

impl AuthOptions {
    /// Adds `san` to the server certificate SAN list. Returns `false` if it
    /// was already present.
    pub fn add_server_cert_san(&mut self, san: &str) -> bool {
        if self.server_cert_sans.iter().any(|s| s == san) {
            return false;
        }
        self.server_cert_sans.push(san.to_string());
        true
    }
}

/// On-disk locations owned by one installation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallPaths {
    /// `<base>/<installation>`: the backend's machine store.
    pub store_path: PathBuf,
    /// `<base>/<installation>/certs`: CA material and registry certificate.
    pub certs_path: PathBuf,
}

impl InstallPaths {
    #[must_use]
    pub fn new(install_base: &Path, installation: &str) -> Self {
        let store_path = install_base.join(installation);
        let certs_path = store_path.join("certs");
        Self {
            store_path,
            certs_path,
        }
    }
}
