//! Certificate store layout and the remote trust layout on each machine.
//!
//! Pure functions only, apart from [`local_username`].

use std::net::IpAddr;
use std::path::{Path, PathBuf};

// ── Local certificate store ──────────────────────────────────────────────────

pub const CA_CERT: &str = "ca.pem";
pub const CA_KEY: &str = "ca-key.pem";
pub const CLIENT_CERT: &str = "cert.pem";
pub const CLIENT_KEY: &str = "key.pem";
pub const REGISTRY_CERT: &str = "registry-cert.pem";
pub const REGISTRY_KEY: &str = "registry-key.pem";

/// Pre-existing inputs to bootstrap; never written by the orchestrator.
pub const CA_MATERIAL: [&str; 4] = [CA_CERT, CA_KEY, CLIENT_CERT, CLIENT_KEY];

pub const REGISTRY_KEY_BITS: u32 = 2048;
pub const BOOTSTRAP_DOMAIN: &str = "shipyard-bootstrap";

// ── Remote layout ────────────────────────────────────────────────────────────

pub const REGISTRY_PORT: u16 = 5000;
pub const DOCKER_CERTS_DIR: &str = "/etc/docker/certs.d";
pub const SYSTEM_CA_BUNDLE: &str = "/etc/ssl/certs/ca-certificates.crt";
pub const REGISTRY_STORAGE_DIR: &str = "/var/lib/registry/";

/// Organisation embedded in the registry certificate subject.
#[must_use]
pub fn registry_org(local_user: &str) -> String {
    format!("{local_user}.{BOOTSTRAP_DOMAIN}")
}

/// Login name of the operator running the installer.
#[must_use]
pub fn local_username() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

/// `/home/<user>/certs`: staging area on the machine.
#[must_use]
pub fn staging_dir(user: &str) -> String {
    format!("/home/{user}/certs")
}

/// `/home/<user>/certs/<registry-ip>:5000`: docker's per-registry cert dir,
/// staged in the user's home before being copied under `certs.d`.
#[must_use]
pub fn registry_staging_dir(user: &str, registry_ip: IpAddr) -> String {
    format!("{}/{registry_ip}:{REGISTRY_PORT}", staging_dir(user))
}

/// A single local → remote file transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileCopy {
    pub local: PathBuf,
    pub remote: String,
}

/// The six files every machine receives, in transfer order.
#[must_use]
pub fn registry_file_copies(certs_path: &Path, user: &str, registry_ip: IpAddr) -> Vec<FileCopy> {
    let registry_dir = registry_staging_dir(user, registry_ip);
    let to_registry_dir = [REGISTRY_CERT, REGISTRY_KEY]
        .into_iter()
        .map(|f| (f, format!("{registry_dir}/{f}")));
    let to_certs_d = [CA_KEY, CA_CERT, CLIENT_CERT, CLIENT_KEY]
        .into_iter()
        .map(|f| (f, format!("{DOCKER_CERTS_DIR}/{f}")));
    to_registry_dir
        .chain(to_certs_d)
        .map(|(file, remote)| FileCopy {
            local: certs_path.join(file),
            remote,
        })
        .collect()
}

/// Promotes the staged files into `certs.d`.
#[must_use]
pub fn install_staged_command(user: &str) -> String {
    format!("sudo cp -r {}/* {DOCKER_CERTS_DIR}/", staging_dir(user))
}

/// Appends the installation CA to the system trust bundle.
#[must_use]
pub fn trust_ca_command() -> String {
    format!("sudo cat {DOCKER_CERTS_DIR}/{CA_CERT} | sudo tee -a {SYSTEM_CA_BUNDLE}")
}
