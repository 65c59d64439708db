//! Port trait definitions for the Application layer.
//!
//! Ports are the interfaces (contracts) that infrastructure must fulfill.
//! This file imports only from `crate::domain`, never from `crate::infra`,
//! `crate::commands`, or `crate::output`.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::process::Output;
use std::time::Duration;

use anyhow::Result;
use url::Url;

use crate::domain::{AuthOptions, DriverOptions, ProvisionerConfig};

// ── Value Types ───────────────────────────────────────────────────────────────

/// What a backend needs to open its machine store.
#[derive(Debug, Clone)]
pub struct BackendSettings {
    /// Directory holding CA material to seed `<store>/certs` with.
    pub ca_path: Option<PathBuf>,
    /// `<installBase>/<installation>`.
    pub store_path: PathBuf,
}

/// Parameters for one machine creation.
#[derive(Debug)]
pub struct CreateMachineRequest<'a> {
    pub name: &'a str,
    pub driver_name: &'a str,
    /// Fully merged options, standalone overrides included.
    pub options: &'a DriverOptions,
    pub registry_mirror: Option<&'a Url>,
}

/// A created VM instance and its remote-execution handle.
#[derive(Debug, Clone)]
pub struct Machine<H> {
    pub name: String,
    /// Address the operator reaches the machine at.
    pub address: String,
    pub private_ip: IpAddr,
    pub ssh_username: String,
    /// Present when the machine's engine is secured with mutual TLS.
    pub auth_options: Option<AuthOptions>,
    pub host: H,
}

/// Inputs for issuing a CA-signed certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateRequest {
    /// Subject-alternative-names; IP literals become IP SANs.
    pub hosts: Vec<String>,
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
    pub ca_file: PathBuf,
    pub ca_key_file: PathBuf,
    pub org: String,
    pub bits: u32,
}

// ── Machine Port Traits ───────────────────────────────────────────────────────

/// Shell access to a provisioned machine.
#[allow(async_fn_in_trait)]
pub trait RemoteShell {
    /// Run a shell command on the machine and return its stdout.
    ///
    /// A non-zero exit status is an error.
    async fn run_command(&self, command: &str) -> Result<String>;
    /// Write the local file at `local` to `remote` on the machine.
    async fn copy_file(&self, local: &Path, remote: &str) -> Result<()>;
}

/// Creates, loads and destroys machines for one installation's store.
#[allow(async_fn_in_trait)]
pub trait MachineBackend {
    /// Remote-execution handle of the machines this backend creates.
    type Host: RemoteShell;

    /// Open the machine store, creating it if needed.
    async fn connect(settings: &BackendSettings) -> Result<Self>
    where
        Self: Sized;
    /// Create and boot a machine.
    async fn create_machine(
        &self,
        request: &CreateMachineRequest<'_>,
    ) -> Result<Machine<Self::Host>>;
    /// Re-issue and install the engine's server certificate from
    /// `machine.auth_options`.
    async fn configure_auth(&self, machine: &Machine<Self::Host>) -> Result<()>;
    /// Load a machine previously created in this store.
    async fn load_machine(&self, name: &str) -> Result<Machine<Self::Host>>;
    /// Destroy every machine in this store.
    async fn delete_all(&self) -> Result<()>;
    /// Release backend resources.
    async fn close(&self) -> Result<()>;
}

// ── Certificate Port ──────────────────────────────────────────────────────────

/// X.509 issuing and inspection.
#[allow(async_fn_in_trait)]
pub trait CertificateGenerator {
    /// Issue a PEM certificate/key pair signed by the request's CA.
    async fn generate_certificate(&self, request: &CertificateRequest) -> Result<()>;
    /// IP addresses embedded in the certificate's SAN extension, in order.
    async fn ip_addresses(&self, cert_file: &Path) -> Result<Vec<IpAddr>>;
}

// ── Command Runner Port ───────────────────────────────────────────────────────

/// Abstracts process execution so infrastructure can be swapped or mocked.
#[allow(async_fn_in_trait)]
pub trait CommandRunner {
    /// Run a program and capture its output.
    ///
    /// Implementations should delegate to `run_with_timeout` using the
    /// instance's configured default timeout.
    async fn run(&self, program: &str, args: &[&str]) -> Result<Output>;
    /// Run a program with a custom timeout override.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be spawned or exceeds `timeout`.
    /// On timeout, the child process must be killed (not left orphaned).
    async fn run_with_timeout(&self, program: &str, args: &[&str], timeout: Duration)
    -> Result<Output>;
    /// Run a program with stdin piped from `input`.
    async fn run_with_stdin(&self, program: &str, args: &[&str], input: &[u8]) -> Result<Output>;
}

// ── Progress Reporting Port ───────────────────────────────────────────────────

/// Abstracts progress reporting so services can emit events without
/// depending on the Presentation layer. Sync trait: no async needed.
pub trait ProgressReporter {
    /// Emit an in-progress step message.
    fn step(&self, message: &str);
    /// Emit a success message.
    fn success(&self, message: &str);
    /// Emit a warning message.
    fn warn(&self, message: &str);
}

// ── Config Port ───────────────────────────────────────────────────────────────

/// Loads the installation configuration.
pub trait ConfigStore {
    /// Load the configuration, falling back to defaults when absent.
    fn load(&self) -> Result<ProvisionerConfig>;
    /// Location the configuration is read from.
    fn path(&self) -> Result<PathBuf>;
}
