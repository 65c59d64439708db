//! Shared fakes for orchestrator and bootstrap tests.
//!
//! `FakeHost` records every remote call, `FakeGenerator` writes a plain-text
//! stand-in certificate listing its hosts, and `FakeBackend` hands out
//! machines with sequential private IPs.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::net::IpAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Result, bail};
use url::Url;

use crate::application::ports::{
    BackendSettings, CertificateGenerator, CertificateRequest, CreateMachineRequest, Machine,
    MachineBackend, RemoteShell,
};
use crate::domain::{AuthOptions, DriverOptions};

// ── FakeHost ──────────────────────────────────────────────────────────────────

/// One recorded remote call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    Run(String),
    Copy { local: String, remote: String },
}

/// `RemoteShell` that records calls and fails on the first command or copy
/// destination containing `fail_on`.
#[derive(Debug, Clone, Default)]
pub struct FakeHost {
    pub calls: Arc<Mutex<Vec<RemoteCall>>>,
    pub fail_on: Option<String>,
}

impl FakeHost {
    pub fn failing_on(pattern: &str) -> Self {
        Self {
            fail_on: Some(pattern.to_string()),
            ..Self::default()
        }
    }

    pub fn recorded(&self) -> Vec<RemoteCall> {
        self.calls.lock().expect("mutex poisoned").clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.recorded()
            .into_iter()
            .filter_map(|c| match c {
                RemoteCall::Run(cmd) => Some(cmd),
                RemoteCall::Copy { .. } => None,
            })
            .collect()
    }

    pub fn copies(&self) -> Vec<(String, String)> {
        self.recorded()
            .into_iter()
            .filter_map(|c| match c {
                RemoteCall::Copy { local, remote } => Some((local, remote)),
                RemoteCall::Run(_) => None,
            })
            .collect()
    }

    fn should_fail(&self, subject: &str) -> bool {
        self.fail_on.as_deref().is_some_and(|p| subject.contains(p))
    }
}

impl RemoteShell for FakeHost {
    async fn run_command(&self, command: &str) -> Result<String> {
        self.calls
            .lock()
            .expect("mutex poisoned")
            .push(RemoteCall::Run(command.to_string()));
        if self.should_fail(command) {
            bail!("command failed: {command}");
        }
        Ok(String::new())
    }

    async fn copy_file(&self, local: &Path, remote: &str) -> Result<()> {
        self.calls
            .lock()
            .expect("mutex poisoned")
            .push(RemoteCall::Copy {
                local: local.display().to_string(),
                remote: remote.to_string(),
            });
        if self.should_fail(remote) {
            bail!("copy failed: {remote}");
        }
        Ok(())
    }
}

// ── FakeGenerator ─────────────────────────────────────────────────────────────

/// `CertificateGenerator` writing one host per line instead of real PEM.
#[derive(Default)]
pub struct FakeGenerator {
    pub requests: Mutex<Vec<CertificateRequest>>,
    pub fail: bool,
}

impl FakeGenerator {
    pub fn requests(&self) -> Vec<CertificateRequest> {
        self.requests.lock().expect("mutex poisoned").clone()
    }
}

impl CertificateGenerator for FakeGenerator {
    async fn generate_certificate(&self, request: &CertificateRequest) -> Result<()> {
        self.requests
            .lock()
            .expect("mutex poisoned")
            .push(request.clone());
        // Give a concurrent provisioning call the chance to race us.
        tokio::task::yield_now().await;
        if self.fail {
            bail!("signing failed");
        }
        std::fs::write(&request.cert_file, request.hosts.join("\n"))?;
        std::fs::write(&request.key_file, "key")?;
        Ok(())
    }

    async fn ip_addresses(&self, cert_file: &Path) -> Result<Vec<IpAddr>> {
        let content = std::fs::read_to_string(cert_file)?;
        Ok(content.lines().filter_map(|l| l.parse().ok()).collect())
    }
}

// ── FakeBackend ───────────────────────────────────────────────────────────────

/// What reached the backend for one `create_machine` call.
#[derive(Debug, Clone)]
pub struct CreateCall {
    pub name: String,
    pub driver_name: String,
    pub options: DriverOptions,
    pub registry_mirror: Option<Url>,
}

/// `MachineBackend` handing out `10.0.0.<n+4>` for the n-th machine.
#[derive(Default)]
pub struct FakeBackend {
    pub creates: Mutex<Vec<CreateCall>>,
    pub configured: Mutex<Vec<AuthOptions>>,
    pub with_auth: bool,
    pub fail_create: bool,
    pub fail_auth: bool,
    pub host: FakeHost,
    pub deleted: AtomicBool,
    pub closed: AtomicBool,
    pub created: AtomicUsize,
}

impl FakeBackend {
    pub fn creates(&self) -> Vec<CreateCall> {
        self.creates.lock().expect("mutex poisoned").clone()
    }

    fn machine(&self, name: &str, private_ip: IpAddr) -> Machine<FakeHost> {
        Machine {
            name: name.to_string(),
            address: private_ip.to_string(),
            private_ip,
            ssh_username: "ubuntu".to_string(),
            auth_options: self.with_auth.then(|| AuthOptions {
                ca_cert_path: "ca.pem".into(),
                ca_key_path: "ca-key.pem".into(),
                server_cert_path: format!("{name}/server.pem").into(),
                server_key_path: format!("{name}/server-key.pem").into(),
                server_cert_sans: vec![],
            }),
            host: self.host.clone(),
        }
    }
}

impl MachineBackend for FakeBackend {
    type Host = FakeHost;

    async fn connect(_settings: &BackendSettings) -> Result<Self> {
        Ok(Self::default())
    }

    async fn create_machine(&self, request: &CreateMachineRequest<'_>) -> Result<Machine<FakeHost>> {
        self.creates
            .lock()
            .expect("mutex poisoned")
            .push(CreateCall {
                name: request.name.to_string(),
                driver_name: request.driver_name.to_string(),
                options: request.options.clone(),
                registry_mirror: request.registry_mirror.cloned(),
            });
        if self.fail_create {
            bail!("virtualization API unavailable");
        }
        let n = self.created.fetch_add(1, Ordering::SeqCst);
        let last_octet = u8::try_from(n + 5).expect("small fleet");
        Ok(self.machine(request.name, IpAddr::from([10, 0, 0, last_octet])))
    }

    async fn configure_auth(&self, machine: &Machine<FakeHost>) -> Result<()> {
        if self.fail_auth {
            bail!("docker did not restart");
        }
        if let Some(auth) = &machine.auth_options {
            self.configured
                .lock()
                .expect("mutex poisoned")
                .push(auth.clone());
        }
        Ok(())
    }

    async fn load_machine(&self, name: &str) -> Result<Machine<FakeHost>> {
        let Some(seq) = name.rsplit('-').next().and_then(|s| s.parse::<u8>().ok()) else {
            bail!("no such machine: {name}");
        };
        Ok(self.machine(name, IpAddr::from([10, 0, 0, seq + 4])))
    }

    async fn delete_all(&self) -> Result<()> {
        self.deleted.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
