//! Multipass implementation of the `MachineBackend` and `RemoteShell` ports.
//!
//! Every multipass CLI call goes through a `CommandRunner`, so tests can
//! inject a mock runner without spawning real processes. Machines are
//! tracked in `<store>/machines/<name>/machine.json`.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::process::Output;

use anyhow::{Context, Result, anyhow, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use crate::application::ports::{
    BackendSettings, CertificateGenerator, CertificateRequest, CommandRunner,
    CreateMachineRequest, Machine, MachineBackend, RemoteShell,
};
use crate::domain::{AuthOptions, DriverOptions};
use crate::domain::certs::{CA_CERT, CA_KEY, CA_MATERIAL, REGISTRY_KEY_BITS, local_username};
use crate::infra::command_runner::LAUNCH_TIMEOUT;

/// Driver name this backend accepts.
pub const MULTIPASS_DRIVER: &str = "multipass";

const MULTIPASS: &str = "multipass";
/// Login user of multipass Ubuntu images.
const SSH_USERNAME: &str = "ubuntu";
const RECORD_FILE: &str = "machine.json";
const SERVER_CERT: &str = "server.pem";
const SERVER_KEY: &str = "server-key.pem";

const DOCKER_DIR: &str = "/etc/docker";
const DOCKER_DAEMON_CONFIG: &str = "/etc/docker/daemon.json";
const RESTART_DOCKER: &str = "sudo systemctl restart docker";

/// Driver options mapped onto `multipass launch` flags.
const LAUNCH_FLAGS: [(&str, &str); 5] = [
    ("multipass-cpus", "--cpus"),
    ("multipass-memory", "--memory"),
    ("multipass-disk", "--disk"),
    ("multipass-cloud-init", "--cloud-init"),
    ("multipass-timeout", "--timeout"),
];
const IMAGE_OPTION: &str = "multipass-image";
/// Multipass blueprint shipping the Docker engine; stock Ubuntu has none.
pub const DEFAULT_IMAGE: &str = "docker";

// ── MultipassHost ─────────────────────────────────────────────────────────────

/// Shell access to one multipass instance via `multipass exec`.
#[derive(Debug, Clone)]
pub struct MultipassHost<R> {
    name: String,
    runner: R,
}

impl<R: CommandRunner> MultipassHost<R> {
    #[must_use]
    pub fn new(name: impl Into<String>, runner: R) -> Self {
        Self {
            name: name.into(),
            runner,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Write `content` to `remote` as root.
    ///
    /// # Errors
    ///
    /// Returns an error if `multipass exec` fails or `tee` exits non-zero.
    pub async fn write_file(&self, remote: &str, content: &[u8]) -> Result<()> {
        let output = self
            .runner
            .run_with_stdin(
                MULTIPASS,
                &["exec", &self.name, "--", "sudo", "tee", remote],
                content,
            )
            .await
            .with_context(|| format!("multipass exec {} tee {remote}", self.name))?;
        check_status(&output, &format!("writing {remote} on {}", self.name))?;
        Ok(())
    }
}

impl<R: CommandRunner> RemoteShell for MultipassHost<R> {
    async fn run_command(&self, command: &str) -> Result<String> {
        debug!(machine = %self.name, command, "exec");
        let output = self
            .runner
            .run(MULTIPASS, &["exec", &self.name, "--", "bash", "-c", command])
            .await
            .with_context(|| format!("multipass exec {}", self.name))?;
        check_status(&output, &format!("`{command}` on {}", self.name))?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn copy_file(&self, local: &Path, remote: &str) -> Result<()> {
        let content = tokio::fs::read(local)
            .await
            .with_context(|| format!("cannot read {}", local.display()))?;
        self.write_file(remote, &content).await
    }
}

// ── Machine record ────────────────────────────────────────────────────────────

/// What the store remembers about a created machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineRecord {
    pub name: String,
    pub driver: String,
    pub private_ip: IpAddr,
    pub ssh_username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry_mirror: Option<Url>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_options: Option<AuthOptions>,
    pub created_at: DateTime<Utc>,
}

/// `/etc/docker/daemon.json` as written by this backend.
#[derive(Debug, Default, Serialize)]
struct DaemonConfig {
    #[serde(rename = "registry-mirrors", skip_serializing_if = "Vec::is_empty")]
    registry_mirrors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tlsverify: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tlscacert: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tlscert: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tlskey: Option<String>,
}

impl DaemonConfig {
    fn with_mirror(mirror: Option<&Url>) -> Self {
        Self {
            registry_mirrors: mirror.map(ToString::to_string).into_iter().collect(),
            ..Self::default()
        }
    }

    fn with_tls(mut self) -> Self {
        self.tlsverify = Some(true);
        self.tlscacert = Some(format!("{DOCKER_DIR}/{CA_CERT}"));
        self.tlscert = Some(format!("{DOCKER_DIR}/{SERVER_CERT}"));
        self.tlskey = Some(format!("{DOCKER_DIR}/{SERVER_KEY}"));
        self
    }
}

// ── MultipassBackend ──────────────────────────────────────────────────────────

/// Machine store backed by the multipass CLI.
pub struct MultipassBackend<R, G> {
    runner: R,
    generator: G,
    machines_dir: PathBuf,
    certs_path: PathBuf,
}

impl<R: CommandRunner + Clone, G: CertificateGenerator> MultipassBackend<R, G> {
    /// Verify multipass is reachable and prepare the store.
    ///
    /// CA material found under `settings.ca_path` is copied into the store
    /// unless the store already has that file.
    ///
    /// # Errors
    ///
    /// Returns an error if multipass is unavailable, the store cannot be
    /// created, or the CA material cannot be copied.
    pub async fn open(runner: R, generator: G, settings: &BackendSettings) -> Result<Self> {
        let output = runner
            .run(MULTIPASS, &["version"])
            .await
            .context("multipass is not installed or not on PATH")?;
        check_status(&output, "multipass version")?;

        let machines_dir = settings.store_path.join("machines");
        let certs_path = settings.store_path.join("certs");
        for dir in [&machines_dir, &certs_path] {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("cannot create {}", dir.display()))?;
        }
        if let Some(ca_path) = &settings.ca_path {
            seed_ca_material(ca_path, &certs_path).await?;
        }

        Ok(Self {
            runner,
            generator,
            machines_dir,
            certs_path,
        })
    }

    fn record_path(&self, name: &str) -> PathBuf {
        self.machines_dir.join(name).join(RECORD_FILE)
    }

    fn host(&self, name: &str) -> MultipassHost<R> {
        MultipassHost::new(name, self.runner.clone())
    }

    fn auth_options(&self, name: &str) -> Option<AuthOptions> {
        let ca_cert_path = self.certs_path.join(CA_CERT);
        let ca_key_path = self.certs_path.join(CA_KEY);
        if !(ca_cert_path.exists() && ca_key_path.exists()) {
            return None;
        }
        let machine_dir = self.machines_dir.join(name);
        Some(AuthOptions {
            ca_cert_path,
            ca_key_path,
            server_cert_path: machine_dir.join(SERVER_CERT),
            server_key_path: machine_dir.join(SERVER_KEY),
            server_cert_sans: Vec::new(),
        })
    }

    async fn read_record(&self, name: &str) -> Result<MachineRecord> {
        let path = self.record_path(name);
        let content = tokio::fs::read(&path)
            .await
            .with_context(|| format!("machine {name} is not in this installation"))?;
        serde_json::from_slice(&content).with_context(|| format!("cannot parse {}", path.display()))
    }

    async fn write_record(&self, record: &MachineRecord) -> Result<()> {
        let path = self.record_path(&record.name);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("cannot create {}", parent.display()))?;
        }
        let content = serde_json::to_vec_pretty(record).context("cannot serialize machine record")?;
        tokio::fs::write(&path, content)
            .await
            .with_context(|| format!("cannot write {}", path.display()))
    }

    async fn recorded_machines(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.machines_dir)
            .await
            .with_context(|| format!("cannot list {}", self.machines_dir.display()))?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.path().join(RECORD_FILE).exists() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    fn machine(&self, record: MachineRecord) -> Machine<MultipassHost<R>> {
        Machine {
            host: self.host(&record.name),
            address: record.private_ip.to_string(),
            private_ip: record.private_ip,
            ssh_username: record.ssh_username,
            auth_options: record.auth_options,
            name: record.name,
        }
    }

    /// Launch `name` and return its IPv4 address.
    async fn launch(&self, name: &str, options: &DriverOptions) -> Result<IpAddr> {
        let args = launch_args(name, options);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        info!(machine = %name, "multipass launch");
        let output = self
            .runner
            .run_with_timeout(MULTIPASS, &args, LAUNCH_TIMEOUT)
            .await
            .context("multipass launch")?;
        check_status(&output, &format!("multipass launch {name}"))?;
        self.instance_ip(name).await
    }

    /// Remove an instance that never made it into the store.
    async fn discard_instance(&self, name: &str) {
        warn!(machine = %name, "launch incomplete, deleting instance");
        let deleted = self
            .runner
            .run(MULTIPASS, &["delete", "--purge", name])
            .await
            .and_then(|o| check_status(&o, &format!("multipass delete --purge {name}")));
        if let Err(e) = deleted {
            warn!(machine = %name, error = %format!("{e:#}"), "cannot delete instance");
        }
    }

    async fn instance_ip(&self, name: &str) -> Result<IpAddr> {
        let output = self
            .runner
            .run(MULTIPASS, &["info", name, "--format", "json"])
            .await
            .context("multipass info")?;
        check_status(&output, &format!("multipass info {name}"))?;
        parse_info_ipv4(&output.stdout, name)
    }
}

impl<R, G> MachineBackend for MultipassBackend<R, G>
where
    R: CommandRunner + Clone + Default,
    G: CertificateGenerator + Default,
{
    type Host = MultipassHost<R>;

    async fn connect(settings: &BackendSettings) -> Result<Self> {
        Self::open(R::default(), G::default(), settings).await
    }

    async fn create_machine(
        &self,
        request: &CreateMachineRequest<'_>,
    ) -> Result<Machine<Self::Host>> {
        if request.driver_name != MULTIPASS_DRIVER {
            bail!(
                "unsupported driver '{}': only '{MULTIPASS_DRIVER}' is available",
                request.driver_name
            );
        }

        let private_ip = match self.launch(request.name, request.options).await {
            Ok(ip) => ip,
            Err(e) => {
                // A name collision means the instance belongs to someone else.
                if !format!("{e:#}").contains("already exists") {
                    self.discard_instance(request.name).await;
                }
                return Err(e);
            }
        };
        let record = MachineRecord {
            name: request.name.to_string(),
            driver: request.driver_name.to_string(),
            private_ip,
            ssh_username: SSH_USERNAME.to_string(),
            registry_mirror: request.registry_mirror.cloned(),
            auth_options: self.auth_options(request.name),
            created_at: Utc::now(),
        };
        self.write_record(&record).await?;

        if let Some(mirror) = request.registry_mirror {
            let host = self.host(request.name);
            install_daemon_config(&host, &DaemonConfig::with_mirror(Some(mirror))).await?;
        }
        Ok(self.machine(record))
    }

    async fn configure_auth(&self, machine: &Machine<Self::Host>) -> Result<()> {
        let Some(auth) = &machine.auth_options else {
            return Ok(());
        };
        let mut hosts = auth.server_cert_sans.clone();
        if !hosts.iter().any(|h| h == "localhost") {
            hosts.push("localhost".to_string());
        }
        if let Some(parent) = auth.server_cert_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("cannot create {}", parent.display()))?;
        }
        let request = CertificateRequest {
            hosts,
            cert_file: auth.server_cert_path.clone(),
            key_file: auth.server_key_path.clone(),
            ca_file: auth.ca_cert_path.clone(),
            ca_key_file: auth.ca_key_path.clone(),
            org: format!("{}.{}", local_username(), machine.name),
            bits: REGISTRY_KEY_BITS,
        };
        self.generator
            .generate_certificate(&request)
            .await
            .context("issuing docker server certificate")?;

        let host = &machine.host;
        host.run_command(&format!("sudo mkdir -p {DOCKER_DIR}")).await?;
        for (local, file) in [
            (&auth.ca_cert_path, CA_CERT),
            (&auth.server_cert_path, SERVER_CERT),
            (&auth.server_key_path, SERVER_KEY),
        ] {
            host.copy_file(local, &format!("{DOCKER_DIR}/{file}")).await?;
        }

        let mut record = self.read_record(&machine.name).await?;
        let daemon = DaemonConfig::with_mirror(record.registry_mirror.as_ref()).with_tls();
        install_daemon_config(host, &daemon).await?;

        record.auth_options = Some(auth.clone());
        self.write_record(&record).await
    }

    async fn load_machine(&self, name: &str) -> Result<Machine<Self::Host>> {
        let record = self.read_record(name).await?;
        Ok(self.machine(record))
    }

    async fn delete_all(&self) -> Result<()> {
        let mut failed = Vec::new();
        for name in self.recorded_machines().await? {
            info!(machine = %name, "multipass delete");
            let deleted = self
                .runner
                .run(MULTIPASS, &["delete", &name])
                .await
                .and_then(|o| check_status(&o, &format!("multipass delete {name}")));
            if let Err(e) = deleted {
                warn!(machine = %name, error = %format!("{e:#}"), "delete failed");
                failed.push(name);
                continue;
            }
            let dir = self.machines_dir.join(&name);
            tokio::fs::remove_dir_all(&dir)
                .await
                .with_context(|| format!("cannot remove {}", dir.display()))?;
        }

        let output = self
            .runner
            .run(MULTIPASS, &["purge"])
            .await
            .context("multipass purge")?;
        check_status(&output, "multipass purge")?;

        if !failed.is_empty() {
            bail!("could not delete: {}", failed.join(", "));
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

async fn seed_ca_material(ca_path: &Path, certs_path: &Path) -> Result<()> {
    for file in CA_MATERIAL {
        let dest = certs_path.join(file);
        if tokio::fs::try_exists(&dest).await.unwrap_or(false) {
            continue;
        }
        let src = ca_path.join(file);
        tokio::fs::copy(&src, &dest)
            .await
            .with_context(|| format!("cannot copy {} to {}", src.display(), dest.display()))?;
        debug!(file, "seeded CA material");
    }
    Ok(())
}

async fn install_daemon_config<R: CommandRunner>(
    host: &MultipassHost<R>,
    config: &DaemonConfig,
) -> Result<()> {
    let content = serde_json::to_vec_pretty(config).context("cannot serialize daemon.json")?;
    host.run_command(&format!("sudo mkdir -p {DOCKER_DIR}")).await?;
    host.write_file(DOCKER_DAEMON_CONFIG, &content).await?;
    host.run_command(RESTART_DOCKER).await?;
    Ok(())
}

/// `multipass launch` arguments for `name` and its driver options.
fn launch_args(name: &str, options: &DriverOptions) -> Vec<String> {
    let image = options
        .get(IMAGE_OPTION)
        .and_then(option_value)
        .unwrap_or_else(|| DEFAULT_IMAGE.to_string());
    let mut args = vec!["launch".to_string(), image, "--name".to_string(), name.to_string()];
    for (key, flag) in LAUNCH_FLAGS {
        if let Some(value) = options.get(key).and_then(option_value) {
            args.push(flag.to_string());
            args.push(value);
        }
    }
    args
}

/// Renders an option value as a CLI argument; empty and null mean unset.
fn option_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// First IPv4 address of `name` in `multipass info --format json` output.
fn parse_info_ipv4(stdout: &[u8], name: &str) -> Result<IpAddr> {
    let info: Value = serde_json::from_slice(stdout).context("invalid JSON from multipass info")?;
    let ip = info
        .get("info")
        .and_then(|i| i.get(name))
        .and_then(|m| m.get("ipv4"))
        .and_then(Value::as_array)
        .and_then(|a| a.first())
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("no IPv4 address found for {name}"))?;
    ip.parse()
        .with_context(|| format!("invalid IPv4 address '{ip}' for {name}"))
}

fn check_status(output: &Output, what: &str) -> Result<()> {
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    bail!("{what} failed ({}): {}", output.status, stderr.trim())
}
