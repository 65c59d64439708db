//! Registry trust bootstrap: issue-or-reuse the registry certificate, then
//! distribute it with the CA material to a machine.
//!
//! Imports only from `crate::domain` and `crate::application::ports`.

use std::net::IpAddr;
use std::path::{Path, PathBuf};

use anyhow::anyhow;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::application::ports::{CertificateGenerator, CertificateRequest, RemoteShell};
use crate::domain::ProvisionError;
use crate::domain::certs::{
    CA_CERT, CA_KEY, DOCKER_CERTS_DIR, REGISTRY_CERT, REGISTRY_KEY, REGISTRY_KEY_BITS,
    REGISTRY_STORAGE_DIR, install_staged_command, registry_file_copies, registry_org,
    registry_staging_dir, trust_ca_command,
};

/// The installation's registry certificate and the lock serialising its
/// first issue.
pub struct RegistryTrust {
    certs_path: PathBuf,
    local_user: String,
    issuing: Mutex<()>,
}

impl RegistryTrust {
    #[must_use]
    pub fn new(certs_path: PathBuf, local_user: String) -> Self {
        Self {
            certs_path,
            local_user,
            issuing: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn certs_path(&self) -> &Path {
        &self.certs_path
    }

    /// Resolve the registry IP, issuing the certificate for `ip` if the
    /// installation has none yet.
    ///
    /// An existing certificate is never re-issued; its first IP SAN is the
    /// registry address for every machine.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Certificate`] if issuing, reading or parsing
    /// the certificate fails.
    pub async fn registry_ip(
        &self,
        generator: &impl CertificateGenerator,
        ip: IpAddr,
    ) -> Result<IpAddr, ProvisionError> {
        let _issuing = self.issuing.lock().await;
        let cert_file = self.certs_path.join(REGISTRY_CERT);
        let key_file = self.certs_path.join(REGISTRY_KEY);
        let cert_exists = file_exists(&cert_file).await?;
        let key_exists = file_exists(&key_file).await?;
        if cert_exists && !key_exists {
            warn!(cert = %cert_file.display(), "registry key missing, re-issuing certificate");
        }

        if !(cert_exists && key_exists) {
            info!(%ip, "creating registry certificate");
            let request = CertificateRequest {
                hosts: vec![ip.to_string()],
                cert_file,
                key_file,
                ca_file: self.certs_path.join(CA_CERT),
                ca_key_file: self.certs_path.join(CA_KEY),
                org: registry_org(&self.local_user),
                bits: REGISTRY_KEY_BITS,
            };
            generator
                .generate_certificate(&request)
                .await
                .map_err(ProvisionError::Certificate)?;
            return Ok(ip);
        }

        let ips = generator
            .ip_addresses(&cert_file)
            .await
            .map_err(|e| ProvisionError::Certificate(e.context(format!("failed to read {REGISTRY_CERT}"))))?;
        let registry_ip = ips.first().copied().ok_or_else(|| {
            ProvisionError::Certificate(anyhow!(
                "{} has no IP address subject-alternative-name",
                cert_file.display()
            ))
        })?;
        debug!(%registry_ip, "reusing registry certificate");
        Ok(registry_ip)
    }

    /// Install registry and CA trust material on a machine.
    ///
    /// Steps run in order and stop at the first failure; nothing already
    /// installed is rolled back.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Certificate`] for certificate failures and
    /// [`ProvisionError::Remote`] naming the failed step for remote ones.
    pub async fn upload(
        &self,
        generator: &impl CertificateGenerator,
        ip: IpAddr,
        user: &str,
        host: &impl RemoteShell,
    ) -> Result<(), ProvisionError> {
        let registry_ip = self.registry_ip(generator, ip).await?;
        info!(%ip, %registry_ip, "uploading registry certificate");

        let registry_dir = registry_staging_dir(user, registry_ip);
        run_step(
            host,
            &format!("creating {registry_dir}"),
            &format!("mkdir -p {registry_dir}"),
        )
        .await?;
        run_step(
            host,
            &format!("creating {DOCKER_CERTS_DIR}"),
            &format!("sudo mkdir -p {DOCKER_CERTS_DIR}"),
        )
        .await?;

        for copy in registry_file_copies(&self.certs_path, user, registry_ip) {
            debug!(local = %copy.local.display(), remote = %copy.remote, "copying");
            host.copy_file(&copy.local, &copy.remote)
                .await
                .map_err(|reason| ProvisionError::Remote {
                    step: format!("copying {} to {}", copy.local.display(), copy.remote),
                    reason,
                })?;
        }

        run_step(host, "installing staged certificates", &install_staged_command(user)).await?;
        run_step(host, "trusting installation CA", &trust_ca_command()).await?;
        run_step(
            host,
            "creating registry storage",
            &format!("sudo mkdir -p {REGISTRY_STORAGE_DIR}"),
        )
        .await
    }
}

async fn file_exists(path: &Path) -> Result<bool, ProvisionError> {
    tokio::fs::try_exists(path).await.map_err(|e| {
        ProvisionError::Certificate(
            anyhow::Error::new(e).context(format!("checking {}", path.display())),
        )
    })
}

async fn run_step(host: &impl RemoteShell, step: &str, command: &str) -> Result<(), ProvisionError> {
    debug!(command, "running remote step");
    host.run_command(command)
        .await
        .map(|_| ())
        .map_err(|reason| ProvisionError::Remote {
            step: step.to_string(),
            reason,
        })
}
