//! Application service: machine provisioning orchestrator.
//!
//! Imports only from `crate::domain` and `crate::application::ports`.
//! All I/O is routed through the injected backend and certificate generator.

use std::net::IpAddr;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::future::join_all;
use tracing::{info, warn};
use url::Url;

use crate::application::ports::{
    BackendSettings, CertificateGenerator, CreateMachineRequest, Machine, MachineBackend,
    RemoteShell,
};
use crate::application::services::bootstrap::RegistryTrust;
use crate::domain::certs::local_username;
use crate::domain::{
    DriverOptions, InstallPaths, ProvisionError, ProvisionerConfig, machine_name,
    merge_driver_options, validate_config,
};

/// Provisions the machines of one installation and bootstraps their trust in
/// the installation's registry.
pub struct Orchestrator<B, G> {
    driver_name: String,
    name: String,
    paths: InstallPaths,
    machines_count: AtomicU64,
    global_driver_options: DriverOptions,
    registry_mirror: Option<Url>,
    backend: B,
    generator: G,
    trust: RegistryTrust,
}

impl<B: MachineBackend, G: CertificateGenerator> Orchestrator<B, G> {
    /// Validate `config` and open the backend's store under `install_base`.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Config`] for an invalid configuration and
    /// [`ProvisionError::BackendInit`] if the backend cannot be opened.
    pub async fn connect(
        config: &ProvisionerConfig,
        install_base: &Path,
        generator: G,
    ) -> Result<Self, ProvisionError> {
        validate_config(config)?;
        let paths = InstallPaths::new(install_base, &config.name);
        let settings = BackendSettings {
            ca_path: config.ca_path.clone(),
            store_path: paths.store_path.clone(),
        };
        let backend = B::connect(&settings)
            .await
            .map_err(ProvisionError::BackendInit)?;
        info!(installation = %config.name, store = %paths.store_path.display(), "backend connected");
        Self::with_backend(config, paths, backend, generator)
    }

    /// Build around an already-connected backend.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Config`] for an invalid configuration.
    pub fn with_backend(
        config: &ProvisionerConfig,
        paths: InstallPaths,
        backend: B,
        generator: G,
    ) -> Result<Self, ProvisionError> {
        validate_config(config)?;
        let trust = RegistryTrust::new(paths.certs_path.clone(), local_username());
        Ok(Self {
            driver_name: config.driver_name.clone(),
            name: config.name.clone(),
            paths,
            machines_count: AtomicU64::new(0),
            global_driver_options: config.driver_options.clone(),
            registry_mirror: config.registry_mirror.clone(),
            backend,
            generator,
            trust,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn paths(&self) -> &InstallPaths {
        &self.paths
    }

    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Next `<installation>-<seq>` name. Sequence numbers start at 1 and are
    /// consumed even if the creation using them fails.
    pub fn next_machine_name(&self) -> String {
        let seq = self.machines_count.fetch_add(1, Ordering::SeqCst) + 1;
        machine_name(&self.name, seq)
    }

    /// Create a machine with `options` layered over the installation's
    /// driver options.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::CreateMachine`] if the backend fails to
    /// create it and [`ProvisionError::ConfigureAuth`] if re-applying TLS
    /// auth on the new machine fails.
    pub async fn create_machine(
        &self,
        options: &DriverOptions,
    ) -> Result<Machine<B::Host>, ProvisionError> {
        let name = self.next_machine_name();
        let merged = merge_driver_options(&self.global_driver_options, options);
        info!(machine = %name, driver = %self.driver_name, "creating machine");

        let request = CreateMachineRequest {
            name: &name,
            driver_name: &self.driver_name,
            options: &merged,
            registry_mirror: self.registry_mirror.as_ref(),
        };
        let mut machine = self
            .backend
            .create_machine(&request)
            .await
            .map_err(ProvisionError::CreateMachine)?;

        let private_ip = machine.private_ip.to_string();
        if let Some(auth) = machine.auth_options.as_mut() {
            auth.add_server_cert_san(&private_ip);
            self.backend
                .configure_auth(&machine)
                .await
                .map_err(|reason| ProvisionError::ConfigureAuth {
                    machine: machine.name.clone(),
                    reason,
                })?;
        }
        Ok(machine)
    }

    /// Make `host` trust the installation's registry.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Certificate`] or [`ProvisionError::Remote`]
    /// for the first failing step.
    pub async fn upload_registry_certificate(
        &self,
        ip: IpAddr,
        user: &str,
        host: &impl RemoteShell,
    ) -> Result<(), ProvisionError> {
        self.trust.upload(&self.generator, ip, user, host).await
    }

    /// Create a machine and bootstrap its registry trust.
    ///
    /// A machine whose bootstrap fails is kept; the error names it so that
    /// [`Self::bootstrap_machine`] can finish the job.
    ///
    /// # Errors
    ///
    /// Returns the creation error as is, or [`ProvisionError::Bootstrap`]
    /// wrapping the bootstrap failure.
    pub async fn provision_machine(
        &self,
        options: &DriverOptions,
    ) -> Result<Machine<B::Host>, ProvisionError> {
        let machine = self.create_machine(options).await?;
        self.bootstrap(&machine).await?;
        info!(machine = %machine.name, address = %machine.address, "machine provisioned");
        Ok(machine)
    }

    /// Provision `count` machines concurrently, one result per machine.
    pub async fn provision_fleet(
        &self,
        count: usize,
        options: &DriverOptions,
    ) -> Vec<Result<Machine<B::Host>, ProvisionError>> {
        join_all((0..count).map(|_| self.provision_machine(options))).await
    }

    /// Re-run the registry bootstrap on an existing machine.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::LoadMachine`] if the machine is unknown, or
    /// [`ProvisionError::Bootstrap`] wrapping the bootstrap failure.
    pub async fn bootstrap_machine(&self, name: &str) -> Result<Machine<B::Host>, ProvisionError> {
        let machine = self
            .backend
            .load_machine(name)
            .await
            .map_err(|reason| ProvisionError::LoadMachine {
                machine: name.to_string(),
                reason,
            })?;
        self.bootstrap(&machine).await?;
        Ok(machine)
    }

    async fn bootstrap(&self, machine: &Machine<B::Host>) -> Result<(), ProvisionError> {
        self.upload_registry_certificate(machine.private_ip, &machine.ssh_username, &machine.host)
            .await
            .map_err(|reason| {
                warn!(machine = %machine.name, error = %reason, "registry bootstrap failed");
                ProvisionError::Bootstrap {
                    machine: machine.name.clone(),
                    address: machine.address.clone(),
                    reason: Box::new(reason),
                }
            })
    }

    /// Destroy every machine of the installation.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Teardown`] if the backend fails.
    pub async fn delete_all(&self) -> Result<(), ProvisionError> {
        info!(installation = %self.name, "deleting all machines");
        self.backend
            .delete_all()
            .await
            .map_err(ProvisionError::Teardown)
    }

    /// Release the backend.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Teardown`] if the backend fails.
    pub async fn close(&self) -> Result<(), ProvisionError> {
        self.backend.close().await.map_err(ProvisionError::Teardown)
    }
}
