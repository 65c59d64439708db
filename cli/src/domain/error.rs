//! Typed domain error enums.
//!
//! This module has zero imports from `crate::infra`, `crate::commands`,
//! `crate::application`, `tokio`, `std::fs`, `std::process`, or `std::net`.
//! All error types implement `thiserror::Error` and convert to `anyhow::Error`
//! via the `?` operator.

use thiserror::Error;

// ── Config errors ─────────────────────────────────────────────────────────────

/// Errors raised while validating configuration, before any resource is touched.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(
        "Invalid installation name '{0}': must match ^[a-z0-9]([a-z0-9-]{{0,61}}[a-z0-9])?$"
    )]
    InvalidName(String),

    #[error("Driver name must not be empty.")]
    MissingDriver,

    #[error("Driver option keys must not be empty.")]
    EmptyOptionKey,

    #[error("Invalid driver option '{0}': expected KEY=VALUE")]
    MalformedOption(String),
}

// ── Provisioning errors ───────────────────────────────────────────────────────

/// Errors surfaced by the provisioning orchestrator.
///
/// Every variant names the stage that failed. Collaborator failures are kept
/// as `anyhow::Error` so their full context chain survives to the caller.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("cannot initialize machine backend: {0:#}")]
    BackendInit(anyhow::Error),

    #[error("error creating machine: {0:#}")]
    CreateMachine(anyhow::Error),

    #[error("error configuring TLS auth on {machine}: {reason:#}")]
    ConfigureAuth {
        machine: String,
        reason: anyhow::Error,
    },

    #[error("error loading machine {machine}: {reason:#}")]
    LoadMachine {
        machine: String,
        reason: anyhow::Error,
    },

    #[error("registry certificate: {0:#}")]
    Certificate(anyhow::Error),

    #[error("{step}: {reason:#}")]
    Remote {
        step: String,
        reason: anyhow::Error,
    },

    #[error("error uploading registry certificates to {machine} ({address}): {reason}")]
    Bootstrap {
        machine: String,
        address: String,
        reason: Box<ProvisionError>,
    },

    #[error("teardown failed: {0:#}")]
    Teardown(anyhow::Error),
}

impl ProvisionError {
    /// Name of the machine left behind by a failed bootstrap, if any.
    ///
    /// Such a machine exists and only needs `shipyard bootstrap <name>`.
    #[must_use]
    pub fn stranded_machine(&self) -> Option<&str> {
        match self {
            Self::Bootstrap { machine, .. } => Some(machine),
            _ => None,
        }
    }
}
