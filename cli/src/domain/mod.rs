//! Domain layer: pure business logic, types, and validation.
//!
//! This module has zero imports from `crate::infra`, `crate::commands`,
//! `crate::application`, `tokio`, `std::fs`, `std::process`, or `std::net`
//! sockets. Functions are synchronous and take data in, returning data out.

pub mod certs;
pub mod config;
pub mod error;
pub mod machine;

pub use config::{DriverOptions, ProvisionerConfig, parse_driver_option, validate_config};
pub use error::{ConfigError, ProvisionError};
pub use machine::{AuthOptions, InstallPaths, machine_name, merge_driver_options};
