//! CLI argument parsing with clap derive

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::filter::LevelFilter;

use crate::application::Orchestrator;
use crate::application::ports::ConfigStore;
use crate::commands;
use crate::domain::ProvisionerConfig;
use crate::infra::certs::RcgenCertificateGenerator;
use crate::infra::command_runner::TokioCommandRunner;
use crate::infra::config::{CONFIG_ENV, YamlConfigStore, install_base};
use crate::infra::multipass::MultipassBackend;
use crate::output::OutputContext;

type MultipassOrchestrator = Orchestrator<
    MultipassBackend<TokioCommandRunner, RcgenCertificateGenerator>,
    RcgenCertificateGenerator,
>;

/// Provision container hosts and bootstrap trust in the installation registry
#[derive(Parser)]
#[command(
    name = "shipyard",
    version,
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Config file [default: ~/.shipyard/config.yaml]
    #[arg(long, global = true, env = CONFIG_ENV)]
    pub config: Option<PathBuf>,

    /// Installation name, overrides the config file
    #[arg(long, global = true)]
    pub name: Option<String>,

    /// Machine driver, overrides the config file
    #[arg(long, global = true)]
    pub driver: Option<String>,

    /// Directory holding ca.pem, ca-key.pem, cert.pem and key.pem
    #[arg(long, global = true)]
    pub ca_path: Option<PathBuf>,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    pub no_color: bool,

    /// Diagnostic log level, written to stderr
    #[arg(long, global = true, value_enum, default_value = "warn")]
    pub log_level: LogLevel,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create machines and install the registry certificate on them
    Provision(commands::provision::ProvisionArgs),

    /// Re-install the registry certificate on an existing machine
    Bootstrap {
        /// Machine name, e.g. shipyard-2
        machine: String,
    },

    /// Delete every machine of the installation
    Destroy(commands::destroy::DestroyArgs),

    /// Show version
    Version {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
}

/// Verbosity of the `tracing` subscriber.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

impl Cli {
    /// Load the config file and apply the command-line overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn resolve_config(&self) -> Result<ProvisionerConfig> {
        let store = self
            .config
            .clone()
            .map_or_else(YamlConfigStore::default, YamlConfigStore::at);
        let mut config = store.load()?;
        if let Some(name) = &self.name {
            config.name.clone_from(name);
        }
        if let Some(driver) = &self.driver {
            config.driver_name.clone_from(driver);
        }
        if let Some(ca_path) = &self.ca_path {
            config.ca_path = Some(ca_path.clone());
        }
        Ok(config)
    }

    /// Execute the CLI command.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the command fails.
    pub async fn run(self) -> Result<()> {
        if let Command::Version { json } = self.command {
            commands::version::run(json);
            return Ok(());
        }

        let config = self.resolve_config()?;
        let ctx = OutputContext::new(self.no_color, self.quiet);
        // Reject malformed -o flags before multipass is touched.
        let provision_options = match &self.command {
            Command::Provision(args) => Some(args.driver_options()?),
            _ => None,
        };

        let orch = MultipassOrchestrator::connect(
            &config,
            &install_base()?,
            RcgenCertificateGenerator,
        )
        .await?;

        let result = match (&self.command, provision_options) {
            (Command::Provision(args), Some(options)) => {
                commands::provision::run(&ctx, &orch, args.count, &options).await
            }
            (Command::Bootstrap { machine }, _) => {
                commands::bootstrap::run(&ctx, &orch, machine).await
            }
            (Command::Destroy(args), _) => commands::destroy::run(&ctx, &orch, args).await,
            _ => Ok(()),
        };
        orch.close().await?;
        result
    }
}
