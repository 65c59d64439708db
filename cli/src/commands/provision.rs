//! `shipyard provision [--count N] [-o KEY=VALUE]...`: create machines and
//! bootstrap registry trust on each.

use anyhow::Result;
use clap::Args;

use crate::application::ports::{CertificateGenerator, MachineBackend, ProgressReporter};
use crate::application::Orchestrator;
use crate::domain::{ConfigError, DriverOptions, parse_driver_option};
use crate::output::{OutputContext, TerminalReporter, progress};

/// Arguments for the provision command.
#[derive(Args, Debug)]
pub struct ProvisionArgs {
    /// Number of machines to create
    #[arg(short = 'n', long, default_value_t = 1, value_parser = clap::value_parser!(u16).range(1..))]
    pub count: u16,

    /// Driver option for these machines (repeatable)
    #[arg(short = 'o', long = "driver-opt", value_name = "KEY=VALUE")]
    pub driver_opts: Vec<String>,
}

impl ProvisionArgs {
    /// Parse the repeated `-o` flags; later keys win.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] for the first malformed option.
    pub fn driver_options(&self) -> Result<DriverOptions, ConfigError> {
        let mut options = DriverOptions::new();
        for raw in &self.driver_opts {
            let (key, value) = parse_driver_option(raw)?;
            options.insert(key, value);
        }
        Ok(options)
    }
}

/// Run `shipyard provision`.
///
/// Every machine is reported individually. A machine whose bootstrap failed
/// still exists and is listed with the command that retries it.
///
/// # Errors
///
/// Returns an error if any machine failed.
pub async fn run<B, G>(
    ctx: &OutputContext,
    orch: &Orchestrator<B, G>,
    count: u16,
    options: &DriverOptions,
) -> Result<()>
where
    B: MachineBackend,
    G: CertificateGenerator,
{
    let reporter = TerminalReporter::new(ctx);
    reporter.step(&format!(
        "provisioning {count} machine(s) for installation {}",
        orch.name()
    ));

    let pb = progress::spinner_for(ctx, "Creating machines...");
    let results = orch.provision_fleet(usize::from(count), options).await;
    let failed = results.iter().filter(|r| r.is_err()).count();
    if failed == 0 {
        progress::finish_ok(&pb, "Machines ready");
    } else {
        progress::finish_error(&pb, "Some machines failed");
    }

    for result in &results {
        match result {
            Ok(machine) => reporter.success(&format!("{} ({})", machine.name, machine.address)),
            Err(e) => {
                ctx.error(&e.to_string());
                if let Some(name) = e.stranded_machine() {
                    reporter.warn(&format!(
                        "{name} was created; retry with `shipyard bootstrap {name}`"
                    ));
                }
            }
        }
    }

    anyhow::ensure!(failed == 0, "{failed} of {count} machine(s) failed");
    Ok(())
}
