//! `shipyard bootstrap <machine>`: re-run registry trust setup on an
//! existing machine.

use anyhow::Result;

use crate::application::ports::{CertificateGenerator, MachineBackend, ProgressReporter};
use crate::application::Orchestrator;
use crate::output::{OutputContext, TerminalReporter, progress};

/// Run `shipyard bootstrap <machine>`.
///
/// # Errors
///
/// Returns an error if the machine is unknown or the bootstrap fails.
pub async fn run<B, G>(ctx: &OutputContext, orch: &Orchestrator<B, G>, machine: &str) -> Result<()>
where
    B: MachineBackend,
    G: CertificateGenerator,
{
    let reporter = TerminalReporter::new(ctx);
    reporter.step(&format!("bootstrapping registry trust on {machine}"));

    let pb = progress::spinner_for(ctx, "Uploading registry certificates...");
    match orch.bootstrap_machine(machine).await {
        Ok(m) => {
            progress::finish_ok(&pb, "Registry certificates installed");
            reporter.success(&format!("{} ({})", m.name, m.address));
            Ok(())
        }
        Err(e) => {
            progress::finish_error(&pb, "Bootstrap failed");
            Err(e.into())
        }
    }
}
