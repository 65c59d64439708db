//! `shipyard destroy [--yes]`: delete every machine of the installation.

use anyhow::{Context, Result};
use clap::Args;

use crate::application::Orchestrator;
use crate::application::ports::{CertificateGenerator, MachineBackend};
use crate::output::{OutputContext, progress};

/// Arguments for the destroy command.
#[derive(Args, Debug)]
pub struct DestroyArgs {
    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

/// Run `shipyard destroy`.
///
/// The registry certificate is kept so machines provisioned later trust the
/// same registry identity.
///
/// # Errors
///
/// Returns an error if the prompt cannot be read or teardown fails.
pub async fn run<B, G>(
    ctx: &OutputContext,
    orch: &Orchestrator<B, G>,
    args: &DestroyArgs,
) -> Result<()>
where
    B: MachineBackend,
    G: CertificateGenerator,
{
    if !args.yes {
        let confirmed = dialoguer::Confirm::new()
            .with_prompt(format!(
                "Delete every machine of installation {}?",
                orch.name()
            ))
            .default(false)
            .interact()
            .context("reading confirmation")?;
        if !confirmed {
            ctx.info("Cancelled.");
            return Ok(());
        }
    }

    let pb = progress::spinner_for(ctx, "Deleting machines...");
    match orch.delete_all().await {
        Ok(()) => {
            progress::finish_ok(&pb, "Machines deleted");
            ctx.success(&format!("installation {} destroyed", orch.name()));
            Ok(())
        }
        Err(e) => {
            progress::finish_error(&pb, "Teardown failed");
            Err(e.into())
        }
    }
}
