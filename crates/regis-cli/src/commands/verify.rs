use regis_store::repos::audit::ChainVerification;
use regis_store::service::RegisService;

use crate::cli::GlobalFlags;
use crate::cli::root_commands::VerifyArgs;
use crate::output::output;

/// Handle `regis verify`. Fails after printing the outcome if the chain is
/// broken.
pub async fn handle(
    args: &VerifyArgs,
    service: &RegisService,
    flags: &GlobalFlags,
) -> anyhow::Result<()> {
    let outcome = service.verify_chain(args.from, args.to).await?;
    output(&outcome, flags.format)?;
    match outcome {
        ChainVerification::Ok { .. } => Ok(()),
        ChainVerification::BrokenAt { seq, reason, .. } => {
            anyhow::bail!("audit chain broken at seq {seq}: {reason}")
        }
    }
}
