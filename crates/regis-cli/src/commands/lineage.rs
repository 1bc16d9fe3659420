use regis_store::service::RegisService;

use crate::cli::GlobalFlags;
use crate::cli::root_commands::LineageArgs;
use crate::output::output;

/// Handle `regis lineage`.
pub async fn handle(
    args: &LineageArgs,
    service: &RegisService,
    flags: &GlobalFlags,
) -> anyhow::Result<()> {
    let chain = service.lineage(&args.version_id).await?;
    output(&chain, flags.format)
}
