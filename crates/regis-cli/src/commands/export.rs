use serde::Serialize;

use regis_store::service::RegisService;

use crate::cli::GlobalFlags;
use crate::cli::root_commands::ExportArgs;
use crate::output::output;

#[derive(Serialize)]
struct ExportResponse {
    path: String,
    events: u64,
}

/// Handle `regis export`.
pub async fn handle(
    args: &ExportArgs,
    service: &RegisService,
    flags: &GlobalFlags,
) -> anyhow::Result<()> {
    let events = service.export_ledger(&args.path).await?;
    tracing::info!(path = %args.path.display(), events, "ledger exported");
    output(
        &ExportResponse {
            path: args.path.display().to_string(),
            events,
        },
        flags.format,
    )
}
