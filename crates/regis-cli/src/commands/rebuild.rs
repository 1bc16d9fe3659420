use std::collections::BTreeMap;

use serde::Serialize;

use regis_store::projection::ReadModel;
use regis_store::service::RegisService;

use crate::cli::GlobalFlags;
use crate::output::output;

#[derive(Serialize)]
struct RebuildResponse<'a> {
    status_counts: BTreeMap<&'static str, usize>,
    #[serde(flatten)]
    model: &'a ReadModel,
}

/// Handle `regis rebuild`.
pub async fn handle(service: &RegisService, flags: &GlobalFlags) -> anyhow::Result<()> {
    let model = service.rebuild_read_model().await?;
    output(
        &RebuildResponse {
            status_counts: model.status_counts(),
            model: &model,
        },
        flags.format,
    )
}
