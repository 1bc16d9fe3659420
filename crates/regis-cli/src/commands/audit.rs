use regis_core::enums::{AuditAction, EntityType};
use regis_store::repos::audit::AuditFilter;
use regis_store::service::RegisService;

use crate::cli::GlobalFlags;
use crate::cli::root_commands::AuditArgs;
use crate::commands::shared::parse_enum;
use crate::output::output;

/// Handle `regis audit`.
pub async fn handle(
    args: &AuditArgs,
    service: &RegisService,
    flags: &GlobalFlags,
) -> anyhow::Result<()> {
    let filter = AuditFilter {
        entity_type: args
            .entity_type
            .as_deref()
            .map(|value| parse_enum::<EntityType>(value, "entity-type"))
            .transpose()?,
        entity_id: args.entity_id.clone(),
        action: args
            .action
            .as_deref()
            .map(|value| parse_enum::<AuditAction>(value, "action"))
            .transpose()?,
        correlation_id: args.correlation_id.clone(),
        limit: Some(flags.limit.unwrap_or(50)),
    };
    let events = service.query_audit(&filter).await?;
    output(&events, flags.format)
}
