pub mod audit;
pub mod export;
pub mod lineage;
pub mod rebuild;
pub mod shared;
pub mod verify;

use regis_store::service::RegisService;

use crate::cli::{Commands, GlobalFlags};

/// Dispatch a parsed command to the corresponding handler module.
pub async fn dispatch(
    command: Commands,
    service: &RegisService,
    flags: &GlobalFlags,
) -> anyhow::Result<()> {
    match command {
        Commands::Verify(args) => verify::handle(&args, service, flags).await,
        Commands::Rebuild => rebuild::handle(service, flags).await,
        Commands::Lineage(args) => lineage::handle(&args, service, flags).await,
        Commands::Export(args) => export::handle(&args, service, flags).await,
        Commands::Audit(args) => audit::handle(&args, service, flags).await,
    }
}
