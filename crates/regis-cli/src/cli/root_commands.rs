use std::path::PathBuf;

use clap::{Args, Subcommand};

/// Top-level command tree.
#[derive(Clone, Debug, Subcommand)]
pub enum Commands {
    /// Verify the audit ledger hash chain.
    Verify(VerifyArgs),
    /// Replay the ledger and print the read model.
    Rebuild,
    /// Print a version's ancestry, root first.
    Lineage(LineageArgs),
    /// Dump the ledger as JSON Lines.
    Export(ExportArgs),
    /// Query audit events.
    Audit(AuditArgs),
}

#[derive(Clone, Debug, Args)]
pub struct VerifyArgs {
    /// First sequence number to check (default 1)
    #[arg(long)]
    pub from: Option<i64>,
    /// Last sequence number to check (default: ledger tail)
    #[arg(long)]
    pub to: Option<i64>,
}

#[derive(Clone, Debug, Args)]
pub struct LineageArgs {
    pub version_id: String,
}

#[derive(Clone, Debug, Args)]
pub struct ExportArgs {
    /// Output file, replaced if it exists
    pub path: PathBuf,
}

#[derive(Clone, Debug, Args)]
pub struct AuditArgs {
    #[arg(long)]
    pub entity_type: Option<String>,
    #[arg(long)]
    pub entity_id: Option<String>,
    #[arg(long)]
    pub action: Option<String>,
    #[arg(long)]
    pub correlation_id: Option<String>,
}
