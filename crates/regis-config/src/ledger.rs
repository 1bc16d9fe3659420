//! Audit ledger configuration.

use serde::{Deserialize, Serialize};

const fn default_verify_on_open() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LedgerConfig {
    /// Verify the whole hash chain when the store is opened. A broken chain
    /// halts writes until an operator intervenes.
    #[serde(default = "default_verify_on_open")]
    pub verify_on_open: bool,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            verify_on_open: default_verify_on_open(),
        }
    }
}
