//! Artifact cache and generator wait bounds.

use std::time::Duration;

use serde::{Deserialize, Serialize};

const fn default_generator_timeout_secs() -> u64 {
    120
}

const fn default_wait_grace_ms() -> u64 {
    500
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Upper bound on a single generator execution.
    #[serde(default = "default_generator_timeout_secs")]
    pub generator_timeout_secs: u64,

    /// Extra time a waiting caller allows on top of the generator timeout
    /// for the result to be recorded.
    #[serde(default = "default_wait_grace_ms")]
    pub wait_grace_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            generator_timeout_secs: default_generator_timeout_secs(),
            wait_grace_ms: default_wait_grace_ms(),
        }
    }
}

impl CacheConfig {
    pub const fn generator_timeout(&self) -> Duration {
        Duration::from_secs(self.generator_timeout_secs)
    }

    /// How long a caller waits on an in-flight generation before giving up.
    pub fn wait_timeout(&self) -> Duration {
        self.generator_timeout() + Duration::from_millis(self.wait_grace_ms)
    }
}
