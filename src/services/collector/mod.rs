pub mod scheduler;
pub mod tasks;

pub use scheduler::Scheduler;
pub use tasks::{collect_server_sizes, collect_server_stats, sync_server_databases};

use serde::Serialize;

/// Per-target result of one collector invocation. Failures are recorded,
/// never thrown: one bad target must not abort a fan-out cycle.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectOutcome {
    pub server_name: String,
    pub inserted: u64,
    pub updated: u64,
    pub added: u64,
    pub deleted: u64,
    pub recreated: u64,
    pub errors: Vec<String>,
}

impl CollectOutcome {
    pub fn new(server_name: &str) -> Self {
        Self {
            server_name: server_name.to_string(),
            ..Default::default()
        }
    }

    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}
