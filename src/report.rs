use chrono::{DateTime, Local};
use std::time::Duration;
use uuid::Uuid;

/// What happened to one collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionReport {
    /// collection name.
    pub name: String,
    /// documents read from source, every one of them was sent to target.
    pub read: u64,
    /// documents target confirmed inserted.
    pub inserted: u64,
    /// documents target refused individually, e.g. duplicate `_id`.
    pub rejected: u64,
    /// bulk insert calls made.
    pub batches: u64,
    /// time spent on this collection.
    pub elapsed: Duration,
}

impl CollectionReport {
    /// empty report for collection `name`.
    pub fn new(name: &str) -> Self {
        CollectionReport {
            name: name.to_string(),
            read: 0,
            inserted: 0,
            rejected: 0,
            batches: 0,
            elapsed: Duration::default(),
        }
    }
}

/// Result of a successful run.
#[derive(Debug, Clone)]
pub struct MigrationSummary {
    /// identify this run in logs.
    pub run_id: Uuid,
    /// when the run began.
    pub started_at: DateTime<Local>,
    /// one report per migrated collection, in completion order.
    pub collections: Vec<CollectionReport>,
    /// wall time of the run.
    pub elapsed: Duration,
}

impl MigrationSummary {
    /// documents read over all collections.
    pub fn total_read(&self) -> u64 {
        self.collections.iter().map(|c| c.read).sum()
    }

    /// documents confirmed inserted over all collections.
    pub fn total_inserted(&self) -> u64 {
        self.collections.iter().map(|c| c.inserted).sum()
    }

    /// documents rejected by target over all collections.
    pub fn total_rejected(&self) -> u64 {
        self.collections.iter().map(|c| c.rejected).sum()
    }

    /// get report of collection `name`.
    pub fn collection(&self, name: &str) -> Option<&CollectionReport> {
        self.collections.iter().find(|c| c.name == name)
    }
}
