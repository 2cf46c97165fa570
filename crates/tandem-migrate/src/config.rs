//! Engine configuration

use std::time::Duration;

/// Tunables for validation and repair
///
/// The defaults suit small-to-medium tables; raise `batch_size` for wide id
/// ranges and the timeouts for slow cross-region links.
#[derive(Debug, Clone)]
pub struct MigrateConfig {
    /// Topic inconsistency events are published to
    pub topic: String,
    /// Consumer group the fix workers join
    pub group: String,
    /// Ids per reverse-scan page
    pub batch_size: usize,
    /// Deadline for a single scan-side store call
    pub scan_timeout: Duration,
    /// Deadline for publishing one event
    pub publish_timeout: Duration,
    /// Deadline for repairing one row
    pub fix_timeout: Duration,
}

impl Default for MigrateConfig {
    fn default() -> Self {
        Self {
            topic: "migration_inconsistent".to_string(),
            group: "migration-fix".to_string(),
            batch_size: 100,
            scan_timeout: Duration::from_secs(1),
            publish_timeout: Duration::from_secs(1),
            fix_timeout: Duration::from_secs(1),
        }
    }
}

impl MigrateConfig {
    /// Default configuration scoped to one table: topic
    /// `<table>_inconsistent`, group `<table>-fix`
    ///
    /// Keeps event streams separate when several tables migrate at once.
    pub fn for_table(table: &str) -> Self {
        Self {
            topic: format!("{}_inconsistent", table),
            group: format!("{}-fix", table),
            ..Self::default()
        }
    }

    /// Set the event topic
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    /// Set the fix consumer group
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    /// Set the reverse-scan page size
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the per-call scan deadline
    pub fn with_scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout = timeout;
        self
    }

    /// Set the per-event publish deadline
    pub fn with_publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }

    /// Set the per-row fix deadline
    pub fn with_fix_timeout(mut self, timeout: Duration) -> Self {
        self.fix_timeout = timeout;
        self
    }
}
