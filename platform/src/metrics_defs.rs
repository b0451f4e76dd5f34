//! Metrics definitions for hosting platform calls.

use shared::metrics_defs::{MetricDef, MetricType};

pub const REMOTE_CALL_FAILURES: MetricDef = MetricDef {
    name: "platform.call.failed",
    metric_type: MetricType::Counter,
    description: "Hosting platform calls that failed, tagged by operation",
};

pub const BACKUP_POLLS: MetricDef = MetricDef {
    name: "platform.backup.polls",
    metric_type: MetricType::Counter,
    description: "Backup status polls sent to the hosting platform",
};

pub const BACKUP_DURATION: MetricDef = MetricDef {
    name: "platform.backup.duration",
    metric_type: MetricType::Histogram,
    description: "Time from backup request until completion or abandonment, in seconds",
};

pub const ALL_METRICS: &[MetricDef] = &[REMOTE_CALL_FAILURES, BACKUP_POLLS, BACKUP_DURATION];
