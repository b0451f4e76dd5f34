//! Metrics definitions for the webhook service.

use shared::metrics_defs::{MetricDef, MetricType};

pub const TRIGGER_OUTCOME: MetricDef = MetricDef {
    name: "webhook.trigger.outcome",
    metric_type: MetricType::Counter,
    description: "Webhook triggers, tagged by action and outcome",
};

pub const TRIGGER_DURATION: MetricDef = MetricDef {
    name: "webhook.trigger.duration",
    metric_type: MetricType::Histogram,
    description: "Time to handle a webhook trigger end to end, in seconds",
};

pub const STORE_OPERATIONS: MetricDef = MetricDef {
    name: "webhook.store.operations",
    metric_type: MetricType::Counter,
    description: "Storage operations, tagged by operation and outcome",
};

pub const AUTH_REJECTED: MetricDef = MetricDef {
    name: "webhook.auth.rejected",
    metric_type: MetricType::Counter,
    description: "Management requests rejected for a missing or wrong secret",
};

// Every metric declared above must be listed here to be described at startup.
pub const ALL_METRICS: &[MetricDef] = &[
    TRIGGER_OUTCOME,
    TRIGGER_DURATION,
    STORE_OPERATIONS,
    AUTH_REJECTED,
];
