//! Metrics definitions for the synchronization layer.

use shared::metrics_defs::{MetricDef, MetricType};

pub const LOAD_DURATION: MetricDef = MetricDef {
    name: "sync.load.duration",
    metric_type: MetricType::Histogram,
    description: "Time to fetch and join a collection in seconds. Tagged with resource.",
};

pub const LOADS_SUPERSEDED: MetricDef = MetricDef {
    name: "sync.load.superseded",
    metric_type: MetricType::Counter,
    description: "Loads discarded because a newer load was dispatched",
};

pub const JOIN_FAILURES: MetricDef = MetricDef {
    name: "sync.join.failures",
    metric_type: MetricType::Counter,
    description: "Related-item fetches that failed during a load",
};

pub const MUTATION_OUTCOME: MetricDef = MetricDef {
    name: "sync.mutation.outcome",
    metric_type: MetricType::Counter,
    description: "Reconciled mutations. Tagged with operation, outcome.",
};

pub const MUTATION_QUEUED: MetricDef = MetricDef {
    name: "sync.mutation.queued",
    metric_type: MetricType::Counter,
    description: "Mutations that had to wait for a pending mutation on the same entity",
};

pub const BATCH_SIZE: MetricDef = MetricDef {
    name: "sync.batch.size",
    metric_type: MetricType::Histogram,
    description: "Number of entities in a bulk fan-out",
};

pub const ALL_METRICS: &[MetricDef] = &[
    LOAD_DURATION,
    LOADS_SUPERSEDED,
    JOIN_FAILURES,
    MUTATION_OUTCOME,
    MUTATION_QUEUED,
    BATCH_SIZE,
];
