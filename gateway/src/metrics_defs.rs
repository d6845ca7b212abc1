//! Metrics definitions for the gateway.

use shared::metrics_defs::{MetricDef, MetricType};

pub const GATEWAY_REQUEST_DURATION: MetricDef = MetricDef {
    name: "gateway.request.duration",
    metric_type: MetricType::Histogram,
    description: "Time to complete a REST call in seconds. Tagged with method, status.",
};

pub const GATEWAY_READ_RETRIES: MetricDef = MetricDef {
    name: "gateway.read.retries",
    metric_type: MetricType::Counter,
    description: "Number of reads retried after a retriable status",
};

pub const ALL_METRICS: &[MetricDef] = &[GATEWAY_REQUEST_DURATION, GATEWAY_READ_RETRIES];
