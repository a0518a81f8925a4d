//! Metrics definitions for the webhook collector.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    Counter,
    Histogram,
}

#[derive(Debug, Clone, Copy)]
pub struct MetricDef {
    pub name: &'static str,
    pub metric_type: MetricType,
    pub description: &'static str,
}

pub const WEBHOOK_RECEIVED: MetricDef = MetricDef {
    name: "webhook.received",
    metric_type: MetricType::Counter,
    description: "Number of webhook deliveries received",
};

pub const WEBHOOK_PERSISTED: MetricDef = MetricDef {
    name: "webhook.persisted",
    metric_type: MetricType::Counter,
    description: "Number of deliveries that ended with a stored measures row",
};

pub const WEBHOOK_FAILED: MetricDef = MetricDef {
    name: "webhook.failed",
    metric_type: MetricType::Counter,
    description: "Number of deliveries answered with an internal server error",
};

pub const SONAR_API_DURATION: MetricDef = MetricDef {
    name: "sonar_api.request.duration",
    metric_type: MetricType::Histogram,
    description: "Time for one call to the Sonar API in seconds, tagged by endpoint",
};

pub const ALL_METRICS: &[MetricDef] = &[
    WEBHOOK_RECEIVED,
    WEBHOOK_PERSISTED,
    WEBHOOK_FAILED,
    SONAR_API_DURATION,
];
