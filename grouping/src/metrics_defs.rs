//! Metrics definitions for the grouping engine.

use shared::metrics_defs::{MetricDef, MetricType};

pub const CALCULATE_EVENT_GROUPING_DURATION: MetricDef = MetricDef {
    name: "grouping.calculate_event_grouping.duration",
    metric_type: MetricType::Histogram,
    description: "Time to compute the hashes of an event in seconds",
};

pub const FALLBACK_VARIANT_USED: MetricDef = MetricDef {
    name: "grouping.variants.fallback",
    metric_type: MetricType::Counter,
    description: "Number of events for which no variant contributed",
};

pub const ENHANCEMENTS_CACHE: MetricDef = MetricDef {
    name: "grouping.enhancements.cache",
    metric_type: MetricType::Counter,
    description: "Lookups of serialized enhancements, labeled by loader and outcome",
};

pub const INVALID_ENHANCEMENTS: MetricDef = MetricDef {
    name: "grouping.enhancements.invalid",
    metric_type: MetricType::Counter,
    description: "Project enhancements that failed to parse and were replaced by the defaults",
};

pub const FINGERPRINTING_CACHE: MetricDef = MetricDef {
    name: "grouping.fingerprinting.cache",
    metric_type: MetricType::Counter,
    description: "Lookups of parsed fingerprinting rules, labeled by outcome",
};

pub const INVALID_FINGERPRINTING_RULES: MetricDef = MetricDef {
    name: "grouping.fingerprinting.invalid",
    metric_type: MetricType::Counter,
    description: "Project fingerprinting rules that failed to parse and were ignored",
};

pub const ALL_METRICS: &[MetricDef] = &[
    CALCULATE_EVENT_GROUPING_DURATION,
    FALLBACK_VARIANT_USED,
    ENHANCEMENTS_CACHE,
    INVALID_ENHANCEMENTS,
    FINGERPRINTING_CACHE,
    INVALID_FINGERPRINTING_RULES,
];
