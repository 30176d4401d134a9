pub mod logging;
pub mod metrics_defs;
