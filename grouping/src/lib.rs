//! Event grouping engine.
//!
//! Decides which events collapse into the same issue. An event is run through
//! a versioned grouping configuration (an ordered list of strategies plus a
//! set of stack trace enhancement rules), which produces one or more named
//! variants. Every variant yields a content hash, the first hash in variant
//! priority order is the event's primary hash.
//!
//! The usual flow is:
//!
//! 1. At ingestion, [`loader::get_grouping_config_dict_for_project`] resolves
//!    the config dict that is persisted with the event.
//! 2. At write time, [`api::calculate_event_grouping`] loads that dict back,
//!    applies server-side fingerprinting rules and computes the hashes.

pub mod api;
pub mod cache;
pub mod component;
pub mod config;
pub mod context;
pub mod enhancer;
pub mod errors;
pub mod event;
pub mod fingerprinting;
pub mod glob;
pub mod loader;
pub mod metrics_defs;
pub mod parameterization;
pub mod project;
pub mod registry;
pub mod strategies;
pub mod utils;
pub mod variants;

pub use api::{
    CalculatedHashes, Variants, apply_server_fingerprinting, calculate_event_grouping,
    detect_synthetic_exception, get_grouping_info, get_grouping_variants_for_event,
    load_default_grouping_config, load_grouping_config, sort_grouping_variants,
};
pub use errors::{GroupingConfigNotFound, GroupingError, Result};
pub use event::Event;
pub use loader::get_grouping_config_dict_for_project;
pub use registry::{DEFAULT_GROUPING_CONFIG, GroupingConfig, GroupingConfigDict};
