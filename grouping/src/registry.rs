//! Versioned grouping configurations.
//!
//! A configuration pins everything that influences the hash of an event: the
//! strategies, the enhancement base and the initial context flags. Published
//! configurations never change, new behavior always gets a new id.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, LazyLock};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::enhancer::Enhancements;
use crate::errors::{GroupingConfigNotFound, GroupingError, Result};
use crate::strategies::{DEFAULT_STRATEGIES, Strategy};

pub const DEFAULT_GROUPING_CONFIG: &str = "newstyle:2023-01-11";

/// Flags every grouping context starts out with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct InitialContext {
    pub detect_synthetic_exception_types: bool,
    pub normalize_message: bool,
    pub javascript_fuzzing: bool,
    pub native_fuzzing: bool,
    pub with_exception_value_fallback: bool,
    pub java_cglib_hibernate_logic: bool,
    pub php_detect_anonymous_classes: bool,
    /// Platforms whose frames hash their context line.
    pub contextline_platforms: &'static [&'static str],
}

impl InitialContext {
    const DEFAULT: InitialContext = InitialContext {
        detect_synthetic_exception_types: false,
        normalize_message: true,
        javascript_fuzzing: true,
        native_fuzzing: true,
        with_exception_value_fallback: true,
        java_cglib_hibernate_logic: true,
        php_detect_anonymous_classes: true,
        contextline_platforms: &["javascript", "node", "python", "php", "ruby"],
    };

    /// The flags as the bottom layer of a grouping context.
    pub fn to_layer(&self) -> HashMap<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map.into_iter().collect(),
            _ => HashMap::new(),
        }
    }
}

/// An immutable, registered grouping configuration.
#[derive(Clone, Copy)]
pub struct StrategyConfiguration {
    pub id: &'static str,
    pub base: Option<&'static str>,
    pub changelog: &'static str,
    pub enhancements_base: &'static str,
    pub fingerprinting_bases: &'static [&'static str],
    pub initial_context: InitialContext,
    strategies: &'static [&'static dyn Strategy],
}

impl StrategyConfiguration {
    const fn new(id: &'static str) -> Self {
        StrategyConfiguration {
            id,
            base: None,
            changelog: "",
            enhancements_base: "common:2019-03-23",
            fingerprinting_bases: &[],
            initial_context: InitialContext::DEFAULT,
            strategies: DEFAULT_STRATEGIES,
        }
    }

    /// Starts a new configuration that behaves like `self` unless overridden.
    const fn inherit(self, id: &'static str) -> Self {
        StrategyConfiguration {
            id,
            base: Some(self.id),
            changelog: "",
            ..self
        }
    }

    const fn changelog(mut self, changelog: &'static str) -> Self {
        self.changelog = changelog;
        self
    }

    const fn enhancements_base(mut self, base: &'static str) -> Self {
        self.enhancements_base = base;
        self
    }

    const fn fingerprinting_bases(mut self, bases: &'static [&'static str]) -> Self {
        self.fingerprinting_bases = bases;
        self
    }

    const fn initial_context(mut self, initial_context: InitialContext) -> Self {
        self.initial_context = initial_context;
        self
    }

    /// Strategies in the order they are evaluated.
    pub fn iter_strategies(&self) -> impl Iterator<Item = &'static dyn Strategy> {
        self.strategies.iter().copied()
    }
}

impl fmt::Debug for StrategyConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrategyConfiguration")
            .field("id", &self.id)
            .field("base", &self.base)
            .field("enhancements_base", &self.enhancements_base)
            .field("fingerprinting_bases", &self.fingerprinting_bases)
            .field("initial_context", &self.initial_context)
            .field(
                "strategies",
                &self.iter_strategies().map(|s| s.id()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

const NEWSTYLE_2019_10_29: StrategyConfiguration =
    StrategyConfiguration::new("newstyle:2019-10-29")
        .changelog("Initial newstyle grouping.")
        .initial_context(InitialContext {
            normalize_message: false,
            java_cglib_hibernate_logic: false,
            php_detect_anonymous_classes: false,
            ..InitialContext::DEFAULT
        });

const NEWSTYLE_2023_01_11: StrategyConfiguration = NEWSTYLE_2019_10_29
    .inherit("newstyle:2023-01-11")
    .changelog(
        "Event messages are parameterized before grouping, \
         more system frames are excluded from in-app stack traces.",
    )
    .enhancements_base("newstyle:2023-01-11")
    .fingerprinting_bases(&["javascript@2024-02-02"])
    .initial_context(InitialContext::DEFAULT);

const MOBILE_2021_04_02: StrategyConfiguration = NEWSTYLE_2019_10_29
    .inherit("mobile:2021-04-02")
    .changelog("Synthetic exception types are detected and mobile frames are classified.")
    .enhancements_base("mobile:2021-04-02")
    .initial_context(InitialContext {
        detect_synthetic_exception_types: true,
        ..InitialContext::DEFAULT
    });

static REGISTERED: [StrategyConfiguration; 3] =
    [NEWSTYLE_2019_10_29, NEWSTYLE_2023_01_11, MOBILE_2021_04_02];

static DEFAULT: &StrategyConfiguration = &NEWSTYLE_2023_01_11;

static CONFIGURATIONS: LazyLock<IndexMap<&'static str, &'static StrategyConfiguration>> =
    LazyLock::new(build_configurations);

fn build_configurations() -> IndexMap<&'static str, &'static StrategyConfiguration> {
    let mut rv = IndexMap::new();
    for configuration in &REGISTERED {
        rv.insert(configuration.id, configuration);
    }
    rv
}

/// All registered configurations, in registration order.
pub fn configurations() -> &'static IndexMap<&'static str, &'static StrategyConfiguration> {
    &CONFIGURATIONS
}

pub fn get_configuration(id: &str) -> Option<&'static StrategyConfiguration> {
    CONFIGURATIONS.get(id).copied()
}

pub fn is_known_configuration(id: &str) -> bool {
    CONFIGURATIONS.contains_key(id)
}

pub fn default_configuration() -> &'static StrategyConfiguration {
    DEFAULT
}

/// The persisted form of a grouping config, attached to events at ingestion.
///
/// `enhancements` is the serialized enhancements blob. An empty blob stands
/// for the configuration's default enhancements.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupingConfigDict {
    pub id: String,
    #[serde(default)]
    pub enhancements: String,
}

impl GroupingConfigDict {
    pub fn new(id: impl Into<String>, enhancements: impl Into<String>) -> Self {
        GroupingConfigDict {
            id: id.into(),
            enhancements: enhancements.into(),
        }
    }

    /// Reads a dict stored on an event. The `id` is mandatory.
    pub fn from_value(value: &Value) -> Result<Self> {
        let id = value
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| GroupingError::MalformedConfig("missing id".to_owned()))?;
        let enhancements = match value.get("enhancements") {
            None | Some(Value::Null) => "",
            Some(Value::String(enhancements)) => enhancements.as_str(),
            Some(_) => {
                return Err(GroupingError::MalformedConfig(
                    "enhancements must be a string".to_owned(),
                ));
            }
        };
        Ok(GroupingConfigDict::new(id, enhancements))
    }
}

/// A loaded grouping configuration: the registered strategies plus the
/// project's enhancements.
#[derive(Clone, Debug)]
pub struct GroupingConfig {
    configuration: &'static StrategyConfiguration,
    enhancements: Arc<Enhancements>,
    dict: GroupingConfigDict,
}

impl GroupingConfig {
    pub fn new(
        configuration: &'static StrategyConfiguration,
        enhancements: Arc<Enhancements>,
        dict: GroupingConfigDict,
    ) -> Self {
        GroupingConfig {
            configuration,
            enhancements,
            dict,
        }
    }

    /// The configuration's default enhancements and no custom rules.
    pub fn with_default_enhancements(configuration: &'static StrategyConfiguration) -> Self {
        GroupingConfig::new(
            configuration,
            Arc::new(Enhancements::with_bases([configuration.enhancements_base])),
            GroupingConfigDict::new(configuration.id, ""),
        )
    }

    pub fn from_dict(dict: &GroupingConfigDict) -> Result<Self> {
        let configuration = get_configuration(&dict.id)
            .ok_or_else(|| GroupingConfigNotFound(dict.id.clone()))?;
        let enhancements = if dict.enhancements.is_empty() {
            Enhancements::with_bases([configuration.enhancements_base])
        } else {
            Enhancements::loads(&dict.enhancements)?
        };
        Ok(GroupingConfig::new(
            configuration,
            Arc::new(enhancements),
            dict.clone(),
        ))
    }

    pub fn id(&self) -> &'static str {
        self.configuration.id
    }

    pub fn configuration(&self) -> &'static StrategyConfiguration {
        self.configuration
    }

    pub fn iter_strategies(&self) -> impl Iterator<Item = &'static dyn Strategy> {
        self.configuration.iter_strategies()
    }

    pub fn enhancements(&self) -> &Enhancements {
        &self.enhancements
    }

    pub fn initial_context(&self) -> &InitialContext {
        &self.configuration.initial_context
    }

    pub fn as_dict(&self) -> &GroupingConfigDict {
        &self.dict
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_configuration_is_registered() {
        assert_eq!(default_configuration().id, DEFAULT_GROUPING_CONFIG);
        assert!(is_known_configuration(DEFAULT_GROUPING_CONFIG));
        assert_eq!(
            configurations().keys().copied().collect::<Vec<_>>(),
            vec!["newstyle:2019-10-29", "newstyle:2023-01-11", "mobile:2021-04-02"]
        );
    }

    #[test]
    fn test_inheritance() {
        let mobile = get_configuration("mobile:2021-04-02").unwrap();
        assert_eq!(mobile.base, Some("newstyle:2019-10-29"));
        assert_eq!(mobile.enhancements_base, "mobile:2021-04-02");
        assert!(mobile.initial_context.detect_synthetic_exception_types);
        assert!(!default_configuration().initial_context.detect_synthetic_exception_types);
        assert!(!NEWSTYLE_2019_10_29.initial_context.normalize_message);
        assert_eq!(
            default_configuration().fingerprinting_bases,
            &["javascript@2024-02-02"]
        );
    }

    #[test]
    fn test_strategy_order() {
        let ids: Vec<_> = default_configuration()
            .iter_strategies()
            .map(|s| s.id())
            .collect();
        assert_eq!(
            ids,
            vec![
                "chained-exception",
                "threads",
                "stacktrace",
                "template",
                "csp",
                "hpkp",
                "expect-staple",
                "expect-ct",
                "message",
            ]
        );
    }

    #[test]
    fn test_initial_context_layer() {
        let layer = default_configuration().initial_context.to_layer();
        assert_eq!(layer.get("normalize_message"), Some(&json!(true)));
        assert_eq!(
            layer.get("contextline_platforms"),
            Some(&json!(["javascript", "node", "python", "php", "ruby"]))
        );
    }

    #[test]
    fn test_config_dict_from_value() {
        let dict = GroupingConfigDict::from_value(&json!({"id": "mobile:2021-04-02"})).unwrap();
        assert_eq!(dict, GroupingConfigDict::new("mobile:2021-04-02", ""));
        assert!(matches!(
            GroupingConfigDict::from_value(&json!({"enhancements": ""})),
            Err(GroupingError::MalformedConfig(_))
        ));
    }

    #[test]
    fn test_load_from_dict() {
        let config = GroupingConfig::from_dict(&GroupingConfigDict::new(DEFAULT_GROUPING_CONFIG, ""))
            .unwrap();
        assert_eq!(config.enhancements().bases(), &["newstyle:2023-01-11"]);

        let dumped = Enhancements::from_config_string("function:foo +app", &["common:2019-03-23"])
            .unwrap()
            .dumps()
            .unwrap();
        let config =
            GroupingConfig::from_dict(&GroupingConfigDict::new("newstyle:2019-10-29", dumped))
                .unwrap();
        assert_eq!(config.enhancements().rules().len(), 1);

        let err = GroupingConfig::from_dict(&GroupingConfigDict::new("legacy:2019-03-12", ""))
            .unwrap_err();
        assert_eq!(
            err,
            GroupingError::ConfigNotFound(GroupingConfigNotFound("legacy:2019-03-12".to_owned()))
        );
    }
}
