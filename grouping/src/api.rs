//! Entry points of the grouping engine: resolving the variants of an event,
//! turning them into hashes and the two sanctioned event mutations.

use std::sync::LazyLock;
use std::time::Instant;

use indexmap::IndexMap;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value, json};

use shared::{counter, histogram};

use crate::cache::Cache;
use crate::component::GroupingComponent;
use crate::context::GroupingContext;
use crate::errors::Result;
use crate::event::Event;
use crate::fingerprinting::FingerprintingRules;
use crate::loader::get_fingerprinting_config_for_project;
use crate::metrics_defs::{CALCULATE_EVENT_GROUPING_DURATION, FALLBACK_VARIANT_USED};
use crate::project::Project;
use crate::registry::{GroupingConfig, GroupingConfigDict, default_configuration};
use crate::strategies::ComponentsByVariant;
use crate::utils::{
    DEFAULT_FINGERPRINT_VALUES, expand_title_template, hash_from_values,
    is_default_fingerprint_var, is_hex_hash, resolve_fingerprint_values,
};
use crate::variants::GroupingVariant;

/// Variants of an event keyed by name, in the order they were computed.
pub type Variants = IndexMap<String, GroupingVariant>;

/// Variants that describe the same stack trace at increasing depth. They
/// hash separately from the flat variants.
pub const HIERARCHICAL_VARIANTS: [&str; 6] = [
    "app-depth-1",
    "app-depth-2",
    "app-depth-3",
    "app-depth-4",
    "app-depth-5",
    "app-depth-max",
];

static SYNTHETIC_EXCEPTION_TYPE_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^(EXC_|EXCEPTION_|SIG|KERN_|ILL_)[A-Z0-9_ ]+(/[A-Z0-9_x ]+)?$").ok()
});

/// The hashes of an event, primary hash first.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CalculatedHashes {
    pub hashes: Vec<String>,
    pub hierarchical_hashes: Vec<String>,
}

impl CalculatedHashes {
    pub fn from_variants(variants: &Variants) -> Self {
        let (flat, hierarchical) = sort_grouping_variants(variants);
        CalculatedHashes {
            hashes: unique_hashes(&flat),
            hierarchical_hashes: unique_hashes(&hierarchical),
        }
    }

    pub fn primary_hash(&self) -> Option<&str> {
        self.hashes.first().map(String::as_str)
    }
}

fn unique_hashes(variants: &[(&str, &GroupingVariant)]) -> Vec<String> {
    let mut rv: Vec<String> = Vec::new();
    for (_, variant) in variants {
        if let Some(hash) = variant.get_hash()
            && !rv.contains(&hash)
        {
            rv.push(hash);
        }
    }
    rv
}

pub fn load_default_grouping_config() -> GroupingConfig {
    GroupingConfig::with_default_enhancements(default_configuration())
}

/// Loads a persisted config dict, or the default config for `None`.
pub fn load_grouping_config(config_dict: Option<&GroupingConfigDict>) -> Result<GroupingConfig> {
    match config_dict {
        Some(config_dict) => GroupingConfig::from_dict(config_dict),
        None => Ok(load_default_grouping_config()),
    }
}

/// Evaluates all strategies and merges their components per variant.
///
/// The first strategy with a contributing component wins. Contributing
/// components of later strategies are kept for similarity only.
fn get_component_trees_for_variants(
    event: &Event,
    context: &mut GroupingContext<'_>,
) -> ComponentsByVariant {
    let mut precedence_hint: Option<String> = None;
    let mut per_variant: IndexMap<String, Vec<GroupingComponent>> = IndexMap::new();

    for strategy in context.config().iter_strategies() {
        let mut components = strategy.evaluate(event, context);

        match &precedence_hint {
            None => {
                let mut contributing: Vec<&str> = components
                    .iter()
                    .filter(|(_, component)| component.contributes())
                    .map(|(variant, _)| variant.as_str())
                    .collect();
                if !contributing.is_empty() {
                    contributing.sort_unstable();
                    let name = strategy.name();
                    precedence_hint = Some(format!(
                        "{name} of {} take{} precedence",
                        contributing.join("/"),
                        if name.ends_with('s') { "" } else { "s" }
                    ));
                }
            }
            Some(hint) => {
                for component in components.values_mut() {
                    if component.contributes() {
                        component.mark_superseded(hint.clone());
                    }
                }
            }
        }

        for (variant, component) in components {
            per_variant.entry(variant).or_default().push(component);
        }
    }

    per_variant
        .into_iter()
        .map(|(variant, components)| {
            let mut component = GroupingComponent::with_values(variant.clone(), components);
            if !component.contributes()
                && let Some(hint) = &precedence_hint
            {
                component.set_hint(hint.clone());
            }
            (variant, component)
        })
        .collect()
}

/// Computes all variants of an event. Uses the default config if none is given.
pub fn get_grouping_variants_for_event(event: &Event, config: Option<&GroupingConfig>) -> Variants {
    if let Some(checksum) = event.checksum() {
        let mut rv = Variants::new();
        if is_hex_hash(checksum) {
            rv.insert(
                "checksum".to_owned(),
                GroupingVariant::Checksum {
                    checksum: checksum.to_owned(),
                },
            );
            return rv;
        }
        rv.insert(
            "hashed-checksum".to_owned(),
            GroupingVariant::HashedChecksum {
                hash: hash_from_values([checksum]),
                raw_checksum: checksum.to_owned(),
            },
        );
        if checksum.chars().count() <= 32 {
            rv.insert(
                "checksum".to_owned(),
                GroupingVariant::Checksum {
                    checksum: checksum.to_owned(),
                },
            );
        }
        return rv;
    }

    let default_config;
    let config = match config {
        Some(config) => config,
        None => {
            default_config = load_default_grouping_config();
            &default_config
        }
    };

    let fingerprint = event
        .fingerprint()
        .unwrap_or_else(|| vec![DEFAULT_FINGERPRINT_VALUES[0].to_owned()]);
    let fingerprint_info = event
        .data
        .get("_fingerprint_info")
        .filter(|info| info.is_object())
        .cloned()
        .unwrap_or_else(|| json!({}));
    let defaults_referenced = fingerprint
        .iter()
        .filter(|value| is_default_fingerprint_var(value))
        .count();

    let mut context = GroupingContext::new(config);
    let components = get_component_trees_for_variants(event, &mut context);
    let config_id = config.id().to_owned();

    let mut rv = Variants::new();
    if defaults_referenced == 0 {
        for (variant, mut component) in components {
            component.mark_superseded("custom fingerprint takes precedence");
            rv.insert(
                variant,
                GroupingVariant::Component {
                    component,
                    config_id: config_id.clone(),
                },
            );
        }
        let values = resolve_fingerprint_values(&fingerprint, &event.data);
        let is_builtin = fingerprint_info.pointer("/matched_rule/is_builtin") == Some(&Value::Bool(true));
        if is_builtin {
            rv.insert(
                "built-in-fingerprint".to_owned(),
                GroupingVariant::BuiltInFingerprint {
                    values,
                    fingerprint_info,
                },
            );
        } else {
            rv.insert(
                "custom-fingerprint".to_owned(),
                GroupingVariant::CustomFingerprint {
                    values,
                    fingerprint_info,
                },
            );
        }
    } else if defaults_referenced == 1 && fingerprint.len() == 1 {
        for (variant, component) in components {
            rv.insert(
                variant,
                GroupingVariant::Component {
                    component,
                    config_id: config_id.clone(),
                },
            );
        }
    } else {
        let values = resolve_fingerprint_values(&fingerprint, &event.data);
        for (variant, component) in components {
            rv.insert(
                variant,
                GroupingVariant::SaltedComponent {
                    values: values.clone(),
                    component,
                    config_id: config_id.clone(),
                    fingerprint_info: fingerprint_info.clone(),
                },
            );
        }
    }

    if !rv.values().any(GroupingVariant::contributes) {
        counter!(FALLBACK_VARIANT_USED).increment(1);
        rv.insert("fallback".to_owned(), GroupingVariant::Fallback);
    }
    rv
}

/// Splits variants into flat ones (with `system` moved last) and
/// hierarchical ones ordered by depth.
pub fn sort_grouping_variants(
    variants: &Variants,
) -> (Vec<(&str, &GroupingVariant)>, Vec<(&str, &GroupingVariant)>) {
    let mut flat = Vec::new();
    let mut hierarchical = Vec::new();
    for (name, variant) in variants {
        match HIERARCHICAL_VARIANTS.iter().position(|v| *v == name.as_str()) {
            Some(idx) => hierarchical.push((idx, (name.as_str(), variant))),
            None => flat.push((name.as_str(), variant)),
        }
    }
    flat.sort_by_key(|(name, _)| *name == "system");
    hierarchical.sort_by_key(|(idx, _)| *idx);
    (flat, hierarchical.into_iter().map(|(_, v)| v).collect())
}

pub fn get_hashes_for_event(event: &Event, config: &GroupingConfig) -> CalculatedHashes {
    CalculatedHashes::from_variants(&get_grouping_variants_for_event(event, Some(config)))
}

/// The grouping info payload: every variant's dict, keyed by variant name.
pub fn get_grouping_info(event: &Event, config: &GroupingConfig) -> Value {
    let variants = get_grouping_variants_for_event(event, Some(config));
    let rv: Map<String, Value> = variants
        .iter()
        .map(|(name, variant)| {
            let mut dict = variant.as_dict();
            if let Some(map) = dict.as_object_mut() {
                map.insert("key".to_owned(), json!(name));
            }
            (name.clone(), dict)
        })
        .collect();
    Value::Object(rv)
}

/// Marks exceptions whose type names a signal or OS error as synthetic.
///
/// Only runs if the config asks for it and never overrides an existing
/// `mechanism.synthetic` value.
pub fn detect_synthetic_exception(event_data: &mut Value, config: &GroupingConfig) {
    if !config.initial_context().detect_synthetic_exception_types {
        return;
    }
    let Some(re) = SYNTHETIC_EXCEPTION_TYPE_RE.as_ref() else {
        return;
    };
    let Some(exceptions) = event_data
        .pointer_mut("/exception/values")
        .and_then(Value::as_array_mut)
    else {
        return;
    };

    for exception in exceptions.iter_mut().filter_map(Value::as_object_mut) {
        let is_synthetic_type = exception
            .get("type")
            .and_then(Value::as_str)
            .is_some_and(|ty| re.is_match(ty));
        let Some(mechanism) = exception.get_mut("mechanism").and_then(Value::as_object_mut) else {
            continue;
        };
        if mechanism.get("synthetic").is_some_and(|value| !value.is_null()) {
            continue;
        }
        if is_synthetic_type {
            mechanism.insert("synthetic".to_owned(), Value::Bool(true));
        }
    }
}

/// Replaces the event's fingerprint with the one of the first matching rule.
///
/// Records the client fingerprint and the matched rule under
/// `_fingerprint_info`, and applies the rule's `title` attribute if allowed.
pub fn apply_server_fingerprinting(
    event_data: &mut Value,
    rules: &FingerprintingRules,
    allow_custom_title: bool,
) {
    let mut fingerprint_info = Map::new();

    let client_fingerprint = event_data.get("fingerprint").cloned();
    if let Some(Value::Array(client)) = &client_fingerprint {
        let is_default = matches!(client.as_slice(), [Value::String(value)] if is_default_fingerprint_var(value));
        if !client.is_empty() && !is_default {
            fingerprint_info.insert("client_fingerprint".to_owned(), Value::Array(client.clone()));
        }
    }

    let matched = rules
        .get_fingerprint_values_for_event(event_data)
        .map(|(rule, fingerprint, attributes)| {
            let title = attributes
                .get("title")
                .filter(|_| allow_custom_title)
                .map(|title| expand_title_template(title, event_data));
            (rule.to_json(), fingerprint.to_vec(), title)
        });

    let Some(data) = event_data.as_object_mut() else {
        return;
    };
    if let Some((rule, fingerprint, title)) = matched {
        if let Some(title) = title {
            data.insert("title".to_owned(), Value::String(title));
        }
        data.insert("fingerprint".to_owned(), json!(fingerprint));
        fingerprint_info.insert("matched_rule".to_owned(), rule);
    }
    if !fingerprint_info.is_empty() {
        data.insert("_fingerprint_info".to_owned(), Value::Object(fingerprint_info));
    }
}

/// Computes the hashes of an event with the config dict it was ingested with.
///
/// Runs synthetic exception detection and server-side fingerprinting on the
/// event before resolving variants.
pub fn calculate_event_grouping(
    project: &dyn Project,
    event: &mut Event,
    config_dict: &GroupingConfigDict,
    cache: &dyn Cache,
) -> Result<CalculatedHashes> {
    let start = Instant::now();
    let config = load_grouping_config(Some(config_dict))?;

    detect_synthetic_exception(&mut event.data, &config);

    if event.fingerprint().is_none()
        && let Some(data) = event.data.as_object_mut()
    {
        data.insert("fingerprint".to_owned(), json!([DEFAULT_FINGERPRINT_VALUES[0]]));
    }
    let rules = get_fingerprinting_config_for_project(project, cache, Some(config.id()));
    apply_server_fingerprinting(&mut event.data, &rules, true);

    let hashes = get_hashes_for_event(event, &config);
    histogram!(CALCULATE_EVENT_GROUPING_DURATION, "config" => config.id())
        .record(start.elapsed().as_secs_f64());
    tracing::debug!(
        project = project.id(),
        config = config.id(),
        primary_hash = hashes.primary_hash(),
        "Calculated event grouping"
    );
    Ok(hashes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::enhancer::Enhancements;
    use crate::project::{FINGERPRINTING_RULES_OPTION, StaticProject};
    use crate::registry::{DEFAULT_GROUPING_CONFIG, get_configuration};
    use std::sync::Arc;

    fn variants(data: Value) -> Variants {
        get_grouping_variants_for_event(&Event::new(data), None)
    }

    fn names(variants: &Variants) -> Vec<&str> {
        variants.keys().map(String::as_str).collect()
    }

    #[test]
    fn test_hex_checksum_short_circuits() {
        let checksum = "a".repeat(32);
        let rv = variants(json!({"checksum": checksum, "message": "hello"}));
        assert_eq!(names(&rv), vec!["checksum"]);
        assert_eq!(rv["checksum"].get_hash(), Some(checksum));
    }

    #[test]
    fn test_other_checksums_are_hashed() {
        let rv = variants(json!({"checksum": "not-a-hash"}));
        assert_eq!(names(&rv), vec!["hashed-checksum", "checksum"]);
        assert_eq!(
            rv["hashed-checksum"].get_hash(),
            Some(hash_from_values(["not-a-hash"]))
        );

        let long = "x".repeat(40);
        let rv = variants(json!({"checksum": long}));
        assert_eq!(names(&rv), vec!["hashed-checksum"]);
    }

    #[test]
    fn test_raw_checksum_length_limit() {
        let rv = variants(json!({"checksum": "x".repeat(32)}));
        assert_eq!(names(&rv), vec!["hashed-checksum", "checksum"]);

        let rv = variants(json!({"checksum": "x".repeat(33)}));
        assert_eq!(names(&rv), vec!["hashed-checksum"]);

        // 20 characters, 40 bytes
        let multibyte = "é".repeat(20);
        let rv = variants(json!({"checksum": multibyte}));
        assert_eq!(names(&rv), vec!["hashed-checksum", "checksum"]);
        assert_eq!(rv["checksum"].get_hash(), Some(multibyte));
    }

    #[test]
    fn test_fallback_when_nothing_contributes() {
        let rv = variants(json!({"platform": "python"}));
        assert_eq!(names(&rv), vec!["fallback"]);
        let hashes = CalculatedHashes::from_variants(&rv);
        assert_eq!(hashes.hashes, vec!["d41d8cd98f00b204e9800998ecf8427e".to_owned()]);
    }

    #[test]
    fn test_fallback_for_malformed_data() {
        let payloads = [
            json!(42),
            json!(null),
            json!([]),
            json!("event"),
            json!({"exception": 5}),
            json!({"exception": {"values": "x"}}),
            json!({"threads": "x"}),
            json!({"logentry": 3}),
        ];
        for data in payloads {
            let rv = variants(data.clone());
            assert!(
                rv.values().any(GroupingVariant::contributes),
                "no contributing variant for {data}"
            );
            assert!(!CalculatedHashes::from_variants(&rv).hashes.is_empty());
        }
    }

    #[test]
    fn test_variants_are_stable_across_runs() {
        let event = Event::new(json!({
            "platform": "python",
            "exception": {"values": [{
                "type": "ValueError",
                "value": "bad id 1234",
                "stacktrace": {"frames": [
                    {"function": "main", "module": "app", "in_app": true},
                    {"function": "handle", "module": "lib", "in_app": false},
                ]},
            }]},
            "threads": {"values": [{"crashed": true, "stacktrace": {"frames": [{"function": "run"}]}}]},
            "logentry": {"formatted": "something failed"},
        }));
        let config = load_default_grouping_config();
        let first = get_grouping_variants_for_event(&event, Some(&config));
        let second = get_grouping_variants_for_event(&event, Some(&config));

        assert_eq!(first, second);
        assert_eq!(
            CalculatedHashes::from_variants(&first),
            CalculatedHashes::from_variants(&second)
        );
        let hints = |rv: &Variants| -> Vec<Option<String>> {
            rv.values()
                .map(|variant| variant.component().and_then(|c| c.hint()).map(str::to_owned))
                .collect()
        };
        assert_eq!(hints(&first), hints(&second));
    }

    #[test]
    fn test_first_contributing_strategy_wins() {
        let rv = variants(json!({
            "platform": "python",
            "exception": {"values": [{
                "type": "ValueError",
                "stacktrace": {"frames": [{"function": "main", "module": "app", "in_app": true}]},
            }]},
            "logentry": {"formatted": "something failed"},
        }));
        assert_eq!(names(&rv), vec!["app", "system", "default"]);
        assert!(rv["app"].contributes());
        let default = rv["default"].component().unwrap();
        assert!(!default.contributes());
        assert_eq!(
            default.hint(),
            Some("exception of app/system takes precedence")
        );
        let crate::component::ComponentValue::Component(message) = &default.values()[0] else {
            panic!("expected the message component");
        };
        assert!(message.contributes_to_similarity());
    }

    #[test]
    fn test_precedence_hint_grammar() {
        let rv = variants(json!({
            "threads": {"values": [{"crashed": true, "stacktrace": {"frames": [{"function": "run"}]}}]},
            "logentry": {"formatted": "crash"},
        }));
        assert_eq!(
            rv["default"].component().unwrap().hint(),
            Some("threads of system take precedence")
        );
    }

    #[test]
    fn test_enhancements_move_frames_in_app() {
        let data = json!({
            "platform": "native",
            "exception": {"values": [{
                "type": "Crash",
                "stacktrace": {"frames": [{"function": "foo", "in_app": false}]},
            }]},
        });
        let rv = variants(data.clone());
        assert_eq!(rv["app"].component().unwrap().iter_values(), vec!["Crash"]);

        let configuration = get_configuration(DEFAULT_GROUPING_CONFIG).unwrap();
        let enhancements =
            Enhancements::from_config_string("function:foo +app", &[configuration.enhancements_base])
                .unwrap();
        let config = GroupingConfig::new(
            configuration,
            Arc::new(enhancements),
            GroupingConfigDict::new(configuration.id, ""),
        );
        let rv = get_grouping_variants_for_event(&Event::new(data), Some(&config));
        assert!(rv["app"].contributes());
        assert_eq!(
            rv["app"].component().unwrap().iter_values(),
            vec!["foo", "Crash"]
        );
        let frame = find_component(rv["app"].component().unwrap(), "frame").unwrap();
        assert_eq!(frame.in_app(), Some(true));
        assert!(frame.contributes());
    }

    fn find_component<'a>(
        component: &'a GroupingComponent,
        id: &str,
    ) -> Option<&'a GroupingComponent> {
        if component.id() == id {
            return Some(component);
        }
        component.values().iter().find_map(|value| match value {
            crate::component::ComponentValue::Component(child) => find_component(child, id),
            crate::component::ComponentValue::Value(_) => None,
        })
    }

    #[test]
    fn test_custom_fingerprint() {
        let rv = variants(json!({
            "fingerprint": ["database-unavailable"],
            "logentry": {"formatted": "connection refused"},
        }));
        assert_eq!(names(&rv), vec!["default", "custom-fingerprint"]);
        assert_eq!(
            rv["default"].component().unwrap().hint(),
            Some("custom fingerprint takes precedence")
        );
        assert!(!rv["default"].contributes());
        assert_eq!(
            rv["custom-fingerprint"].get_hash(),
            Some(hash_from_values(["database-unavailable"]))
        );
    }

    #[test]
    fn test_builtin_fingerprint() {
        let rv = variants(json!({
            "fingerprint": ["chunkloaderror"],
            "_fingerprint_info": {"matched_rule": {"is_builtin": true, "text": "x"}},
        }));
        assert_eq!(names(&rv), vec!["built-in-fingerprint"]);
        assert_eq!(rv["built-in-fingerprint"].description(), "Sentry defined fingerprint");
    }

    #[test]
    fn test_salted_fingerprint() {
        let rv = variants(json!({
            "fingerprint": ["{{ default }}", "{{ level }}"],
            "level": "error",
            "logentry": {"formatted": "connection refused"},
        }));
        let GroupingVariant::SaltedComponent { values, .. } = &rv["default"] else {
            panic!("expected a salted component variant");
        };
        assert_eq!(values, &vec!["{{ default }}".to_owned(), "error".to_owned()]);
        assert_eq!(
            rv["default"].get_hash(),
            Some(hash_from_values(["connection refused", "error"]))
        );
    }

    #[test]
    fn test_sort_grouping_variants() {
        let mut variants = Variants::new();
        for name in ["system", "app-depth-2", "app", "app-depth-1", "default"] {
            variants.insert(name.to_owned(), GroupingVariant::Fallback);
        }
        let (flat, hierarchical) = sort_grouping_variants(&variants);
        assert_eq!(
            flat.iter().map(|(name, _)| *name).collect::<Vec<_>>(),
            vec!["app", "default", "system"]
        );
        assert_eq!(
            hierarchical.iter().map(|(name, _)| *name).collect::<Vec<_>>(),
            vec!["app-depth-1", "app-depth-2"]
        );
    }

    #[test]
    fn test_detect_synthetic_exception() {
        let config = GroupingConfig::with_default_enhancements(
            get_configuration("mobile:2021-04-02").unwrap(),
        );
        let mut data = json!({"exception": {"values": [
            {"type": "EXC_BAD_ACCESS", "mechanism": {"type": "mach"}},
            {"type": "SIGSEGV", "mechanism": {"type": "signal", "synthetic": false}},
            {"type": "ValueError", "mechanism": {"type": "generic"}},
            {"type": "SIGABRT"},
        ]}});
        detect_synthetic_exception(&mut data, &config);
        let once = data.clone();
        detect_synthetic_exception(&mut data, &config);
        assert_eq!(data, once);

        let values = &data["exception"]["values"];
        assert_eq!(values[0]["mechanism"]["synthetic"], json!(true));
        assert_eq!(values[1]["mechanism"]["synthetic"], json!(false));
        assert_eq!(values[2]["mechanism"].get("synthetic"), None);
        assert_eq!(values[3].get("mechanism"), None);

        let mut data = json!({"exception": {"values": [
            {"type": "EXC_BAD_ACCESS", "mechanism": {"type": "mach"}},
        ]}});
        detect_synthetic_exception(&mut data, &load_default_grouping_config());
        assert_eq!(data["exception"]["values"][0]["mechanism"].get("synthetic"), None);
    }

    #[test]
    fn test_apply_server_fingerprinting() {
        let rules = FingerprintingRules::from_config_string(
            "type:DatabaseUnavailable -> database-unavailable title=\"DB down: {{ error.value }}\"",
            Vec::new(),
        )
        .unwrap();
        let mut data = json!({
            "fingerprint": ["{{ default }}", "client"],
            "exception": {"values": [{"type": "DatabaseUnavailable", "value": "timeout"}]},
        });
        apply_server_fingerprinting(&mut data, &rules, true);
        assert_eq!(data["fingerprint"], json!(["database-unavailable"]));
        assert_eq!(data["title"], json!("DB down: timeout"));
        assert_eq!(
            data["_fingerprint_info"]["client_fingerprint"],
            json!(["{{ default }}", "client"])
        );
        assert!(data["_fingerprint_info"]["matched_rule"]["text"].is_string());

        let mut data = json!({
            "fingerprint": ["{{ default }}"],
            "exception": {"values": [{"type": "DatabaseUnavailable", "value": "timeout"}]},
        });
        apply_server_fingerprinting(&mut data, &rules, false);
        assert_eq!(data.get("title"), None);
        assert_eq!(data["_fingerprint_info"].get("client_fingerprint"), None);
    }

    #[test]
    fn test_calculate_event_grouping() {
        let project = StaticProject::new(1).with_option(
            FINGERPRINTING_RULES_OPTION,
            "message:\"*refused*\" -> connection-refused",
        );
        let cache = MemoryCache::default();
        let mut event = Event::new(json!({"logentry": {"formatted": "connection refused"}}));
        let hashes = calculate_event_grouping(
            &project,
            &mut event,
            &GroupingConfigDict::new(DEFAULT_GROUPING_CONFIG, ""),
            &cache,
        )
        .unwrap();
        assert_eq!(hashes.hashes, vec![hash_from_values(["connection-refused"])]);
        assert!(hashes.hierarchical_hashes.is_empty());
        assert_eq!(event.data["fingerprint"], json!(["connection-refused"]));

        let err = calculate_event_grouping(
            &project,
            &mut event,
            &GroupingConfigDict::new("unknown:2000-01-01", ""),
            &cache,
        );
        assert!(err.is_err());
    }
}
