//! Resolves which grouping config and rules apply to a project.
//!
//! Parsed enhancements and fingerprinting rules are cached under a hash of
//! their source text, so a project changing its rules never reads stale
//! entries. Rules that fail to parse are logged and replaced by the defaults,
//! they never fail event processing.

use bytes::Bytes;
use serde_json::Value;

use shared::counter;

use crate::cache::Cache;
use crate::config::Config;
use crate::enhancer::{ENHANCEMENTS_VERSION, Enhancements};
use crate::errors::{GroupingConfigNotFound, Result};
use crate::fingerprinting::FingerprintingRules;
use crate::metrics_defs::{
    ENHANCEMENTS_CACHE, FINGERPRINTING_CACHE, INVALID_ENHANCEMENTS, INVALID_FINGERPRINTING_RULES,
};
use crate::project::{
    FINGERPRINTING_RULES_OPTION, GROUPING_CONFIG_OPTION, GROUPING_ENHANCEMENTS_OPTION, Project,
    SECONDARY_GROUPING_CONFIG_OPTION, SECONDARY_GROUPING_EXPIRY_OPTION,
};
use crate::registry::{
    DEFAULT_GROUPING_CONFIG, GroupingConfigDict, get_configuration, is_known_configuration,
};
use crate::utils::hash_from_values;

const FINGERPRINTING_CACHE_PREFIX: &str = "fingerprinting-rules:";

fn is_valid_config_id(value: &Value) -> bool {
    value.as_str().is_some_and(is_known_configuration)
}

fn outcome(hit: bool) -> &'static str {
    if hit { "hit" } else { "miss" }
}

/// Computes the grouping config dict of a project for one purpose
/// (primary, secondary or background grouping).
pub trait GroupingConfigLoader {
    /// Prefix of the enhancements cache keys written by this loader.
    fn cache_prefix(&self) -> &'static str;

    fn cache(&self) -> &dyn Cache;

    fn config_id(&self, project: &dyn Project) -> String;

    /// The project's enhancements in serialized form.
    fn get_enhancements(&self, project: &dyn Project) -> String {
        let config_id = self.config_id(project);
        let base = get_configuration(&config_id)
            .map(|configuration| configuration.enhancements_base)
            .unwrap_or_default();
        let raw = project
            .get_str_option(GROUPING_ENHANCEMENTS_OPTION)
            .unwrap_or_default();

        let cache_key = format!(
            "{}{}:{}",
            self.cache_prefix(),
            ENHANCEMENTS_VERSION,
            hash_from_values([format!("{base}|{raw}")])
        );
        let cached = self
            .cache()
            .get(&cache_key)
            .and_then(|bytes| String::from_utf8(bytes.to_vec()).ok());
        counter!(
            ENHANCEMENTS_CACHE,
            "loader" => self.cache_prefix(),
            "outcome" => outcome(cached.is_some())
        )
        .increment(1);
        if let Some(enhancements) = cached {
            return enhancements;
        }

        let enhancements = match Enhancements::from_config_string(&raw, &[base])
            .and_then(|enhancements| enhancements.dumps())
        {
            Ok(enhancements) => enhancements,
            Err(err) => {
                tracing::warn!(
                    project = project.id(),
                    config = %config_id,
                    error = %err,
                    "Invalid grouping enhancements, using defaults"
                );
                counter!(INVALID_ENHANCEMENTS).increment(1);
                get_default_enhancements(Some(&config_id))
            }
        };
        self.cache().set(&cache_key, Bytes::from(enhancements.clone()));
        enhancements
    }

    fn get_config_dict(&self, project: &dyn Project) -> GroupingConfigDict {
        GroupingConfigDict::new(self.config_id(project), self.get_enhancements(project))
    }
}

pub struct PrimaryGroupingConfigLoader<'a> {
    cache: &'a dyn Cache,
}

impl<'a> PrimaryGroupingConfigLoader<'a> {
    pub fn new(cache: &'a dyn Cache) -> Self {
        PrimaryGroupingConfigLoader { cache }
    }
}

impl GroupingConfigLoader for PrimaryGroupingConfigLoader<'_> {
    fn cache_prefix(&self) -> &'static str {
        "grouping-enhancements:"
    }

    fn cache(&self) -> &dyn Cache {
        self.cache
    }

    fn config_id(&self, project: &dyn Project) -> String {
        project
            .get_valid_option(GROUPING_CONFIG_OPTION, &is_valid_config_id)
            .and_then(|value| value.as_str().map(str::to_owned))
            .unwrap_or_else(|| DEFAULT_GROUPING_CONFIG.to_owned())
    }
}

/// Loads the config a project is transitioning away from.
pub struct SecondaryGroupingConfigLoader<'a> {
    cache: &'a dyn Cache,
}

impl<'a> SecondaryGroupingConfigLoader<'a> {
    pub fn new(cache: &'a dyn Cache) -> Self {
        SecondaryGroupingConfigLoader { cache }
    }
}

impl GroupingConfigLoader for SecondaryGroupingConfigLoader<'_> {
    fn cache_prefix(&self) -> &'static str {
        "secondary-grouping-enhancements:"
    }

    fn cache(&self) -> &dyn Cache {
        self.cache
    }

    fn config_id(&self, project: &dyn Project) -> String {
        project
            .get_valid_option(SECONDARY_GROUPING_CONFIG_OPTION, &is_valid_config_id)
            .and_then(|value| value.as_str().map(str::to_owned))
            .unwrap_or_else(|| DEFAULT_GROUPING_CONFIG.to_owned())
    }
}

/// Loads the config configured for background grouping, the same for every
/// project.
pub struct BackgroundGroupingConfigLoader<'a> {
    cache: &'a dyn Cache,
    config_id: String,
}

impl<'a> BackgroundGroupingConfigLoader<'a> {
    pub fn new(cache: &'a dyn Cache, config_id: impl Into<String>) -> Self {
        BackgroundGroupingConfigLoader {
            cache,
            config_id: config_id.into(),
        }
    }
}

impl GroupingConfigLoader for BackgroundGroupingConfigLoader<'_> {
    fn cache_prefix(&self) -> &'static str {
        "background-grouping-enhancements:"
    }

    fn cache(&self) -> &dyn Cache {
        self.cache
    }

    fn config_id(&self, _project: &dyn Project) -> String {
        self.config_id.clone()
    }
}

/// The config dict new events of this project are grouped with.
pub fn get_grouping_config_dict_for_project(
    project: &dyn Project,
    cache: &dyn Cache,
) -> GroupingConfigDict {
    PrimaryGroupingConfigLoader::new(cache).get_config_dict(project)
}

/// The secondary config dict, if the project has one that has not expired
/// at `now` (unix seconds).
pub fn get_secondary_grouping_config_dict(
    project: &dyn Project,
    cache: &dyn Cache,
    now: u64,
) -> Option<GroupingConfigDict> {
    project.get_valid_option(SECONDARY_GROUPING_CONFIG_OPTION, &is_valid_config_id)?;
    let expiry = project
        .get_option(SECONDARY_GROUPING_EXPIRY_OPTION)
        .and_then(|value| value.as_u64())
        .unwrap_or(0);
    if expiry <= now {
        return None;
    }
    Some(SecondaryGroupingConfigLoader::new(cache).get_config_dict(project))
}

pub fn get_background_grouping_config_dict(
    project: &dyn Project,
    cache: &dyn Cache,
    config: &Config,
) -> Option<GroupingConfigDict> {
    let config_id = config.background_grouping_config_id.as_deref()?;
    Some(BackgroundGroupingConfigLoader::new(cache, config_id).get_config_dict(project))
}

/// The config dict stored on the event, or the project's current one.
pub fn get_grouping_config_dict_for_event_data(
    data: &Value,
    project: &dyn Project,
    cache: &dyn Cache,
) -> Result<GroupingConfigDict> {
    match data.get("grouping_config") {
        Some(value) if !value.is_null() => GroupingConfigDict::from_value(value),
        _ => Ok(get_grouping_config_dict_for_project(project, cache)),
    }
}

pub fn get_default_grouping_config_dict(config_id: Option<&str>) -> Result<GroupingConfigDict> {
    let config_id = config_id.unwrap_or(DEFAULT_GROUPING_CONFIG);
    if !is_known_configuration(config_id) {
        return Err(GroupingConfigNotFound(config_id.to_owned()).into());
    }
    Ok(GroupingConfigDict::new(
        config_id,
        get_default_enhancements(Some(config_id)),
    ))
}

/// Serialized enhancements of a config without any project rules.
pub fn get_default_enhancements(config_id: Option<&str>) -> String {
    let config_id = config_id.unwrap_or(DEFAULT_GROUPING_CONFIG);
    let base = get_configuration(config_id)
        .map(|configuration| configuration.enhancements_base)
        .unwrap_or_default();
    match Enhancements::with_bases([base]).dumps() {
        Ok(enhancements) => enhancements,
        Err(err) => {
            tracing::error!(config = config_id, error = %err, "Failed to serialize default enhancements");
            String::new()
        }
    }
}

/// Built-in fingerprinting bases of the project's grouping config.
pub fn get_projects_default_fingerprinting_bases(
    project: &dyn Project,
    config_id: Option<&str>,
) -> Vec<String> {
    let config_id = match config_id {
        Some(config_id) => config_id.to_owned(),
        None => project
            .get_str_option(GROUPING_CONFIG_OPTION)
            .unwrap_or_else(|| DEFAULT_GROUPING_CONFIG.to_owned()),
    };
    get_configuration(&config_id)
        .map(|configuration| {
            configuration
                .fingerprinting_bases
                .iter()
                .map(|base| (*base).to_owned())
                .collect()
        })
        .unwrap_or_default()
}

/// The project's server-side fingerprinting rules plus the built-in bases.
pub fn get_fingerprinting_config_for_project(
    project: &dyn Project,
    cache: &dyn Cache,
    config_id: Option<&str>,
) -> FingerprintingRules {
    let bases = get_projects_default_fingerprinting_bases(project, config_id);
    let raw = project
        .get_str_option(FINGERPRINTING_RULES_OPTION)
        .unwrap_or_default();
    if raw.trim().is_empty() {
        return FingerprintingRules::new(Vec::new(), bases);
    }

    let cache_key = format!("{FINGERPRINTING_CACHE_PREFIX}{}", hash_from_values([&raw]));
    let cached = cache
        .get(&cache_key)
        .and_then(|bytes| serde_json::from_slice::<Value>(&bytes).ok())
        .and_then(|value| FingerprintingRules::from_json(&value, bases.clone()).ok());
    counter!(FINGERPRINTING_CACHE, "outcome" => outcome(cached.is_some())).increment(1);
    if let Some(rules) = cached {
        return rules;
    }

    let rules = match FingerprintingRules::from_config_string(&raw, bases.clone()) {
        Ok(rules) => rules,
        Err(err) => {
            tracing::warn!(
                project = project.id(),
                error = %err,
                "Invalid fingerprinting rules, ignoring them"
            );
            counter!(INVALID_FINGERPRINTING_RULES).increment(1);
            FingerprintingRules::new(Vec::new(), bases)
        }
    };
    let json = rules.to_json(false);
    if json.is_null() {
        return rules;
    }
    match serde_json::to_vec(&json) {
        Ok(bytes) => cache.set(&cache_key, Bytes::from(bytes)),
        Err(err) => tracing::warn!(error = %err, "Failed to cache fingerprinting rules"),
    }
    rules
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::load_grouping_config;
    use crate::cache::MemoryCache;
    use crate::project::StaticProject;
    use serde_json::json;
    use std::sync::Mutex;

    /// Records the keys that were served from the cache.
    #[derive(Default)]
    struct RecordingCache {
        inner: MemoryCache,
        hits: Mutex<Vec<String>>,
    }

    impl Cache for RecordingCache {
        fn get(&self, key: &str) -> Option<Bytes> {
            let rv = self.inner.get(key);
            if rv.is_some()
                && let Ok(mut hits) = self.hits.lock()
            {
                hits.push(key.to_owned());
            }
            rv
        }

        fn set(&self, key: &str, value: Bytes) {
            self.inner.set(key, value);
        }
    }

    impl RecordingCache {
        fn hits(&self) -> Vec<String> {
            self.hits.lock().map(|hits| hits.clone()).unwrap_or_default()
        }
    }

    #[test]
    fn test_primary_config_dict() {
        let cache = RecordingCache::default();
        let project = StaticProject::new(1)
            .with_option(GROUPING_CONFIG_OPTION, "mobile:2021-04-02")
            .with_option(GROUPING_ENHANCEMENTS_OPTION, "function:foo +app");

        let dict = get_grouping_config_dict_for_project(&project, &cache);
        assert_eq!(dict.id, "mobile:2021-04-02");
        assert!(cache.hits().is_empty());

        let again = get_grouping_config_dict_for_project(&project, &cache);
        assert_eq!(again, dict);
        let hits = cache.hits();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].starts_with(&format!("grouping-enhancements:{ENHANCEMENTS_VERSION}:")));

        let config = load_grouping_config(Some(&dict)).unwrap();
        assert_eq!(config.enhancements().rules().len(), 1);
        assert_eq!(config.enhancements().bases(), ["mobile:2021-04-02"]);
    }

    #[test]
    fn test_unknown_config_option_uses_default() {
        let cache = MemoryCache::default();
        let project = StaticProject::new(1).with_option(GROUPING_CONFIG_OPTION, "legacy:2019-03-12");
        let dict = get_grouping_config_dict_for_project(&project, &cache);
        assert_eq!(dict, get_default_grouping_config_dict(None).unwrap());
    }

    #[test]
    fn test_invalid_enhancements_fall_back_to_defaults() {
        let cache = MemoryCache::default();
        let project =
            StaticProject::new(1).with_option(GROUPING_ENHANCEMENTS_OPTION, "function:foo +nope");
        let dict = get_grouping_config_dict_for_project(&project, &cache);
        assert_eq!(dict.enhancements, get_default_enhancements(None));
    }

    #[test]
    fn test_secondary_config_dict() {
        let cache = MemoryCache::default();
        let project = StaticProject::new(1)
            .with_option(SECONDARY_GROUPING_CONFIG_OPTION, "newstyle:2019-10-29")
            .with_option(SECONDARY_GROUPING_EXPIRY_OPTION, 2_000);

        let dict = get_secondary_grouping_config_dict(&project, &cache, 1_000).unwrap();
        assert_eq!(dict.id, "newstyle:2019-10-29");
        assert_eq!(get_secondary_grouping_config_dict(&project, &cache, 2_000), None);
        assert_eq!(
            get_secondary_grouping_config_dict(&StaticProject::new(2), &cache, 1_000),
            None
        );
    }

    #[test]
    fn test_background_config_dict() {
        let cache = MemoryCache::default();
        let project = StaticProject::new(1);
        assert_eq!(
            get_background_grouping_config_dict(&project, &cache, &Config::default()),
            None
        );
        let config = Config {
            background_grouping_config_id: Some("mobile:2021-04-02".into()),
            ..Default::default()
        };
        let dict = get_background_grouping_config_dict(&project, &cache, &config).unwrap();
        assert_eq!(dict.id, "mobile:2021-04-02");
    }

    #[test]
    fn test_config_dict_for_event_data() {
        let cache = MemoryCache::default();
        let project = StaticProject::new(1);
        let dict = get_grouping_config_dict_for_event_data(
            &json!({"grouping_config": {"id": "mobile:2021-04-02"}}),
            &project,
            &cache,
        )
        .unwrap();
        assert_eq!(dict, GroupingConfigDict::new("mobile:2021-04-02", ""));

        let dict = get_grouping_config_dict_for_event_data(&json!({}), &project, &cache).unwrap();
        assert_eq!(dict.id, DEFAULT_GROUPING_CONFIG);

        assert!(
            get_grouping_config_dict_for_event_data(
                &json!({"grouping_config": {"enhancements": ""}}),
                &project,
                &cache,
            )
            .is_err()
        );
    }

    #[test]
    fn test_default_config_dict_unknown_id() {
        assert!(get_default_grouping_config_dict(Some("nope:2000-01-01")).is_err());
    }

    #[test]
    fn test_fingerprinting_config() {
        let cache = RecordingCache::default();
        let project = StaticProject::new(1)
            .with_option(FINGERPRINTING_RULES_OPTION, "type:DatabaseUnavailable -> db");

        let rules = get_fingerprinting_config_for_project(&project, &cache, None);
        assert_eq!(rules.iter_rules(false).count(), 1);
        assert_eq!(rules.bases(), ["javascript@2024-02-02"]);

        let again = get_fingerprinting_config_for_project(&project, &cache, None);
        assert_eq!(again, rules);
        assert_eq!(cache.hits().len(), 1);

        let rules = get_fingerprinting_config_for_project(
            &project,
            &cache,
            Some("newstyle:2019-10-29"),
        );
        assert!(rules.bases().is_empty());
    }

    #[test]
    fn test_cached_fingerprinting_rules_are_valid_json() {
        let cache = MemoryCache::default();
        let raw = "type:DatabaseUnavailable -> db";
        let project = StaticProject::new(1).with_option(FINGERPRINTING_RULES_OPTION, raw);
        get_fingerprinting_config_for_project(&project, &cache, None);

        let key = format!("{FINGERPRINTING_CACHE_PREFIX}{}", hash_from_values([raw]));
        let cached: Value = serde_json::from_slice(&cache.get(&key).unwrap()).unwrap();
        assert!(cached.is_object());
        assert_eq!(
            FingerprintingRules::from_json(&cached, Vec::new())
                .unwrap()
                .iter_rules(false)
                .count(),
            1
        );
    }

    #[test]
    fn test_invalid_fingerprinting_rules_are_ignored() {
        let cache = MemoryCache::default();
        let project =
            StaticProject::new(1).with_option(FINGERPRINTING_RULES_OPTION, "this is not a rule");
        let rules = get_fingerprinting_config_for_project(&project, &cache, None);
        assert_eq!(rules.iter_rules(false).count(), 0);
    }
}
