//! Access to the per-project settings that influence grouping.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

pub const GROUPING_CONFIG_OPTION: &str = "sentry:grouping_config";
pub const SECONDARY_GROUPING_CONFIG_OPTION: &str = "sentry:secondary_grouping_config";
pub const SECONDARY_GROUPING_EXPIRY_OPTION: &str = "sentry:secondary_grouping_expiry";
pub const GROUPING_ENHANCEMENTS_OPTION: &str = "sentry:grouping_enhancements";
pub const FINGERPRINTING_RULES_OPTION: &str = "sentry:fingerprinting_rules";

pub trait Project: Send + Sync {
    fn id(&self) -> u64;

    /// The stored value of a project option, `None` if unset.
    fn get_option(&self, key: &str) -> Option<Value>;

    /// Like [`Project::get_option`], but discards values rejected by `validate`.
    fn get_valid_option(&self, key: &str, validate: &dyn Fn(&Value) -> bool) -> Option<Value> {
        self.get_option(key).filter(|value| validate(value))
    }

    fn get_str_option(&self, key: &str) -> Option<String> {
        match self.get_option(key)? {
            Value::String(value) => Some(value),
            _ => None,
        }
    }
}

/// A project whose options are fixed up front, e.g. read from a file.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct StaticProject {
    pub id: u64,
    #[serde(default)]
    pub options: HashMap<String, Value>,
}

impl StaticProject {
    pub fn new(id: u64) -> Self {
        StaticProject {
            id,
            options: HashMap::new(),
        }
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }
}

impl Project for StaticProject {
    fn id(&self) -> u64 {
        self.id
    }

    fn get_option(&self, key: &str) -> Option<Value> {
        self.options.get(key).filter(|value| !value.is_null()).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_static_project_options() {
        let project: StaticProject = serde_json::from_value(json!({
            "id": 7,
            "options": {
                "sentry:grouping_config": "mobile:2021-04-02",
                "sentry:secondary_grouping_expiry": 1700000000,
                "sentry:grouping_enhancements": null,
            },
        }))
        .unwrap();
        assert_eq!(project.id(), 7);
        assert_eq!(
            project.get_str_option(GROUPING_CONFIG_OPTION).as_deref(),
            Some("mobile:2021-04-02")
        );
        assert_eq!(project.get_str_option(SECONDARY_GROUPING_EXPIRY_OPTION), None);
        assert_eq!(project.get_option(GROUPING_ENHANCEMENTS_OPTION), None);
        assert_eq!(
            project.get_valid_option(GROUPING_CONFIG_OPTION, &|value| value == "legacy"),
            None
        );
    }
}
