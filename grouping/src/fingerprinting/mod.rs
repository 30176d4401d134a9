//! Server-side fingerprinting rules.
//!
//! A project can override the computed grouping of matching events with a
//! fixed fingerprint (and optionally a custom title):
//!
//! ```text
//! logger:my.package.* level:error -> error-logger
//! ```
//!
//! Rules are evaluated in order, the first match wins. Built-in base rules
//! run after all of the project's rules.

mod bases;
mod matchers;
mod parser;

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use bases::{base_rules, is_known_base};
pub use matchers::Matcher;

use crate::utils::quote_if_needed;
use matchers::{EventAccess, MatchGroup};

pub const FINGERPRINTING_VERSION: u32 = 1;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidFingerprintingConfig {
    #[error("syntax error on line {line}: {message}")]
    Syntax { line: usize, message: String },

    #[error("unknown matcher '{0}'")]
    UnknownMatcher(String),

    #[error("unknown attribute '{0}'")]
    UnknownAttribute(String),

    #[error("invalid pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("unknown fingerprinting base '{0}'")]
    UnknownBase(String),

    #[error("invalid fingerprinting rules json: {0}")]
    Json(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Rule {
    matchers: Vec<Matcher>,
    fingerprint: Vec<String>,
    attributes: IndexMap<String, String>,
    is_builtin: bool,
}

#[derive(Serialize, Deserialize)]
struct RuleJson {
    matchers: Vec<(String, String)>,
    fingerprint: Vec<String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    attributes: IndexMap<String, String>,
    #[serde(default, skip_deserializing)]
    text: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    is_builtin: bool,
}

#[derive(Serialize, Deserialize)]
struct RulesJson {
    version: u32,
    rules: Vec<Value>,
}

impl Rule {
    pub(crate) fn new(
        matchers: Vec<Matcher>,
        fingerprint: Vec<String>,
        attributes: IndexMap<String, String>,
        is_builtin: bool,
    ) -> Self {
        Rule {
            matchers,
            fingerprint,
            attributes,
            is_builtin,
        }
    }

    fn into_builtin(self) -> Self {
        Rule {
            is_builtin: true,
            ..self
        }
    }

    pub fn matchers(&self) -> &[Matcher] {
        &self.matchers
    }

    pub fn fingerprint(&self) -> &[String] {
        &self.fingerprint
    }

    pub fn attributes(&self) -> &IndexMap<String, String> {
        &self.attributes
    }

    pub fn is_builtin(&self) -> bool {
        self.is_builtin
    }

    /// The rule in the rule language, as shown in grouping explanations.
    pub fn text(&self) -> String {
        self.to_string()
    }

    fn matches(&self, access: &EventAccess) -> bool {
        let mut groups: IndexMap<MatchGroup, Vec<&Matcher>> = IndexMap::new();
        for matcher in &self.matchers {
            groups.entry(matcher.match_group()).or_default().push(matcher);
        }
        groups.iter().all(|(group, matchers)| {
            access
                .values(*group)
                .iter()
                .any(|values| matchers.iter().all(|matcher| matcher.matches(values)))
        })
    }

    pub fn to_json(&self) -> Value {
        let json = RuleJson {
            matchers: self
                .matchers
                .iter()
                .map(|matcher| {
                    let [key, pattern] = matcher.to_json();
                    (key, pattern)
                })
                .collect(),
            fingerprint: self.fingerprint.clone(),
            attributes: self.attributes.clone(),
            text: self.text(),
            is_builtin: self.is_builtin,
        };
        serde_json::to_value(json).unwrap_or_else(|err| {
            tracing::warn!(error = %err, "Failed to serialize fingerprinting rule");
            Value::Null
        })
    }

    pub fn from_json(value: &Value) -> Result<Self, InvalidFingerprintingConfig> {
        let json: RuleJson = serde_json::from_value(value.clone())
            .map_err(|err| InvalidFingerprintingConfig::Json(err.to_string()))?;
        let matchers = json
            .matchers
            .iter()
            .map(|(key, pattern)| match key.strip_prefix('!') {
                Some(key) => Matcher::new(key, pattern, true),
                None => Matcher::new(key, pattern, false),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Rule::new(matchers, json.fingerprint, json.attributes, json.is_builtin))
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let matchers: Vec<String> = self.matchers.iter().map(ToString::to_string).collect();
        let fingerprint: Vec<String> = self
            .fingerprint
            .iter()
            .map(|value| {
                if crate::utils::parse_fingerprint_var(value).is_some() {
                    value.clone()
                } else {
                    quote_if_needed(value)
                }
            })
            .collect();
        write!(f, "{} -> {}", matchers.join(" "), fingerprint.join(", "))?;
        for (key, value) in &self.attributes {
            write!(f, " {key}={}", quote_if_needed(value))?;
        }
        Ok(())
    }
}

/// A project's fingerprinting rules plus the built-in bases that apply to it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FingerprintingRules {
    rules: Vec<Rule>,
    bases: Vec<String>,
}

impl FingerprintingRules {
    pub fn new(rules: Vec<Rule>, bases: Vec<String>) -> Self {
        FingerprintingRules { rules, bases }
    }

    pub fn from_config_string(
        input: &str,
        bases: Vec<String>,
    ) -> Result<Self, InvalidFingerprintingConfig> {
        if let Some(unknown) = bases.iter().find(|base| !is_known_base(base)) {
            return Err(InvalidFingerprintingConfig::UnknownBase(unknown.clone()));
        }
        Ok(FingerprintingRules::new(parser::parse_rules(input)?, bases))
    }

    pub fn bases(&self) -> &[String] {
        &self.bases
    }

    /// Project rules first, then the rules of the bases if requested.
    pub fn iter_rules(&self, include_builtin: bool) -> impl Iterator<Item = &Rule> {
        let builtin = self
            .bases
            .iter()
            .filter(move |_| include_builtin)
            .filter_map(|base| base_rules(base))
            .flatten();
        self.rules.iter().chain(builtin)
    }

    /// First rule matching the event, with its fingerprint and attributes.
    pub fn get_fingerprint_values_for_event(
        &self,
        event_data: &Value,
    ) -> Option<(&Rule, &[String], &IndexMap<String, String>)> {
        if self.rules.is_empty() && self.bases.is_empty() {
            return None;
        }
        let access = EventAccess::new(event_data);
        self.iter_rules(true)
            .find(|rule| rule.matches(&access))
            .map(|rule| (rule, rule.fingerprint(), rule.attributes()))
    }

    pub fn to_json(&self, include_builtin: bool) -> Value {
        let json = RulesJson {
            version: FINGERPRINTING_VERSION,
            rules: self.iter_rules(include_builtin).map(Rule::to_json).collect(),
        };
        serde_json::to_value(json).unwrap_or_else(|err| {
            tracing::warn!(error = %err, "Failed to serialize fingerprinting rules");
            Value::Null
        })
    }

    /// Restores rules from [`Self::to_json`]. Built-in rules in the input are
    /// dropped, they come from `bases`.
    pub fn from_json(value: &Value, bases: Vec<String>) -> Result<Self, InvalidFingerprintingConfig> {
        let json: RulesJson = serde_json::from_value(value.clone())
            .map_err(|err| InvalidFingerprintingConfig::Json(err.to_string()))?;
        let rules = json
            .rules
            .iter()
            .map(Rule::from_json)
            .filter(|rule| !rule.as_ref().is_ok_and(Rule::is_builtin))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(FingerprintingRules::new(rules, bases))
    }
}
