//! The outcome of grouping: named variants, each yielding an optional hash.

use serde_json::{Map, Value, json};

use crate::component::GroupingComponent;
use crate::utils::{hash_from_values, is_default_fingerprint_var};

#[derive(Clone, Debug, PartialEq)]
pub enum GroupingVariant {
    /// A client supplied checksum that already is an md5 hash.
    Checksum { checksum: String },
    /// A client supplied checksum of another shape, hashed.
    HashedChecksum { hash: String, raw_checksum: String },
    /// Used when nothing else produced a hash.
    Fallback,
    /// A component tree built by the grouping config.
    Component {
        component: GroupingComponent,
        config_id: String,
    },
    /// A component tree mixed with the literal values of a fingerprint.
    SaltedComponent {
        values: Vec<String>,
        component: GroupingComponent,
        config_id: String,
        fingerprint_info: Value,
    },
    /// A fingerprint without default markers, set by the client or a rule.
    CustomFingerprint {
        values: Vec<String>,
        fingerprint_info: Value,
    },
    /// A custom fingerprint that comes from a built-in fingerprinting rule.
    BuiltInFingerprint {
        values: Vec<String>,
        fingerprint_info: Value,
    },
}

impl GroupingVariant {
    pub fn type_name(&self) -> &'static str {
        match self {
            GroupingVariant::Checksum { .. } => "checksum",
            GroupingVariant::HashedChecksum { .. } => "hashed-checksum",
            GroupingVariant::Fallback => "fallback",
            GroupingVariant::Component { .. } => "component",
            GroupingVariant::SaltedComponent { .. } => "salted-component",
            GroupingVariant::CustomFingerprint { .. } => "custom-fingerprint",
            GroupingVariant::BuiltInFingerprint { .. } => "built-in-fingerprint",
        }
    }

    pub fn description(&self) -> String {
        match self {
            GroupingVariant::Checksum { .. } => "legacy checksum".to_owned(),
            GroupingVariant::HashedChecksum { .. } => "hashed legacy checksum".to_owned(),
            GroupingVariant::Fallback => "fallback".to_owned(),
            GroupingVariant::Component { component, .. } => component.description(),
            GroupingVariant::SaltedComponent { component, .. } => {
                format!("modified {}", component.description())
            }
            GroupingVariant::CustomFingerprint { .. } => "custom fingerprint".to_owned(),
            GroupingVariant::BuiltInFingerprint { .. } => "Sentry defined fingerprint".to_owned(),
        }
    }

    pub fn contributes(&self) -> bool {
        match self {
            GroupingVariant::Component { component, .. }
            | GroupingVariant::SaltedComponent { component, .. } => component.contributes(),
            _ => true,
        }
    }

    pub fn get_hash(&self) -> Option<String> {
        match self {
            GroupingVariant::Checksum { checksum } => Some(checksum.clone()),
            GroupingVariant::HashedChecksum { hash, .. } => Some(hash.clone()),
            GroupingVariant::Fallback => Some(hash_from_values::<_, &str>([])),
            GroupingVariant::Component { component, .. } => component.get_hash(),
            GroupingVariant::SaltedComponent {
                values, component, ..
            } => {
                if !component.contributes() {
                    return None;
                }
                let mut final_values: Vec<&str> = Vec::new();
                for value in values {
                    if is_default_fingerprint_var(value) {
                        final_values.extend(component.iter_values());
                    } else {
                        final_values.push(value);
                    }
                }
                Some(hash_from_values(final_values))
            }
            GroupingVariant::CustomFingerprint { values, .. }
            | GroupingVariant::BuiltInFingerprint { values, .. } => Some(hash_from_values(values)),
        }
    }

    pub fn component(&self) -> Option<&GroupingComponent> {
        match self {
            GroupingVariant::Component { component, .. }
            | GroupingVariant::SaltedComponent { component, .. } => Some(component),
            _ => None,
        }
    }

    pub fn component_mut(&mut self) -> Option<&mut GroupingComponent> {
        match self {
            GroupingVariant::Component { component, .. }
            | GroupingVariant::SaltedComponent { component, .. } => Some(component),
            _ => None,
        }
    }

    /// The grouping info payload shown to users.
    pub fn as_dict(&self) -> Value {
        let mut rv = Map::new();
        rv.insert("type".to_owned(), json!(self.type_name()));
        rv.insert("description".to_owned(), json!(self.description()));
        rv.insert("hash".to_owned(), json!(self.get_hash()));
        rv.insert(
            "hint".to_owned(),
            json!(self.component().and_then(GroupingComponent::hint)),
        );
        rv.insert("contributes".to_owned(), json!(self.contributes()));

        match self {
            GroupingVariant::Checksum { checksum } => {
                rv.insert("checksum".to_owned(), json!(checksum));
            }
            GroupingVariant::HashedChecksum { hash, raw_checksum } => {
                rv.insert("checksum".to_owned(), json!(hash));
                rv.insert("raw_checksum".to_owned(), json!(raw_checksum));
            }
            GroupingVariant::Fallback => {}
            GroupingVariant::Component {
                component,
                config_id,
            } => {
                rv.insert("component".to_owned(), component.as_dict());
                rv.insert("config".to_owned(), json!({"id": config_id}));
            }
            GroupingVariant::SaltedComponent {
                values,
                component,
                config_id,
                fingerprint_info,
            } => {
                rv.insert("component".to_owned(), component.as_dict());
                rv.insert("config".to_owned(), json!({"id": config_id}));
                rv.extend(expose_fingerprint_dict(values, fingerprint_info));
            }
            GroupingVariant::CustomFingerprint {
                values,
                fingerprint_info,
            }
            | GroupingVariant::BuiltInFingerprint {
                values,
                fingerprint_info,
            } => {
                rv.extend(expose_fingerprint_dict(values, fingerprint_info));
            }
        }
        Value::Object(rv)
    }
}

/// Fingerprint values plus where they came from.
fn expose_fingerprint_dict(values: &[String], fingerprint_info: &Value) -> Map<String, Value> {
    let mut rv = Map::new();
    rv.insert("values".to_owned(), json!(values));
    if let Some(client) = fingerprint_info.get("client_fingerprint")
        && !client.is_null()
    {
        rv.insert("client_values".to_owned(), client.clone());
    }
    if let Some(text) = fingerprint_info
        .get("matched_rule")
        .and_then(|rule| rule.get("text"))
    {
        rv.insert("matched_rule".to_owned(), text.clone());
    }
    rv
}
