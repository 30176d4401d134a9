//! Typed, read-only views over the raw event payload.
//!
//! Events stay `serde_json::Value` so that unknown fields survive a round
//! trip. The views below deserialize the bits the grouping code looks at and
//! skip entries that are malformed instead of failing the whole event.

use serde::de::{DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single event as received from an SDK, after normalization.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Event {
    pub data: Value,
}

impl Event {
    pub fn new(data: Value) -> Self {
        Event { data }
    }

    /// Client supplied legacy checksum, if any.
    pub fn checksum(&self) -> Option<&str> {
        self.data
            .get("checksum")
            .and_then(Value::as_str)
            .filter(|checksum| !checksum.is_empty())
    }

    pub fn platform(&self) -> Option<&str> {
        self.data.get("platform").and_then(Value::as_str)
    }

    /// The fingerprint as a list of strings, `None` if unset or empty.
    pub fn fingerprint(&self) -> Option<Vec<String>> {
        let values = self.data.get("fingerprint")?.as_array()?;
        let fingerprint: Vec<String> = values
            .iter()
            .filter_map(|value| match value {
                Value::Null => None,
                Value::String(s) => Some(s.clone()),
                other => Some(other.to_string()),
            })
            .collect();
        (!fingerprint.is_empty()).then_some(fingerprint)
    }

    pub fn exceptions(&self) -> Option<Vec<Exception>> {
        get_exceptions(&self.data)
    }

    pub fn stacktrace(&self) -> Option<Stacktrace> {
        get_stacktrace(&self.data)
    }

    pub fn threads(&self) -> Option<Vec<Thread>> {
        get_threads(&self.data)
    }

    pub fn logentry(&self) -> Option<LogEntry> {
        get_logentry(&self.data)
    }

    pub fn interface<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        get_interface(&self.data, key)
    }
}

/// Behavior family of a platform, decides which rules apply to a frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum PlatformFamily {
    Native,
    JavaScript,
    #[default]
    Other,
}

impl PlatformFamily {
    pub fn from_platform(platform: Option<&str>) -> Self {
        match platform {
            Some("objc" | "cocoa" | "swift" | "native" | "c") => PlatformFamily::Native,
            Some("javascript" | "node") => PlatformFamily::JavaScript,
            _ => PlatformFamily::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PlatformFamily::Native => "native",
            PlatformFamily::JavaScript => "javascript",
            PlatformFamily::Other => "other",
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Frame {
    pub function: Option<String>,
    pub raw_function: Option<String>,
    pub module: Option<String>,
    pub package: Option<String>,
    pub filename: Option<String>,
    pub abs_path: Option<String>,
    pub context_line: Option<String>,
    pub lineno: Option<i64>,
    pub colno: Option<i64>,
    pub in_app: Option<bool>,
    pub platform: Option<String>,
    pub data: Option<Value>,
}

impl Frame {
    pub fn is_url(&self) -> bool {
        crate::utils::has_url_origin(self.abs_path.as_deref(), false)
    }

    /// Whether a source map was applied to this frame by symbolication.
    pub fn sourcemap_used(&self) -> bool {
        self.data
            .as_ref()
            .and_then(|data| data.get("sourcemap"))
            .is_some_and(|sourcemap| !sourcemap.is_null())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Stacktrace {
    #[serde(deserialize_with = "lenient_vec")]
    pub frames: Vec<Frame>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Exception {
    #[serde(rename = "type")]
    pub ty: Option<String>,
    pub value: Option<String>,
    pub module: Option<String>,
    pub mechanism: Option<Mechanism>,
    pub stacktrace: Option<Stacktrace>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Mechanism {
    #[serde(rename = "type")]
    pub ty: Option<String>,
    pub synthetic: Option<bool>,
    pub is_exception_group: Option<bool>,
    pub exception_id: Option<u64>,
    pub parent_id: Option<u64>,
    pub meta: Option<MechanismMeta>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct MechanismMeta {
    pub ns_error: Option<NsError>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct NsError {
    pub code: Option<i64>,
    pub domain: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Thread {
    pub id: Option<Value>,
    pub crashed: bool,
    pub current: bool,
    pub stacktrace: Option<Stacktrace>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct LogEntry {
    pub message: Option<String>,
    pub formatted: Option<String>,
}

pub fn get_interface<T: DeserializeOwned>(data: &Value, key: &str) -> Option<T> {
    let value = data.get(key).filter(|value| !value.is_null())?;
    match serde_json::from_value(value.clone()) {
        Ok(interface) => Some(interface),
        Err(err) => {
            tracing::debug!(interface = key, error = %err, "Skipping malformed interface");
            None
        }
    }
}

/// Exceptions of the event, `None` if the event has no exception interface.
pub fn get_exceptions(data: &Value) -> Option<Vec<Exception>> {
    values_of(data, "exception")
}

pub fn get_threads(data: &Value) -> Option<Vec<Thread>> {
    values_of(data, "threads")
}

pub fn get_stacktrace(data: &Value) -> Option<Stacktrace> {
    get_interface(data, "stacktrace")
}

pub fn get_logentry(data: &Value) -> Option<LogEntry> {
    if let Some(logentry) = get_interface::<LogEntry>(data, "logentry") {
        return Some(logentry);
    }
    let message = data.get("message").and_then(Value::as_str)?;
    Some(LogEntry {
        message: None,
        formatted: Some(message.to_owned()),
    })
}

/// Every stack trace in the event: exceptions first, then the top-level one, then threads.
pub fn find_stacktraces(data: &Value) -> Vec<Stacktrace> {
    let mut rv: Vec<Stacktrace> = get_exceptions(data)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|exception| exception.stacktrace)
        .collect();
    rv.extend(get_stacktrace(data));
    rv.extend(
        get_threads(data)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|thread| thread.stacktrace),
    );
    rv
}

/// Reads an interface of the shape `{"values": [...]}`.
fn values_of<T: DeserializeOwned>(data: &Value, key: &str) -> Option<Vec<T>> {
    let interface = data.get(key).filter(|value| !value.is_null())?;
    let values = interface.get("values").unwrap_or(&Value::Null);
    Some(lenient_items(values))
}

fn lenient_items<T: DeserializeOwned>(value: &Value) -> Vec<T> {
    let Value::Array(items) = value else {
        return Vec::new();
    };
    items
        .iter()
        .filter(|item| !item.is_null())
        .filter_map(|item| serde_json::from_value(item.clone()).ok())
        .collect()
}

fn lenient_vec<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(lenient_items(&value))
}
