//! Hashing and fingerprint helpers shared by the strategies and the resolver.

use std::sync::LazyLock;

use md5::{Digest, Md5};
use regex::{Captures, Regex};
use serde_json::Value;

use crate::event::{Frame, PlatformFamily, get_exceptions, get_stacktrace, get_threads};

/// Fingerprint entries that stand for "whatever the grouping algorithm computes".
pub const DEFAULT_FINGERPRINT_VALUES: [&str; 2] = ["{{ default }}", "{{default}}"];

static FINGERPRINT_VAR_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^\{\{\s*(\S+)\s*\}\}$").ok());

static TITLE_VAR_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\{\{\s*(\S+)\s*\}\}").ok());

/// Hashes the concatenation of `values` with md5 and returns the lowercase hex digest.
pub fn hash_from_values<I, S>(values: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut hasher = Md5::new();
    for value in values {
        hasher.update(value.as_ref().as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// True for strings that already look like one of our hashes (32 lowercase hex chars).
pub fn is_hex_hash(value: &str) -> bool {
    value.len() == 32 && value.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Returns the variable name if `value` is a `{{ name }}` placeholder.
pub fn parse_fingerprint_var(value: &str) -> Option<&str> {
    let re = FINGERPRINT_VAR_RE.as_ref()?;
    re.captures(value)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

pub fn is_default_fingerprint_var(value: &str) -> bool {
    parse_fingerprint_var(value) == Some("default")
}

/// Resolves every `{{ var }}` entry of a fingerprint against the event.
///
/// Default markers are kept verbatim, they are substituted by the salted
/// component variant later on.
pub fn resolve_fingerprint_values(fingerprint: &[String], event_data: &Value) -> Vec<String> {
    fingerprint
        .iter()
        .map(|entry| match parse_fingerprint_var(entry) {
            Some(var) if var != "default" => get_fingerprint_value(var, event_data)
                .unwrap_or_else(|| entry.clone()),
            _ => entry.clone(),
        })
        .collect()
}

/// Expands `{{ var }}` references inside a title template.
///
/// Unknown variables are left untouched.
pub fn expand_title_template(template: &str, event_data: &Value) -> String {
    let Some(re) = TITLE_VAR_RE.as_ref() else {
        return template.to_owned();
    };
    re.replace_all(template, |caps: &Captures| {
        get_fingerprint_value(&caps[1], event_data).unwrap_or_else(|| caps[0].to_owned())
    })
    .into_owned()
}

/// Looks up the value of a fingerprint variable, `None` for unknown variables.
pub fn get_fingerprint_value(var: &str, event_data: &Value) -> Option<String> {
    let value = match var {
        "transaction" => str_field(event_data, "transaction")
            .unwrap_or_else(|| "<no-transaction>".to_owned()),
        "message" => event_message(event_data).unwrap_or_else(|| "<no-message>".to_owned()),
        "type" | "error.type" => last_exception_field(event_data, "type")
            .unwrap_or_else(|| "<no-type>".to_owned()),
        "value" | "error.value" => last_exception_field(event_data, "value")
            .unwrap_or_else(|| "<no-value>".to_owned()),
        "function" | "stack.function" => crash_frame_field(event_data, |f| f.function.clone())
            .unwrap_or_else(|| "<no-function>".to_owned()),
        "path" | "stack.abs_path" => crash_frame_field(event_data, |f| {
            f.abs_path.clone().or_else(|| f.filename.clone())
        })
        .unwrap_or_else(|| "<no-abs-path>".to_owned()),
        "stack.filename" => crash_frame_field(event_data, |f| {
            f.filename.clone().or_else(|| f.abs_path.clone())
        })
        .unwrap_or_else(|| "<no-filename>".to_owned()),
        "module" | "stack.module" => crash_frame_field(event_data, |f| f.module.clone())
            .unwrap_or_else(|| "<no-module>".to_owned()),
        "package" | "stack.package" => crash_frame_field(event_data, |f| {
            f.package.as_deref().map(|p| basename(p).to_owned())
        })
        .unwrap_or_else(|| "<no-package>".to_owned()),
        "level" => str_field(event_data, "level").unwrap_or_else(|| "<no-level>".to_owned()),
        "logger" => str_field(event_data, "logger").unwrap_or_else(|| "<no-logger>".to_owned()),
        _ => {
            let tag = var.strip_prefix("tags.")?;
            get_tag(event_data, tag).unwrap_or_else(|| format!("<no-value-for-tag-{tag}>"))
        }
    };
    Some(value)
}

/// Returns the frame most likely responsible for the crash.
///
/// That is the innermost in-app frame of the most relevant stack trace, or
/// its innermost frame if none is in-app.
pub fn get_crash_frame_from_event_data(event_data: &Value) -> Option<Frame> {
    let frames = get_exceptions(event_data)
        .and_then(|exceptions| exceptions.into_iter().last())
        .and_then(|exception| exception.stacktrace)
        .or_else(|| get_stacktrace(event_data))
        .or_else(|| {
            let threads = get_threads(event_data)?;
            match <[_; 1]>::try_from(threads) {
                Ok([thread]) => thread.stacktrace,
                Err(_) => None,
            }
        })?
        .frames;

    let in_app = frames.iter().rposition(|frame| frame.in_app == Some(true));
    match in_app {
        Some(idx) => frames.into_iter().nth(idx),
        None => frames.into_iter().last(),
    }
}

/// Whether `path` is a remote URL. `file:` URLs only count if asked to.
pub fn has_url_origin(path: Option<&str>, files_count_as_urls: bool) -> bool {
    let Some(path) = path.filter(|p| !p.is_empty()) else {
        return false;
    };
    if ["http:", "https:", "ftp:", "ftps:", "blob:"]
        .iter()
        .any(|scheme| path.starts_with(scheme))
    {
        return true;
    }
    path.starts_with("file:") && files_count_as_urls
}

/// Last component of a `/` or `\` separated path.
pub fn basename(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

/// Parses the boolean spellings accepted in rule files.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "yes" | "true" => Some(true),
        "0" | "no" | "false" => Some(false),
        _ => None,
    }
}

/// Quotes a rule argument if it would not survive the tokenizer unquoted.
pub fn quote_if_needed(value: &str) -> String {
    let needs_quotes = value.is_empty()
        || value
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '"' | '[' | ']' | '|' | '#' | ','));
    if !needs_quotes {
        return value.to_owned();
    }
    let mut rv = String::with_capacity(value.len() + 2);
    rv.push('"');
    for c in value.chars() {
        if matches!(c, '"' | '\\') {
            rv.push('\\');
        }
        rv.push(c);
    }
    rv.push('"');
    rv
}

pub(crate) fn family_for_frame(frame: &Frame, event_platform: Option<&str>) -> PlatformFamily {
    PlatformFamily::from_platform(frame.platform.as_deref().or(event_platform))
}

fn str_field(event_data: &Value, key: &str) -> Option<String> {
    event_data
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}

fn event_message(event_data: &Value) -> Option<String> {
    let logentry = event_data.get("logentry");
    logentry
        .and_then(|l| l.get("formatted"))
        .and_then(Value::as_str)
        .or_else(|| logentry.and_then(|l| l.get("message")).and_then(Value::as_str))
        .or_else(|| event_data.get("message").and_then(Value::as_str))
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}

fn last_exception_field(event_data: &Value, key: &str) -> Option<String> {
    event_data
        .get("exception")?
        .get("values")?
        .as_array()?
        .iter()
        .rev()
        .find(|exception| !exception.is_null())?
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}

fn crash_frame_field(
    event_data: &Value,
    field: impl FnOnce(&Frame) -> Option<String>,
) -> Option<String> {
    get_crash_frame_from_event_data(event_data)
        .as_ref()
        .and_then(field)
        .filter(|s| !s.is_empty())
}

/// Tags are either a list of `[key, value]` pairs or a plain object.
pub(crate) fn iter_tags(event_data: &Value) -> Vec<(String, String)> {
    match event_data.get("tags") {
        Some(Value::Array(pairs)) => pairs
            .iter()
            .filter_map(|pair| {
                let key = pair.get(0)?.as_str()?;
                let value = pair.get(1)?.as_str()?;
                Some((key.to_owned(), value.to_owned()))
            })
            .collect(),
        Some(Value::Object(map)) => map
            .iter()
            .filter_map(|(key, value)| Some((key.clone(), value.as_str()?.to_owned())))
            .collect(),
        _ => Vec::new(),
    }
}

fn get_tag(event_data: &Value, tag: &str) -> Option<String> {
    iter_tags(event_data)
        .into_iter()
        .find(|(key, _)| key == tag)
        .map(|(_, value)| value)
}
