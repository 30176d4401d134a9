//! Replaces event specific values in messages with placeholders, so that
//! `"user 42 not found"` and `"user 43 not found"` group together.

use std::sync::LazyLock;

use regex::{Captures, Regex};

/// Placeholder name and pattern. Earlier entries win where patterns overlap.
const PARAMETERS: &[(&str, &str)] = &[
    ("email", r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}"),
    ("url", r"\b(?:wss?|https?|ftp)://[^\s/$.?#][^\s]*"),
    (
        "ip",
        r"\b(?:(?:25[0-5]|2[0-4]\d|1?\d?\d)\.){3}(?:25[0-5]|2[0-4]\d|1?\d?\d)\b|\b(?:[0-9a-fA-F]{1,4}:){7}[0-9a-fA-F]{1,4}\b",
    ),
    (
        "uuid",
        r"\b[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}\b",
    ),
    ("sha1", r"\b[0-9a-fA-F]{40}\b"),
    ("md5", r"\b[0-9a-fA-F]{32}\b"),
    (
        "date",
        r"\b\d{4}-\d{2}-\d{2}(?:[T ]\d{2}:\d{2}(?::\d{2}(?:\.\d+)?)?(?:Z|[+-]\d{2}:?\d{2})?)?",
    ),
    ("float", r"-?\b\d+\.\d+\b"),
    ("int", r"-?\b\d+\b"),
    ("hex", r"\b0[xX][0-9a-fA-F]+\b|\b[0-9a-fA-F]{8,}\b"),
    ("bool", r"\b(?:true|false|True|False|TRUE|FALSE)\b"),
];

static PARAMETERIZATION_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    let pattern = PARAMETERS
        .iter()
        .map(|(name, pattern)| format!("(?P<{name}>{pattern})"))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&pattern).ok()
});

/// Normalizes a message (or exception value) for grouping.
pub fn normalize_message_for_grouping(message: &str) -> String {
    let Some(re) = PARAMETERIZATION_RE.as_ref() else {
        return message.to_owned();
    };
    re.replace_all(message, |caps: &Captures| {
        for (name, _) in PARAMETERS {
            let Some(m) = caps.name(name) else {
                continue;
            };
            // Words like "deadbeef" are hex-ish but not identifiers.
            if *name == "hex" && !m.as_str().starts_with("0x") && !m.as_str().bytes().any(|b| b.is_ascii_digit()) {
                return m.as_str().to_owned();
            }
            return format!("<{name}>");
        }
        caps[0].to_owned()
    })
    .into_owned()
}
