use std::fmt;

use serde_json::Value;

use super::InvalidFingerprintingConfig;
use crate::event::{PlatformFamily, find_stacktraces, get_exceptions, get_logentry};
use crate::glob::{Glob, GlobOptions};
use crate::utils::{family_for_frame, iter_tags, parse_bool, quote_if_needed};

/// Groups of values a rule matches against. All matchers of a rule that share
/// a group must match the same element of that group.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum MatchGroup {
    Exceptions,
    Frames,
    Messages,
    LogInfo,
    Sdk,
    Release,
    Tags,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum MatcherKind {
    Type,
    Value,
    Function,
    Path,
    Module,
    Package,
    Family,
    App,
    Message,
    Logger,
    Level,
    Sdk,
    Release,
    Tag(String),
}

impl MatcherKind {
    fn from_key(key: &str) -> Option<Self> {
        Some(match key {
            "type" | "error.type" => MatcherKind::Type,
            "value" | "error.value" => MatcherKind::Value,
            "function" | "stack.function" => MatcherKind::Function,
            "path" | "stack.abs_path" => MatcherKind::Path,
            "module" | "stack.module" => MatcherKind::Module,
            "package" | "stack.package" => MatcherKind::Package,
            "family" => MatcherKind::Family,
            "app" | "stack.app" => MatcherKind::App,
            "message" => MatcherKind::Message,
            "logger" => MatcherKind::Logger,
            "level" => MatcherKind::Level,
            "sdk" => MatcherKind::Sdk,
            "release" => MatcherKind::Release,
            _ => {
                let tag = key.strip_prefix("tags.").filter(|tag| !tag.is_empty())?;
                MatcherKind::Tag(tag.to_owned())
            }
        })
    }

    fn match_group(&self) -> MatchGroup {
        match self {
            MatcherKind::Type | MatcherKind::Value => MatchGroup::Exceptions,
            MatcherKind::Function
            | MatcherKind::Path
            | MatcherKind::Module
            | MatcherKind::Package
            | MatcherKind::Family
            | MatcherKind::App => MatchGroup::Frames,
            MatcherKind::Message => MatchGroup::Messages,
            MatcherKind::Logger | MatcherKind::Level => MatchGroup::LogInfo,
            MatcherKind::Sdk => MatchGroup::Sdk,
            MatcherKind::Release => MatchGroup::Release,
            MatcherKind::Tag(_) => MatchGroup::Tags,
        }
    }
}

#[derive(Clone, Debug)]
enum Pattern {
    Glob(Glob),
    Families(Vec<String>),
    Bool(Option<bool>),
}

#[derive(Clone, Debug)]
pub struct Matcher {
    key: String,
    pattern: String,
    negated: bool,
    kind: MatcherKind,
    compiled: Pattern,
}

impl PartialEq for Matcher {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.pattern == other.pattern && self.negated == other.negated
    }
}

impl Matcher {
    pub fn new(key: &str, pattern: &str, negated: bool) -> Result<Self, InvalidFingerprintingConfig> {
        let kind = MatcherKind::from_key(key)
            .ok_or_else(|| InvalidFingerprintingConfig::UnknownMatcher(key.to_owned()))?;
        let glob = |options| {
            Glob::new(pattern, options).map(Pattern::Glob).map_err(|err| {
                InvalidFingerprintingConfig::InvalidPattern {
                    pattern: pattern.to_owned(),
                    message: err.to_string(),
                }
            })
        };
        let compiled = match kind {
            MatcherKind::Family | MatcherKind::Sdk => Pattern::Families(
                pattern.split(',').map(|f| f.trim().to_owned()).collect(),
            ),
            MatcherKind::App => Pattern::Bool(parse_bool(pattern)),
            MatcherKind::Path | MatcherKind::Package | MatcherKind::Release => {
                glob(GlobOptions::PATH)?
            }
            MatcherKind::Message | MatcherKind::Level | MatcherKind::Value => {
                glob(GlobOptions::CASE_INSENSITIVE)?
            }
            _ => glob(GlobOptions::default())?,
        };
        Ok(Matcher {
            key: key.to_owned(),
            pattern: pattern.to_owned(),
            negated,
            kind,
            compiled,
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn negated(&self) -> bool {
        self.negated
    }

    pub(crate) fn match_group(&self) -> MatchGroup {
        self.kind.match_group()
    }

    /// `["!key", pattern]` as stored in the JSON form of a rule.
    pub fn to_json(&self) -> [String; 2] {
        [
            format!("{}{}", if self.negated { "!" } else { "" }, self.key),
            self.pattern.clone(),
        ]
    }

    pub(crate) fn matches(&self, values: &MatchValues) -> bool {
        self.positive_match(values) != self.negated
    }

    fn positive_match(&self, values: &MatchValues) -> bool {
        match (&self.compiled, &self.kind) {
            (Pattern::Families(flags), MatcherKind::Family) => values
                .family
                .is_some_and(|family| flags.iter().any(|f| f == "all" || f == family.as_str())),
            (Pattern::Families(flags), _) => values
                .sdk
                .as_deref()
                .is_some_and(|sdk| flags.iter().any(|f| f == "all" || f == sdk)),
            (Pattern::Bool(expected), _) => {
                matches!(expected, Some(expected) if *expected == values.in_app.unwrap_or(false))
            }
            (Pattern::Glob(glob), MatcherKind::Path) => {
                let abs_path = values.abs_path.as_deref();
                let filename = values.filename.as_deref();
                abs_path.is_some_and(|path| glob.is_path_match(path))
                    || (filename != abs_path && filename.is_some_and(|path| glob.is_path_match(path)))
            }
            (Pattern::Glob(glob), MatcherKind::Package | MatcherKind::Release) => {
                let value = match self.kind {
                    MatcherKind::Package => values.package.as_deref(),
                    _ => values.release.as_deref(),
                };
                value.is_some_and(|value| glob.is_path_match(value))
            }
            (Pattern::Glob(glob), MatcherKind::Message) => [&values.message, &values.value]
                .into_iter()
                .flatten()
                .any(|value| glob.is_match(value)),
            (Pattern::Glob(glob), MatcherKind::Tag(tag)) => values
                .tag
                .as_ref()
                .is_some_and(|(key, value)| key == tag && glob.is_match(value)),
            (Pattern::Glob(glob), kind) => {
                let value = match kind {
                    MatcherKind::Type => &values.ty,
                    MatcherKind::Value => &values.value,
                    MatcherKind::Function => &values.function,
                    MatcherKind::Module => &values.module,
                    MatcherKind::Logger => &values.logger,
                    MatcherKind::Level => &values.level,
                    _ => &None,
                };
                value.as_deref().is_some_and(|value| glob.is_match(value))
            }
        }
    }
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}:{}",
            if self.negated { "!" } else { "" },
            self.key,
            quote_if_needed(&self.pattern)
        )
    }
}

/// One element of a match group. Only the fields of its group are set.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct MatchValues {
    pub ty: Option<String>,
    pub value: Option<String>,
    pub function: Option<String>,
    pub abs_path: Option<String>,
    pub filename: Option<String>,
    pub module: Option<String>,
    pub package: Option<String>,
    pub family: Option<PlatformFamily>,
    pub in_app: Option<bool>,
    pub message: Option<String>,
    pub logger: Option<String>,
    pub level: Option<String>,
    pub sdk: Option<String>,
    pub release: Option<String>,
    pub tag: Option<(String, String)>,
}

/// The event's values split into match groups.
#[derive(Debug, Default)]
pub(crate) struct EventAccess {
    exceptions: Vec<MatchValues>,
    frames: Vec<MatchValues>,
    messages: Vec<MatchValues>,
    log_info: Vec<MatchValues>,
    sdk: Vec<MatchValues>,
    release: Vec<MatchValues>,
    tags: Vec<MatchValues>,
}

impl EventAccess {
    pub fn new(data: &Value) -> Self {
        let str_at = |value: Option<&Value>| value.and_then(Value::as_str).map(str::to_owned);
        let platform = data.get("platform").and_then(Value::as_str);
        let exceptions = get_exceptions(data).unwrap_or_default();

        let mut messages = Vec::new();
        if let Some(logentry) = get_logentry(data)
            && let Some(message) = logentry.formatted.or(logentry.message)
        {
            messages.push(MatchValues {
                message: Some(message),
                ..Default::default()
            });
        }
        // Exception values are matched by `message:` as well.
        messages.extend(exceptions.iter().filter_map(|exception| {
            Some(MatchValues {
                value: Some(exception.value.clone()?),
                ..Default::default()
            })
        }));

        EventAccess {
            exceptions: exceptions
                .iter()
                .map(|exception| MatchValues {
                    ty: exception.ty.clone(),
                    value: exception.value.clone(),
                    ..Default::default()
                })
                .collect(),
            frames: find_stacktraces(data)
                .iter()
                .flat_map(|stacktrace| stacktrace.frames.iter())
                .map(|frame| MatchValues {
                    function: frame.function.clone(),
                    abs_path: frame.abs_path.clone().or_else(|| frame.filename.clone()),
                    filename: frame.filename.clone(),
                    module: frame.module.clone(),
                    package: frame.package.clone(),
                    family: Some(family_for_frame(frame, platform)),
                    in_app: frame.in_app,
                    ..Default::default()
                })
                .collect(),
            messages,
            log_info: vec![MatchValues {
                logger: str_at(data.get("logger")),
                level: str_at(data.get("level")),
                ..Default::default()
            }],
            sdk: vec![MatchValues {
                sdk: str_at(data.get("sdk").and_then(|sdk| sdk.get("name"))),
                ..Default::default()
            }],
            release: vec![MatchValues {
                release: str_at(data.get("release")),
                ..Default::default()
            }],
            tags: iter_tags(data)
                .into_iter()
                .map(|tag| MatchValues {
                    tag: Some(tag),
                    ..Default::default()
                })
                .collect(),
        }
    }

    pub fn values(&self, group: MatchGroup) -> &[MatchValues] {
        match group {
            MatchGroup::Exceptions => &self.exceptions,
            MatchGroup::Frames => &self.frames,
            MatchGroup::Messages => &self.messages,
            MatchGroup::LogInfo => &self.log_info,
            MatchGroup::Sdk => &self.sdk,
            MatchGroup::Release => &self.release,
            MatchGroup::Tags => &self.tags,
        }
    }
}
