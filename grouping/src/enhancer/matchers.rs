use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::SyntaxError;
use crate::event::{Exception, Frame, PlatformFamily};
use crate::glob::{Glob, GlobOptions};
use crate::utils::{basename, family_for_frame, parse_bool, quote_if_needed};

/// The frame (or exception) attribute a matcher looks at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatcherKey {
    Family,
    App,
    Path,
    Module,
    Function,
    Package,
    Type,
    Value,
    Mechanism,
    Category,
}

impl MatcherKey {
    /// Accepts the canonical keys plus their `stack.` / `error.` aliases.
    pub fn from_key(key: &str) -> Option<Self> {
        Some(match key {
            "family" => MatcherKey::Family,
            "app" | "stack.app" => MatcherKey::App,
            "path" | "stack.abs_path" => MatcherKey::Path,
            "module" | "stack.module" => MatcherKey::Module,
            "function" | "stack.function" => MatcherKey::Function,
            "package" | "stack.package" => MatcherKey::Package,
            "type" | "error.type" => MatcherKey::Type,
            "value" | "error.value" => MatcherKey::Value,
            "mechanism" | "error.mechanism" => MatcherKey::Mechanism,
            "category" => MatcherKey::Category,
            _ => return None,
        })
    }
}

/// Which frame relative to the current one a matcher applies to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatcherPosition {
    Frame,
    Caller,
    Callee,
}

/// The serializable part of a matcher, as written in the rule.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatcherDef {
    pub key: String,
    pub pattern: String,
    pub negated: bool,
    pub position: MatcherPosition,
}

/// Exception attributes exposed to `type:`, `value:` and `mechanism:` matchers.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionData {
    #[serde(rename = "type")]
    pub ty: Option<String>,
    pub value: Option<String>,
    pub mechanism: Option<String>,
}

impl ExceptionData {
    pub fn from_exception(exception: &Exception) -> Self {
        ExceptionData {
            ty: exception.ty.clone(),
            value: exception.value.clone(),
            mechanism: exception.mechanism.as_ref().and_then(|m| m.ty.clone()),
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn from_value(value: Option<&Value>) -> Self {
        value
            .and_then(|value| serde_json::from_value(value.clone()).ok())
            .unwrap_or_default()
    }
}

/// A frame reduced to the attributes rules can match on.
///
/// Modifier actions (`+app`, `category=`) write into this copy, never into
/// the event.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MatchFrame {
    pub family: PlatformFamily,
    pub function: Option<String>,
    pub module: Option<String>,
    pub package: Option<String>,
    pub abs_path: Option<String>,
    pub filename: Option<String>,
    pub in_app: Option<bool>,
    pub orig_in_app: Option<bool>,
    pub category: Option<String>,
}

impl MatchFrame {
    pub fn new(frame: &Frame, event_platform: Option<&str>) -> Self {
        MatchFrame {
            family: family_for_frame(frame, event_platform),
            function: frame.function.clone().or_else(|| frame.raw_function.clone()),
            module: frame.module.clone(),
            package: frame.package.clone(),
            abs_path: frame.abs_path.clone(),
            filename: frame
                .filename
                .as_deref()
                .map(|filename| basename(filename).to_owned()),
            in_app: frame.in_app,
            orig_in_app: frame.in_app,
            category: None,
        }
    }

    pub fn in_app_changed(&self) -> bool {
        self.in_app != self.orig_in_app
    }
}

#[derive(Clone, Debug)]
enum CompiledPattern {
    Glob(Glob),
    Families(Vec<String>),
    Bool(bool),
}

#[derive(Clone, Debug)]
pub struct FrameMatcher {
    def: MatcherDef,
    kind: MatcherKey,
    pattern: CompiledPattern,
}

impl FrameMatcher {
    pub fn new(def: MatcherDef) -> Result<Self, SyntaxError> {
        let kind =
            MatcherKey::from_key(&def.key).ok_or_else(|| SyntaxError::UnknownMatcher(def.key.clone()))?;
        let pattern = match kind {
            MatcherKey::Family => CompiledPattern::Families(
                def.pattern.split(',').map(|f| f.trim().to_owned()).collect(),
            ),
            MatcherKey::App => {
                CompiledPattern::Bool(parse_bool(&def.pattern).ok_or_else(|| {
                    SyntaxError::InvalidValue {
                        key: def.key.clone(),
                        value: def.pattern.clone(),
                    }
                })?)
            }
            MatcherKey::Path | MatcherKey::Package => compile(&def.pattern, GlobOptions::PATH)?,
            _ => compile(&def.pattern, GlobOptions::default())?,
        };
        Ok(FrameMatcher { def, kind, pattern })
    }

    pub fn def(&self) -> &MatcherDef {
        &self.def
    }

    pub fn position(&self) -> MatcherPosition {
        self.def.position
    }

    /// Evaluates the matcher for `frames[idx]`, looking at the caller or
    /// callee instead if the matcher is positioned that way.
    pub fn matches(&self, frames: &[MatchFrame], idx: usize, exception_data: &ExceptionData) -> bool {
        let target = match self.def.position {
            MatcherPosition::Frame => Some(idx),
            MatcherPosition::Caller => idx.checked_sub(1),
            MatcherPosition::Callee => Some(idx + 1),
        };
        let Some(frame) = target.and_then(|i| frames.get(i)) else {
            return false;
        };
        self.positive_match(frame, exception_data) != self.def.negated
    }

    fn positive_match(&self, frame: &MatchFrame, exception_data: &ExceptionData) -> bool {
        match (&self.pattern, self.kind) {
            (CompiledPattern::Families(families), _) => families
                .iter()
                .any(|family| family == "all" || family == frame.family.as_str()),
            (CompiledPattern::Bool(expected), _) => frame.in_app.unwrap_or(false) == *expected,
            (CompiledPattern::Glob(glob), MatcherKey::Path) => [&frame.abs_path, &frame.filename]
                .into_iter()
                .flatten()
                .any(|path| glob.is_path_match(path)),
            (CompiledPattern::Glob(glob), MatcherKey::Package) => frame
                .package
                .as_deref()
                .is_some_and(|package| glob.is_path_match(package)),
            (CompiledPattern::Glob(glob), key) => {
                let value = match key {
                    MatcherKey::Function => frame.function.as_deref(),
                    MatcherKey::Module => frame.module.as_deref(),
                    MatcherKey::Category => frame.category.as_deref(),
                    MatcherKey::Type => {
                        Some(exception_data.ty.as_deref().unwrap_or("<unknown>"))
                    }
                    MatcherKey::Value => {
                        Some(exception_data.value.as_deref().unwrap_or("<unknown>"))
                    }
                    MatcherKey::Mechanism => {
                        Some(exception_data.mechanism.as_deref().unwrap_or("<unknown>"))
                    }
                    _ => None,
                };
                glob.is_match(value.unwrap_or(""))
            }
        }
    }
}

fn compile(pattern: &str, options: GlobOptions) -> Result<CompiledPattern, SyntaxError> {
    Glob::new(pattern, options)
        .map(CompiledPattern::Glob)
        .map_err(|err| SyntaxError::InvalidPattern(format!("{pattern}: {err}")))
}

impl fmt::Display for FrameMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let matcher = format!(
            "{}{}:{}",
            if self.def.negated { "!" } else { "" },
            self.def.key,
            quote_if_needed(&self.def.pattern)
        );
        match self.def.position {
            MatcherPosition::Frame => f.write_str(&matcher),
            MatcherPosition::Caller => write!(f, "[ {matcher} ] |"),
            MatcherPosition::Callee => write!(f, "| [ {matcher} ]"),
        }
    }
}
