//! Stack trace enhancement rules.
//!
//! Enhancements adjust how stack traces are grouped: they can flip the in-app
//! flag of frames, tag frames with a category, exclude frames from grouping
//! or limit how many frames are considered. Projects write them in a small
//! line based rule language on top of a built-in base.

mod actions;
mod bases;
mod matchers;
mod parser;

use std::fmt;
use std::io::Read;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};

pub use actions::{Action, FlagKey, FrameRange, VarAction};
pub use bases::{base_rules, is_known_base};
pub use matchers::{ExceptionData, FrameMatcher, MatchFrame, MatcherDef, MatcherKey, MatcherPosition};

use crate::component::GroupingComponent;
use actions::StacktraceState;

/// Bumped whenever the serialized form changes incompatibly.
pub const ENHANCEMENTS_VERSION: u8 = 2;

const ZSTD_LEVEL: i32 = 3;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SyntaxError {
    #[error("unknown matcher '{0}'")]
    UnknownMatcher(String),
    #[error("unknown action '{0}'")]
    UnknownAction(String),
    #[error("invalid value '{value}' for '{key}'")]
    InvalidValue { key: String, value: String },
    #[error("invalid pattern {0}")]
    InvalidPattern(String),
    #[error("expected {0}")]
    Expected(&'static str),
    #[error("unexpected '{0}'")]
    Unexpected(String),
    #[error("unterminated quoted string")]
    UnterminatedQuote,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidEnhancerConfig {
    #[error("syntax error on line {line}: {reason}")]
    Syntax { line: usize, reason: SyntaxError },

    #[error("unknown enhancements base '{0}'")]
    UnknownBase(String),

    #[error("unsupported enhancements version {0}")]
    UnsupportedVersion(u8),

    #[error("could not encode enhancements: {0}")]
    Encode(String),

    #[error("could not decode enhancements: {0}")]
    Decode(String),
}

#[derive(Clone, Debug)]
pub struct Rule {
    matchers: Vec<FrameMatcher>,
    actions: Vec<Action>,
}

impl Rule {
    pub(crate) fn new(matchers: Vec<FrameMatcher>, actions: Vec<Action>) -> Self {
        Rule { matchers, actions }
    }

    pub fn matchers(&self) -> &[FrameMatcher] {
        &self.matchers
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    /// The matcher half of the rule, used in hints.
    pub fn matcher_description(&self) -> String {
        self.matchers
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn matches_frame(
        &self,
        frames: &[MatchFrame],
        idx: usize,
        exception_data: &ExceptionData,
    ) -> bool {
        self.matchers
            .iter()
            .all(|matcher| matcher.matches(frames, idx, exception_data))
    }

    fn has_modifier_actions(&self) -> bool {
        self.actions.iter().any(Action::is_modifier)
    }

    fn has_updater_actions(&self) -> bool {
        self.actions.iter().any(Action::is_updater)
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.matcher_description())?;
        for action in &self.actions {
            write!(f, " {action}")?;
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct RuleStructure {
    matchers: Vec<MatcherDef>,
    actions: Vec<Action>,
}

#[derive(Serialize, Deserialize)]
struct EnhancementsStructure {
    version: u8,
    bases: Vec<String>,
    rules: Vec<RuleStructure>,
}

/// A parsed set of enhancement rules on top of zero or more built-in bases.
#[derive(Clone, Debug, Default)]
pub struct Enhancements {
    bases: Vec<String>,
    rules: Vec<Rule>,
}

impl Enhancements {
    /// Enhancements without custom rules.
    pub fn with_bases<S: Into<String>>(bases: impl IntoIterator<Item = S>) -> Self {
        Enhancements {
            bases: bases.into_iter().map(Into::into).collect(),
            rules: Vec::new(),
        }
    }

    pub fn from_config_string(input: &str, bases: &[&str]) -> Result<Self, InvalidEnhancerConfig> {
        if let Some(unknown) = bases.iter().find(|base| !is_known_base(base)) {
            return Err(InvalidEnhancerConfig::UnknownBase((*unknown).to_owned()));
        }
        Ok(Enhancements {
            bases: bases.iter().map(|base| (*base).to_owned()).collect(),
            rules: parser::parse_rules(input)?,
        })
    }

    pub fn bases(&self) -> &[String] {
        &self.bases
    }

    /// The project's own rules, without those of the bases.
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Base rules first, then the project's own rules.
    pub fn iter_rules(&self) -> impl Iterator<Item = &Rule> {
        self.bases
            .iter()
            .filter_map(|base| base_rules(base))
            .flatten()
            .chain(self.rules.iter())
    }

    /// Applies in-app and category changes to the frames, in rule order.
    pub fn apply_modifications_to_frames(
        &self,
        frames: &mut [MatchFrame],
        exception_data: &ExceptionData,
    ) {
        for rule in self.iter_rules().filter(|rule| rule.has_modifier_actions()) {
            for idx in 0..frames.len() {
                if !rule.matches_frame(frames, idx, exception_data) {
                    continue;
                }
                for action in rule.actions().iter().filter(|action| action.is_modifier()) {
                    action.apply_modifications_to_frames(frames, idx);
                }
            }
        }
    }

    /// Builds the stack trace component from already computed frame
    /// components, applying group flags, hints and frame limits.
    ///
    /// `frames` must be the frames after [`Self::apply_modifications_to_frames`].
    pub fn assemble_stacktrace_component(
        &self,
        mut components: Vec<GroupingComponent>,
        frames: &[MatchFrame],
        exception_data: &ExceptionData,
        app_variant: bool,
    ) -> GroupingComponent {
        let mut state = StacktraceState::default();
        let len = components.len().min(frames.len());

        for rule in self.iter_rules().filter(|rule| rule.has_updater_actions()) {
            let description = rule.matcher_description();
            for idx in 0..len {
                if !rule.matches_frame(frames, idx, exception_data) {
                    continue;
                }
                for action in rule.actions().iter().filter(|action| action.is_updater()) {
                    action.update_frame_components_contributions(
                        &mut components,
                        frames,
                        idx,
                        &description,
                        app_variant,
                    );
                    action.modify_stacktrace_state(&mut state, &description);
                }
            }
        }

        if let Some((max_frames, rule)) = &state.max_frames {
            let max_frames = *max_frames as usize;
            let hint = format!(
                "ignored because only {max_frames} {} considered by stack trace rule ({rule})",
                if max_frames == 1 { "frame is" } else { "frames are" }
            );
            let mut kept = 0;
            for component in components.iter_mut().rev() {
                if !component.contributes() {
                    continue;
                }
                if kept < max_frames {
                    kept += 1;
                } else {
                    component.ignore(hint.clone());
                }
            }
        }

        let mut discard_hint = None;
        if let Some((min_frames, rule)) = &state.min_frames {
            let contributing = components.iter().filter(|c| c.contributes()).count();
            if contributing > 0 && contributing < *min_frames as usize {
                discard_hint = Some(format!(
                    "discarded because stack trace only contains {contributing} frame{} which is under the configured threshold by stack trace rule ({rule})",
                    if contributing == 1 { "" } else { "s" }
                ));
            }
        }

        if state.invert_stacktrace {
            components.reverse();
        }

        let mut rv = GroupingComponent::with_values("stacktrace", components);
        if let Some(hint) = discard_hint {
            rv.ignore(hint);
        }
        rv
    }

    /// Serializes the enhancements into the compact form stored in grouping configs.
    pub fn dumps(&self) -> Result<String, InvalidEnhancerConfig> {
        let structure = EnhancementsStructure {
            version: ENHANCEMENTS_VERSION,
            bases: self.bases.clone(),
            rules: self
                .rules
                .iter()
                .map(|rule| RuleStructure {
                    matchers: rule.matchers.iter().map(|m| m.def().clone()).collect(),
                    actions: rule.actions.clone(),
                })
                .collect(),
        };

        let encode_error = |err: &dyn fmt::Display| InvalidEnhancerConfig::Encode(err.to_string());
        let mut encoder =
            zstd::stream::write::Encoder::new(Vec::new(), ZSTD_LEVEL).map_err(|e| encode_error(&e))?;
        bincode::serde::encode_into_std_write(&structure, &mut encoder, bincode::config::standard())
            .map_err(|e| encode_error(&e))?;
        let compressed = encoder.finish().map_err(|e| encode_error(&e))?;
        Ok(URL_SAFE_NO_PAD.encode(compressed))
    }

    pub fn loads(input: &str) -> Result<Self, InvalidEnhancerConfig> {
        let decode_error = |err: &dyn fmt::Display| InvalidEnhancerConfig::Decode(err.to_string());
        let compressed = URL_SAFE_NO_PAD
            .decode(input.trim_end_matches('=').as_bytes())
            .map_err(|e| decode_error(&e))?;

        let mut decoder = zstd::stream::read::Decoder::new(compressed.as_slice())
            .map_err(|e| decode_error(&e))?;
        let mut raw = Vec::new();
        decoder.read_to_end(&mut raw).map_err(|e| decode_error(&e))?;
        let (structure, _): (EnhancementsStructure, usize) =
            bincode::serde::decode_from_slice(&raw, bincode::config::standard())
                .map_err(|e| decode_error(&e))?;

        if structure.version != ENHANCEMENTS_VERSION {
            return Err(InvalidEnhancerConfig::UnsupportedVersion(structure.version));
        }
        if let Some(unknown) = structure.bases.iter().find(|base| !is_known_base(base)) {
            return Err(InvalidEnhancerConfig::UnknownBase(unknown.clone()));
        }

        let mut rules = Vec::with_capacity(structure.rules.len());
        for rule in structure.rules {
            let matchers = rule
                .matchers
                .into_iter()
                .map(FrameMatcher::new)
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| decode_error(&e))?;
            rules.push(Rule::new(matchers, rule.actions));
        }

        Ok(Enhancements {
            bases: structure.bases,
            rules,
        })
    }
}

impl fmt::Display for Enhancements {
    /// Renders the project's own rules back into the rule language.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for rule in &self.rules {
            writeln!(f, "{rule}")?;
        }
        Ok(())
    }
}
