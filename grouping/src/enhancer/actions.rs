use std::fmt;
use std::ops::Range;

use serde::{Deserialize, Serialize};

use super::matchers::MatchFrame;
use crate::component::GroupingComponent;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlagKey {
    App,
    Group,
}

/// `^` applies a flag to all frames after the matched one, `v` to all frames before it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameRange {
    Up,
    Down,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum VarAction {
    MaxFrames(u32),
    MinFrames(u32),
    InvertStacktrace(bool),
    Category(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    Flag {
        key: FlagKey,
        flag: bool,
        range: Option<FrameRange>,
    },
    Var(VarAction),
}

/// Stack trace wide settings collected from var actions. The last matching rule wins.
#[derive(Debug, Default)]
pub(crate) struct StacktraceState {
    pub max_frames: Option<(u32, String)>,
    pub min_frames: Option<(u32, String)>,
    pub invert_stacktrace: bool,
}

fn frame_range(range: Option<FrameRange>, idx: usize, len: usize) -> Range<usize> {
    match range {
        None => idx..(idx + 1).min(len),
        Some(FrameRange::Down) => 0..idx.min(len),
        Some(FrameRange::Up) => (idx + 1).min(len)..len,
    }
}

impl Action {
    /// Modifier actions change the frames themselves before grouping.
    pub(crate) fn is_modifier(&self) -> bool {
        matches!(
            self,
            Action::Flag { key: FlagKey::App, .. } | Action::Var(VarAction::Category(_))
        )
    }

    /// Updater actions change the components built from the frames.
    pub(crate) fn is_updater(&self) -> bool {
        !matches!(self, Action::Var(VarAction::Category(_)))
    }

    pub(crate) fn apply_modifications_to_frames(&self, frames: &mut [MatchFrame], idx: usize) {
        match self {
            Action::Flag {
                key: FlagKey::App,
                flag,
                range,
            } => {
                for i in frame_range(*range, idx, frames.len()) {
                    frames[i].in_app = Some(*flag);
                }
            }
            Action::Var(VarAction::Category(category)) => {
                if let Some(frame) = frames.get_mut(idx) {
                    frame.category = Some(category.clone());
                }
            }
            _ => {}
        }
    }

    pub(crate) fn update_frame_components_contributions(
        &self,
        components: &mut [GroupingComponent],
        frames: &[MatchFrame],
        idx: usize,
        rule: &str,
        app_variant: bool,
    ) {
        let Action::Flag { key, flag, range } = self else {
            return;
        };
        let len = components.len().min(frames.len());
        for i in frame_range(*range, idx, len) {
            let (component, frame) = (&mut components[i], &frames[i]);
            match key {
                FlagKey::Group => {
                    if component.contributes() == *flag {
                        continue;
                    }
                    // Frames outside the app stay out of the app variant.
                    if *flag && app_variant && frame.in_app != Some(true) {
                        continue;
                    }
                    component.set_contributes(*flag);
                    component.set_hint(format!(
                        "{} by stack trace rule ({rule})",
                        if *flag { "un-ignored" } else { "ignored" }
                    ));
                }
                FlagKey::App => {
                    if frame.in_app_changed() && frame.in_app == Some(*flag) {
                        component.set_hint(format!(
                            "marked {} by stack trace rule ({rule})",
                            if *flag { "in-app" } else { "out of app" }
                        ));
                    }
                }
            }
        }
    }

    pub(crate) fn modify_stacktrace_state(&self, state: &mut StacktraceState, rule: &str) {
        match self {
            Action::Var(VarAction::MaxFrames(n)) => state.max_frames = Some((*n, rule.to_owned())),
            Action::Var(VarAction::MinFrames(n)) => state.min_frames = Some((*n, rule.to_owned())),
            Action::Var(VarAction::InvertStacktrace(invert)) => state.invert_stacktrace = *invert,
            _ => {}
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Flag { key, flag, range } => {
                let range = match range {
                    Some(FrameRange::Up) => "^",
                    Some(FrameRange::Down) => "v",
                    None => "",
                };
                let key = match key {
                    FlagKey::App => "app",
                    FlagKey::Group => "group",
                };
                write!(f, "{range}{}{key}", if *flag { "+" } else { "-" })
            }
            Action::Var(VarAction::MaxFrames(n)) => write!(f, "max-frames={n}"),
            Action::Var(VarAction::MinFrames(n)) => write!(f, "min-frames={n}"),
            Action::Var(VarAction::InvertStacktrace(b)) => {
                write!(f, "invert-stacktrace={}", if *b { 1 } else { 0 })
            }
            Action::Var(VarAction::Category(c)) => write!(f, "category={c}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app_flag(flag: bool, range: Option<FrameRange>) -> Action {
        Action::Flag {
            key: FlagKey::App,
            flag,
            range,
        }
    }

    #[test]
    fn test_frame_range() {
        assert_eq!(frame_range(None, 2, 5), 2..3);
        assert_eq!(frame_range(Some(FrameRange::Down), 2, 5), 0..2);
        assert_eq!(frame_range(Some(FrameRange::Up), 2, 5), 3..5);
        assert_eq!(frame_range(Some(FrameRange::Up), 4, 5), 5..5);
    }

    #[test]
    fn test_app_flag_modifies_frames() {
        let mut frames = vec![MatchFrame::default(); 4];
        app_flag(true, Some(FrameRange::Up)).apply_modifications_to_frames(&mut frames, 1);
        let in_app: Vec<_> = frames.iter().map(|f| f.in_app).collect();
        assert_eq!(in_app, vec![None, None, Some(true), Some(true)]);

        Action::Var(VarAction::Category("threadbase".to_owned()))
            .apply_modifications_to_frames(&mut frames, 0);
        assert_eq!(frames[0].category.as_deref(), Some("threadbase"));
    }

    #[test]
    fn test_group_flag_respects_app_variant() {
        let frames = vec![
            MatchFrame { in_app: Some(false), ..Default::default() },
            MatchFrame { in_app: Some(true), ..Default::default() },
        ];
        let action = Action::Flag {
            key: FlagKey::Group,
            flag: true,
            range: None,
        };

        let mut app = vec![GroupingComponent::new("frame"), GroupingComponent::new("frame")];
        for idx in 0..2 {
            action.update_frame_components_contributions(&mut app, &frames, idx, "function:x", true);
        }
        assert!(!app[0].contributes());
        assert!(app[1].contributes());
        assert_eq!(app[1].hint(), Some("un-ignored by stack trace rule (function:x)"));

        let mut system = vec![GroupingComponent::new("frame"), GroupingComponent::new("frame")];
        for idx in 0..2 {
            action.update_frame_components_contributions(&mut system, &frames, idx, "function:x", false);
        }
        assert!(system.iter().all(GroupingComponent::contributes));
    }

    #[test]
    fn test_display() {
        assert_eq!(app_flag(true, None).to_string(), "+app");
        assert_eq!(
            Action::Flag { key: FlagKey::Group, flag: false, range: Some(FrameRange::Down) }.to_string(),
            "v-group"
        );
        assert_eq!(Action::Var(VarAction::MaxFrames(3)).to_string(), "max-frames=3");
        assert_eq!(Action::Var(VarAction::InvertStacktrace(true)).to_string(), "invert-stacktrace=1");
    }
}
