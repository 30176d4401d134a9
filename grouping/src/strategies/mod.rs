//! Grouping strategies.
//!
//! A strategy looks at one interface of the event and turns it into a
//! component tree per variant. The registered strategies are evaluated in a
//! fixed order, the first one that contributes wins and everything after it
//! only counts towards similarity.

use indexmap::IndexMap;

use crate::component::GroupingComponent;
use crate::context::GroupingContext;
use crate::event::Event;

mod exception;
mod frame;
mod message;
mod security;
mod stacktrace;
mod template;
mod threads;

pub use exception::{ChainedExceptionStrategy, filter_exceptions_for_exception_groups};
pub use frame::{frame_component, is_recursion};
pub use message::MessageStrategy;
pub use security::{CspStrategy, ExpectCtStrategy, ExpectStapleStrategy, HpkpStrategy};
pub use stacktrace::{StacktraceStrategy, stacktrace_component};
pub use template::TemplateStrategy;
pub use threads::ThreadsStrategy;

/// Component trees keyed by variant name, in the order they were produced.
pub type ComponentsByVariant = IndexMap<String, GroupingComponent>;

/// Variants produced for anything with a stack trace.
pub const STACKTRACE_VARIANTS: &[&str] = &["app", "system"];

/// Variant of strategies that do not distinguish in-app code.
pub const DEFAULT_VARIANTS: &[&str] = &["default"];

pub trait Strategy: Send + Sync {
    /// Stable identifier, part of the registered configuration.
    fn id(&self) -> &'static str;

    /// Name of the interface the strategy looks at, used in precedence hints.
    fn name(&self) -> &'static str;

    /// Computes the components of this strategy for every variant it
    /// supports. An empty map means the event lacks the interface.
    fn evaluate(&self, event: &Event, context: &mut GroupingContext<'_>) -> ComponentsByVariant;
}

pub const DEFAULT_STRATEGIES: &[&dyn Strategy] = &[
    &ChainedExceptionStrategy,
    &ThreadsStrategy,
    &StacktraceStrategy,
    &TemplateStrategy,
    &CspStrategy,
    &HpkpStrategy,
    &ExpectStapleStrategy,
    &ExpectCtStrategy,
    &MessageStrategy,
];

/// Runs `f` once per variant with the variant set on the context.
///
/// When a variant is already selected by an outer call only that one is
/// computed. `f` returns `None` when the event has nothing to offer, in that
/// case no variant is produced.
pub(crate) fn call_with_variants<F>(
    context: &mut GroupingContext<'_>,
    variants: &[&str],
    mut f: F,
) -> ComponentsByVariant
where
    F: FnMut(&mut GroupingContext<'_>) -> Option<GroupingComponent>,
{
    let mut rv = ComponentsByVariant::new();

    if let Some(variant) = context.variant().map(str::to_owned) {
        if let Some(component) = f(context) {
            rv.insert(variant, component);
        }
        return rv;
    }

    for variant in variants {
        let mut scope = context.scope();
        scope.set("variant", *variant);
        match f(&mut *scope) {
            Some(component) => {
                rv.insert((*variant).to_owned(), component);
            }
            None => break,
        }
    }
    rv
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::load_default_grouping_config;

    #[test]
    fn test_call_with_variants_sets_variant() {
        let config = load_default_grouping_config();
        let mut context = GroupingContext::new(&config);
        let rv = call_with_variants(&mut context, STACKTRACE_VARIANTS, |context| {
            let variant = context.variant().unwrap_or_default().to_owned();
            Some(GroupingComponent::with_values("test", [variant]))
        });
        assert_eq!(rv.keys().collect::<Vec<_>>(), vec!["app", "system"]);
        assert_eq!(rv["system"].iter_values(), vec!["system"]);
        assert_eq!(context.variant(), None);
    }

    #[test]
    fn test_call_with_variants_respects_outer_variant() {
        let config = load_default_grouping_config();
        let mut context = GroupingContext::new(&config);
        let mut scope = context.scope();
        scope.set("variant", "system");
        let rv = call_with_variants(&mut scope, STACKTRACE_VARIANTS, |_| {
            Some(GroupingComponent::new("test"))
        });
        assert_eq!(rv.keys().collect::<Vec<_>>(), vec!["system"]);
    }

    #[test]
    fn test_call_with_variants_without_data() {
        let config = load_default_grouping_config();
        let mut context = GroupingContext::new(&config);
        let rv = call_with_variants(&mut context, DEFAULT_VARIANTS, |_| None);
        assert!(rv.is_empty());
    }
}
