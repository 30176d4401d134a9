use std::collections::{HashMap, HashSet};

use crate::component::GroupingComponent;
use crate::context::GroupingContext;
use crate::enhancer::ExceptionData;
use crate::event::{Event, Exception};
use crate::parameterization::normalize_message_for_grouping;
use crate::strategies::stacktrace::stacktrace_component;
use crate::strategies::{ComponentsByVariant, STACKTRACE_VARIANTS, Strategy, call_with_variants};

/// Groups by the exception chain. Exception groups are reduced to their
/// distinct leaves first.
pub struct ChainedExceptionStrategy;

impl Strategy for ChainedExceptionStrategy {
    fn id(&self) -> &'static str {
        "chained-exception"
    }

    fn name(&self) -> &'static str {
        "exception"
    }

    fn evaluate(&self, event: &Event, context: &mut GroupingContext<'_>) -> ComponentsByVariant {
        let exceptions = event.exceptions().unwrap_or_default();
        if exceptions.is_empty() {
            return ComponentsByVariant::new();
        }
        call_with_variants(context, STACKTRACE_VARIANTS, |context| {
            let components: Vec<GroupingComponent> = exceptions
                .iter()
                .map(|exception| exception_component(exception, event.platform(), context))
                .collect();
            let mut selected: Vec<GroupingComponent> =
                filter_exceptions_for_exception_groups(&exceptions, &components)
                    .into_iter()
                    .filter_map(|idx| components.get(idx).cloned())
                    .collect();
            if selected.len() == 1 {
                return selected.pop();
            }
            Some(GroupingComponent::with_values("chained-exception", selected))
        })
    }
}

/// Builds the component of a single exception for the current variant.
fn exception_component(
    exception: &Exception,
    event_platform: Option<&str>,
    context: &mut GroupingContext<'_>,
) -> GroupingComponent {
    let variant = context.variant().map(str::to_owned);

    let mut type_component = match exception.ty.as_deref().filter(|ty| !ty.is_empty()) {
        Some(ty) => GroupingComponent::with_values("type", [ty]),
        None => GroupingComponent::new("type"),
    };
    let mechanism = exception.mechanism.as_ref();
    if mechanism.and_then(|m| m.synthetic) == Some(true) && variant.as_deref() != Some("system") {
        type_component.ignore("ignored because exception is synthetic");
    }

    let ns_error_component = mechanism
        .and_then(|m| m.meta.as_ref())
        .and_then(|meta| meta.ns_error.as_ref())
        .map(|ns_error| {
            let mut values = Vec::new();
            values.extend(ns_error.domain.clone());
            values.extend(ns_error.code.map(|code| code.to_string()));
            GroupingComponent::with_values("ns-error", values)
        });

    let stacktrace_component = match &exception.stacktrace {
        Some(stacktrace) => {
            let mut scope = context.scope();
            scope.set(
                "exception_data",
                ExceptionData::from_exception(exception).to_value(),
            );
            stacktrace_component(stacktrace, event_platform, &mut scope)
        }
        None => GroupingComponent::new("stacktrace"),
    };

    let mut value_component = GroupingComponent::new("value");
    if context.get_bool("with_exception_value_fallback")
        && let Some(value) = exception.value.as_deref().filter(|v| !v.is_empty())
    {
        let normalized = if context.get_bool("normalize_message") {
            normalize_message_for_grouping(value)
        } else {
            value.to_owned()
        };
        let stripped = normalized != value;
        value_component = GroupingComponent::with_values("value", [normalized]);
        if stripped {
            value_component.set_hint("stripped event-specific values");
        }

        if ns_error_component.as_ref().is_some_and(GroupingComponent::contributes) {
            value_component.mark_superseded("ignored because ns-error info takes precedence");
        } else if stacktrace_component.contributes() {
            value_component.mark_superseded("ignored because stacktrace takes precedence");
        }
    }

    let mut values = vec![stacktrace_component, type_component];
    values.extend(ns_error_component);
    values.push(value_component);
    GroupingComponent::with_values("exception", values)
}

/// Indices of the exceptions that take part in grouping.
///
/// Exceptions outside of exception groups are all kept. For an exception
/// group only the leaves matter: a single distinct leaf is returned on its
/// own, otherwise the top-level group followed by the distinct leaves.
/// Leaves are distinct when their components hash differently.
pub fn filter_exceptions_for_exception_groups(
    exceptions: &[Exception],
    components: &[GroupingComponent],
) -> Vec<usize> {
    let is_group = |exception: &Exception| {
        exception
            .mechanism
            .as_ref()
            .and_then(|m| m.is_exception_group)
            .unwrap_or(false)
    };
    if exceptions.len() <= 1 || !exceptions.iter().any(is_group) {
        return (0..exceptions.len()).collect();
    }

    let mut by_id = HashMap::new();
    let mut parents = HashSet::new();
    for (idx, exception) in exceptions.iter().enumerate() {
        let Some(mechanism) = &exception.mechanism else {
            continue;
        };
        if let Some(id) = mechanism.exception_id {
            by_id.insert(id, idx);
        }
        if let Some(parent) = mechanism.parent_id {
            parents.insert(parent);
        }
    }
    if by_id.is_empty() {
        return (0..exceptions.len()).collect();
    }

    let root = exceptions
        .iter()
        .position(|exception| {
            exception
                .mechanism
                .as_ref()
                .is_some_and(|m| m.parent_id.is_none() && m.exception_id.is_some())
        })
        .unwrap_or(0);

    let mut seen_hashes = HashSet::new();
    let mut leaves = Vec::new();
    for (idx, exception) in exceptions.iter().enumerate() {
        let has_children = exception
            .mechanism
            .as_ref()
            .and_then(|m| m.exception_id)
            .is_some_and(|id| parents.contains(&id));
        if idx == root || is_group(exception) || has_children {
            continue;
        }
        let hash = components.get(idx).and_then(GroupingComponent::get_hash);
        if seen_hashes.insert(hash) {
            leaves.push(idx);
        }
    }

    match leaves.as_slice() {
        [] => vec![root],
        [leaf] => vec![*leaf],
        _ => std::iter::once(root).chain(leaves).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::load_default_grouping_config;
    use crate::registry::{GroupingConfig, get_configuration};
    use serde_json::json;

    fn evaluate(config: &GroupingConfig, data: serde_json::Value) -> ComponentsByVariant {
        let mut context = GroupingContext::new(config);
        ChainedExceptionStrategy.evaluate(&Event::new(data), &mut context)
    }

    #[test]
    fn test_value_fallback_without_stacktrace() {
        let config = load_default_grouping_config();
        let rv = evaluate(
            &config,
            json!({"exception": {"values": [{"type": "ValueError", "value": "bad id 1234"}]}}),
        );
        let app = &rv["app"];
        assert_eq!(app.id(), "exception");
        assert_eq!(app.iter_values(), vec!["ValueError", "bad id <int>"]);
    }

    #[test]
    fn test_stacktrace_takes_precedence_over_value() {
        let config = load_default_grouping_config();
        let rv = evaluate(
            &config,
            json!({
                "platform": "python",
                "exception": {"values": [{
                    "type": "ValueError",
                    "value": "bad",
                    "stacktrace": {"frames": [{"function": "main", "in_app": true}]},
                }]},
            }),
        );
        let app = &rv["app"];
        assert_eq!(app.iter_values(), vec!["main", "ValueError"]);
        let dict = app.as_dict();
        assert_eq!(
            dict["values"][2]["hint"],
            json!("ignored because stacktrace takes precedence")
        );
        assert_eq!(dict["values"][2]["contributes_to_similarity"], json!(true));
    }

    #[test]
    fn test_synthetic_type_ignored_in_app_variant() {
        let config = GroupingConfig::with_default_enhancements(
            get_configuration("mobile:2021-04-02").unwrap(),
        );
        let rv = evaluate(
            &config,
            json!({"exception": {"values": [{
                "type": "EXC_BAD_ACCESS",
                "mechanism": {"type": "mach", "synthetic": true},
            }]}}),
        );
        assert!(!rv["app"].contributes());
        assert_eq!(rv["system"].iter_values(), vec!["EXC_BAD_ACCESS"]);
    }

    #[test]
    fn test_ns_error_takes_precedence() {
        let config = load_default_grouping_config();
        let rv = evaluate(
            &config,
            json!({"exception": {"values": [{
                "type": "NSError",
                "value": "The operation couldn't be completed.",
                "mechanism": {"type": "ns_error", "meta": {"ns_error": {"code": -1009, "domain": "NSURLErrorDomain"}}},
            }]}}),
        );
        assert_eq!(
            rv["app"].iter_values(),
            vec!["NSError", "NSURLErrorDomain", "-1009"]
        );
    }

    #[test]
    fn test_chained_exceptions() {
        let config = load_default_grouping_config();
        let rv = evaluate(
            &config,
            json!({"exception": {"values": [
                {"type": "KeyError", "value": "x"},
                {"type": "RuntimeError", "value": "y"},
            ]}}),
        );
        let app = &rv["app"];
        assert_eq!(app.id(), "chained-exception");
        assert_eq!(app.iter_values(), vec!["KeyError", "x", "RuntimeError", "y"]);
    }

    #[test]
    fn test_exception_group_with_single_distinct_leaf() {
        let config = load_default_grouping_config();
        let rv = evaluate(
            &config,
            json!({"exception": {"values": [
                {"type": "ExceptionGroup", "value": "2 errors", "mechanism": {"type": "chained", "is_exception_group": true, "exception_id": 0}},
                {"type": "ValueError", "value": "bad", "mechanism": {"type": "chained", "exception_id": 1, "parent_id": 0}},
                {"type": "ValueError", "value": "bad", "mechanism": {"type": "chained", "exception_id": 2, "parent_id": 0}},
            ]}}),
        );
        let app = &rv["app"];
        assert_eq!(app.id(), "exception");
        assert_eq!(app.iter_values(), vec!["ValueError", "bad"]);
    }

    #[test]
    fn test_exception_group_with_distinct_leaves() {
        let config = load_default_grouping_config();
        let rv = evaluate(
            &config,
            json!({"exception": {"values": [
                {"type": "ExceptionGroup", "value": "2 errors", "mechanism": {"type": "chained", "is_exception_group": true, "exception_id": 0}},
                {"type": "ValueError", "value": "bad", "mechanism": {"type": "chained", "exception_id": 1, "parent_id": 0}},
                {"type": "TypeError", "value": "worse", "mechanism": {"type": "chained", "exception_id": 2, "parent_id": 0}},
            ]}}),
        );
        let app = &rv["app"];
        assert_eq!(app.id(), "chained-exception");
        assert_eq!(
            app.iter_values(),
            vec!["ExceptionGroup", "<int> errors", "ValueError", "bad", "TypeError", "worse"]
        );
    }
}
