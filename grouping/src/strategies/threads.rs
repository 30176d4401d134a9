use crate::component::GroupingComponent;
use crate::context::GroupingContext;
use crate::event::{Event, Thread};
use crate::strategies::stacktrace::stacktrace_component;
use crate::strategies::{ComponentsByVariant, STACKTRACE_VARIANTS, Strategy, call_with_variants};

/// Groups by the stack trace of the thread that crashed.
pub struct ThreadsStrategy;

impl Strategy for ThreadsStrategy {
    fn id(&self) -> &'static str {
        "threads"
    }

    fn name(&self) -> &'static str {
        "threads"
    }

    fn evaluate(&self, event: &Event, context: &mut GroupingContext<'_>) -> ComponentsByVariant {
        let Some(threads) = event.threads() else {
            return ComponentsByVariant::new();
        };
        let thread = pick_thread(&threads);
        call_with_variants(context, STACKTRACE_VARIANTS, |context| {
            let Some(thread) = thread else {
                let mut rv = GroupingComponent::new("threads");
                rv.set_hint("ignored because does not contain exactly one thread");
                return Some(rv);
            };
            let Some(stacktrace) = &thread.stacktrace else {
                let mut rv = GroupingComponent::new("threads");
                rv.set_hint("thread has no stacktrace");
                return Some(rv);
            };
            let stacktrace = stacktrace_component(stacktrace, event.platform(), context);
            Some(GroupingComponent::with_values("threads", [stacktrace]))
        })
    }
}

/// The crashed thread, else the current one, else the only one.
fn pick_thread(threads: &[Thread]) -> Option<&Thread> {
    only(threads.iter().filter(|t| t.crashed))
        .or_else(|| only(threads.iter().filter(|t| t.current)))
        .or_else(|| only(threads.iter()))
}

fn only<'a>(mut iter: impl Iterator<Item = &'a Thread>) -> Option<&'a Thread> {
    let first = iter.next()?;
    iter.next().is_none().then_some(first)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::load_default_grouping_config;
    use serde_json::json;

    fn stacktrace(function: &str) -> serde_json::Value {
        json!({"frames": [{"function": function, "in_app": true}]})
    }

    #[test]
    fn test_crashed_thread_wins() {
        let config = load_default_grouping_config();
        let mut context = GroupingContext::new(&config);
        let event = Event::new(json!({"threads": {"values": [
            {"id": 1, "current": true, "stacktrace": stacktrace("idle")},
            {"id": 2, "crashed": true, "stacktrace": stacktrace("boom")},
        ]}}));
        let rv = ThreadsStrategy.evaluate(&event, &mut context);
        assert_eq!(rv["app"].iter_values(), vec!["boom"]);
        assert_eq!(rv["system"].iter_values(), vec!["boom"]);
    }

    #[test]
    fn test_ambiguous_threads() {
        let config = load_default_grouping_config();
        let mut context = GroupingContext::new(&config);
        let event = Event::new(json!({"threads": {"values": [
            {"id": 1, "stacktrace": stacktrace("a")},
            {"id": 2, "stacktrace": stacktrace("b")},
        ]}}));
        let rv = ThreadsStrategy.evaluate(&event, &mut context);
        assert!(!rv["app"].contributes());
        assert_eq!(
            rv["app"].hint(),
            Some("ignored because does not contain exactly one thread")
        );
    }

    #[test]
    fn test_thread_without_stacktrace() {
        let config = load_default_grouping_config();
        let mut context = GroupingContext::new(&config);
        let event = Event::new(json!({"threads": {"values": [{"id": 1}]}}));
        let rv = ThreadsStrategy.evaluate(&event, &mut context);
        assert_eq!(rv["system"].hint(), Some("thread has no stacktrace"));
    }
}
