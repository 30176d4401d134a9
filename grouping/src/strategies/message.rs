use crate::component::GroupingComponent;
use crate::context::GroupingContext;
use crate::event::Event;
use crate::parameterization::normalize_message_for_grouping;
use crate::strategies::{ComponentsByVariant, DEFAULT_VARIANTS, Strategy, call_with_variants};

/// Groups by the log message, the last resort for events without stack traces.
pub struct MessageStrategy;

impl Strategy for MessageStrategy {
    fn id(&self) -> &'static str {
        "message"
    }

    fn name(&self) -> &'static str {
        "message"
    }

    fn evaluate(&self, event: &Event, context: &mut GroupingContext<'_>) -> ComponentsByVariant {
        let Some(logentry) = event.logentry() else {
            return ComponentsByVariant::new();
        };
        // The unformatted template groups better than the rendered message.
        let Some(message) = logentry
            .message
            .or(logentry.formatted)
            .filter(|message| !message.is_empty())
        else {
            return ComponentsByVariant::new();
        };

        call_with_variants(context, DEFAULT_VARIANTS, |context| {
            if !context.get_bool("normalize_message") {
                return Some(GroupingComponent::with_values("message", [message.as_str()]));
            }
            let normalized = normalize_message_for_grouping(&message);
            let stripped = normalized != message;
            let mut rv = GroupingComponent::with_values("message", [normalized]);
            if stripped {
                rv.set_hint("stripped event-specific values");
            }
            Some(rv)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::load_default_grouping_config;
    use crate::registry::{GroupingConfig, get_configuration};
    use serde_json::json;

    #[test]
    fn test_message_is_normalized() {
        let config = load_default_grouping_config();
        let mut context = GroupingContext::new(&config);
        let event = Event::new(json!({"logentry": {"formatted": "user 42 logged in"}}));
        let rv = MessageStrategy.evaluate(&event, &mut context);
        assert_eq!(rv["default"].iter_values(), vec!["user <int> logged in"]);
        assert_eq!(rv["default"].hint(), Some("stripped event-specific values"));
    }

    #[test]
    fn test_template_preferred_over_formatted() {
        let config = GroupingConfig::with_default_enhancements(
            get_configuration("newstyle:2019-10-29").unwrap(),
        );
        let mut context = GroupingContext::new(&config);
        let event = Event::new(json!({"logentry": {
            "message": "user %s logged in",
            "formatted": "user 42 logged in",
        }}));
        let rv = MessageStrategy.evaluate(&event, &mut context);
        assert_eq!(rv["default"].iter_values(), vec!["user %s logged in"]);
        assert_eq!(rv["default"].hint(), None);
    }

    #[test]
    fn test_plain_message_and_missing_message() {
        let config = load_default_grouping_config();
        let mut context = GroupingContext::new(&config);
        let rv = MessageStrategy.evaluate(&Event::new(json!({"message": "hello"})), &mut context);
        assert_eq!(rv["default"].iter_values(), vec!["hello"]);

        let rv = MessageStrategy.evaluate(&Event::new(json!({"level": "error"})), &mut context);
        assert!(rv.is_empty());
    }
}
