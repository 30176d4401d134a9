use serde::Deserialize;

use crate::component::GroupingComponent;
use crate::context::GroupingContext;
use crate::event::Event;
use crate::strategies::{ComponentsByVariant, DEFAULT_VARIANTS, Strategy, call_with_variants};
use crate::utils::basename;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Template {
    filename: Option<String>,
    context_line: Option<String>,
}

/// Groups template rendering errors by template file and failing line.
pub struct TemplateStrategy;

impl Strategy for TemplateStrategy {
    fn id(&self) -> &'static str {
        "template"
    }

    fn name(&self) -> &'static str {
        "template"
    }

    fn evaluate(&self, event: &Event, context: &mut GroupingContext<'_>) -> ComponentsByVariant {
        let Some(template) = event.interface::<Template>("template") else {
            return ComponentsByVariant::new();
        };
        call_with_variants(context, DEFAULT_VARIANTS, |_| {
            let filename = match template.filename.as_deref().filter(|f| !f.is_empty()) {
                Some(filename) => GroupingComponent::with_values("filename", [basename(filename)]),
                None => GroupingComponent::new("filename"),
            };
            let context_line = match template.context_line.as_deref().map(str::trim) {
                Some(line) if !line.is_empty() => {
                    GroupingComponent::with_values("context-line", [line])
                }
                _ => GroupingComponent::new("context-line"),
            };
            Some(GroupingComponent::with_values("template", [filename, context_line]))
        })
    }
}
