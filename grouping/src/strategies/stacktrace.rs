use crate::component::GroupingComponent;
use crate::context::GroupingContext;
use crate::enhancer::{ExceptionData, MatchFrame};
use crate::event::{Event, PlatformFamily, Stacktrace};
use crate::strategies::frame::{frame_component, is_recursion};
use crate::strategies::{ComponentsByVariant, STACKTRACE_VARIANTS, Strategy, call_with_variants};

/// Groups by the top-level stack trace of events without exceptions.
pub struct StacktraceStrategy;

impl Strategy for StacktraceStrategy {
    fn id(&self) -> &'static str {
        "stacktrace"
    }

    fn name(&self) -> &'static str {
        "stacktrace"
    }

    fn evaluate(&self, event: &Event, context: &mut GroupingContext<'_>) -> ComponentsByVariant {
        let Some(stacktrace) = event.stacktrace() else {
            return ComponentsByVariant::new();
        };
        call_with_variants(context, STACKTRACE_VARIANTS, |context| {
            Some(stacktrace_component(&stacktrace, event.platform(), context))
        })
    }
}

/// Builds the stack trace component for the variant selected on the context.
///
/// Enhancement rules see the exception stored under `exception_data`, if the
/// stack trace belongs to one.
pub fn stacktrace_component(
    stacktrace: &Stacktrace,
    event_platform: Option<&str>,
    context: &mut GroupingContext<'_>,
) -> GroupingComponent {
    let enhancements = context.config().enhancements();
    let app_variant = context.variant() == Some("app");
    let exception_data = ExceptionData::from_value(context.get("exception_data"));

    let frames = &stacktrace.frames;
    let mut match_frames: Vec<MatchFrame> = frames
        .iter()
        .map(|frame| MatchFrame::new(frame, event_platform))
        .collect();
    enhancements.apply_modifications_to_frames(&mut match_frames, &exception_data);

    let mut components = Vec::with_capacity(frames.len());
    let mut prev_frame = None;
    for (frame, match_frame) in frames.iter().zip(&match_frames) {
        let mut scope = context.scope();
        scope.set(
            "is_recursion",
            prev_frame.is_some_and(|prev| is_recursion(frame, prev)),
        );
        components.push(frame_component(
            frame,
            match_frame.in_app.unwrap_or(false),
            event_platform,
            &scope,
        ));
        prev_frame = Some(frame);
    }

    if let ([frame], [component]) = (frames.as_slice(), components.as_mut_slice())
        && component.contributes()
        && PlatformFamily::from_platform(frame.platform.as_deref().or(event_platform))
            == PlatformFamily::JavaScript
        && !frame.is_url()
    {
        component.ignore("ignored single non-URL JavaScript frame");
    }

    let mut rv = enhancements.assemble_stacktrace_component(
        components,
        &match_frames,
        &exception_data,
        app_variant,
    );

    if !rv.contributes() && rv.hint().is_none() {
        if app_variant {
            rv.ignore("ignored because it contains no in-app frames");
        } else {
            rv.ignore("ignored because it contains no contributing frames");
        }
    }
    rv
}
