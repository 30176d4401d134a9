use std::sync::LazyLock;

use regex::{NoExpand, Regex};

use crate::component::GroupingComponent;
use crate::context::GroupingContext;
use crate::event::{Frame, PlatformFamily};
use crate::utils::{basename, has_url_origin};

const ANONYMOUS_NAMESPACE: &str = "(anonymous namespace)";
const ANONYMOUS_NAMESPACE_MARKER: &str = "`anonymous_namespace'";

/// Context lines longer than this are most likely minified code.
const MAX_CONTEXT_LINE_LEN: usize = 120;

static JAVA_CGLIB_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(\$\$[\w]+?CGLIB\$\$)[a-fA-F0-9]+(_[0-9]+)?").ok()
});
static JAVA_HIBERNATE_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\$HibernateProxy\$[a-zA-Z0-9]+").ok());
static JAVA_LAMBDA_MODULE_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\$\$Lambda\$[0-9]+/(?:0x)?[0-9a-fA-F]+").ok());
static JAVA_REFLECTION_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^((?:sun|jdk\.internal)\.reflect\.Generated(?:Serialization)?(?:Constructor|Method)Accessor)[0-9]+$").ok()
});
static RUBY_BLOCK_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^block (?:\([0-9]+ levels\) )?in ").ok());

fn replace(re: &LazyLock<Option<Regex>>, value: &str, replacement: &str) -> Option<String> {
    let re = re.as_ref()?;
    re.is_match(value)
        .then(|| re.replace_all(value, replacement).into_owned())
}

fn replace_literal(re: &LazyLock<Option<Regex>>, value: &str, replacement: &str) -> Option<String> {
    let re = re.as_ref()?;
    re.is_match(value)
        .then(|| re.replace_all(value, NoExpand(replacement)).into_owned())
}

/// Whether two consecutive frames are the same call site.
pub fn is_recursion(frame: &Frame, prev: &Frame) -> bool {
    frame.abs_path == prev.abs_path
        && frame.package == prev.package
        && frame.module == prev.module
        && frame.filename == prev.filename
        && frame.function == prev.function
        && frame.lineno == prev.lineno
        && frame.colno == prev.colno
}

/// Builds the component of a single frame.
///
/// `in_app` is the flag after enhancement rules ran. The context decides on
/// the variant and on whether this frame repeats the previous one.
pub fn frame_component(
    frame: &Frame,
    in_app: bool,
    event_platform: Option<&str>,
    context: &GroupingContext<'_>,
) -> GroupingComponent {
    let platform = frame.platform.as_deref().or(event_platform);
    let family = PlatformFamily::from_platform(platform);

    let module = module_component(frame, platform, family, context);
    let mut filename = filename_component(frame, family);
    let function = function_component(frame, platform, family, context);
    let context_line = context_line_component(frame, platform, family, context);

    if module.contributes() && filename.contributes() {
        filename.ignore("module takes precedence");
    }

    let mut values = vec![module, filename, function];
    values.extend(context_line);

    let mut rv = GroupingComponent::with_values("frame", values);
    rv.set_in_app(in_app);

    if family == PlatformFamily::JavaScript
        && context.get_bool("javascript_fuzzing")
        && is_low_quality_javascript_frame(frame)
    {
        rv.ignore("ignored low quality javascript frame");
    }
    if context.get_bool("is_recursion") {
        rv.ignore("ignored due to recursion");
    }
    if context.variant() == Some("app") && !in_app {
        rv.ignore("non app frame");
    }
    rv
}

fn is_low_quality_javascript_frame(frame: &Frame) -> bool {
    let function = frame.raw_function.as_deref().or(frame.function.as_deref());
    if function.map(|f| f.rsplit('.').next().unwrap_or(f)) == Some("eval") {
        return true;
    }
    matches!(
        frame.abs_path.as_deref(),
        Some("[native code]" | "native code" | "eval code" | "<anonymous>")
    )
}

fn module_component(
    frame: &Frame,
    platform: Option<&str>,
    family: PlatformFamily,
    context: &GroupingContext<'_>,
) -> GroupingComponent {
    let Some(module) = frame.module.as_deref().filter(|m| !m.is_empty()) else {
        return GroupingComponent::new("module");
    };

    let mut value = module.to_owned();
    let mut hint = None;

    match platform {
        Some("java") => {
            if context.get_bool("java_cglib_hibernate_logic") {
                if let Some(cleaned) = replace(&JAVA_CGLIB_RE, &value, "${1}<auto>") {
                    value = cleaned;
                    hint = Some("removed codegen marker");
                }
                if let Some(cleaned) = replace_literal(&JAVA_HIBERNATE_RE, &value, "$HibernateProxy$<auto>") {
                    value = cleaned;
                    hint = Some("removed codegen marker");
                }
            }
            if let Some(cleaned) = replace_literal(&JAVA_LAMBDA_MODULE_RE, &value, "$$Lambda$") {
                value = cleaned;
                hint = Some("removed codegen marker");
            }
            if let Some(cleaned) = replace(&JAVA_REFLECTION_RE, &value, "${1}") {
                value = cleaned;
                hint = Some("removed reflection marker");
            }
        }
        Some("php") if context.get_bool("php_detect_anonymous_classes") => {
            if value.starts_with("class@anonymous") {
                value = "class@anonymous".to_owned();
                hint = Some("removed anonymous class marker");
            }
        }
        _ => {}
    }

    let mut rv = GroupingComponent::with_values("module", [value]);
    if let Some(hint) = hint {
        rv.set_hint(hint);
    }

    if family == PlatformFamily::JavaScript
        && module.contains('/')
        && frame
            .abs_path
            .as_deref()
            .is_some_and(|abs_path| abs_path.ends_with(module))
    {
        rv.ignore("ignored bad javascript module");
    }
    rv
}

fn filename_component(frame: &Frame, family: PlatformFamily) -> GroupingComponent {
    let Some(filename) = frame.filename.as_deref().filter(|f| !f.is_empty()) else {
        return GroupingComponent::new("filename");
    };

    match filename {
        "<anonymous>" => {
            let mut rv = GroupingComponent::with_values("filename", [filename]);
            rv.ignore("anonymous filename discarded");
            return rv;
        }
        "[native code]" => {
            let mut rv = GroupingComponent::with_values("filename", [filename]);
            rv.ignore("native code indicated by filename");
            return rv;
        }
        _ => {}
    }

    let value = basename(filename).to_lowercase();
    let mut rv = GroupingComponent::with_values("filename", [value]);
    let path = frame.abs_path.as_deref().or(Some(filename));
    if family == PlatformFamily::JavaScript && has_url_origin(path, true) {
        rv.ignore("ignored because frame points to a URL");
    }
    rv
}

fn function_component(
    frame: &Frame,
    platform: Option<&str>,
    family: PlatformFamily,
    context: &GroupingContext<'_>,
) -> GroupingComponent {
    let function = match family {
        PlatformFamily::Native => frame.raw_function.as_deref().or(frame.function.as_deref()),
        _ => frame.function.as_deref().or(frame.raw_function.as_deref()),
    };
    let Some(function) = function.filter(|f| !f.is_empty()) else {
        return GroupingComponent::new("function");
    };

    if family == PlatformFamily::JavaScript && context.get_bool("javascript_fuzzing") {
        let short = function.rsplit('.').next().unwrap_or(function);
        if matches!(
            short,
            "?" | "<anonymous function>" | "<anonymous>" | "Anonymous function"
        ) || short.ends_with("/<")
        {
            let mut rv = GroupingComponent::with_values("function", [function]);
            rv.ignore("ignored unknown function name");
            return rv;
        }
        let trimmed = trim_javascript_function(function);
        let mut rv = GroupingComponent::with_values("function", [trimmed]);
        if trimmed != function {
            rv.set_hint("trimmed javascript function");
        }
        return rv;
    }

    if family == PlatformFamily::Native && context.get_bool("native_fuzzing") {
        let trimmed = trim_native_function(function);
        let changed = trimmed != function;
        let mut rv = GroupingComponent::with_values("function", [trimmed]);
        if changed {
            rv.set_hint("isolated function");
        }
        return rv;
    }

    let mut rv = GroupingComponent::with_values("function", [function]);
    match platform {
        Some("python") if function == "<lambda>" => rv.ignore("ignored lambda function"),
        Some("php") if function.ends_with("{closure}") => rv.ignore("ignored anonymous function"),
        Some("java") if function.starts_with("lambda$") => rv.ignore("ignored java lambda"),
        Some("ruby") => {
            if let Some(cleaned) = replace(&RUBY_BLOCK_RE, function, "") {
                rv = GroupingComponent::with_values("function", [cleaned]);
                rv.set_hint("removed ruby block");
            }
        }
        _ => {}
    }
    rv
}

fn trim_javascript_function(function: &str) -> &str {
    let mut rv = function;
    for prefix in ["async ", "new ", "Object."] {
        rv = rv.strip_prefix(prefix).unwrap_or(rv);
    }
    rv
}

/// Reduces a native symbol to its qualified name, dropping the return type,
/// arguments and template parameters.
fn trim_native_function(function: &str) -> String {
    if function.starts_with("-[") || function.starts_with("+[") {
        return function.to_owned();
    }
    let mut rv = function.replace(ANONYMOUS_NAMESPACE, ANONYMOUS_NAMESPACE_MARKER);

    let trimmed = rv.trim_end();
    let trimmed = trimmed.strip_suffix(" const").unwrap_or(trimmed);
    if trimmed.ends_with(')')
        && let Some(start) = matching_open(trimmed, '(', ')')
        && start > 0
    {
        rv = trimmed[..start].to_owned();
    }

    rv = strip_balanced(&rv, '<', '>');
    rv.rsplit(' ')
        .find(|part| !part.is_empty())
        .unwrap_or(&rv)
        .trim_start_matches(['*', '&'])
        .replace(ANONYMOUS_NAMESPACE_MARKER, "`anonymous namespace'")
}

/// Byte offset of the opening bracket matching the closing one at the end.
fn matching_open(value: &str, open: char, close: char) -> Option<usize> {
    let mut depth = 0usize;
    for (idx, c) in value.char_indices().rev() {
        if c == close {
            depth += 1;
        } else if c == open {
            depth = depth.checked_sub(1)?;
            if depth == 0 {
                return Some(idx);
            }
        }
    }
    None
}

fn strip_balanced(value: &str, open: char, close: char) -> String {
    if value.contains("operator") {
        return value.to_owned();
    }
    let mut rv = String::with_capacity(value.len());
    let mut depth = 0usize;
    for c in value.chars() {
        if c == open {
            depth += 1;
        } else if c == close && depth > 0 {
            depth -= 1;
        } else if depth == 0 {
            rv.push(c);
        }
    }
    rv
}

fn context_line_component(
    frame: &Frame,
    platform: Option<&str>,
    family: PlatformFamily,
    context: &GroupingContext<'_>,
) -> Option<GroupingComponent> {
    let platform = platform?;
    if !context.contains("contextline_platforms", platform) {
        return None;
    }
    let Some(line) = frame.context_line.as_deref().map(str::trim).filter(|l| !l.is_empty()) else {
        return Some(GroupingComponent::new("context-line"));
    };

    let mut rv = GroupingComponent::with_values("context-line", [line]);
    if line.chars().count() > MAX_CONTEXT_LINE_LEN {
        rv.ignore("discarded because line too long");
    } else if family == PlatformFamily::JavaScript && frame.abs_path.is_none() {
        rv.ignore("discarded because from inline script");
    }
    Some(rv)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::load_default_grouping_config;
    use crate::component::ComponentValue;

    fn frame(value: serde_json::Value) -> Frame {
        serde_json::from_value(value).unwrap()
    }

    fn child<'a>(component: &'a GroupingComponent, id: &str) -> &'a GroupingComponent {
        component
            .values()
            .iter()
            .find_map(|value| match value {
                ComponentValue::Component(c) if c.id() == id => Some(c),
                _ => None,
            })
            .unwrap()
    }

    #[test]
    fn test_module_takes_precedence() {
        let config = load_default_grouping_config();
        let context = GroupingContext::new(&config);
        let frame = frame(serde_json::json!({
            "module": "foo.bar",
            "filename": "foo/bar.py",
            "function": "baz",
            "context_line": "    raise ValueError()  ",
        }));
        let rv = frame_component(&frame, true, Some("python"), &context);
        assert!(rv.contributes());
        assert_eq!(rv.in_app(), Some(true));
        assert_eq!(child(&rv, "filename").hint(), Some("module takes precedence"));
        assert_eq!(rv.iter_values(), vec!["foo.bar", "baz", "raise ValueError()"]);
    }

    #[test]
    fn test_javascript_url_and_unknown_function() {
        let config = load_default_grouping_config();
        let context = GroupingContext::new(&config);
        let frame = frame(serde_json::json!({
            "filename": "app.js",
            "abs_path": "https://example.com/static/app.js",
            "function": "<anonymous>",
            "lineno": 3,
        }));
        let rv = frame_component(&frame, true, Some("javascript"), &context);
        assert_eq!(
            child(&rv, "filename").hint(),
            Some("ignored because frame points to a URL")
        );
        assert_eq!(
            child(&rv, "function").hint(),
            Some("ignored unknown function name")
        );
        assert!(!rv.contributes());
    }

    #[test]
    fn test_low_quality_javascript_frame() {
        let config = load_default_grouping_config();
        let context = GroupingContext::new(&config);
        let frame = frame(serde_json::json!({
            "function": "eval",
            "abs_path": "[native code]",
            "filename": "native",
        }));
        let rv = frame_component(&frame, true, Some("javascript"), &context);
        assert_eq!(rv.hint(), Some("ignored low quality javascript frame"));
        assert!(!rv.contributes());
    }

    #[test]
    fn test_context_line_too_long() {
        let config = load_default_grouping_config();
        let context = GroupingContext::new(&config);
        let frame = frame(serde_json::json!({
            "function": "foo",
            "context_line": "x".repeat(121),
        }));
        let rv = frame_component(&frame, true, Some("python"), &context);
        assert_eq!(
            child(&rv, "context-line").hint(),
            Some("discarded because line too long")
        );
        assert_eq!(rv.iter_values(), vec!["foo"]);
    }

    #[test]
    fn test_no_context_line_outside_contextline_platforms() {
        let config = load_default_grouping_config();
        let context = GroupingContext::new(&config);
        let frame = frame(serde_json::json!({"function": "foo", "context_line": "bar()"}));
        let rv = frame_component(&frame, true, Some("cocoa"), &context);
        assert_eq!(rv.values().len(), 3);
    }

    #[test]
    fn test_non_app_frame_and_recursion() {
        let config = load_default_grouping_config();
        let mut context = GroupingContext::new(&config);
        let frame = frame(serde_json::json!({"function": "foo", "module": "bar"}));
        {
            let mut scope = context.scope();
            scope.set("variant", "app");
            let rv = frame_component(&frame, false, Some("python"), &scope);
            assert_eq!(rv.hint(), Some("non app frame"));
            scope.set("variant", "system");
            scope.set("is_recursion", true);
            let rv = frame_component(&frame, false, Some("python"), &scope);
            assert_eq!(rv.hint(), Some("ignored due to recursion"));
        }
        assert!(is_recursion(&frame, &frame.clone()));
    }

    #[test]
    fn test_java_module_cleanup() {
        let config = load_default_grouping_config();
        let context = GroupingContext::new(&config);
        let frame = frame(serde_json::json!({
            "module": "com.example.Service$$EnhancerBySpringCGLIB$$1ab2c3d4",
            "function": "lambda$run$0",
        }));
        let rv = frame_component(&frame, true, Some("java"), &context);
        let module = child(&rv, "module");
        assert_eq!(
            module.iter_values(),
            vec!["com.example.Service$$EnhancerBySpringCGLIB$$<auto>"]
        );
        assert_eq!(module.hint(), Some("removed codegen marker"));
        assert_eq!(child(&rv, "function").hint(), Some("ignored java lambda"));

        let frame = self::frame(serde_json::json!({
            "module": "sun.reflect.GeneratedMethodAccessor42",
        }));
        let rv = frame_component(&frame, true, Some("java"), &context);
        assert_eq!(rv.iter_values(), vec!["sun.reflect.GeneratedMethodAccessor"]);
    }

    #[test]
    fn test_trim_native_function() {
        assert_eq!(
            trim_native_function("std::vector<int> foo::Bar<T>::baz(int, char const*) const"),
            "foo::Bar::baz"
        );
        assert_eq!(
            trim_native_function("(anonymous namespace)::worker(void*)"),
            "`anonymous namespace'::worker"
        );
        assert_eq!(trim_native_function("-[NSObject foo:]"), "-[NSObject foo:]");
        assert_eq!(trim_native_function("main"), "main");
    }

    #[test]
    fn test_ruby_block() {
        let config = load_default_grouping_config();
        let context = GroupingContext::new(&config);
        let frame = frame(serde_json::json!({"function": "block (2 levels) in perform"}));
        let rv = frame_component(&frame, true, Some("ruby"), &context);
        let function = child(&rv, "function");
        assert_eq!(function.iter_values(), vec!["perform"]);
        assert_eq!(function.hint(), Some("removed ruby block"));
    }
}
