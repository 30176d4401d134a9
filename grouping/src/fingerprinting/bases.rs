//! Built-in fingerprinting rules, applied after a project's own rules.

use std::sync::LazyLock;

use indexmap::IndexMap;

use super::Rule;
use super::parser::parse_rules;

const JAVASCRIPT_2024_02_02: &str = r#"
# Chunk load failures are a deployment problem, not a bug per call site
family:javascript type:ChunkLoadError                   -> chunkloaderror
family:javascript value:"ChunkLoadError*"               -> chunkloaderror
family:javascript type:Error value:"Loading chunk *"    -> chunkloaderror
family:javascript type:Error value:"Loading CSS chunk *" -> chunkloaderror
"#;

const BASES: &[(&str, &str)] = &[("javascript@2024-02-02", JAVASCRIPT_2024_02_02)];

static BASE_RULES: LazyLock<IndexMap<&'static str, Vec<Rule>>> = LazyLock::new(|| {
    let mut rv = IndexMap::new();
    for (name, text) in BASES {
        match parse_rules(text) {
            Ok(rules) => {
                let rules = rules.into_iter().map(Rule::into_builtin).collect();
                rv.insert(*name, rules);
            }
            Err(err) => {
                tracing::error!(base = name, error = %err, "Invalid built-in fingerprinting rules");
            }
        }
    }
    rv
});

pub fn base_rules(name: &str) -> Option<&'static [Rule]> {
    BASE_RULES.get(name).map(Vec::as_slice)
}

pub fn is_known_base(name: &str) -> bool {
    BASES.iter().any(|(base, _)| *base == name)
}
