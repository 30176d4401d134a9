//! Built-in enhancement rule sets. Grouping configurations reference these by
//! name, custom project rules are always applied after them.

use std::sync::LazyLock;

use indexmap::IndexMap;

use super::Rule;
use super::parser::parse_rules;

const COMMON_RULES: &str = r#"
## Native: system libraries are never in-app
family:native package:/usr/lib/**                -app
family:native package:/lib/**                    -app
family:native package:/System/Library/**         -app
family:native package:**/libc.so*                -app
family:native package:**/libsystem_*.dylib       -app
family:native function:std::*                    -app
family:native function:__cxa_*                   -app
## Native: crash helpers do not describe the crash itself
family:native function:abort                     -group
family:native function:raise                     -group
family:native function:__assert_fail             -group
family:native function:__abort_with_payload      -group
family:native function:_assertionFailure*        -group

## JavaScript: dependencies are not in-app
family:javascript path:**/node_modules/**        -app
family:javascript path:webpack:///./~/**         -app
family:javascript path:**/jquery*.js             -app
family:javascript path:**/react-dom*.js          -app
family:javascript path:**/zone.js                -app

## Python and JVM dependencies
family:other path:**/site-packages/**            -app
family:other path:**/dist-packages/**            -app
family:other module:java.*                       -app
family:other module:javax.*                      -app
family:other module:sun.*                        -app
family:other module:kotlin.*                     -app
family:other module:kotlinx.*                    -app
family:other module:android.*                    -app
family:other module:androidx.*                   -app
family:other module:com.android.*                -app
"#;

const NEWSTYLE_2023_RULES: &str = r#"
## Thread entry points and everything that called them
family:native function:start_thread              category=threadbase
family:native function:_pthread_start           category=threadbase
family:native function:thread_start              category=threadbase
family:native function:__pthread_start           category=threadbase
family:native category:threadbase                -group v-group

## Promise machinery carries no signal
family:javascript function:Promise.*             -group
family:javascript function:"new Promise"        -group
"#;

const MOBILE_2021_RULES: &str = r#"
family:native package:**/libdispatch.dylib       -app
family:native package:**/UIKitCore               -app
family:native package:**/CoreFoundation          -app
family:native function:*_dispatch_*              -group
family:native function:__CFRUNLOOP_IS_*          -group
family:native function:UIApplicationMain         -group v-group
family:native module:libart.so                   -app -group
"#;

/// Base name to the rule texts it consists of, in application order.
const BASES: &[(&str, &[&str])] = &[
    ("common:2019-03-23", &[COMMON_RULES]),
    ("newstyle:2023-01-11", &[COMMON_RULES, NEWSTYLE_2023_RULES]),
    ("mobile:2021-04-02", &[COMMON_RULES, NEWSTYLE_2023_RULES, MOBILE_2021_RULES]),
];

static BASE_RULES: LazyLock<IndexMap<&'static str, Vec<Rule>>> = LazyLock::new(|| {
    let mut rv = IndexMap::new();
    for (name, texts) in BASES {
        let mut rules = Vec::new();
        for text in *texts {
            match parse_rules(text) {
                Ok(parsed) => rules.extend(parsed),
                Err(err) => {
                    tracing::error!(base = name, error = %err, "Invalid built-in enhancements");
                }
            }
        }
        rv.insert(*name, rules);
    }
    rv
});

/// Rules of a built-in base, `None` for unknown names.
pub fn base_rules(name: &str) -> Option<&'static [Rule]> {
    BASE_RULES.get(name).map(Vec::as_slice)
}

pub fn is_known_base(name: &str) -> bool {
    BASES.iter().any(|(base, _)| *base == name)
}
