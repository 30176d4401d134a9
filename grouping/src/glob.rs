//! Glob patterns as used by enhancement and fingerprinting rules.
//!
//! `*` matches anything unless `double_star` is set, in which case `*` stops
//! at `/` and `**` crosses directories. `?` matches one character, `[...]`
//! is a character class (`[!...]` negates) and `\` escapes the next character.

use regex::Regex;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GlobOptions {
    pub double_star: bool,
    pub case_insensitive: bool,
    pub path_normalize: bool,
}

impl GlobOptions {
    /// Options for path-like values (paths, packages, releases).
    pub const PATH: GlobOptions = GlobOptions {
        double_star: true,
        case_insensitive: true,
        path_normalize: true,
    };

    pub const CASE_INSENSITIVE: GlobOptions = GlobOptions {
        double_star: false,
        case_insensitive: true,
        path_normalize: false,
    };
}

#[derive(Clone, Debug)]
pub struct Glob {
    pattern: String,
    options: GlobOptions,
    regex: Regex,
}

impl Glob {
    pub fn new(pattern: &str, options: GlobOptions) -> Result<Self, regex::Error> {
        let normalized = if options.path_normalize {
            pattern.replace('\\', "/")
        } else {
            pattern.to_owned()
        };
        let flags = if options.case_insensitive { "(?si)" } else { "(?s)" };
        let regex = Regex::new(&format!(
            "{flags}^{}$",
            translate(&normalized, options.double_star)
        ))?;
        Ok(Glob {
            pattern: pattern.to_owned(),
            options,
            regex,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn is_match(&self, value: &str) -> bool {
        if self.options.path_normalize && value.contains('\\') {
            self.regex.is_match(&value.replace('\\', "/"))
        } else {
            self.regex.is_match(value)
        }
    }

    /// Path semantics: relative values are also tried with a leading `/` so
    /// that `**/foo.js` matches `foo.js`.
    pub fn is_path_match(&self, value: &str) -> bool {
        if self.is_match(value) {
            return true;
        }
        !value.starts_with('/') && self.is_match(&format!("/{value}"))
    }
}

fn translate(pattern: &str, double_star: bool) -> String {
    let chars: Vec<char> = pattern.chars().collect();
    let mut rv = String::with_capacity(pattern.len() * 2);
    let mut buf = [0u8; 4];
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        i += 1;
        match c {
            '\\' => match chars.get(i) {
                Some(escaped) => {
                    rv.push_str(&regex::escape(escaped.encode_utf8(&mut buf)));
                    i += 1;
                }
                None => rv.push_str(r"\\"),
            },
            '*' if double_star && chars.get(i) == Some(&'*') => {
                rv.push_str(".*");
                i += 1;
            }
            '*' if double_star => rv.push_str("[^/]*"),
            '*' => rv.push_str(".*"),
            '?' if double_star => rv.push_str("[^/]"),
            '?' => rv.push('.'),
            '[' => match chars[i..].iter().position(|&c| c == ']') {
                Some(len) if len > 0 => {
                    let mut class = &chars[i..i + len];
                    rv.push('[');
                    if class.first() == Some(&'!') {
                        rv.push('^');
                        class = &class[1..];
                    }
                    for &c in class {
                        if matches!(c, '\\' | '[' | '&' | '~' | '^') {
                            rv.push('\\');
                        }
                        rv.push(c);
                    }
                    rv.push(']');
                    i += len + 1;
                }
                _ => rv.push_str(r"\["),
            },
            other => rv.push_str(&regex::escape(other.encode_utf8(&mut buf))),
        }
    }
    rv
}

#[cfg(test)]
mod tests {
    use super::*;

    fn glob(pattern: &str, options: GlobOptions) -> Glob {
        Glob::new(pattern, options).unwrap()
    }

    #[test]
    fn test_plain_star_crosses_slashes() {
        let g = glob("foo*", GlobOptions::default());
        assert!(g.is_match("foo"));
        assert!(g.is_match("foo/bar/baz"));
        assert!(!g.is_match("Foo"));
        assert!(!g.is_match("xfoo"));
    }

    #[test]
    fn test_double_star() {
        let g = glob("**/node_modules/*.js", GlobOptions::PATH);
        assert!(g.is_match("/app/node_modules/react.js"));
        assert!(!g.is_match("/app/node_modules/react/index.js"));
        assert!(g.is_path_match("node_modules/react.js"));
        assert!(g.is_match("C:\\app\\node_modules\\React.JS"));
    }

    #[test]
    fn test_classes_and_escapes() {
        let g = glob("lib[!0-9].so", GlobOptions::default());
        assert!(g.is_match("libc.so"));
        assert!(!g.is_match("lib1.so"));

        let g = glob(r"a\*b?", GlobOptions::default());
        assert!(g.is_match("a*bc"));
        assert!(!g.is_match("axbc"));

        // An unterminated class is a literal bracket
        let g = glob("foo[", GlobOptions::default());
        assert!(g.is_match("foo["));
    }

    #[test]
    fn test_regex_metacharacters_are_literal() {
        let g = glob("std::vec<T>::push(.*)", GlobOptions::CASE_INSENSITIVE);
        assert!(g.is_match("STD::VEC<T>::PUSH(.*)"));
        assert!(!g.is_match("std::vec<T>::push(x)"));
    }
}
