//! Parser for fingerprinting rules.
//!
//! ```text
//! # comment
//! type:DatabaseUnavailable                    -> system-down
//! message:"*timeout*" level:error             -> timeout, {{ transaction }} title="Timeout in {{ transaction }}"
//! ```

use indexmap::IndexMap;

use super::matchers::Matcher;
use super::{InvalidFingerprintingConfig, Rule};

const ALLOWED_ATTRIBUTES: &[&str] = &["title"];

pub(crate) fn parse_rules(input: &str) -> Result<Vec<Rule>, InvalidFingerprintingConfig> {
    let mut rules = Vec::new();
    for (idx, line) in input.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let rule = parse_rule(line).map_err(|message| InvalidFingerprintingConfig::Syntax {
            line: idx + 1,
            message,
        })?;
        rules.push(rule);
    }
    Ok(rules)
}

fn parse_rule(line: &str) -> Result<Rule, String> {
    let arrow = find_unquoted(line, "->").ok_or("expected '->'")?;
    let (lhs, rhs) = (&line[..arrow], &line[arrow + 2..]);

    let matchers = split_words(lhs)?
        .into_iter()
        .map(parse_matcher)
        .collect::<Result<Vec<_>, _>>()?;
    if matchers.is_empty() {
        return Err("expected at least one matcher".to_owned());
    }

    let (fingerprint, attributes) = parse_fingerprint(rhs)?;
    if fingerprint.is_empty() {
        return Err("expected at least one fingerprint value".to_owned());
    }
    if let Some(key) = attributes
        .keys()
        .find(|key| !ALLOWED_ATTRIBUTES.contains(&key.as_str()))
    {
        return Err(InvalidFingerprintingConfig::UnknownAttribute(key.clone()).to_string());
    }

    Ok(Rule::new(matchers, fingerprint, attributes, false))
}

fn parse_matcher(word: &str) -> Result<Matcher, String> {
    let invalid = || format!("invalid matcher '{word}'");
    let (negated, rest) = match word.strip_prefix('!') {
        Some(rest) => (true, rest),
        None => (false, word),
    };
    let (key, argument) = if let Some(quoted) = rest.strip_prefix('"') {
        let (key, rest) = quoted.split_once('"').ok_or_else(invalid)?;
        (key, rest.strip_prefix(':').ok_or_else(invalid)?)
    } else {
        rest.split_once(':').ok_or_else(invalid)?
    };
    let pattern = match argument.strip_prefix('"') {
        Some(quoted) => unescape(quoted.strip_suffix('"').ok_or_else(invalid)?),
        None if argument.is_empty() => return Err(invalid()),
        None => argument.to_owned(),
    };
    Matcher::new(key, &pattern, negated).map_err(|err| err.to_string())
}

type Fingerprint = (Vec<String>, IndexMap<String, String>);

fn parse_fingerprint(input: &str) -> Result<Fingerprint, String> {
    let mut fingerprint = Vec::new();
    let mut attributes = IndexMap::new();
    let mut rest = input;

    loop {
        rest = rest.trim_start_matches(|c: char| c.is_whitespace() || c == ',');
        if rest.is_empty() {
            break;
        }

        if let Some((key, after)) = attribute_key(rest) {
            let (value, after) = read_value(after, true)?;
            attributes.insert(key.to_owned(), value);
            rest = after;
        } else if rest.starts_with("{{") {
            let end = rest.find("}}").ok_or("unterminated '{{'")?;
            fingerprint.push(rest[..end + 2].to_owned());
            rest = &rest[end + 2..];
        } else {
            let (value, after) = read_value(rest, false)?;
            fingerprint.push(value);
            rest = after;
        }
    }
    Ok((fingerprint, attributes))
}

/// Splits `key=rest` if the input starts with an attribute key.
fn attribute_key(input: &str) -> Option<(&str, &str)> {
    let end = input
        .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')))?;
    let after = input[end..].strip_prefix('=')?;
    (end > 0).then(|| (&input[..end], after))
}

/// Reads a quoted or bare value. Bare attribute values may contain spaces up to the next comma.
fn read_value(input: &str, attribute: bool) -> Result<(String, &str), &'static str> {
    if let Some(quoted) = input.strip_prefix('"') {
        let end = closing_quote(quoted).ok_or("unterminated quoted string")?;
        return Ok((unescape(&quoted[..end]), &quoted[end + 1..]));
    }
    let end = input
        .find(|c: char| c == ',' || (!attribute && c.is_whitespace()))
        .unwrap_or(input.len());
    let value = input[..end].trim_end();
    if value.is_empty() {
        return Err("expected a value");
    }
    Ok((value.to_owned(), &input[end..]))
}

fn closing_quote(input: &str) -> Option<usize> {
    let mut escaped = false;
    for (idx, c) in input.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            '"' => return Some(idx),
            _ => {}
        }
    }
    None
}

fn unescape(input: &str) -> String {
    let mut rv = String::with_capacity(input.len());
    let mut chars = input.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => rv.extend(chars.next()),
            c => rv.push(c),
        }
    }
    rv
}

fn find_unquoted(input: &str, needle: &str) -> Option<usize> {
    let mut in_quotes = false;
    let mut escaped = false;
    for (idx, c) in input.char_indices() {
        if in_quotes {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_quotes = false,
                _ => {}
            }
        } else if c == '"' {
            in_quotes = true;
        } else if input[idx..].starts_with(needle) {
            return Some(idx);
        }
    }
    None
}

fn split_words(input: &str) -> Result<Vec<&str>, &'static str> {
    let mut words = Vec::new();
    let mut start = None;
    let mut in_quotes = false;
    let mut escaped = false;

    for (idx, c) in input.char_indices() {
        if in_quotes {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_quotes = false,
                _ => {}
            }
            continue;
        }
        if c.is_whitespace() {
            if let Some(s) = start.take() {
                words.push(&input[s..idx]);
            }
            continue;
        }
        start.get_or_insert(idx);
        if c == '"' {
            in_quotes = true;
        }
    }
    if in_quotes {
        return Err("unterminated quoted string");
    }
    if let Some(s) = start {
        words.push(&input[s..]);
    }
    Ok(words)
}
