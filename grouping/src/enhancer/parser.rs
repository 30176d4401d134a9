//! Parser for the enhancement rule language.
//!
//! One rule per line:
//!
//! ```text
//! # comment
//! [ caller-matcher ] | matcher matcher... | [ callee-matcher ] action action...
//! ```
//!
//! Matchers are `[!]key:pattern`, patterns may be double quoted. Actions are
//! flag actions (`+app`, `-group`, `^-group`, `v+app`) or var actions
//! (`max-frames=3`, `min-frames=2`, `invert-stacktrace=1`, `category=foo`).

use super::actions::{Action, FlagKey, FrameRange, VarAction};
use super::matchers::{FrameMatcher, MatcherDef, MatcherPosition};
use super::{InvalidEnhancerConfig, Rule, SyntaxError};
use crate::utils::parse_bool;

#[derive(Debug, PartialEq)]
enum Token<'a> {
    OpenBracket,
    CloseBracket,
    Pipe,
    Word(&'a str),
}

pub(crate) fn parse_rules(input: &str) -> Result<Vec<Rule>, InvalidEnhancerConfig> {
    let mut rules = Vec::new();
    for (idx, line) in input.lines().enumerate() {
        let tokens = tokenize(line).map_err(|reason| InvalidEnhancerConfig::Syntax {
            line: idx + 1,
            reason,
        })?;
        if tokens.is_empty() {
            continue;
        }
        let rule = parse_rule(tokens).map_err(|reason| InvalidEnhancerConfig::Syntax {
            line: idx + 1,
            reason,
        })?;
        rules.push(rule);
    }
    Ok(rules)
}

fn tokenize(line: &str) -> Result<Vec<Token<'_>>, SyntaxError> {
    let bytes = line.as_bytes();
    let mut tokens = Vec::new();
    let mut in_brackets = false;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b' ' | b'\t' | b'\r' => i += 1,
            b'#' => break,
            b'[' => {
                tokens.push(Token::OpenBracket);
                in_brackets = true;
                i += 1;
            }
            b']' => {
                tokens.push(Token::CloseBracket);
                in_brackets = false;
                i += 1;
            }
            b'|' => {
                tokens.push(Token::Pipe);
                i += 1;
            }
            _ => {
                let start = i;
                let mut in_quotes = false;
                while i < bytes.len() {
                    let c = bytes[i];
                    if in_quotes {
                        match c {
                            b'\\' => i += 2,
                            b'"' => {
                                in_quotes = false;
                                i += 1;
                            }
                            _ => i += 1,
                        }
                        continue;
                    }
                    match c {
                        b'"' => {
                            in_quotes = true;
                            i += 1;
                        }
                        b' ' | b'\t' | b'\r' => break,
                        b']' if in_brackets => break,
                        _ => i += 1,
                    }
                }
                if in_quotes {
                    return Err(SyntaxError::UnterminatedQuote);
                }
                i = i.min(bytes.len());
                tokens.push(Token::Word(&line[start..i]));
            }
        }
    }
    Ok(tokens)
}

fn parse_rule(tokens: Vec<Token<'_>>) -> Result<Rule, SyntaxError> {
    let mut tokens = tokens.into_iter().peekable();
    let mut matchers = Vec::new();
    let mut actions = Vec::new();

    if tokens.peek() == Some(&Token::OpenBracket) {
        tokens.next();
        matchers.push(parse_bracketed(&mut tokens, MatcherPosition::Caller)?);
        expect(tokens.next(), Token::Pipe, "'|' after caller matcher")?;
    }

    while let Some(Token::Word(word)) = tokens.peek() {
        if is_action(word) {
            break;
        }
        matchers.push(parse_matcher(word, MatcherPosition::Frame)?);
        tokens.next();
    }
    if !matchers
        .iter()
        .any(|m: &FrameMatcher| m.position() == MatcherPosition::Frame)
    {
        return Err(SyntaxError::Expected("at least one frame matcher"));
    }

    if tokens.peek() == Some(&Token::Pipe) {
        tokens.next();
        expect(tokens.next(), Token::OpenBracket, "'[' after '|'")?;
        matchers.push(parse_bracketed(&mut tokens, MatcherPosition::Callee)?);
    }

    for token in tokens {
        match token {
            Token::Word(word) => actions.push(parse_action(word)?),
            Token::OpenBracket => return Err(SyntaxError::Unexpected("[".to_owned())),
            Token::CloseBracket => return Err(SyntaxError::Unexpected("]".to_owned())),
            Token::Pipe => return Err(SyntaxError::Unexpected("|".to_owned())),
        }
    }
    if actions.is_empty() {
        return Err(SyntaxError::Expected("at least one action"));
    }

    Ok(Rule::new(matchers, actions))
}

fn expect(token: Option<Token<'_>>, expected: Token<'_>, what: &'static str) -> Result<(), SyntaxError> {
    if token.as_ref() == Some(&expected) {
        Ok(())
    } else {
        Err(SyntaxError::Expected(what))
    }
}

fn parse_bracketed<'a>(
    tokens: &mut impl Iterator<Item = Token<'a>>,
    position: MatcherPosition,
) -> Result<FrameMatcher, SyntaxError> {
    let Some(Token::Word(word)) = tokens.next() else {
        return Err(SyntaxError::Expected("matcher inside brackets"));
    };
    let matcher = parse_matcher(word, position)?;
    expect(tokens.next(), Token::CloseBracket, "']'")?;
    Ok(matcher)
}

fn is_action(word: &str) -> bool {
    let mut chars = word.chars();
    match chars.next() {
        Some('+' | '-') => true,
        Some('^' | 'v') => matches!(chars.next(), Some('+' | '-')),
        _ => match (word.find('='), word.find(':')) {
            (Some(eq), Some(colon)) => eq < colon,
            (Some(_), None) => true,
            _ => false,
        },
    }
}

fn parse_matcher(word: &str, position: MatcherPosition) -> Result<FrameMatcher, SyntaxError> {
    let (negated, rest) = match word.strip_prefix('!') {
        Some(rest) => (true, rest),
        None => (false, word),
    };
    let (key, argument) = if let Some(quoted) = rest.strip_prefix('"') {
        let end = quoted
            .find('"')
            .ok_or(SyntaxError::UnterminatedQuote)?;
        let argument = quoted[end + 1..]
            .strip_prefix(':')
            .ok_or(SyntaxError::Expected("':' after matcher key"))?;
        (&quoted[..end], argument)
    } else {
        rest.split_once(':')
            .ok_or_else(|| SyntaxError::Unexpected(word.to_owned()))?
    };

    FrameMatcher::new(MatcherDef {
        key: key.to_owned(),
        pattern: unquote(argument)?,
        negated,
        position,
    })
}

fn unquote(argument: &str) -> Result<String, SyntaxError> {
    let Some(inner) = argument.strip_prefix('"') else {
        if argument.is_empty() {
            return Err(SyntaxError::Expected("matcher argument"));
        }
        return Ok(argument.to_owned());
    };
    let inner = inner.strip_suffix('"').ok_or(SyntaxError::UnterminatedQuote)?;
    let mut rv = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => rv.extend(chars.next()),
            c => rv.push(c),
        }
    }
    Ok(rv)
}

fn parse_action(word: &str) -> Result<Action, SyntaxError> {
    if let Some((name, value)) = word.split_once('=') {
        let value = unquote(value)?;
        let invalid = || SyntaxError::InvalidValue {
            key: name.to_owned(),
            value: value.clone(),
        };
        let action = match name {
            "max-frames" => VarAction::MaxFrames(value.parse().map_err(|_| invalid())?),
            "min-frames" => VarAction::MinFrames(value.parse().map_err(|_| invalid())?),
            "invert-stacktrace" => VarAction::InvertStacktrace(parse_bool(&value).ok_or_else(invalid)?),
            "category" => {
                if !value
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
                {
                    return Err(invalid());
                }
                VarAction::Category(value)
            }
            _ => return Err(SyntaxError::UnknownAction(word.to_owned())),
        };
        return Ok(Action::Var(action));
    }

    let (range, rest) = match word.as_bytes().first() {
        Some(b'^') => (Some(FrameRange::Up), &word[1..]),
        Some(b'v') => (Some(FrameRange::Down), &word[1..]),
        _ => (None, word),
    };
    let (flag, key) = match rest.split_at_checked(1) {
        Some(("+", key)) => (true, key),
        Some(("-", key)) => (false, key),
        _ => return Err(SyntaxError::UnknownAction(word.to_owned())),
    };
    let key = match key {
        "app" => FlagKey::App,
        "group" => FlagKey::Group,
        _ => return Err(SyntaxError::UnknownAction(word.to_owned())),
    };
    Ok(Action::Flag { key, flag, range })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_one(line: &str) -> Rule {
        let mut rules = parse_rules(line).unwrap();
        assert_eq!(rules.len(), 1);
        rules.remove(0)
    }

    fn syntax_error(input: &str) -> SyntaxError {
        match parse_rules(input) {
            Err(InvalidEnhancerConfig::Syntax { reason, .. }) => reason,
            other => panic!("expected syntax error, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_simple_rule() {
        let rule = parse_one("family:native function:std::* -app -group");
        assert_eq!(rule.matchers().len(), 2);
        assert_eq!(
            rule.actions(),
            &[
                Action::Flag { key: FlagKey::App, flag: false, range: None },
                Action::Flag { key: FlagKey::Group, flag: false, range: None },
            ]
        );
        assert_eq!(rule.to_string(), "family:native function:std::* -app -group");
    }

    #[test]
    fn test_parse_caller_callee_and_ranges() {
        let rule = parse_one("[ function:main ] | function:run |[module:worker] ^-group v+app");
        let positions: Vec<_> = rule.matchers().iter().map(|m| m.position()).collect();
        assert_eq!(
            positions,
            vec![MatcherPosition::Caller, MatcherPosition::Frame, MatcherPosition::Callee]
        );
        assert_eq!(
            rule.to_string(),
            "[ function:main ] | function:run | [ module:worker ] ^-group v+app"
        );
    }

    #[test]
    fn test_parse_quotes_negation_and_vars() {
        let rule = parse_one(r#"!"function":"foo \"bar\"" value:"a b" max-frames=3 category=threadbase"#);
        let def = rule.matchers()[0].def();
        assert!(def.negated);
        assert_eq!(def.key, "function");
        assert_eq!(def.pattern, "foo \"bar\"");
        assert_eq!(rule.matchers()[1].def().pattern, "a b");
        assert_eq!(
            rule.actions(),
            &[
                Action::Var(VarAction::MaxFrames(3)),
                Action::Var(VarAction::Category("threadbase".to_owned())),
            ]
        );
    }

    #[test]
    fn test_comments_and_blank_lines() {
        let rules = parse_rules("# header\n\n  path:**/vendor/** -app # trailing\n").unwrap();
        assert_eq!(rules.len(), 1);
    }

    #[test]
    fn test_value_matcher_is_not_an_action() {
        let rule = parse_one("value:v+x -group");
        assert_eq!(rule.matchers()[0].def().pattern, "v+x");
    }

    #[test]
    fn test_errors() {
        assert_eq!(syntax_error("function:foo"), SyntaxError::Expected("at least one action"));
        assert_eq!(syntax_error("-app"), SyntaxError::Expected("at least one frame matcher"));
        assert_eq!(
            syntax_error("bogus:foo -app"),
            SyntaxError::UnknownMatcher("bogus".to_owned())
        );
        assert_eq!(
            syntax_error("function:foo +frobnicate"),
            SyntaxError::UnknownAction("+frobnicate".to_owned())
        );
        assert_eq!(
            syntax_error("function:foo max-frames=lots"),
            SyntaxError::InvalidValue { key: "max-frames".to_owned(), value: "lots".to_owned() }
        );
        assert_eq!(syntax_error("function:\"foo -app"), SyntaxError::UnterminatedQuote);
        assert_eq!(syntax_error("function:foo -app function:bar"), SyntaxError::UnknownAction("function:bar".to_owned()));
        assert_eq!(syntax_error("[ function:foo ] function:bar -app"), SyntaxError::Expected("'|' after caller matcher"));

        match parse_rules("function:foo -app\nfunction:bar") {
            Err(InvalidEnhancerConfig::Syntax { line, .. }) => assert_eq!(line, 2),
            other => panic!("unexpected {other:?}"),
        }
    }
}
