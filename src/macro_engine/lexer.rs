//! String-level utilities for the macro parser (spec.md §4.2 "Lexical
//! layer"): comment/whitespace stripping that honors quote state, bracket
//! balance, argument splitting, and the `+` infix rewrite.
//!
//! Grounded on
//! `examples/original_source/tests/unit/test_macros.py`'s `TestParsing`
//! (`remove_comments`, `remove_whitespaces`, `_count_brackets`,
//! `_extract_args`, `_split_keyword_arg`, `handle_plus_syntax`,
//! `is_this_a_macro`), which pin the exact edge-case behavior spec.md only
//! describes in prose.

use crate::error::ParseError;

/// Remove everything from an unquoted `#` to the end of its line. A `#`
/// inside a double-quoted string is a literal character.
pub fn strip_comments(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_quote = false;
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '"' {
            in_quote = !in_quote;
            out.push(c);
            continue;
        }
        if c == '#' && !in_quote {
            while let Some(&next) = chars.peek() {
                if next == '\n' {
                    break;
                }
                chars.next();
            }
            continue;
        }
        out.push(c);
    }
    out
}

/// Remove every whitespace character outside of quoted strings; whitespace
/// inside quotes is preserved verbatim.
pub fn strip_whitespace(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_quote = false;
    for c in input.chars() {
        if c == '"' {
            in_quote = !in_quote;
            out.push(c);
            continue;
        }
        if c.is_whitespace() && !in_quote {
            continue;
        }
        out.push(c);
    }
    out
}

/// For the first `(` in `input`, return the index one past its matching
/// `)`. Parens inside quoted strings don't count. Returns 0 if `input`
/// contains no top-level `(`.
pub fn count_brackets(input: &str) -> usize {
    let chars: Vec<char> = input.chars().collect();
    let mut depth = 0i32;
    let mut started = false;
    let mut in_quote = false;

    for (i, &c) in chars.iter().enumerate() {
        if c == '"' {
            in_quote = !in_quote;
            continue;
        }
        if in_quote {
            continue;
        }
        match c {
            '(' => {
                started = true;
                depth += 1;
            }
            ')' => {
                depth -= 1;
                if started && depth == 0 {
                    return i + 1;
                }
            }
            _ => {}
        }
    }
    0
}

/// Split `input` on a top-level occurrence of `sep` — one that is neither
/// inside a quoted string nor inside nested parens. Each piece is trimmed.
fn split_top_level(input: &str, sep: char) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut depth = 0i32;
    let mut in_quote = false;

    for c in input.chars() {
        if c == '"' {
            in_quote = !in_quote;
            current.push(c);
            continue;
        }
        if in_quote {
            current.push(c);
            continue;
        }
        match c {
            '(' => {
                depth += 1;
                current.push(c);
            }
            ')' => {
                depth -= 1;
                current.push(c);
            }
            _ if c == sep && depth == 0 => {
                pieces.push(std::mem::take(&mut current).trim().to_string());
            }
            _ => current.push(c),
        }
    }
    pieces.push(current.trim().to_string());
    pieces
}

/// Split a call's argument list on top-level commas. `""` is one empty
/// argument, not zero arguments — callers decide whether an empty string
/// means "no arguments were written" for zero-arity calls.
pub fn extract_args(input: &str) -> Vec<String> {
    split_top_level(input, ',')
}

/// Split `name=expr` on the first top-level `=`. Returns `None` if there is
/// no top-level `=` (a positional argument).
pub fn split_keyword_arg(input: &str) -> Option<(String, String)> {
    let mut in_quote = false;
    let mut depth = 0i32;
    for (i, c) in input.char_indices() {
        match c {
            '"' => in_quote = !in_quote,
            '(' if !in_quote => depth += 1,
            ')' if !in_quote => depth -= 1,
            '=' if !in_quote && depth == 0 => {
                let name = input[..i].trim().to_string();
                let value = input[i + 1..].trim().to_string();
                return Some((name, value));
            }
            _ => {}
        }
    }
    None
}

/// Whether `input` should be parsed as a macro program at all, as opposed
/// to a single bare key-symbol name bound directly by the caller.
pub fn looks_like_macro(input: &str) -> bool {
    input.contains('(') || has_top_level_plus(input)
}

fn has_top_level_plus(input: &str) -> bool {
    split_on_plus_quote_aware(input).len() > 1
}

/// Split on every unquoted `+`, without regard to paren nesting. This
/// mirrors the original parser's plus-splitting, which is quote-aware but
/// not paren-aware — a `+` written inside a call's argument list still
/// splits the string, which is what makes `"key(a + b)"` a malformed plus
/// expression below rather than a call with a literal `+` in an argument.
fn split_on_plus_quote_aware(input: &str) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut in_quote = false;
    for c in input.chars() {
        match c {
            '"' => {
                in_quote = !in_quote;
                current.push(c);
            }
            '+' if !in_quote => pieces.push(std::mem::take(&mut current).trim().to_string()),
            _ => current.push(c),
        }
    }
    pieces.push(current.trim().to_string());
    pieces
}

/// Rewrite `a + b + c` into `hold_keys(a,b,c)`. Text without a top-level `+`
/// is returned unchanged. Malformed plus expressions (leading/trailing `+`,
/// a blank segment from a doubled `+`, or a `+` that splits a call's
/// argument list into unbalanced halves, e.g. `key(a + b)`) raise a parse
/// error naming the bracket imbalance — matching the original parser, which
/// treats `+` this way regardless of whether it sits inside a call.
pub fn handle_plus_syntax(input: &str) -> Result<String, ParseError> {
    if !input.contains('+') {
        return Ok(input.to_string());
    }

    let segments = split_on_plus_quote_aware(input);
    if segments.len() < 2 {
        return Ok(input.to_string());
    }

    for segment in &segments {
        if segment.is_empty() {
            return Err(ParseError::UnbalancedBrackets(input.to_string()));
        }
        let opens = segment.chars().filter(|&c| c == '(').count();
        let closes = segment.chars().filter(|&c| c == ')').count();
        if opens != closes {
            return Err(ParseError::UnbalancedBrackets(input.to_string()));
        }
    }

    Ok(format!("hold_keys({})", segments.join(",")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comments_are_stripped_outside_quotes() {
        assert_eq!(strip_comments("a#b"), "a");
        assert_eq!(strip_comments("\"a#b\""), "\"a#b\"");
        assert_eq!(strip_comments("a\"#\"#b"), "a\"#\"");
        assert_eq!(strip_comments("#a\"#\"\"#\"#b"), "");
    }

    #[test]
    fn whitespace_is_stripped_outside_quotes() {
        assert_eq!(strip_whitespace("foo\" bar\"foo"), "foo\" bar\"foo");
        assert_eq!(strip_whitespace("      "), "");
        assert_eq!(strip_whitespace(" a \" b \" c \" "), "a\" b \"c\" ");
    }

    #[test]
    fn bracket_counting_finds_first_matching_close() {
        assert_eq!(count_brackets(""), 0);
        assert_eq!(count_brackets("()"), 2);
        assert_eq!(count_brackets("a()"), 3);
        assert_eq!(count_brackets("a(b(c))"), 7);
        assert_eq!(count_brackets("a(b(c))d()"), 7);
    }

    #[test]
    fn keyword_arg_splits_on_first_top_level_equals() {
        assert_eq!(
            split_keyword_arg("a=repeat(2, KEY_A)"),
            Some(("a".to_string(), "repeat(2, KEY_A)".to_string()))
        );
        assert_eq!(
            split_keyword_arg("a=\"=,#+.\""),
            Some(("a".to_string(), "\"=,#+.\"".to_string()))
        );
        assert_eq!(split_keyword_arg("justavalue"), None);
    }

    #[test]
    fn args_split_on_top_level_commas_only() {
        assert_eq!(extract_args("a,b,c"), vec!["a", "b", "c"]);
        assert_eq!(extract_args("key(a).key(b), key(a)"), vec!["key(a).key(b)", "key(a)"]);
        assert_eq!(
            extract_args("repeat(1, key(a)), repeat(1, key(b))"),
            vec!["repeat(1, key(a))", "repeat(1, key(b))"]
        );
        assert_eq!(extract_args(","), vec!["", ""]);
    }

    #[test]
    fn plus_syntax_rewrite() {
        assert_eq!(handle_plus_syntax("a + b").unwrap(), "hold_keys(a,b)");
        assert_eq!(handle_plus_syntax("a + b + c").unwrap(), "hold_keys(a,b,c)");
        assert_eq!(handle_plus_syntax("a").unwrap(), "a");
        assert_eq!(handle_plus_syntax("key(a)").unwrap(), "key(a)");
        assert_eq!(handle_plus_syntax("").unwrap(), "");
    }

    #[test]
    fn malformed_plus_syntax_errors() {
        for bad in ["+", "a+", "+b", "a\n+\n+\nb", "key(a + b)"] {
            assert!(handle_plus_syntax(bad).is_err(), "expected error for {bad:?}");
        }
    }

    #[test]
    fn looks_like_macro_distinguishes_bare_symbols_from_calls() {
        assert!(looks_like_macro("key(1)"));
        assert!(looks_like_macro("a+b"));
        assert!(looks_like_macro("a + b"));
        assert!(!looks_like_macro("1"));
        assert!(!looks_like_macro("key_kp1"));
        assert!(!looks_like_macro("minus"));
    }
}
