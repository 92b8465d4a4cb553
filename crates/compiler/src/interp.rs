//! String interpolation splitting
//!
//! Double-quoted strings (and command literals and regex patterns) are
//! split into literal segments and variable placeholders at codegen time.
//! The lexer keeps `\$` and `\@` verbatim; this splitter turns them back
//! into literal sigil characters.
//!
//! In pattern mode a `$` not followed by a word character (or `{`) is the
//! end-of-line anchor and stays in the pattern verbatim; `$$` and `$` at
//! end of pattern are anchors too.

use crate::types::Sigil;

#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Literal(String),
    Var { sigil: Sigil, name: String },
}

/// Split a double-quoted string value into segments.
pub fn split(value: &str) -> Vec<Segment> {
    split_inner(value, false)
}

/// Split a regex pattern; `@` never interpolates and a bare `$` is the
/// anchor.
pub fn split_pattern(value: &str) -> Vec<Segment> {
    split_inner(value, true)
}

/// Whether a string needs interpolation at all.
pub fn is_interpolated(segments: &[Segment]) -> bool {
    segments.iter().any(|s| matches!(s, Segment::Var { .. }))
}

fn split_inner(value: &str, pattern_mode: bool) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut chars = value.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.peek() {
                // The lexer's stable placeholder form for escaped sigils
                Some('$') | Some('@') => {
                    literal.push(chars.next().unwrap());
                }
                _ => literal.push('\\'),
            },
            '$' | '@' => {
                if pattern_mode && c == '@' {
                    literal.push(c);
                    continue;
                }
                let sigil = if c == '$' { Sigil::Scalar } else { Sigil::Array };
                match chars.peek() {
                    Some('{') => {
                        chars.next();
                        let mut name = String::new();
                        for nc in chars.by_ref() {
                            if nc == '}' {
                                break;
                            }
                            name.push(nc);
                        }
                        flush(&mut segments, &mut literal);
                        segments.push(Segment::Var { sigil, name });
                    }
                    Some(nc) if nc.is_ascii_alphabetic() || *nc == '_' => {
                        let mut name = String::new();
                        while let Some(nc) = chars.peek() {
                            if nc.is_ascii_alphanumeric() || *nc == '_' {
                                name.push(chars.next().unwrap());
                            } else {
                                break;
                            }
                        }
                        flush(&mut segments, &mut literal);
                        segments.push(Segment::Var { sigil, name });
                    }
                    // `$` at end of string / before a non-word character:
                    // literal (the regex anchor, in pattern mode)
                    _ => literal.push(c),
                }
            }
            _ => literal.push(c),
        }
    }
    flush(&mut segments, &mut literal);
    segments
}

fn flush(segments: &mut Vec<Segment>, literal: &mut String) {
    if !literal.is_empty() {
        segments.push(Segment::Literal(std::mem::take(literal)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_literal() {
        assert_eq!(
            split("hello"),
            vec![Segment::Literal("hello".to_string())]
        );
    }

    #[test]
    fn test_simple_var() {
        assert_eq!(
            split("hi $name!"),
            vec![
                Segment::Literal("hi ".to_string()),
                Segment::Var {
                    sigil: Sigil::Scalar,
                    name: "name".to_string()
                },
                Segment::Literal("!".to_string()),
            ]
        );
    }

    #[test]
    fn test_braced_var() {
        assert_eq!(
            split("${x}y"),
            vec![
                Segment::Var {
                    sigil: Sigil::Scalar,
                    name: "x".to_string()
                },
                Segment::Literal("y".to_string()),
            ]
        );
    }

    #[test]
    fn test_array_var() {
        assert_eq!(
            split("got @items here"),
            vec![
                Segment::Literal("got ".to_string()),
                Segment::Var {
                    sigil: Sigil::Array,
                    name: "items".to_string()
                },
                Segment::Literal(" here".to_string()),
            ]
        );
    }

    #[test]
    fn test_escaped_sigil_is_literal() {
        assert_eq!(
            split("cost \\$5"),
            vec![Segment::Literal("cost $5".to_string())]
        );
    }

    #[test]
    fn test_trailing_dollar_is_literal() {
        assert_eq!(split("end$"), vec![Segment::Literal("end$".to_string())]);
    }

    #[test]
    fn test_pattern_anchor_stays() {
        assert_eq!(
            split_pattern("abc$"),
            vec![Segment::Literal("abc$".to_string())]
        );
        assert_eq!(
            split_pattern("a$$b"),
            vec![Segment::Literal("a$$b".to_string())]
        );
    }

    #[test]
    fn test_pattern_var_interpolates() {
        assert_eq!(
            split_pattern("^$prefix-\\d+$"),
            vec![
                Segment::Literal("^".to_string()),
                Segment::Var {
                    sigil: Sigil::Scalar,
                    name: "prefix".to_string()
                },
                Segment::Literal("-\\d+$".to_string()),
            ]
        );
    }

    #[test]
    fn test_pattern_at_is_literal() {
        assert_eq!(
            split_pattern("a@b"),
            vec![Segment::Literal("a@b".to_string())]
        );
    }
}
