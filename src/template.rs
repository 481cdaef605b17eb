//! Token scanning and substitution for templated step fields.
//!
//! Step fields use `$(name)` tokens for every substitution grammar the
//! planner understands:
//!
//! - `$(VARIABLE)` - environment variables and dependencies
//! - `$(PARAM)` - study parameters
//! - `$(step.workspace)` - the workspace directory of another step
//!
//! The scanner is deliberately lenient: a token whose name no substitution
//! pass knows about is re-emitted verbatim, so the independent environment,
//! parameter, and workspace passes compose without clobbering each other
//! (and shell command substitutions like `$(date)` survive untouched).

use std::collections::BTreeSet;

/// Suffix that marks a token as a workspace reference.
pub const WORKSPACE_SUFFIX: &str = ".workspace";

/// A segment of a templated field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Literal text.
    Literal(String),
    /// Token reference: $(name).
    Token(String),
}

/// Parse a field containing `$(name)` tokens.
///
/// A `$` not followed by `(`, an empty `$()`, and an unterminated `$(` are
/// all literal text.
pub fn parse(input: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut chars = input.char_indices().peekable();
    let mut current_literal = String::new();

    while let Some((start, c)) = chars.next() {
        if c == '$' && matches!(chars.peek(), Some((_, '('))) {
            chars.next(); // consume (

            // Scan ahead for the closing paren.
            let mut name = String::new();
            let mut closed = false;
            for (_, c) in chars.by_ref() {
                if c == ')' {
                    closed = true;
                    break;
                }
                name.push(c);
            }

            if closed && !name.is_empty() {
                if !current_literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut current_literal)));
                }
                segments.push(Segment::Token(name));
            } else {
                // No closing paren (or empty token): everything from the
                // opener onward is literal.
                current_literal.push_str(&input[start..start + 2]);
                current_literal.push_str(&name);
                if closed {
                    current_literal.push(')');
                }
            }
        } else {
            current_literal.push(c);
        }
    }

    if !current_literal.is_empty() {
        segments.push(Segment::Literal(current_literal));
    }

    segments
}

/// Substitute tokens in a field using the provided lookup.
///
/// Tokens the lookup does not resolve are re-emitted verbatim as `$(name)`.
pub fn substitute<F>(input: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut result = String::with_capacity(input.len());

    for segment in parse(input) {
        match segment {
            Segment::Literal(text) => result.push_str(&text),
            Segment::Token(name) => match lookup(&name) {
                Some(value) => result.push_str(&value),
                None => {
                    result.push_str("$(");
                    result.push_str(&name);
                    result.push(')');
                }
            },
        }
    }

    result
}

/// Extract all token names referenced by a field.
pub fn referenced_names(input: &str) -> BTreeSet<String> {
    parse(input)
        .into_iter()
        .filter_map(|seg| match seg {
            Segment::Token(name) => Some(name),
            Segment::Literal(_) => None,
        })
        .collect()
}

/// Extract the step names referenced via `$(step.workspace)` tokens.
pub fn workspace_references(input: &str) -> BTreeSet<String> {
    referenced_names(input)
        .into_iter()
        .filter_map(|name| {
            name.strip_suffix(WORKSPACE_SUFFIX)
                .filter(|step| !step.is_empty())
                .map(str::to_string)
        })
        .collect()
}

/// Check if a field contains any tokens.
pub fn has_tokens(input: &str) -> bool {
    parse(input)
        .iter()
        .any(|seg| matches!(seg, Segment::Token(_)))
}
