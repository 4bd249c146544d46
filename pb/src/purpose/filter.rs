//! Purpose filter expansion
//!
//! A filter is a `/`-separated list of levels. A level is either a literal
//! token or a brace group of alternatives, e.g. `ads/{targeted,generic}/.`.
//! Expansion is the cross-product of all levels, in level order with each
//! group's alternatives in the order written.
//!
//! A `.` level marks "this branch stops here": combinations that continue past
//! a `.` (contain `./`) are dropped, and a trailing `/.` is removed, so
//! `a/{b,.}` describes both `a/b` and `a`.

use tracing::debug;

use super::PurposeError;

/// Expand a purpose filter expression into the concrete purposes it describes
///
/// The result is deterministic: subscriptions built from it are reproducible.
pub fn expand_filter(expression: &str) -> Result<Vec<String>, PurposeError> {
    debug!(%expression, "expand_filter: called");
    check_braces(expression)?;

    let mut levels: Vec<Vec<&str>> = Vec::new();
    let mut offset = 0;
    for level in expression.split('/') {
        levels.push(parse_level(expression, level, offset)?);
        offset += level.len() + 1;
    }

    let mut combinations: Vec<Vec<&str>> = vec![Vec::new()];
    for choices in &levels {
        combinations = combinations
            .iter()
            .flat_map(|prefix| {
                choices.iter().map(move |choice| {
                    let mut next = prefix.clone();
                    next.push(*choice);
                    next
                })
            })
            .collect();
    }

    let purposes: Vec<String> = combinations
        .into_iter()
        .map(|parts| parts.join("/"))
        .filter(|purpose| !purpose.contains("./"))
        .map(|purpose| match purpose.strip_suffix("/.") {
            Some(stripped) => stripped.to_string(),
            None => purpose,
        })
        .collect();

    debug!(count = purposes.len(), "expand_filter: expanded");
    Ok(purposes)
}

/// Reject unbalanced or nested braces, and separators inside a group
fn check_braces(expression: &str) -> Result<(), PurposeError> {
    let malformed = |position: usize, reason: &str| PurposeError::MalformedFilter {
        expression: expression.to_string(),
        position,
        reason: reason.to_string(),
    };

    let mut open_at: Option<usize> = None;
    for (position, ch) in expression.char_indices() {
        match (ch, open_at) {
            ('{', Some(_)) => return Err(malformed(position, "nested brace group")),
            ('{', None) => open_at = Some(position),
            ('}', None) => return Err(malformed(position, "unmatched closing brace")),
            ('}', Some(_)) => open_at = None,
            ('/', Some(_)) => return Err(malformed(position, "level separator inside brace group")),
            _ => {}
        }
    }

    match open_at {
        Some(position) => Err(malformed(position, "unclosed brace group")),
        None => Ok(()),
    }
}

fn parse_level<'a>(expression: &str, level: &'a str, offset: usize) -> Result<Vec<&'a str>, PurposeError> {
    if !level.contains('{') {
        return Ok(vec![level]);
    }

    let malformed = |position: usize| PurposeError::MalformedFilter {
        expression: expression.to_string(),
        position,
        reason: "brace group must span the whole level".to_string(),
    };

    let inner = level
        .strip_prefix('{')
        .and_then(|l| l.strip_suffix('}'))
        .ok_or_else(|| malformed(offset + level.find('{').unwrap_or(0)))?;
    // Adjacent groups such as `{a}x{b}` pass the balance check but leave braces inside
    if let Some(index) = inner.find(['{', '}']) {
        return Err(malformed(offset + 1 + index));
    }
    Ok(inner.split(',').collect())
}
