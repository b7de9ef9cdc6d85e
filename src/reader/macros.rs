//! Text helpers for macro-style FSL declarations
//!
//! FSL declarations are written as function-like macros (`RES(...)`,
//! `DATA(...)`, `Get(...)`), so most of the scanning reduces to finding a
//! macro name, its balanced argument list, and splitting that list at
//! top-level commas.
//!
//! Author: Moroya Sakamoto

use std::collections::HashMap;

/// Name of a macro invocation (text before the first `(`)
pub fn macro_name(text: &str) -> &str {
    let text = text.trim();
    match text.find('(') {
        Some(i) => text[..i].trim(),
        None => text,
    }
}

/// Index of the `)` matching the `(` at `open`
pub fn matching_paren(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, c) in text[open..].char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(open + i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Text between the first `(` and its matching `)`
pub fn macro_body(text: &str) -> Option<&str> {
    let open = text.find('(')?;
    let close = matching_paren(text, open)?;
    Some(&text[open + 1..close])
}

/// Split at commas that are not nested inside parentheses or brackets
pub fn split_top_level(text: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut current = String::new();
    for c in text.chars() {
        match c {
            '(' | '[' => {
                depth += 1;
                current.push(c);
            }
            ')' | ']' => {
                depth -= 1;
                current.push(c);
            }
            ',' if depth == 0 => {
                parts.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() || !parts.is_empty() {
        parts.push(current.trim().to_string());
    }
    parts
}

/// Arguments of the first macro invocation in `text`
pub fn macro_args(text: &str) -> Vec<String> {
    macro_body(text).map(split_top_level).unwrap_or_default()
}

/// Leading whitespace of a line
#[inline(always)]
pub fn indentation(line: &str) -> &str {
    &line[..line.len() - line.trim_start().len()]
}

/// True for `//` comment lines
#[inline(always)]
pub fn is_comment(line: &str) -> bool {
    line.trim_start().starts_with("//")
}

/// Line text with any trailing `//` comment removed
pub fn strip_comment(line: &str) -> &str {
    match line.find("//") {
        Some(i) => &line[..i],
        None => line,
    }
}

// ============================================================================
// Identifier tokens
// ============================================================================

#[inline(always)]
fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Position of `token` at identifier boundaries, searching from `from`
pub fn find_token(text: &str, token: &str, from: usize) -> Option<usize> {
    let mut start = from;
    while let Some(rel) = text.get(start..)?.find(token) {
        let i = start + rel;
        let before_ok = text[..i].chars().next_back().map_or(true, |c| !is_ident_char(c));
        let after_ok = text[i + token.len()..].chars().next().map_or(true, |c| !is_ident_char(c));
        if before_ok && after_ok {
            return Some(i);
        }
        start = i + token.len();
    }
    None
}

/// True when `token` occurs as a whole identifier
#[inline(always)]
pub fn contains_token(text: &str, token: &str) -> bool {
    find_token(text, token, 0).is_some()
}

/// Replace whole-identifier occurrences of `token`
pub fn replace_token(text: &str, token: &str, replacement: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    let mut from = 0;
    while let Some(i) = find_token(text, token, from) {
        out.push_str(&text[last..i]);
        out.push_str(replacement);
        last = i + token.len();
        from = last;
    }
    out.push_str(&text[last..]);
    out
}

/// Every identifier in `text`, in order of appearance
pub fn identifiers(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| !is_ident_char(c))
        .filter(|t| !t.is_empty() && !t.starts_with(|c: char| c.is_ascii_digit()))
}

// ============================================================================
// Arrays
// ============================================================================

/// Declared length of a possibly array-suffixed name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayLen {
    /// Not an array
    Scalar,
    /// `name[N]`
    Fixed(u32),
    /// `name[]`
    Unbounded,
}

impl ArrayLen {
    /// Number of binding slots consumed
    #[inline(always)]
    pub fn slots(self) -> u32 {
        match self {
            ArrayLen::Scalar | ArrayLen::Unbounded => 1,
            ArrayLen::Fixed(n) => n,
        }
    }

    /// True for `Fixed` and `Unbounded`
    #[inline(always)]
    pub fn is_array(self) -> bool {
        self != ArrayLen::Scalar
    }
}

/// True when the name carries a `[...]` suffix
#[inline(always)]
pub fn is_array(name: &str) -> bool {
    name.contains('[')
}

/// Name without its array suffix
pub fn array_base_name(name: &str) -> &str {
    match name.find('[') {
        Some(i) => name[..i].trim(),
        None => name.trim(),
    }
}

/// Text inside the first `[...]`
pub fn array_dim(name: &str) -> Option<&str> {
    let open = name.find('[')?;
    let close = name[open..].find(']')? + open;
    Some(name[open + 1..close].trim())
}

/// Resolve the declared length of `name`, following `#define`s
pub fn array_len(name: &str, defines: &HashMap<String, String>) -> Result<ArrayLen, String> {
    let Some(dim) = array_dim(name) else {
        return Ok(ArrayLen::Scalar);
    };
    if dim.is_empty() {
        return Ok(ArrayLen::Unbounded);
    }
    resolve_uint(dim, defines)
        .map(ArrayLen::Fixed)
        .ok_or_else(|| format!("Could not deduce array size for '{}'", name))
}

/// Evaluate a numeric literal or a chain of `#define`d names
pub fn resolve_uint(text: &str, defines: &HashMap<String, String>) -> Option<u32> {
    let mut current = text.trim().trim_start_matches('(').trim_end_matches(')').trim();
    // bounded to survive self-referencing defines
    for _ in 0..16 {
        let literal = current.trim_end_matches(['u', 'U']);
        if let Ok(n) = literal.parse::<u32>() {
            return Some(n);
        }
        current = defines.get(current)?.trim().trim_start_matches('(').trim_end_matches(')').trim();
    }
    None
}
