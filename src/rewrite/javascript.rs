//! JavaScript `location` virtualization.
//!
//! A textual pass, not a parser. References to the page location are
//! redirected to `__cmuxLocation`, which the injected shim (or the external
//! bootstrap) defines.

use crate::rewrite::assets::{EXTERNAL_BOOTSTRAP_JS, NO_REWRITE_MARKER};

const BARE_IDENT: &str = "location";
const SHIM_IDENT: &str = "__cmuxLocation";
const SHIM_PREFIX: &str = "__cmux";
const DECLARATION_KEYWORDS: [&str; 3] = ["const", "let", "var"];

/// Rewrite `source` so location access goes through the shim.
///
/// `is_external_file` is true for scripts fetched by `src=`; those keep their
/// bare `location` identifiers but get the bootstrap prepended. Sources that
/// already contain the no-rewrite marker are returned unchanged.
pub fn rewrite_javascript(source: &str, is_external_file: bool) -> String {
    if source.contains(NO_REWRITE_MARKER) {
        return source.to_string();
    }

    let mut rewritten = source
        .replace("window.location", "window.__cmuxLocation")
        .replace("document.location", "document.__cmuxLocation");

    if !is_external_file {
        rewritten = rewrite_bare_location(&rewritten);
    }

    let doubled = format!("{SHIM_PREFIX}{SHIM_PREFIX}");
    while rewritten.contains(&doubled) {
        rewritten = rewritten.replace(&doubled, SHIM_PREFIX);
    }

    if is_external_file {
        format!("{EXTERNAL_BOOTSTRAP_JS}\n{rewritten}")
    } else {
        rewritten
    }
}

fn rewrite_bare_location(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut copied = 0;
    for (start, _) in source.match_indices(BARE_IDENT) {
        let end = start + BARE_IDENT.len();
        if is_rewritable_reference(&source[..start], &source[end..]) {
            out.push_str(&source[copied..start]);
            out.push_str(SHIM_IDENT);
            copied = end;
        }
    }
    out.push_str(&source[copied..]);
    out
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// Context checks around one `location` occurrence.
fn is_rewritable_reference(before: &str, after: &str) -> bool {
    // Part of a longer identifier, including an already `__cmux`-prefixed one.
    if before.chars().next_back().is_some_and(is_ident_char)
        || after.chars().next().is_some_and(is_ident_char)
    {
        return false;
    }

    let prev = before.trim_end().chars().next_back();
    let next = after.trim_start().chars().next();

    // member access or call/destructuring position
    if matches!(prev, Some('.' | '(')) || matches!(next, Some(',' | ')')) {
        return false;
    }
    // object literal key
    if matches!(prev, Some('{' | ',')) && next == Some(':') {
        return false;
    }
    !is_declaration(before)
}

fn is_declaration(before: &str) -> bool {
    let trimmed = before.trim_end();
    if trimmed.len() == before.len() {
        return false;
    }
    DECLARATION_KEYWORDS.iter().any(|keyword| {
        trimmed
            .strip_suffix(keyword)
            .is_some_and(|rest| !rest.chars().next_back().is_some_and(is_ident_char))
    })
}
