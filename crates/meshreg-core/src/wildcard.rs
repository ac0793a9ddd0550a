//! Wildcard name matching.
//!
//! Patterns support a leading and/or trailing `*`: `pay*` is a prefix
//! pattern, `*ment` a suffix pattern, `*ay*` a contains pattern. A
//! pattern with no `*` matches by equality.

/// Whether `name` ends with the wildcard marker.
pub fn is_prefix_wild_name(name: &str) -> bool {
    name.ends_with('*')
}

/// Whether `name` starts with the wildcard marker.
pub fn is_suffix_wild_name(name: &str) -> bool {
    name.starts_with('*')
}

/// Whether `name` carries a wildcard marker on either end.
pub fn is_wild_name(name: &str) -> bool {
    is_prefix_wild_name(name) || is_suffix_wild_name(name)
}

/// Strip a trailing wildcard marker, reporting whether one was present.
pub fn parse_wild_name(name: &str) -> (&str, bool) {
    match name.strip_suffix('*') {
        Some(stripped) => (stripped, true),
        None => (name, false),
    }
}

/// Whether `name` matches `pattern`, ignoring ASCII case.
pub fn is_wild_match_ignore_case(name: &str, pattern: &str) -> bool {
    is_wild_match(&name.to_lowercase(), &pattern.to_lowercase())
}

/// Whether `name` matches `pattern`.
pub fn is_wild_match(name: &str, pattern: &str) -> bool {
    if is_prefix_wild_name(pattern) {
        let pattern = pattern.trim_end_matches('*');
        if name.starts_with(pattern) {
            return true;
        }
        if is_suffix_wild_name(pattern) {
            let pattern = pattern.trim_start_matches('*');
            return name.contains(pattern);
        }
        false
    } else if is_suffix_wild_name(pattern) {
        let pattern = pattern.trim_start_matches('*');
        name.ends_with(pattern)
    } else {
        pattern == name
    }
}
