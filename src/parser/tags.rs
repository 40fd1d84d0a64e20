//! `seriesByTag(...)` argument parsing and tag extraction from resolved series
//! names, ported from the reference tag-filter state machine.

use std::collections::BTreeMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TagOp {
    Equal,
    NotEqual,
    Match,
    NotMatch,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TagFilter {
    pub tag: String,
    pub op: TagOp,
    pub value: String,
}

/// Escapes regex-special characters a tag-match value might legitimately
/// contain as literal text in the handful of spots where we need a value to
/// be embeddable in a backend glob/regex without surprises; mirrors the
/// reference `replaceSpecSymbols` (escape to a fixed-width placeholder).
fn replace_spec_symbols(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 8);
    for c in s.chars() {
        if matches!(c, ',' | '.' | '?' | '*' | '+' | '^' | '$' | '[' | ']' | '{' | '}') {
            out.push_str("__");
        } else {
            out.push(c);
        }
    }
    out
}

/// Parses the arguments of a `seriesByTag('k=v', 'k2!=v2', ...)` call into a
/// set of tag filters. `__name__` is renamed to `name`. Unrecognized operator
/// sequences fall back to `=`.
pub fn parse_tags(args: &[String]) -> Vec<TagFilter> {
    let mut filters = Vec::with_capacity(args.len());
    for arg in args {
        let bytes: Vec<char> = arg.chars().collect();
        let mut i = 0;
        let mut tag = String::new();
        while i < bytes.len() && bytes[i] != '=' && bytes[i] != '!' {
            tag.push(bytes[i]);
            i += 1;
        }
        let (op, value_start) = if i < bytes.len() && bytes[i] == '!' {
            if i + 1 < bytes.len() && bytes[i + 1] == '=' {
                if i + 2 < bytes.len() && bytes[i + 2] == '~' {
                    (TagOp::NotMatch, i + 3)
                } else {
                    (TagOp::NotEqual, i + 2)
                }
            } else {
                (TagOp::NotEqual, i + 1)
            }
        } else if i < bytes.len() && bytes[i] == '=' {
            if i + 1 < bytes.len() && bytes[i + 1] == '~' {
                (TagOp::Match, i + 2)
            } else {
                (TagOp::Equal, i + 1)
            }
        } else {
            (TagOp::Equal, bytes.len())
        };
        let value: String = bytes.get(value_start..).unwrap_or(&[]).iter().collect();
        let tag_name = if tag == "__name__" { "name".to_string() } else { tag };
        let value = if matches!(op, TagOp::Match | TagOp::NotMatch) {
            replace_spec_symbols(&value)
        } else {
            value
        };
        filters.push(TagFilter {
            tag: tag_name,
            op,
            value,
        });
    }
    filters
}

/// Splits a resolved metric name of the form `name;k=v;k2=v2` into a tag map,
/// tolerating malformed segments the way the reference extractor does:
/// segments with no `=` get an empty value, empty segments are skipped, and a
/// segment starting with `=` (no key) is skipped entirely.
pub fn extract_tags(full_name: &str) -> BTreeMap<String, String> {
    let mut tags = BTreeMap::new();
    let mut parts = full_name.split(';');
    if let Some(name) = parts.next() {
        tags.insert("name".to_string(), name.to_string());
    }
    for segment in parts {
        if segment.is_empty() || segment.starts_with('=') {
            continue;
        }
        match segment.split_once('=') {
            Some((k, v)) => {
                tags.insert(k.to_string(), v.to_string());
            }
            None => {
                tags.insert(segment.to_string(), String::new());
            }
        }
    }
    tags
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn extracts_name_and_tags() {
        let tags = extract_tags("metric2;foo=bar");
        assert_eq!(tags.get("name").unwrap(), "metric2");
        assert_eq!(tags.get("foo").unwrap(), "bar");
    }

    #[test]
    fn skips_malformed_segments() {
        let tags = extract_tags("metric;;=oops;justkey");
        assert_eq!(tags.get("name").unwrap(), "metric");
        assert!(!tags.contains_key(""));
        assert_eq!(tags.get("justkey").unwrap(), "");
    }

    #[test]
    fn parses_equal_and_match_filters() {
        let filters = parse_tags(&["host=x".to_string(), "op=~read.*".to_string()]);
        assert_eq!(filters[0].tag, "host");
        assert_eq!(filters[0].op, TagOp::Equal);
        assert_eq!(filters[0].value, "x");
        assert_eq!(filters[1].tag, "op");
        assert_eq!(filters[1].op, TagOp::Match);
        assert_eq!(filters[1].value, "read____");
    }

    #[test]
    fn dunder_name_tag_is_renamed() {
        let filters = parse_tags(&["__name__=foo.bar".to_string()]);
        assert_eq!(filters[0].tag, "name");
    }

    #[test]
    fn not_equal_and_not_match_operators() {
        let filters = parse_tags(&["env!=prod".to_string(), "host!=~bad.*".to_string()]);
        assert_eq!(filters[0].op, TagOp::NotEqual);
        assert_eq!(filters[1].op, TagOp::NotMatch);
    }
}
