//! Directive attribute parsing.
//!
//! Grammar: whitespace-separated tokens of the form `name`, `name="value"` or
//! `name='value'`. A bare `name` yields the boolean sentinel. Stray text
//! between tokens is ignored (non-strict), and a value cannot contain its own
//! delimiting quote character — an accepted grammar limitation, not a bug.

use indexmap::IndexMap;
use lazy_static::lazy_static;
use regex::Regex;

/// One attribute value: a quoted string or the bare-attribute sentinel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrValue {
    Str(String),
    /// Bare attribute (`name` with no `=`), the boolean `true` sentinel
    Flag,
}

impl AttrValue {
    /// The string value, if this attribute carried one
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Str(s) => Some(s),
            AttrValue::Flag => None,
        }
    }
}

/// Attribute map in source order. Order matters: `foreach` reads its keys
/// positionally and `config` falls back to the first bare key.
pub type AttrMap = IndexMap<String, AttrValue>;

lazy_static! {
    // Names admit `.` so a dotted collection expression stays one token.
    static ref ATTR_RE: Regex = Regex::new(
        r#"([A-Za-z_$][\w.$]*)(?:\s*=\s*(?:"([^"]*)"|'([^']*)'))?"#
    )
    .unwrap();
}

/// Tokenize a raw attribute substring into an attribute map.
///
/// Malformed input degrades to whatever tokens still match; it is never
/// fatal. An empty or unmatchable string yields an empty map.
pub fn parse_attrs(raw: &str) -> AttrMap {
    let mut attrs = AttrMap::new();
    for caps in ATTR_RE.captures_iter(raw) {
        let name = caps[1].to_string();
        let value = caps
            .get(2)
            .or_else(|| caps.get(3))
            .map(|m| AttrValue::Str(m.as_str().to_string()))
            .unwrap_or(AttrValue::Flag);
        attrs.insert(name, value);
    }
    attrs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quoted_values() {
        let attrs = parse_attrs(r#"name="users" item='u'"#);
        assert_eq!(attrs["name"], AttrValue::Str("users".into()));
        assert_eq!(attrs["item"], AttrValue::Str("u".into()));
    }

    #[test]
    fn test_bare_attribute_is_flag() {
        let attrs = parse_attrs("title");
        assert_eq!(attrs["title"], AttrValue::Flag);
    }

    #[test]
    fn test_mixed_and_order_preserved() {
        let attrs = parse_attrs(r#"$users as $u"#);
        let keys: Vec<&str> = attrs.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["$users", "as", "$u"]);
    }

    #[test]
    fn test_dotted_name_stays_one_token() {
        let attrs = parse_attrs("$user.friends as $f");
        let keys: Vec<&str> = attrs.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["$user.friends", "as", "$f"]);
    }

    #[test]
    fn test_stray_text_ignored() {
        let attrs = parse_attrs(r#"?? name="x" !! step="2""#);
        assert_eq!(attrs["name"], AttrValue::Str("x".into()));
        assert_eq!(attrs["step"], AttrValue::Str("2".into()));
    }

    #[test]
    fn test_empty_value_and_empty_input() {
        assert!(parse_attrs("").is_empty());
        let attrs = parse_attrs(r#"value="""#);
        assert_eq!(attrs["value"], AttrValue::Str(String::new()));
    }

    #[test]
    fn test_mismatched_quote_degrades() {
        // The value token never closes, so only the name survives as a flag.
        let attrs = parse_attrs(r#"name="broken"#);
        assert_eq!(attrs["name"], AttrValue::Flag);
    }
}
