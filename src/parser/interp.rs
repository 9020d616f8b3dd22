//! `{$expr}` variable interpolation.
//!
//! The expression is pipe-split into trimmed non-empty segments: segment 0 is
//! the base access (dot-path or direct reference), an optional
//! `default='literal'` segment emits an isset-style guard, and every other
//! segment is a filter call chained through the `###` placeholder.

use lazy_static::lazy_static;
use regex::Regex;

use super::{code_region, escape_slashes};

/// Placeholder substituted with the accumulated expression in filter
/// argument lists
pub const FILTER_PLACEHOLDER: &str = "###";

lazy_static! {
    static ref VAR_RE: Regex = Regex::new(r"\{\$(.*?)\}").unwrap();
    static ref DEFAULT_RE: Regex =
        Regex::new(r#"(?i)default\s*=\s*(?:'([^']*)'|"([^"]*)")"#).unwrap();
}

/// Expand every `{$expr}` occurrence into an echo region
pub fn interpolate(text: &str) -> String {
    VAR_RE
        .replace_all(text, |caps: &regex::Captures<'_>| expand(&caps[1]))
        .into_owned()
}

fn expand(expr: &str) -> String {
    let parts: Vec<&str> = expr
        .split('|')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    let Some(base) = parts.first() else {
        // `{$}` has no base access; leave an empty echo region rather than
        // failing the whole pass
        return code_region("echo '';");
    };
    let mut code = base_access(base);

    match parts.get(1) {
        None => code_region(&format!("echo ({code});")),
        Some(second) => {
            if let Some(caps) = DEFAULT_RE.captures(second) {
                let literal = caps
                    .get(1)
                    .or_else(|| caps.get(2))
                    .map(|m| m.as_str())
                    .unwrap_or("");
                let escaped = escape_slashes(literal);
                code_region(&format!(
                    "if isset({code}) {{ echo ({code}); }} else {{ echo \"{escaped}\"; }}"
                ))
            } else {
                for part in &parts[1..] {
                    let call = filter_call(part);
                    code = call.replace(FILTER_PLACEHOLDER, &code);
                }
                code_region(&format!("echo {code};"))
            }
        }
    }
}

/// Segment 0: `arr.key.sub` → `$arr['key']['sub']`; anything without a dot is
/// passed through as a direct reference.
fn base_access(base: &str) -> String {
    if base.contains('.') {
        let mut parts = base.split('.').map(str::trim);
        let head = parts.next().unwrap_or("");
        let mut code = format!("${head}");
        for part in parts {
            code.push_str(&format!("['{part}']"));
        }
        code
    } else {
        format!("${base}")
    }
}

/// A filter segment: split on the first `=` into name and argument list
/// (defaulting to the placeholder alone), e.g. `substr=###,0,10`.
fn filter_call(part: &str) -> String {
    match part.split_once('=') {
        Some((name, args)) => format!("{}({})", name.trim(), args.trim()),
        None => format!("{part}({FILTER_PLACEHOLDER})"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_reference() {
        assert_eq!(interpolate("{$name}"), "<?rs echo ($name); ?>");
        assert_eq!(interpolate("{$name }"), "<?rs echo ($name); ?>");
    }

    #[test]
    fn test_dot_path() {
        assert_eq!(
            interpolate("{$user.profile.age}"),
            "<?rs echo ($user['profile']['age']); ?>"
        );
    }

    #[test]
    fn test_default_literal() {
        assert_eq!(
            interpolate("{$title|default='untitled'}"),
            "<?rs if isset($title) { echo ($title); } else { echo \"untitled\"; } ?>"
        );
        assert_eq!(
            interpolate(r#"{$title|default="n/a"}"#),
            "<?rs if isset($title) { echo ($title); } else { echo \"n/a\"; } ?>"
        );
    }

    #[test]
    fn test_filter_chain_left_to_right() {
        assert_eq!(interpolate("{$name|upper}"), "<?rs echo upper($name); ?>");
        assert_eq!(
            interpolate("{$name|upper|substr=###,0,3}"),
            "<?rs echo substr(upper($name),0,3); ?>"
        );
    }

    #[test]
    fn test_empty_segments_are_dropped() {
        assert_eq!(interpolate("{$name||upper|}"), "<?rs echo upper($name); ?>");
    }

    #[test]
    fn test_surrounding_text_untouched() {
        assert_eq!(
            interpolate("Hello {$who}, bye"),
            "Hello <?rs echo ($who); ?>, bye"
        );
    }
}
