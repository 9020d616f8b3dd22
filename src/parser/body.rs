//! Body-tag engine: directives whose entire span, including raw inner
//! content, is parsed atomically.
//!
//! One pass runs per registered tag name, in registration order. Order is the
//! only sequencing tool callers have: a tag whose handler must not see
//! already-transformed markup (the literal tag) has to be registered before
//! tags that would rewrite its interior.

use regex::Regex;

use super::attrs::{parse_attrs, AttrMap};
use super::CompileEnv;
use crate::config::EngineConfig;
use crate::error::Result;

/// One body directive. `content` is the raw inner text exactly as written,
/// or the empty string for the self-closing form.
pub trait BodyDirective {
    fn render(&self, env: &mut CompileEnv<'_>, attrs: &AttrMap, content: &str) -> Result<String>;
}

/// Registration-ordered body-directive list
pub type BodyRegistry = Vec<(&'static str, Box<dyn BodyDirective>)>;

/// Pattern for one body tag name: self-closing form, or full form with
/// non-greedy inner capture up to the first matching close tag.
/// Case-insensitive; the inner content may span lines.
pub(crate) fn body_pattern(config: &EngineConfig, name: &str) -> Regex {
    let l = regex::escape(&config.left_delim);
    let r = regex::escape(&config.right_delim);
    Regex::new(&format!(
        r"(?is){l}\s*{name}([^\r\n{r}]*?)(?:/\s*{r}|{r}(.*?){l}/{name}\s*{r})"
    ))
    .unwrap()
}

pub struct BodyTagEngine {
    tags: Vec<(&'static str, Regex, Box<dyn BodyDirective>)>,
}

impl BodyTagEngine {
    pub fn new(config: &EngineConfig, registry: BodyRegistry) -> Self {
        let tags = registry
            .into_iter()
            .map(|(name, handler)| (name, body_pattern(config, name), handler))
            .collect();
        Self { tags }
    }

    /// Run one pass per registered tag, in registration order
    pub fn parse(&self, text: &str, env: &mut CompileEnv<'_>) -> Result<String> {
        let mut text = text.to_string();
        for (_, pattern, handler) in &self.tags {
            let mut out = String::with_capacity(text.len());
            let mut last = 0;
            for caps in pattern.captures_iter(&text) {
                let whole = caps.get(0).unwrap();
                out.push_str(&text[last..whole.start()]);
                last = whole.end();

                let attrs = parse_attrs(&caps[1]);
                let content = caps.get(2).map(|m| m.as_str()).unwrap_or("");
                out.push_str(&handler.render(env, &attrs, content)?);
            }
            out.push_str(&text[last..]);
            text = out;
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::attrs::AttrValue;

    struct Upper;
    impl BodyDirective for Upper {
        fn render(
            &self,
            _env: &mut CompileEnv<'_>,
            _attrs: &AttrMap,
            content: &str,
        ) -> Result<String> {
            Ok(content.to_uppercase())
        }
    }

    struct Tagged;
    impl BodyDirective for Tagged {
        fn render(
            &self,
            _env: &mut CompileEnv<'_>,
            attrs: &AttrMap,
            content: &str,
        ) -> Result<String> {
            let name = attrs
                .get("name")
                .and_then(AttrValue::as_str)
                .unwrap_or("?");
            Ok(format!("<{name}:{content}>"))
        }
    }

    fn config() -> EngineConfig {
        EngineConfig::default()
    }

    fn run(registry: BodyRegistry, src: &str) -> String {
        let config = config();
        let engine = BodyTagEngine::new(&config, registry);
        let mut env = CompileEnv {
            config: &config,
            loader: &crate::config::FlatFileConfig,
            session: None,
        };
        engine.parse(src, &mut env).unwrap()
    }

    #[test]
    fn test_full_form_with_newlines() {
        let out = run(
            vec![("upper", Box::new(Upper))],
            "a {upper}line one\nline two{/upper} b",
        );
        assert_eq!(out, "a LINE ONE\nLINE TWO b");
    }

    #[test]
    fn test_self_closing_form_gets_empty_content() {
        let out = run(
            vec![("tagged", Box::new(Tagged))],
            r#"{tagged name="x"/} tail"#,
        );
        assert_eq!(out, "<x:> tail");
    }

    #[test]
    fn test_case_insensitive_name() {
        let out = run(vec![("upper", Box::new(Upper))], "{UPPER}hi{/Upper}");
        assert_eq!(out, "HI");
    }

    #[test]
    fn test_non_greedy_close() {
        let out = run(
            vec![("upper", Box::new(Upper))],
            "{upper}a{/upper} mid {upper}b{/upper}",
        );
        assert_eq!(out, "A mid B");
    }

    #[test]
    fn test_registration_order_is_pass_order() {
        // `upper` runs first, so the tagged tag sees upper-cased inner markup
        // only when nested the other way around.
        let out = run(
            vec![
                ("upper", Box::new(Upper)),
                ("tagged", Box::new(Tagged)),
            ],
            r#"{tagged name="t"}{upper}v{/upper}{/tagged}"#,
        );
        assert_eq!(out, "<t:V>");
    }
}
