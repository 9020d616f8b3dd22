//! Core body-directive semantics: literal, include, case, default, nocache.
//!
//! Registration order is load-bearing: `literal` must run before anything
//! that would rewrite its interior, and `include` before the tags that need
//! to see included markup.

use std::fs;

use super::attrs::{AttrMap, AttrValue};
use super::body::{BodyDirective, BodyRegistry};
use super::{code_region, escape_slashes, html_escape, CompileEnv};
use crate::error::{Result, TemplateError};

// Sentinels protecting literal content from every later pass; reversed by
// restore_literals as the final pipeline step.
const LIT_LBRACE: &str = "_LITERAL_LB_";
const LIT_RBRACE: &str = "_LITERAL_RB_";
const LIT_DOLLAR: &str = "_LITERAL_DS_";

/// Reverse the sentinel substitution performed by the literal tag. Runs last
/// so the placeholders survive every earlier pass.
pub fn restore_literals(text: &str) -> String {
    text.replace(LIT_LBRACE, "{")
        .replace(LIT_RBRACE, "}")
        .replace(LIT_DOLLAR, "$")
}

// ---------------------------------------------------------------------------
// {literal} ... {/literal}
// ---------------------------------------------------------------------------

struct LiteralTag;

impl BodyDirective for LiteralTag {
    fn render(&self, _env: &mut CompileEnv<'_>, _attrs: &AttrMap, content: &str) -> Result<String> {
        let content = html_escape(content)
            .replace('{', LIT_LBRACE)
            .replace('}', LIT_RBRACE)
            .replace('$', LIT_DOLLAR);
        Ok(format!("<pre>{content}</pre>"))
    }
}

// ---------------------------------------------------------------------------
// {include file=""/}
// The included file's markup is substituted in place and participates in
// every later pass (and in the body passes registered after include).
// ---------------------------------------------------------------------------

struct IncludeTag;

impl BodyDirective for IncludeTag {
    fn render(&self, env: &mut CompileEnv<'_>, attrs: &AttrMap, _content: &str) -> Result<String> {
        let file = attrs
            .get("file")
            .and_then(AttrValue::as_str)
            .ok_or(TemplateError::MissingAttribute {
                directive: "include",
                attribute: "file",
            })?
            .trim();
        let path = env.config.template_dir.join(file);
        match fs::read_to_string(&path) {
            Ok(text) => Ok(text),
            Err(_) => {
                tracing::warn!(path = %path.display(), "include target missing, skipping");
                Ok(String::new())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// {case value=""} ... {/case} and {default} ... {/default}
// Both echo their escaped literal content inside a switch dispatch block.
// ---------------------------------------------------------------------------

struct CaseTag;

impl BodyDirective for CaseTag {
    fn render(&self, _env: &mut CompileEnv<'_>, attrs: &AttrMap, content: &str) -> Result<String> {
        let value = attrs
            .get("value")
            .and_then(AttrValue::as_str)
            .ok_or(TemplateError::MissingAttribute {
                directive: "case",
                attribute: "value",
            })?;
        Ok(code_region(&format!(
            "case '{}': echo \"{}\"; break;",
            escape_slashes(value),
            escape_slashes(content)
        )))
    }
}

struct DefaultTag;

impl BodyDirective for DefaultTag {
    fn render(&self, _env: &mut CompileEnv<'_>, _attrs: &AttrMap, content: &str) -> Result<String> {
        Ok(code_region(&format!(
            "default: echo \"{}\";",
            escape_slashes(content)
        )))
    }
}

// ---------------------------------------------------------------------------
// {nocache} ... {/nocache}
//
// With page caching active at render time, the raw content is handed to the
// late-binding nocache hook instead of being embedded statically; otherwise
// the content is embedded directly. The default hook is an identity
// passthrough, so without a caller override the region is still captured
// into the rendered cache at write time.
// ---------------------------------------------------------------------------

struct NocacheTag;

impl BodyDirective for NocacheTag {
    fn render(&self, _env: &mut CompileEnv<'_>, _attrs: &AttrMap, content: &str) -> Result<String> {
        let mut out = code_region(&format!(
            "if $__cache__ {{ echo nocache(\"{}\"); }} else {{",
            escape_slashes(content)
        ));
        out.push_str(content);
        out.push_str(&code_region("}"));
        Ok(out)
    }
}

/// Build the core body-directive list. Literal first, include next, then the
/// switch branches and nocache.
pub fn core_body_registry() -> BodyRegistry {
    vec![
        ("literal", Box::new(LiteralTag)),
        ("include", Box::new(IncludeTag)),
        ("case", Box::new(CaseTag)),
        ("default", Box::new(DefaultTag)),
        ("nocache", Box::new(NocacheTag)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EngineConfig, FlatFileConfig};
    use crate::parser::body::BodyTagEngine;

    fn compile_with(config: &EngineConfig, src: &str) -> String {
        let mut env = CompileEnv {
            config,
            loader: &FlatFileConfig,
            session: None,
        };
        BodyTagEngine::new(config, core_body_registry())
            .parse(src, &mut env)
            .unwrap()
    }

    fn compile(src: &str) -> String {
        compile_with(&EngineConfig::default(), src)
    }

    #[test]
    fn test_literal_sentinels_round_trip() {
        let out = compile("{literal}{$raw} & <b>{/literal}");
        assert!(!out.contains("{$raw}"));
        assert!(out.starts_with("<pre>"));
        let restored = restore_literals(&out);
        assert_eq!(restored, "<pre>{$raw} &amp; &lt;b&gt;</pre>");
    }

    #[test]
    fn test_case_and_default() {
        let out = compile(r#"{case value="a"}A side{/case}"#);
        assert_eq!(out, "<?rs case 'a': echo \"A side\"; break; ?>");

        let out = compile("{default}fallback{/default}");
        assert_eq!(out, "<?rs default: echo \"fallback\"; ?>");

        let out = compile(r#"{case value="q"}say "hi"{/case}"#);
        assert!(out.contains(r#"echo "say \"hi\"";"#));
    }

    #[test]
    fn test_nocache_wraps_raw_content() {
        let out = compile("{nocache}live {$x}{/nocache}");
        assert_eq!(
            out,
            "<?rs if $__cache__ { echo nocache(\"live {$x}\"); } else { ?>live {$x}<?rs } ?>"
        );
    }

    #[test]
    fn test_include_substitutes_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("part.tpl"), "partial body").unwrap();
        let config = EngineConfig {
            template_dir: dir.path().to_path_buf(),
            ..EngineConfig::default()
        };
        let out = compile_with(&config, r#"a {include file="part.tpl"/} b"#);
        assert_eq!(out, "a partial body b");
    }

    #[test]
    fn test_include_missing_is_empty() {
        let out = compile(r#"x{include file="no_such.tpl"/}y"#);
        assert_eq!(out, "xy");
    }
}
