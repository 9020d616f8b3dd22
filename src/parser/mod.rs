//! The compile pipeline: deterministic scan-and-replace passes that turn
//! template source into a compiled artifact.
//!
//! Pass order is fixed: inheritance resolution (with block restoration) →
//! body-tag pass → paired-tag pass → variable interpolation → comment
//! stripping → shorthand-call expansion → code-boundary collapsing →
//! blank-line removal → literal restoration (last, so its sentinels survive
//! every earlier pass).

pub mod attrs;
pub mod body;
pub mod body_tags;
pub mod core_tags;
pub mod inherit;
pub mod interp;
pub mod paired;

use lazy_static::lazy_static;
use regex::Regex;

use crate::config::{ConfigLoader, EngineConfig};
use crate::error::Result;
use crate::session::SessionContext;

/// Opening marker of a generated code region
pub const CODE_OPEN: &str = "<?rs";
/// Closing marker of a generated code region
pub const CODE_CLOSE: &str = "?>";

/// Wrap one generated statement (or block fragment) in a code region
pub(crate) fn code_region(stmt: &str) -> String {
    format!("{CODE_OPEN} {stmt} {CODE_CLOSE}")
}

/// Backslash-escape `\`, `'` and `"` so text can sit inside a generated
/// string literal
pub(crate) fn escape_slashes(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | '\'' | '"') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Escape HTML special characters
pub(crate) fn html_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

/// Collaborators available to directive handlers during one compile
pub struct CompileEnv<'a> {
    pub config: &'a EngineConfig,
    pub loader: &'a dyn ConfigLoader,
    pub session: Option<&'a mut dyn SessionContext>,
}

lazy_static! {
    // {// single-line } and {/* multi-line */} comments
    static ref LINE_COMMENT_RE: Regex = Regex::new(r"\{\s*//.*?\}").unwrap();
    static ref BLOCK_COMMENT_RE: Regex = Regex::new(r"(?s)\{\s*/\*.*?\*/\s*\}").unwrap();
    // {:name(arg1, arg2)} shorthand call-and-echo
    static ref SHORTHAND_RE: Regex =
        Regex::new(r"\{:\s*([a-zA-Z_]\w*)\s*\((.*?)\)\s*\}").unwrap();
    // Adjacent generated code regions collapse into one
    static ref BOUNDARY_RE: Regex = Regex::new(r"\?>\s*<\?rs").unwrap();
    // Whitespace-only lines
    static ref BLANK_LINE_RE: Regex = Regex::new(r"(?m)^\s*\r?\n").unwrap();
}

fn strip_comments(text: &str) -> String {
    let text = LINE_COMMENT_RE.replace_all(text, "");
    BLOCK_COMMENT_RE.replace_all(&text, "").into_owned()
}

fn expand_shorthand_calls(text: &str) -> String {
    SHORTHAND_RE
        .replace_all(text, &format!("{CODE_OPEN} echo ${{1}}(${{2}}); {CODE_CLOSE}"))
        .into_owned()
}

fn collapse_code_boundaries(text: &str) -> String {
    BOUNDARY_RE.replace_all(text, "").into_owned()
}

fn strip_blank_lines(text: &str) -> String {
    BLANK_LINE_RE.replace_all(text, "").into_owned()
}

/// One compile invocation. Owns nothing long-lived: every engine and registry
/// is constructed here, per invocation, never cached process-wide.
pub struct Compiler<'a> {
    env: CompileEnv<'a>,
}

impl<'a> Compiler<'a> {
    pub fn new(env: CompileEnv<'a>) -> Self {
        Self { env }
    }

    /// Run the full pass pipeline over raw template source
    pub fn compile(&mut self, source: &str) -> Result<String> {
        let config = self.env.config;

        let mut resolver = inherit::InheritanceResolver::new(config);
        let text = resolver.resolve(source, &mut self.env)?;
        let text = resolver.restore(&text);

        let body_engine = body::BodyTagEngine::new(config, body_tags::core_body_registry());
        let text = body_engine.parse(&text, &mut self.env)?;

        let paired_engine =
            paired::PairedTagEngine::new(config, core_tags::core_paired_registry());
        let text = paired_engine.parse(&text, &mut self.env)?;

        let text = interp::interpolate(&text);
        let text = strip_comments(&text);
        let text = expand_shorthand_calls(&text);
        let text = collapse_code_boundaries(&text);
        let text = strip_blank_lines(&text);
        Ok(body_tags::restore_literals(&text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FlatFileConfig;

    fn compile(src: &str) -> String {
        let config = EngineConfig::default();
        let mut compiler = Compiler::new(CompileEnv {
            config: &config,
            loader: &FlatFileConfig,
            session: None,
        });
        compiler.compile(src).unwrap()
    }

    #[test]
    fn test_round_trip_plain_text() {
        // No directives, no interpolation: output is the input modulo
        // blank-line removal.
        let src = "Hello world.\nSecond line <b>markup</b>.";
        assert_eq!(compile(src), src);
    }

    #[test]
    fn test_blank_lines_removed() {
        assert_eq!(compile("a\n\n   \nb\n"), "a\nb\n");
    }

    #[test]
    fn test_idempotent_on_compiled_output() {
        let src = r#"{if test="$age ge 18"}adult {$name}{/if}
{loop name="users" item="u"}{$u.name}{/loop}"#;
        let once = compile(src);
        let twice = compile(&once);
        assert_eq!(once, twice, "no directive syntax may survive a compile");
    }

    #[test]
    fn test_comments_stripped() {
        assert_eq!(compile("a{// gone }b"), "ab");
        assert_eq!(compile("a{/* multi\nline */}b"), "ab");
    }

    #[test]
    fn test_shorthand_call_expansion() {
        assert_eq!(
            compile("{:upper('hi')}"),
            "<?rs echo upper('hi'); ?>"
        );
    }

    #[test]
    fn test_adjacent_regions_collapse() {
        let out = compile(r#"{assign name="a" value="1"/}{assign name="b" value="2"/}"#);
        assert_eq!(out, "<?rs $a = 1;  $b = 2; ?>");
    }

    #[test]
    fn test_literal_restored_last() {
        let out = compile("{literal}{$x|upper}{/literal}");
        assert_eq!(out, "<pre>{$x|upper}</pre>");
    }

    #[test]
    fn test_full_pipeline_mix() {
        let out = compile(
            "{assign name=\"n\" value=\"3\"/}{if test=\"$n eq 3\"}{$n|upper}{/if}",
        );
        assert_eq!(
            out,
            "<?rs $n = 3;  if ($n == 3) {  echo upper($n);  } ?>"
        );
    }
}
