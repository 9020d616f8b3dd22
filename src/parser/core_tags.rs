//! Core paired-directive semantics: loops, branches, membership tests,
//! assignment, raw-code passthrough, config access and token emission.
//!
//! Every handler is a text rewrite: it turns one directive occurrence into a
//! code region of the compiled-artifact language. Expression text inside
//! attributes is never parsed into an AST here; it is rewritten with the
//! operator-substitution and dot-path rules and handed to the executor as-is.

use lazy_static::lazy_static;
use regex::Regex;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

use super::attrs::{AttrMap, AttrValue};
use super::paired::{DirectiveCx, PairedDirective, PairedRegistry};
use super::{code_region, escape_slashes, CODE_CLOSE, CODE_OPEN};
use crate::error::{Result, TemplateError};
use crate::session::TOKEN_KEY;

lazy_static! {
    // Whole-word, case-insensitive operator substitution for test attributes.
    static ref OPERATORS: Vec<(Regex, &'static str)> = vec![
        (Regex::new(r"(?i)\beq\b").unwrap(), "=="),
        (Regex::new(r"(?i)\blt\b").unwrap(), "<"),
        (Regex::new(r"(?i)\bgt\b").unwrap(), ">"),
        (Regex::new(r"(?i)\ble\b").unwrap(), "<="),
        (Regex::new(r"(?i)\bge\b").unwrap(), ">="),
        (Regex::new(r"(?i)\band\b").unwrap(), "&&"),
        (Regex::new(r"(?i)\bor\b").unwrap(), "||"),
        (Regex::new(r"(?i)\bneq\b").unwrap(), "!="),
        (Regex::new(r"(?i)\bnot\b").unwrap(), "!"),
        (Regex::new(r"(?i)\bheq\b").unwrap(), "==="),
        (Regex::new(r"(?i)\bnheq\b").unwrap(), "!=="),
    ];

    // One dot-path step: `$name.key` (or an already-bracketed head followed
    // by `.key`) becomes bracket indexing. Applied to a fixpoint so chains of
    // any depth rewrite fully.
    static ref DOT_PATH: Regex =
        Regex::new(r"(\$\w+(?:\['\w+'\])*)\s*\.\s*(\w+)").unwrap();
}

/// Word-operator substitution: `eq`→`==`, `lt`→`<`, … Case-insensitive and
/// whole-word only; `eqeq` is untouched.
pub(crate) fn replace_operators(text: &str) -> String {
    let mut text = text.to_string();
    for (pattern, replacement) in OPERATORS.iter() {
        text = pattern.replace_all(&text, *replacement).into_owned();
    }
    text
}

/// `$a.b.c` → `$a['b']['c']`, for any depth; identifiers without `.` are
/// untouched.
pub(crate) fn rewrite_dot_path(text: &str) -> String {
    let mut text = text.to_string();
    loop {
        let next = DOT_PATH.replace_all(&text, "${1}['${2}']").into_owned();
        if next == text {
            return text;
        }
        text = next;
    }
}

fn parse_test_attr(test: &str) -> String {
    rewrite_dot_path(&replace_operators(test))
}

/// Fetch a required string attribute, failing fast with the directive and
/// attribute names
fn req<'a>(attrs: &'a AttrMap, directive: &'static str, key: &'static str) -> Result<&'a str> {
    attrs
        .get(key)
        .and_then(AttrValue::as_str)
        .ok_or(TemplateError::MissingAttribute {
            directive,
            attribute: key,
        })
}

fn opt<'a>(attrs: &'a AttrMap, key: &str, default: &'a str) -> &'a str {
    attrs.get(key).and_then(AttrValue::as_str).unwrap_or(default)
}

// ---------------------------------------------------------------------------
// {for name="" start="" stop="" step="1" comparison="lt"} ... {/for}
// ---------------------------------------------------------------------------

struct ForTag;

impl PairedDirective for ForTag {
    fn start(&self, _cx: &mut DirectiveCx<'_, '_>, attrs: &AttrMap) -> Result<String> {
        let name = req(attrs, "for", "name")?;
        let start = req(attrs, "for", "start")?;
        let stop = req(attrs, "for", "stop")?;
        let step = opt(attrs, "step", "1");
        let comparison = match attrs.get("comparison").and_then(AttrValue::as_str) {
            Some(op) => replace_operators(op).trim().to_string(),
            None => "<".to_string(),
        };
        Ok(code_region(&format!(
            "for ${name} = {start}; ${name} {comparison} {stop}; ${name} += {step} {{"
        )))
    }
}

// ---------------------------------------------------------------------------
// {foreach $coll as $val} / {foreach $coll as $val $key} ... {/foreach}
//
// Attribute *keys* are read positionally: 1st = collection expression, 3rd =
// value variable, optional 4th = key variable. Fragile by design; preserved
// exactly.
// ---------------------------------------------------------------------------

struct ForeachTag;

impl PairedDirective for ForeachTag {
    fn start(&self, _cx: &mut DirectiveCx<'_, '_>, attrs: &AttrMap) -> Result<String> {
        let keys: Vec<&str> = attrs.keys().map(String::as_str).collect();
        let collection = keys.first().ok_or(TemplateError::MissingAttribute {
            directive: "foreach",
            attribute: "collection",
        })?;
        let value = keys.get(2).ok_or(TemplateError::MissingAttribute {
            directive: "foreach",
            attribute: "value",
        })?;
        let collection = rewrite_dot_path(collection);
        Ok(match keys.get(3) {
            Some(key) => code_region(&format!("foreach {collection} as {key} => {value} {{")),
            None => code_region(&format!("foreach {collection} as {value} {{")),
        })
    }
}

// ---------------------------------------------------------------------------
// {loop name="" item="" key="k" index="index"} ... {/loop}
//
// The resolved index-variable name is stashed on the loop's own stack frame
// so the end handler can emit the increment. Nested loops must use distinct
// index names; collisions are the caller's responsibility.
// ---------------------------------------------------------------------------

struct LoopTag;

impl PairedDirective for LoopTag {
    fn start(&self, cx: &mut DirectiveCx<'_, '_>, attrs: &AttrMap) -> Result<String> {
        let name = req(attrs, "loop", "name")?;
        let item = req(attrs, "loop", "item")?;
        let key = opt(attrs, "key", "k");
        let index = opt(attrs, "index", "index").to_string();
        cx.set_attr("index", &index);
        Ok(code_region(&format!(
            "${index} = 1; foreach ${name} as ${key} => ${item} {{"
        )))
    }

    fn end(&self, cx: &mut DirectiveCx<'_, '_>) -> Result<String> {
        let index = cx
            .attr("index")
            .and_then(AttrValue::as_str)
            .unwrap_or("index")
            .to_string();
        Ok(code_region(&format!("${index} += 1; }}")))
    }
}

// ---------------------------------------------------------------------------
// {switch name=""} {case value=""}{/case} {default}{/default} {/switch}
// ---------------------------------------------------------------------------

struct SwitchTag;

impl PairedDirective for SwitchTag {
    fn start(&self, _cx: &mut DirectiveCx<'_, '_>, attrs: &AttrMap) -> Result<String> {
        let name = req(attrs, "switch", "name")?;
        Ok(code_region(&format!("switch ${name} {{")))
    }
}

// ---------------------------------------------------------------------------
// {if test=""} {elseif test=""/} {elif test=""/} {else/} {/if}
// ---------------------------------------------------------------------------

struct IfTag;

impl PairedDirective for IfTag {
    fn start(&self, _cx: &mut DirectiveCx<'_, '_>, attrs: &AttrMap) -> Result<String> {
        let test = parse_test_attr(req(attrs, "if", "test")?);
        Ok(code_region(&format!("if ({test}) {{")))
    }
}

/// `elseif` and its pure alias `elif`
struct ElseifTag;

impl PairedDirective for ElseifTag {
    fn start(&self, _cx: &mut DirectiveCx<'_, '_>, attrs: &AttrMap) -> Result<String> {
        let test = parse_test_attr(req(attrs, "elseif", "test")?);
        Ok(code_region(&format!("}} elseif ({test}) {{")))
    }
}

struct ElifTag;

impl PairedDirective for ElifTag {
    fn start(&self, cx: &mut DirectiveCx<'_, '_>, attrs: &AttrMap) -> Result<String> {
        ElseifTag.start(cx, attrs)
    }
}

/// Usable inside if, between and in blocks
struct ElseTag;

impl PairedDirective for ElseTag {
    fn start(&self, _cx: &mut DirectiveCx<'_, '_>, _attrs: &AttrMap) -> Result<String> {
        Ok(code_region("} else {"))
    }
}

// ---------------------------------------------------------------------------
// {in name="age" value="1,3,5"} ... {else/} ... {/in}
// ---------------------------------------------------------------------------

struct InTag;

impl PairedDirective for InTag {
    fn start(&self, _cx: &mut DirectiveCx<'_, '_>, attrs: &AttrMap) -> Result<String> {
        let name = req(attrs, "in", "name")?;
        let value = req(attrs, "in", "value")?;
        let list = value
            .split(',')
            .map(|v| format!("'{}'", escape_slashes(v.trim())))
            .collect::<Vec<_>>()
            .join(", ");
        Ok(code_region(&format!("if (in_array(${name}, [{list}])) {{")))
    }
}

// ---------------------------------------------------------------------------
// {between name="age" value="1,10"} ... {else/} ... {/between}
// Inclusive numeric range test.
// ---------------------------------------------------------------------------

struct BetweenTag;

impl PairedDirective for BetweenTag {
    fn start(&self, _cx: &mut DirectiveCx<'_, '_>, attrs: &AttrMap) -> Result<String> {
        let name = req(attrs, "between", "name")?;
        let value = req(attrs, "between", "value")?;
        let mut bounds = value.split(',').map(str::trim);
        let (low, high) = match (bounds.next(), bounds.next()) {
            (Some(low), Some(high)) if !low.is_empty() && !high.is_empty() => (low, high),
            _ => {
                return Err(TemplateError::BadAttribute {
                    directive: "between",
                    attribute: "value",
                    message: format!("expected two comma-separated bounds, got `{value}`"),
                })
            }
        };
        Ok(code_region(&format!(
            "if (${name} >= {low} && ${name} <= {high}) {{"
        )))
    }
}

// ---------------------------------------------------------------------------
// {assign name="" value=""/}
// Numeric and boolean literals pass through verbatim; strings are escaped.
// ---------------------------------------------------------------------------

struct AssignTag;

impl PairedDirective for AssignTag {
    fn start(&self, _cx: &mut DirectiveCx<'_, '_>, attrs: &AttrMap) -> Result<String> {
        let name = req(attrs, "assign", "name")?;
        let value = req(attrs, "assign", "value")?;
        if value.parse::<f64>().is_ok() || value == "true" || value == "false" {
            Ok(code_region(&format!("${name} = {value};")))
        } else {
            Ok(code_region(&format!(
                "${name} = '{}';",
                escape_slashes(value)
            )))
        }
    }
}

// ---------------------------------------------------------------------------
// {php} raw code {/php}
// Content between is emitted as executable code, unmodified and unescaped.
// Callers own its validity.
// ---------------------------------------------------------------------------

struct PhpTag;

impl PairedDirective for PhpTag {
    fn start(&self, _cx: &mut DirectiveCx<'_, '_>, _attrs: &AttrMap) -> Result<String> {
        Ok(format!("{CODE_OPEN} "))
    }

    fn end(&self, _cx: &mut DirectiveCx<'_, '_>) -> Result<String> {
        Ok(format!(" {CODE_CLOSE}"))
    }
}

// ---------------------------------------------------------------------------
// {cfgload path="" file=""/} and {config name=""/} / {config key/}
// ---------------------------------------------------------------------------

struct CfgloadTag;

impl PairedDirective for CfgloadTag {
    fn start(&self, cx: &mut DirectiveCx<'_, '_>, attrs: &AttrMap) -> Result<String> {
        let file = req(attrs, "cfgload", "file")?;
        let path = match attrs.get("path").and_then(AttrValue::as_str) {
            Some(dir) => std::path::PathBuf::from(dir.trim_end_matches('/')).join(file),
            None => cx.env.config.config_dir.join(file),
        };
        if cx.env.loader.exists(&path) {
            Ok(code_region(&format!(
                "cfgload '{}';",
                escape_slashes(&path.to_string_lossy())
            )))
        } else {
            tracing::warn!(path = %path.display(), "cfgload target missing, skipping");
            Ok(String::new())
        }
    }
}

struct ConfigTag;

impl PairedDirective for ConfigTag {
    fn start(&self, _cx: &mut DirectiveCx<'_, '_>, attrs: &AttrMap) -> Result<String> {
        let key = attrs
            .get("name")
            .and_then(AttrValue::as_str)
            .or_else(|| {
                // First bare attribute key: {config title/}
                attrs
                    .iter()
                    .find(|(_, v)| **v == AttrValue::Flag)
                    .map(|(k, _)| k.as_str())
            })
            .ok_or(TemplateError::MissingAttribute {
                directive: "config",
                attribute: "name",
            })?;
        Ok(code_region(&format!("echo $__cfg['{key}'];")))
    }
}

// ---------------------------------------------------------------------------
// {token/}
// With a session context present, emits a hidden marker field and records the
// marker for later verification (done by an external helper). No-op without a
// session.
// ---------------------------------------------------------------------------

static TOKEN_COUNTER: AtomicU64 = AtomicU64::new(0);

fn generate_token() -> String {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    std::time::SystemTime::now().hash(&mut hasher);
    TOKEN_COUNTER.fetch_add(1, Ordering::Relaxed).hash(&mut hasher);
    let a = hasher.finish();
    std::process::id().hash(&mut hasher);
    format!("{:016x}{:016x}", a, hasher.finish())
}

struct TokenTag;

impl PairedDirective for TokenTag {
    fn start(&self, cx: &mut DirectiveCx<'_, '_>, _attrs: &AttrMap) -> Result<String> {
        match cx.env.session.as_deref_mut() {
            Some(session) => {
                let token = generate_token();
                session.set(TOKEN_KEY, token.clone());
                Ok(format!(
                    r#"<input type="hidden" name="{TOKEN_KEY}" value="{token}"/>"#
                ))
            }
            None => Ok(String::new()),
        }
    }
}

/// Build the core paired-directive registry, resolved once per compile
pub fn core_paired_registry() -> PairedRegistry {
    let mut tags: PairedRegistry = PairedRegistry::new();
    tags.insert("loop", Box::new(LoopTag));
    tags.insert("switch", Box::new(SwitchTag));
    tags.insert("if", Box::new(IfTag));
    tags.insert("elseif", Box::new(ElseifTag));
    tags.insert("elif", Box::new(ElifTag));
    tags.insert("in", Box::new(InTag));
    tags.insert("between", Box::new(BetweenTag));
    tags.insert("assign", Box::new(AssignTag));
    tags.insert("php", Box::new(PhpTag));
    tags.insert("else", Box::new(ElseTag));
    tags.insert("token", Box::new(TokenTag));
    tags.insert("cfgload", Box::new(CfgloadTag));
    tags.insert("config", Box::new(ConfigTag));
    tags.insert("foreach", Box::new(ForeachTag));
    tags.insert("for", Box::new(ForTag));
    tags
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EngineConfig, FlatFileConfig};
    use crate::parser::paired::PairedTagEngine;
    use crate::parser::CompileEnv;
    use std::collections::HashMap;

    fn compile(src: &str) -> String {
        let config = EngineConfig::default();
        let mut env = CompileEnv {
            config: &config,
            loader: &FlatFileConfig,
            session: None,
        };
        PairedTagEngine::new(&config, core_paired_registry())
            .parse(src, &mut env)
            .unwrap()
    }

    fn compile_err(src: &str) -> TemplateError {
        let config = EngineConfig::default();
        let mut env = CompileEnv {
            config: &config,
            loader: &FlatFileConfig,
            session: None,
        };
        PairedTagEngine::new(&config, core_paired_registry())
            .parse(src, &mut env)
            .unwrap_err()
    }

    #[test]
    fn test_operator_substitution_whole_word() {
        assert_eq!(replace_operators("age eq 5"), "age == 5");
        assert_eq!(replace_operators("age EQ 5"), "age == 5");
        assert_eq!(replace_operators("eqeq"), "eqeq");
        assert_eq!(
            replace_operators("a lt 3 and b ge 2 or not c"),
            "a < 3 && b >= 2 || ! c"
        );
        assert_eq!(replace_operators("x nheq y"), "x !== y");
    }

    #[test]
    fn test_dot_path_rewrite_all_depths() {
        assert_eq!(rewrite_dot_path("$a"), "$a");
        assert_eq!(rewrite_dot_path("$a.b"), "$a['b']");
        assert_eq!(rewrite_dot_path("$a.b.c"), "$a['b']['c']");
        assert_eq!(rewrite_dot_path("$a.b.c.d"), "$a['b']['c']['d']");
        assert_eq!(rewrite_dot_path("plain.text"), "plain.text");
    }

    #[test]
    fn test_for_emission() {
        let out = compile(r#"{for name="i" start="0" stop="10"}x{/for}"#);
        assert_eq!(out, "<?rs for $i = 0; $i < 10; $i += 1 { ?>x<?rs } ?>");
        let out = compile(r#"{for name="i" start="9" stop="0" step="3" comparison="ge"}{/for}"#);
        assert!(out.contains("for $i = 9; $i >= 0; $i += 3 {"));
    }

    #[test]
    fn test_foreach_positional_keys() {
        let out = compile("{foreach $users as $u}x{/foreach}");
        assert_eq!(out, "<?rs foreach $users as $u { ?>x<?rs } ?>");
        let out = compile("{foreach $users as $v $k}{/foreach}");
        assert!(out.contains("foreach $users as $k => $v {"));
        let out = compile("{foreach $site.users as $u}{/foreach}");
        assert!(out.contains("foreach $site['users'] as $u {"));
    }

    #[test]
    fn test_loop_stashes_index_for_end() {
        let out = compile(r#"{loop name="users" item="u"}x{/loop}"#);
        assert_eq!(
            out,
            "<?rs $index = 1; foreach $users as $k => $u { ?>x<?rs $index += 1; } ?>"
        );
        let out = compile(r#"{loop name="users" item="u" key="id" index="n"}{/loop}"#);
        assert!(out.contains("$n = 1; foreach $users as $id => $u {"));
        assert!(out.contains("$n += 1; }"));
    }

    #[test]
    fn test_if_family() {
        let out = compile(r#"{if test="$age ge 18 and $ok"}a{elseif test="$age eq 5"/}b{else/}c{/if}"#);
        assert!(out.contains("if ($age >= 18 && $ok) {"));
        assert!(out.contains("} elseif ($age == 5) {"));
        assert!(out.contains("} else {"));
        assert!(out.ends_with("<?rs } ?>"));

        let elif = compile(r#"{elif test="$a.b eq 1"/}"#);
        assert!(elif.contains("} elseif ($a['b'] == 1) {"));
    }

    #[test]
    fn test_in_and_between() {
        let out = compile(r#"{in name="age" value="1, 3,5"}x{/in}"#);
        assert!(out.contains("if (in_array($age, ['1', '3', '5'])) {"));

        let out = compile(r#"{between name="age" value="1,10"}x{/between}"#);
        assert!(out.contains("if ($age >= 1 && $age <= 10) {"));

        match compile_err(r#"{between name="age" value="7"}x{/between}"#) {
            TemplateError::BadAttribute { directive, .. } => assert_eq!(directive, "between"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_assign_literal_kinds() {
        assert!(compile(r#"{assign name="n" value="42"/}"#).contains("$n = 42;"));
        assert!(compile(r#"{assign name="f" value="4.5"/}"#).contains("$f = 4.5;"));
        assert!(compile(r#"{assign name="b" value="true"/}"#).contains("$b = true;"));
        assert!(compile(r#"{assign name="s" value="it's"/}"#).contains(r"$s = 'it\'s';"));
    }

    #[test]
    fn test_php_passthrough() {
        let out = compile("{php}echo $x;{/php}");
        assert_eq!(out, "<?rs echo $x; ?>");
    }

    #[test]
    fn test_config_name_or_first_bare_key() {
        assert!(compile(r#"{config name="title"/}"#).contains("echo $__cfg['title'];"));
        assert!(compile("{config title/}").contains("echo $__cfg['title'];"));
        match compile_err("{config/}") {
            TemplateError::MissingAttribute { directive, .. } => assert_eq!(directive, "config"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_required_attribute_is_descriptive() {
        match compile_err(r#"{loop item="u"}{/loop}"#) {
            TemplateError::MissingAttribute {
                directive,
                attribute,
            } => {
                assert_eq!(directive, "loop");
                assert_eq!(attribute, "name");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_token_requires_session() {
        assert_eq!(compile("{token/}"), "");

        let config = EngineConfig::default();
        let mut session: HashMap<String, String> = HashMap::new();
        let mut env = CompileEnv {
            config: &config,
            loader: &FlatFileConfig,
            session: Some(&mut session),
        };
        let out = PairedTagEngine::new(&config, core_paired_registry())
            .parse("{token/}", &mut env)
            .unwrap();
        assert!(out.starts_with(r#"<input type="hidden" name="csrf_token""#));
        let stored = session.get(TOKEN_KEY).unwrap();
        assert!(out.contains(stored));
        assert_eq!(stored.len(), 32);
    }

    #[test]
    fn test_token_values_are_unique() {
        assert_ne!(generate_token(), generate_token());
    }

    #[test]
    fn test_switch_open_close() {
        let out = compile(r#"{switch name="kind"}inner{/switch}"#);
        assert_eq!(out, "<?rs switch $kind { ?>inner<?rs } ?>");
    }
}
