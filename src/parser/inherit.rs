//! Template inheritance: `{extends parent=""/}` and `{block name=""}…{/block}`.
//!
//! A child names one parent; the extends tag is replaced by the parent's raw
//! text, and block tags collapse to placeholder markers whose final content
//! is whichever occurrence wrote the table last — so a child's block silently
//! wins over the parent's same-named block. Placeholders are substituted back
//! right after the scan, which keeps block bodies visible to every later
//! compile pass.

use indexmap::IndexMap;
use regex::Regex;
use std::fs;
use std::path::PathBuf;

use super::attrs::{parse_attrs, AttrValue};
use super::body::body_pattern;
use super::{code_region, escape_slashes, CompileEnv};
use crate::config::EngineConfig;
use crate::error::{Result, TemplateError};

/// Inheritance state for one compile invocation
pub struct InheritanceResolver {
    extends_pattern: Regex,
    block_pattern: Regex,
    /// Set once the first existing parent resource is seen
    parent: Option<PathBuf>,
    /// Block name → last-written content
    blocks: IndexMap<String, String>,
}

fn placeholder(name: &str) -> String {
    format!("<!--BLOCK:{name}-->")
}

impl InheritanceResolver {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            extends_pattern: body_pattern(config, "extends"),
            block_pattern: body_pattern(config, "block"),
            parent: None,
            blocks: IndexMap::new(),
        }
    }

    /// Run the extends pass, then the block pass over the entire current
    /// text (including any just-substituted parent text)
    pub fn resolve(&mut self, text: &str, env: &mut CompileEnv<'_>) -> Result<String> {
        let text = self.resolve_extends(text, env)?;
        self.resolve_blocks(&text)
    }

    fn resolve_extends(&mut self, text: &str, env: &mut CompileEnv<'_>) -> Result<String> {
        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        // Clone keeps the borrow checker out of the scan loop; the pattern is
        // immutable for the resolver's lifetime.
        let pattern = self.extends_pattern.clone();
        for caps in pattern.captures_iter(text) {
            let whole = caps.get(0).unwrap();
            out.push_str(&text[last..whole.start()]);
            last = whole.end();

            let attrs = parse_attrs(&caps[1]);
            let parent = attrs
                .get("parent")
                .and_then(AttrValue::as_str)
                .ok_or(TemplateError::MissingAttribute {
                    directive: "extends",
                    attribute: "parent",
                })?;
            let path = env.config.template_dir.join(parent);
            match fs::read_to_string(&path) {
                Ok(parent_text) => {
                    self.parent = Some(path);
                    out.push_str(&parent_text);
                }
                Err(_) => {
                    tracing::warn!(path = %path.display(), "extends target missing, skipping");
                }
            }
        }
        out.push_str(&text[last..]);
        Ok(out)
    }

    fn resolve_blocks(&mut self, text: &str) -> Result<String> {
        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        let pattern = self.block_pattern.clone();
        for caps in pattern.captures_iter(text) {
            let whole = caps.get(0).unwrap();
            out.push_str(&text[last..whole.start()]);
            last = whole.end();

            let attrs = parse_attrs(&caps[1]);
            let name = attrs
                .get("name")
                .and_then(AttrValue::as_str)
                .ok_or(TemplateError::MissingAttribute {
                    directive: "block",
                    attribute: "name",
                })?;
            let content = caps.get(2).map(|m| m.as_str()).unwrap_or("");

            if self.parent.is_none() {
                // No parent: the block inlines directly as an escaped echo.
                out.push_str(&code_region(&format!(
                    "echo \"{}\";",
                    escape_slashes(content)
                )));
            } else if self.blocks.contains_key(name) {
                // Later occurrence: overwrite, no second placeholder.
                self.blocks.insert(name.to_string(), content.to_string());
            } else {
                self.blocks.insert(name.to_string(), content.to_string());
                out.push_str(&placeholder(name));
            }
        }
        out.push_str(&text[last..]);
        Ok(out)
    }

    /// Substitute each placeholder with the final recorded block content
    pub fn restore(&self, text: &str) -> String {
        let mut text = text.to_string();
        for (name, content) in &self.blocks {
            text = text.replace(&placeholder(name), content);
        }
        text
    }
}
