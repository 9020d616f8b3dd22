//! Paired-tag engine: a single left-to-right scan over directives whose
//! start and end occurrences are parsed separately.
//!
//! The engine keeps one attribute stack per directive *name* so that nested
//! same-name tags work and a start handler can stash state for its end
//! handler. It does not validate nesting across different tag names:
//! mismatched interleaving of distinct names is a documented limitation and
//! compiles to whatever the rewrite produces.

use indexmap::IndexMap;
use regex::Regex;
use std::collections::HashMap;

use super::attrs::{parse_attrs, AttrMap, AttrValue};
use super::CompileEnv;
use crate::config::EngineConfig;
use crate::error::Result;

/// Per-directive-name attribute stacks.
///
/// Depth of the stack for name N equals the number of currently-open
/// unmatched start tags named N seen so far in the scan. Frames are only
/// reachable through push/top/pop/set-top, never raw indices.
#[derive(Debug, Default)]
pub struct AttrStacks {
    stacks: HashMap<String, Vec<AttrMap>>,
}

impl AttrStacks {
    pub fn push(&mut self, name: &str, frame: AttrMap) {
        self.stacks.entry(name.to_string()).or_default().push(frame);
    }

    pub fn pop(&mut self, name: &str) -> Option<AttrMap> {
        self.stacks.get_mut(name).and_then(Vec::pop)
    }

    /// The current top frame for `name`
    pub fn top(&self, name: &str) -> Option<&AttrMap> {
        self.stacks.get(name).and_then(|s| s.last())
    }

    /// Write/overwrite one attribute key in the current top frame
    pub fn set_top(&mut self, name: &str, key: &str, value: AttrValue) {
        if let Some(frame) = self.stacks.get_mut(name).and_then(|s| s.last_mut()) {
            frame.insert(key.to_string(), value);
        }
    }

    pub fn depth(&self, name: &str) -> usize {
        self.stacks.get(name).map_or(0, Vec::len)
    }
}

/// Everything a paired-directive handler may touch while its occurrence is
/// being rewritten
pub struct DirectiveCx<'e, 'a> {
    pub env: &'a mut CompileEnv<'e>,
    pub stacks: &'a mut AttrStacks,
    /// Name of the directive currently being parsed
    pub tag: &'a str,
}

impl DirectiveCx<'_, '_> {
    /// Read one attribute from the current tag's top frame
    pub fn attr(&self, key: &str) -> Option<&AttrValue> {
        self.stacks.top(self.tag).and_then(|frame| frame.get(key))
    }

    /// Stash an attribute on the current tag's top frame, for the matching
    /// end handler to retrieve
    pub fn set_attr(&mut self, key: &str, value: &str) {
        self.stacks
            .set_top(self.tag, key, AttrValue::Str(value.to_string()));
    }
}

/// One paired directive: `start` rewrites the start occurrence, `end` the end
/// occurrence. The default end emits a bare block close, which is what most
/// directives need.
pub trait PairedDirective {
    fn start(&self, cx: &mut DirectiveCx<'_, '_>, attrs: &AttrMap) -> Result<String>;

    fn end(&self, _cx: &mut DirectiveCx<'_, '_>) -> Result<String> {
        Ok(super::code_region("}"))
    }
}

/// Registry of paired directives, resolved once at construction
pub type PairedRegistry = IndexMap<&'static str, Box<dyn PairedDirective>>;

/// The scan engine. One alternation pattern matches every occurrence:
/// delimiter, optional leading slash (end tag), name, attribute text (single
/// line, free of the right delimiter), optional trailing slash (self-closing),
/// delimiter.
pub struct PairedTagEngine {
    pattern: Regex,
    tags: PairedRegistry,
}

impl PairedTagEngine {
    pub fn new(config: &EngineConfig, tags: PairedRegistry) -> Self {
        let l = regex::escape(&config.left_delim);
        let r = regex::escape(&config.right_delim);
        let pattern = Regex::new(&format!(
            r"{l}(/?)([A-Za-z_]\w*)([^\r\n{r}]*?)(/?)\s*{r}"
        ))
        .unwrap();
        Self { pattern, tags }
    }

    /// Run the scan over `text`, returning the rewritten text
    pub fn parse(&self, text: &str, env: &mut CompileEnv<'_>) -> Result<String> {
        let mut stacks = AttrStacks::default();
        self.parse_with(text, env, &mut stacks)
    }

    pub(crate) fn parse_with(
        &self,
        text: &str,
        env: &mut CompileEnv<'_>,
        stacks: &mut AttrStacks,
    ) -> Result<String> {
        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        for caps in self.pattern.captures_iter(text) {
            let whole = caps.get(0).unwrap();
            let name = caps.get(2).unwrap().as_str();

            out.push_str(&text[last..whole.start()]);
            last = whole.end();

            let Some(handler) = self.tags.get(name) else {
                // Unregistered names are left untouched; text that merely
                // resembles the grammar is an accepted false-positive risk.
                out.push_str(whole.as_str());
                continue;
            };

            let is_end = &caps[1] == "/";
            let self_closing = &caps[4] == "/";
            if is_end {
                let mut cx = DirectiveCx {
                    env: &mut *env,
                    stacks: &mut *stacks,
                    tag: name,
                };
                let replacement = handler.end(&mut cx)?;
                stacks.pop(name);
                out.push_str(&replacement);
            } else {
                let attrs = parse_attrs(&caps[3]);
                stacks.push(name, attrs.clone());
                let mut cx = DirectiveCx {
                    env: &mut *env,
                    stacks: &mut *stacks,
                    tag: name,
                };
                let replacement = handler.start(&mut cx, &attrs)?;
                if self_closing {
                    // Immediate start+end: no end handler runs, the frame is
                    // released right away.
                    stacks.pop(name);
                }
                out.push_str(&replacement);
            }
        }
        out.push_str(&text[last..]);
        Ok(out)
    }
}
