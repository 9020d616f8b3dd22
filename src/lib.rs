//! tagtpl: a tag-based template compiler with two-tier caching
//!
//! Templates are delimiter-bounded directive markup (`{if …}`, `{loop …}`,
//! `{$var|filter}`, inheritance via `{extends}`/`{block}`). Compilation is a
//! fixed pipeline of scan-and-replace passes producing a compiled artifact,
//! which an interpreter executes against a variable binding set. Compiled
//! artifacts are cached by source modification time; rendered output is
//! optionally cached with a time-to-live and selectively live `{nocache}`
//! regions.

pub mod cache;
pub mod config;
pub mod error;
pub mod exec;
pub mod parser;
pub mod session;
pub mod vars;

use std::fs;

pub use config::{ConfigLoader, EngineConfig, FlatFileConfig};
pub use error::{Result, TemplateError};
pub use session::SessionContext;
pub use vars::{Bindings, RequestInputs};

use cache::CacheManager;

fn identity_nocache(content: &str) -> String {
    content.to_string()
}

/// The template engine facade.
///
/// One instance holds the configuration, the variable binding set, an
/// optional session context (for `{token/}`), the config-resource loader and
/// the nocache hook. Rendering is synchronous; each call runs the cache
/// checks, the compile pipeline when needed, and the executor.
pub struct Template {
    config: EngineConfig,
    vars: vars::VarStore,
    session: Option<Box<dyn SessionContext>>,
    config_loader: Box<dyn ConfigLoader>,
    nocache_hook: Box<dyn Fn(&str) -> String>,
}

impl Template {
    pub fn new(config: EngineConfig, inputs: RequestInputs) -> Self {
        Self {
            config,
            vars: vars::VarStore::new(inputs),
            session: None,
            config_loader: Box::new(FlatFileConfig),
            // Identity passthrough: without a caller override, nocache
            // content is captured into the rendered cache like any other
            // content. Known gap in the design, kept observable.
            nocache_hook: Box::new(identity_nocache),
        }
    }

    /// Attach a session context; `{token/}` is a no-op without one
    pub fn with_session(mut self, session: Box<dyn SessionContext>) -> Self {
        self.session = Some(session);
        self
    }

    /// Replace the `cfgload`/`config` resource loader
    pub fn with_config_loader(mut self, loader: Box<dyn ConfigLoader>) -> Self {
        self.config_loader = loader;
        self
    }

    /// Replace the late-binding hook invoked on nocache-region content when
    /// page caching is active
    pub fn set_nocache_hook(&mut self, hook: Box<dyn Fn(&str) -> String>) {
        self.nocache_hook = hook;
    }

    /// Bind one variable (the reserved `sysvar` namespace is refused)
    pub fn assign<V: Into<serde_json::Value>>(&mut self, name: &str, value: V) {
        self.vars.assign(name, value);
    }

    /// Bind every entry of `map`
    pub fn assign_map(&mut self, map: Bindings) {
        self.vars.assign_map(map);
    }

    pub fn session(&self) -> Option<&dyn SessionContext> {
        self.session.as_deref()
    }

    /// Render a template file against the current bindings.
    ///
    /// With page caching on, a fresh rendered artifact (same template,
    /// same discriminator, within its lifetime) is returned as-is without
    /// recompiling or re-executing anything.
    pub fn render(&mut self, template: &str, cache_id: Option<&str>) -> Result<String> {
        if self.config.page_cache {
            let cache = CacheManager::new(&self.config);
            cache.ensure_writable(&self.config.cache_dir)?;
            let rendered = cache.rendered_path(template, cache_id);
            if cache.rendered_fresh(&rendered) {
                tracing::debug!(template, "rendered-cache hit");
                return Ok(fs::read_to_string(&rendered)?);
            }
        }

        let compiled = self.compile_file(template)?;
        let output = self.execute(&compiled)?;

        if self.config.page_cache {
            let cache = CacheManager::new(&self.config);
            let rendered = cache.rendered_path(template, cache_id);
            fs::write(&rendered, &output)?;
            tracing::debug!(template, "rendered artifact written");
        }
        Ok(output)
    }

    /// Render an in-memory template string. The compiled artifact is cached
    /// under a content-hash key; rendered output is never cached.
    pub fn render_str(&mut self, source: &str) -> Result<String> {
        let cache = CacheManager::new(&self.config);
        cache.ensure_writable(&self.config.compile_dir)?;
        let artifact = cache.compiled_str_path(source);

        let compiled = if !self.config.debug && artifact.is_file() {
            fs::read_to_string(&artifact)?
        } else {
            let compiled = self.compile_source(source)?;
            fs::write(&artifact, &compiled)?;
            compiled
        };
        self.execute(&compiled)
    }

    /// Drop rendered artifacts for one template; without a discriminator,
    /// every discriminated variant goes too
    pub fn clear_cache(&self, template: &str, cache_id: Option<&str>) -> Result<()> {
        CacheManager::new(&self.config).clear_rendered(template, cache_id)
    }

    /// Empty the rendered-cache directory
    pub fn clear_all_cache(&self) -> Result<()> {
        CacheManager::new(&self.config).clear_all_rendered()
    }

    /// Compile one template file, reusing the compiled artifact while it is
    /// newer than the source (stale artifacts recompile silently)
    fn compile_file(&mut self, template: &str) -> Result<String> {
        let source_path = self.config.template_dir.join(template);
        if !source_path.is_file() {
            return Err(TemplateError::TemplateNotFound(source_path));
        }

        let cache = CacheManager::new(&self.config);
        cache.ensure_writable(&self.config.compile_dir)?;
        let artifact = cache.compiled_path(template);
        if cache.compiled_fresh(&source_path, &artifact) {
            tracing::debug!(template, "compiled-cache hit");
            return Ok(fs::read_to_string(&artifact)?);
        }

        let source = fs::read_to_string(&source_path)?;
        let compiled = self.compile_source(&source)?;
        fs::write(&artifact, &compiled)?;
        tracing::info!(template, "compiled");
        Ok(compiled)
    }

    fn compile_source(&mut self, source: &str) -> Result<String> {
        let mut compiler = parser::Compiler::new(parser::CompileEnv {
            config: &self.config,
            loader: self.config_loader.as_ref(),
            session: self
                .session
                .as_deref_mut()
                .map(|s| s as &mut dyn SessionContext),
        });
        compiler.compile(source)
    }

    fn execute(&self, compiled: &str) -> Result<String> {
        let executor = exec::Executor::new(self.config_loader.as_ref())
            .with_nocache_hook(self.nocache_hook.as_ref())
            .with_cache_active(self.config.page_cache);
        Ok(executor.execute(compiled, self.vars.bindings())?)
    }
}
