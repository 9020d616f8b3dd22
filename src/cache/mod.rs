//! Two-tier artifact cache.
//!
//! Compiled artifacts are keyed by a hash of the template's logical identity
//! and reused while they are newer than the source. Rendered artifacts carry
//! an optional caller-supplied discriminator and a time-to-live. The debug
//! flag bypasses both tiers.
//!
//! Writes are idempotent: concurrent renders of the same template produce the
//! same bytes, so last-writer-wins needs no locking.

use std::collections::hash_map::DefaultHasher;
use std::fs;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::config::EngineConfig;
use crate::error::{Result, TemplateError};

/// Calculate the identity hash for a template name
fn identity_hash(name: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    name.hash(&mut hasher);
    hasher.finish()
}

/// Template names may carry directory separators; artifact files are flat
fn flatten(name: &str) -> String {
    name.replace(['/', '\\'], "_dir_")
}

/// Resolves artifact paths and freshness against one engine configuration
pub struct CacheManager<'a> {
    config: &'a EngineConfig,
}

impl<'a> CacheManager<'a> {
    pub fn new(config: &'a EngineConfig) -> Self {
        Self { config }
    }

    /// Compiled-artifact path for a template name
    pub fn compiled_path(&self, template: &str) -> PathBuf {
        self.config
            .compile_dir
            .join(format!("{:016x}_{}", identity_hash(template), flatten(template)))
    }

    /// Compiled-artifact path for an in-memory template string. Content-hash
    /// keyed, so the artifact can never go stale.
    pub fn compiled_str_path(&self, source: &str) -> PathBuf {
        self.config
            .compile_dir
            .join(format!("str_{:016x}", identity_hash(source)))
    }

    /// Rendered-artifact path for a template name plus optional discriminator
    pub fn rendered_path(&self, template: &str, cache_id: Option<&str>) -> PathBuf {
        let base = format!("{:016x}_{}", identity_hash(template), flatten(template));
        let file = match cache_id {
            Some(id) => format!("{}_{base}", flatten(id)),
            None => base,
        };
        self.config.cache_dir.join(file)
    }

    fn mtime(path: &Path) -> Option<SystemTime> {
        fs::metadata(path).and_then(|m| m.modified()).ok()
    }

    /// Whether a compiled artifact may be reused for the given source.
    /// Stale artifacts are never an error; they trigger recompilation.
    pub fn compiled_fresh(&self, source: &Path, artifact: &Path) -> bool {
        if self.config.debug {
            return false;
        }
        match (Self::mtime(source), Self::mtime(artifact)) {
            (Some(src), Some(art)) => src < art,
            _ => false,
        }
    }

    /// Whether a rendered artifact is still within its lifetime
    pub fn rendered_fresh(&self, artifact: &Path) -> bool {
        if self.config.debug {
            return false;
        }
        let Some(written) = Self::mtime(artifact) else {
            return false;
        };
        match SystemTime::now().duration_since(written) {
            Ok(age) => age.as_secs() < self.config.cache_lifetime,
            // Clock skew: an artifact from the future is treated as fresh
            Err(_) => true,
        }
    }

    /// Create the artifact directory if absent and verify it is writable.
    /// An unwritable directory is fatal; caching must not silently degrade
    /// to stale output.
    pub fn ensure_writable(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir).map_err(|_| TemplateError::StorageUnwritable(dir.to_path_buf()))?;
        let meta = fs::metadata(dir)?;
        if meta.permissions().readonly() {
            return Err(TemplateError::StorageUnwritable(dir.to_path_buf()));
        }
        Ok(())
    }

    /// Drop rendered artifacts for one template: the exact artifact when a
    /// discriminator is given, otherwise every artifact carrying the
    /// template's flattened name (all discriminators at once)
    pub fn clear_rendered(&self, template: &str, cache_id: Option<&str>) -> Result<()> {
        if cache_id.is_some() {
            let path = self.rendered_path(template, cache_id);
            if path.is_file() {
                fs::remove_file(&path)?;
                tracing::debug!(path = %path.display(), "cleared rendered artifact");
            }
            return Ok(());
        }
        let dir = &self.config.cache_dir;
        if !dir.is_dir() {
            return Ok(());
        }
        let marker = flatten(template);
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            let matches = path
                .file_name()
                .map_or(false, |n| n.to_string_lossy().contains(&marker));
            if matches && path.is_file() {
                fs::remove_file(&path)?;
                tracing::debug!(path = %path.display(), "cleared rendered artifact");
            }
        }
        Ok(())
    }

    /// Drop every rendered artifact in the cache directory
    pub fn clear_all_rendered(&self) -> Result<()> {
        let dir = &self.config.cache_dir;
        if !dir.is_dir() {
            return Ok(());
        }
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_file() {
                fs::remove_file(&path)?;
            }
        }
        tracing::debug!(dir = %dir.display(), "cleared rendered cache");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config_in(dir: &Path) -> EngineConfig {
        EngineConfig {
            template_dir: dir.join("templates"),
            compile_dir: dir.join("templates_c"),
            cache_dir: dir.join("cache"),
            ..EngineConfig::default()
        }
    }

    fn touch(path: &Path, when: SystemTime) {
        fs::write(path, "x").unwrap();
        fs::File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(when)
            .unwrap();
    }

    #[test]
    fn test_paths_are_deterministic_and_distinct() {
        let config = EngineConfig::default();
        let cache = CacheManager::new(&config);
        assert_eq!(cache.compiled_path("a.tpl"), cache.compiled_path("a.tpl"));
        assert_ne!(cache.compiled_path("a.tpl"), cache.compiled_path("b.tpl"));
        assert_ne!(
            cache.compiled_path("a.tpl"),
            cache.rendered_path("a.tpl", None)
        );
        assert_ne!(
            cache.rendered_path("a.tpl", None),
            cache.rendered_path("a.tpl", Some("user7"))
        );
    }

    #[test]
    fn test_subdirectory_names_flatten() {
        let config = EngineConfig::default();
        let cache = CacheManager::new(&config);
        let path = cache.compiled_path("admin/index.tpl");
        let file = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(file.contains("_dir_"), "got {file}");
        assert_eq!(path.parent().unwrap(), config.compile_dir);
    }

    #[test]
    fn test_compiled_freshness_by_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let cache = CacheManager::new(&config);

        let source = dir.path().join("page.tpl");
        let artifact = dir.path().join("page.compiled");
        let now = SystemTime::now();

        touch(&source, now - Duration::from_secs(100));
        touch(&artifact, now - Duration::from_secs(10));
        assert!(cache.compiled_fresh(&source, &artifact));

        // Source edited after the artifact was written: stale.
        touch(&source, now);
        assert!(!cache.compiled_fresh(&source, &artifact));

        assert!(!cache.compiled_fresh(&source, &dir.path().join("missing")));
    }

    #[test]
    fn test_debug_forces_recompilation() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_in(dir.path());
        config.debug = true;
        let cache = CacheManager::new(&config);

        let source = dir.path().join("page.tpl");
        let artifact = dir.path().join("page.compiled");
        let now = SystemTime::now();
        touch(&source, now - Duration::from_secs(100));
        touch(&artifact, now);
        assert!(!cache.compiled_fresh(&source, &artifact));
        assert!(!cache.rendered_fresh(&artifact));
    }

    #[test]
    fn test_rendered_freshness_by_age() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_in(dir.path());
        config.cache_lifetime = 60;
        let cache = CacheManager::new(&config);

        let artifact = dir.path().join("rendered");
        let now = SystemTime::now();

        touch(&artifact, now - Duration::from_secs(10));
        assert!(cache.rendered_fresh(&artifact));

        touch(&artifact, now - Duration::from_secs(120));
        assert!(!cache.rendered_fresh(&artifact));

        assert!(!cache.rendered_fresh(&dir.path().join("missing")));
    }

    #[test]
    fn test_clear_rendered_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let cache = CacheManager::new(&config);
        cache.ensure_writable(&config.cache_dir).unwrap();

        let plain = cache.rendered_path("a.tpl", None);
        let discriminated = cache.rendered_path("a.tpl", Some("u1"));
        let other = cache.rendered_path("b.tpl", None);
        fs::write(&plain, "x").unwrap();
        fs::write(&discriminated, "y").unwrap();
        fs::write(&other, "z").unwrap();

        // A discriminator clears exactly one artifact.
        cache.clear_rendered("a.tpl", Some("u1")).unwrap();
        assert!(!discriminated.exists());
        assert!(plain.exists());

        // Without one, every artifact for the template goes.
        fs::write(&discriminated, "y").unwrap();
        cache.clear_rendered("a.tpl", None).unwrap();
        assert!(!plain.exists());
        assert!(!discriminated.exists());
        assert!(other.exists());

        cache.clear_all_rendered().unwrap();
        assert!(!other.exists());

        // Clearing an empty or missing cache is a no-op.
        cache.clear_all_rendered().unwrap();
        cache.clear_rendered("ghost.tpl", None).unwrap();
    }

    #[test]
    fn test_unwritable_directory_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let locked = dir.path().join("locked");
        fs::create_dir(&locked).unwrap();
        let mut perms = fs::metadata(&locked).unwrap().permissions();
        perms.set_readonly(true);
        fs::set_permissions(&locked, perms.clone()).unwrap();

        let config = config_in(dir.path());
        let cache = CacheManager::new(&config);
        let err = cache.ensure_writable(&locked).unwrap_err();
        assert!(matches!(err, TemplateError::StorageUnwritable(_)));

        perms.set_readonly(false);
        fs::set_permissions(&locked, perms).unwrap();
    }
}
