//! Engine configuration and the config-resource loader seam

use indexmap::IndexMap;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, TemplateError};

/// Configuration consumed by the pipeline orchestrator and cache manager.
///
/// Delimiters, directories, the cache lifetime and the debug toggle are plain
/// configuration inputs; there is no discovery logic here.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory containing template sources
    pub template_dir: PathBuf,
    /// Directory for compiled artifacts
    pub compile_dir: PathBuf,
    /// Default directory for `cfgload` resources
    pub config_dir: PathBuf,
    /// Directory for rendered-output artifacts
    pub cache_dir: PathBuf,
    /// Rendered-output time-to-live in seconds
    pub cache_lifetime: u64,
    /// Whether page-level (rendered-output) caching is active
    pub page_cache: bool,
    /// Debug toggle: forces recompilation and rendered-cache bypass
    pub debug: bool,
    /// Left directive delimiter
    pub left_delim: String,
    /// Right directive delimiter
    pub right_delim: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            template_dir: PathBuf::from("./templates"),
            compile_dir: PathBuf::from("./templates_c"),
            config_dir: PathBuf::from("./config"),
            cache_dir: PathBuf::from("./cache"),
            cache_lifetime: 60,
            page_cache: false,
            debug: false,
            left_delim: "{".to_string(),
            right_delim: "}".to_string(),
        }
    }
}

/// Access to flat key-value config resources for `cfgload`/`config`.
///
/// The format is the collaborator's concern; the core only consumes the
/// already-parsed map.
pub trait ConfigLoader {
    /// Whether the resource exists (checked at compile time by `cfgload`)
    fn exists(&self, path: &Path) -> bool;

    /// Read the resource into a flat key→value map
    fn load(&self, path: &Path) -> Result<IndexMap<String, String>>;
}

/// Default loader: `key=value` lines, `#` and `;` comment lines, blank lines
/// ignored.
#[derive(Debug, Default, Clone, Copy)]
pub struct FlatFileConfig;

impl ConfigLoader for FlatFileConfig {
    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn load(&self, path: &Path) -> Result<IndexMap<String, String>> {
        let text = fs::read_to_string(path).map_err(|e| TemplateError::ConfigResource {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let mut map = IndexMap::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                map.insert(
                    key.trim().to_string(),
                    value.trim().trim_matches('"').to_string(),
                );
            }
        }
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.left_delim, "{");
        assert_eq!(config.right_delim, "}");
        assert_eq!(config.cache_lifetime, 60);
        assert!(!config.page_cache);
    }

    #[test]
    fn test_flat_file_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("site.cfg");
        let mut f = fs::File::create(&path).unwrap();
        writeln!(f, "# comment").unwrap();
        writeln!(f, "title = My Site").unwrap();
        writeln!(f, "author=\"kay\"").unwrap();
        writeln!(f, "; another comment").unwrap();
        drop(f);

        let loader = FlatFileConfig;
        assert!(loader.exists(&path));
        let map = loader.load(&path).unwrap();
        assert_eq!(map.get("title").map(String::as_str), Some("My Site"));
        assert_eq!(map.get("author").map(String::as_str), Some("kay"));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_missing_config_resource() {
        let loader = FlatFileConfig;
        assert!(!loader.exists(Path::new("/nonexistent/site.cfg")));
        assert!(loader.load(Path::new("/nonexistent/site.cfg")).is_err());
    }
}
