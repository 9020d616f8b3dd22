//! Error types for compilation, caching and rendering

use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by the template compiler and cache manager
#[derive(Error, Debug)]
pub enum TemplateError {
    /// The requested template source does not exist
    #[error("template not found: {0}")]
    TemplateNotFound(PathBuf),

    /// A directive referenced a required attribute it was not given
    #[error("directive `{directive}` is missing required attribute `{attribute}`")]
    MissingAttribute {
        directive: &'static str,
        attribute: &'static str,
    },

    /// A directive attribute was present but unusable
    #[error("directive `{directive}` attribute `{attribute}` is malformed: {message}")]
    BadAttribute {
        directive: &'static str,
        attribute: &'static str,
        message: String,
    },

    /// An artifact directory exists but cannot be written to.
    /// Fatal: compilation/caching must abort rather than continue with stale output.
    #[error("artifact directory is not writable: {0}")]
    StorageUnwritable(PathBuf),

    /// Executing a compiled artifact failed
    #[error("execute error: {0}")]
    Exec(#[from] crate::exec::ExecError),

    /// Loading a config resource failed
    #[error("config resource error: {path}: {message}")]
    ConfigResource { path: PathBuf, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TemplateError>;
