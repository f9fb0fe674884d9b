//! Errors from context construction, config loading, and registration.

use std::path::PathBuf;
use thiserror::Error;

/// Result alias used throughout this crate.
pub type ContextResult<T> = Result<T, ContextError>;

/// Errors surfaced by [`crate::context::Context`] and [`crate::config`].
#[derive(Debug, Error)]
pub enum ContextError {
    /// A config file could not be read.
    #[error("failed to read config file '{path}': {source}")]
    ReadConfig {
        /// Path that failed to read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A config file's TOML was malformed.
    #[error("failed to parse config: {0}")]
    ParseConfig(#[from] toml::de::Error),

    /// No configured `context.data-loops` entry matched a node's requested
    /// `loop.name` / `loop.class` (spec §4.3).
    #[error("no data loop matches name={name:?} class={class:?}")]
    NoMatchingLoop {
        /// The requested loop name, if any.
        name: Option<String>,
        /// The requested loop class, if any.
        class: Option<String>,
    },

    /// A lookup referenced a global id never registered, or already
    /// removed.
    #[error("unknown global {0}")]
    UnknownGlobal(u32),

    /// A required `context.objects` / `context.modules` entry had no
    /// `ifexists` flag and its factory failed to load.
    #[error("required object '{0}' failed to load and has no ifexists flag")]
    RequiredObjectFailed(String),

    /// Wraps a core engine error (pool, scheduler, node lookup).
    #[error(transparent)]
    Core(#[from] pwgraph_core::CoreError),

    /// Wraps a SPA plugin loader error.
    #[error(transparent)]
    Loader(#[from] pwgraph_spa::factory::LoaderError),

    /// Wraps an I/O failure from spawning a data loop thread.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ContextError {
    /// Build a [`ContextError::ReadConfig`].
    pub fn read_config(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::ReadConfig {
            path: path.into(),
            source,
        }
    }
}
