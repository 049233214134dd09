//! Loop thread configuration.

use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Environment variable overriding [`LoopConfig::thread_name`].
pub const THREAD_NAME_ENV: &str = "MSGLOOP_THREAD_NAME";

/// Environment variable overriding [`LoopConfig::stack_size`].
pub const STACK_SIZE_ENV: &str = "MSGLOOP_STACK_SIZE";

/// Configuration for the owned loop thread and its relay threads.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    /// Name of the owning thread (shows up in panic messages and debuggers).
    pub thread_name: String,

    /// Stack size of the owning thread in bytes. `None` uses the platform default.
    pub stack_size: Option<usize>,

    /// Name given to the helper threads spawned by `begin_invoke`.
    pub relay_thread_name: String,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            thread_name: "msgloop".to_string(),
            stack_size: None,
            relay_thread_name: "msgloop-relay".to_string(),
        }
    }
}

impl LoopConfig {
    /// Default configuration with `MSGLOOP_*` environment overrides applied.
    ///
    /// Unparseable stack sizes are ignored with a warning.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(name) = std::env::var(THREAD_NAME_ENV)
            && !name.trim().is_empty()
        {
            config.thread_name = name;
        }

        if let Ok(raw) = std::env::var(STACK_SIZE_ENV) {
            match raw.trim().parse::<usize>() {
                Ok(size) if size > 0 => config.stack_size = Some(size),
                _ => tracing::warn!("Ignoring invalid {}={:?}", STACK_SIZE_ENV, raw),
            }
        }

        config
    }

    /// Load a configuration from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {}", path.display(), e)))?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| Error::Config(format!("failed to parse {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Set the owning thread name.
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Set the owning thread stack size.
    pub fn with_stack_size(mut self, size: usize) -> Self {
        self.stack_size = Some(size);
        self
    }

    /// Check the configuration for values the thread builder would reject.
    pub fn validate(&self) -> Result<()> {
        if self.thread_name.trim().is_empty() {
            return Err(Error::Config("thread_name must not be empty".to_string()));
        }
        if self.thread_name.contains('\0') || self.relay_thread_name.contains('\0') {
            return Err(Error::Config("thread names must not contain NUL bytes".to_string()));
        }
        if self.relay_thread_name.trim().is_empty() {
            return Err(Error::Config("relay_thread_name must not be empty".to_string()));
        }
        if self.stack_size == Some(0) {
            return Err(Error::Config("stack_size must be greater than 0".to_string()));
        }
        Ok(())
    }
}
