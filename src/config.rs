//! Runtime configuration types.

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::vm::{CALL_STACK_SIZE, EXECUTION_STACK_SIZE};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("{0} must be greater than zero")]
    ZeroCapacity(&'static str),
}

/// Runtime configuration for the VM
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Operand stack capacity; pushing past it is a fatal fault.
    pub execution_stack_size: usize,
    /// Maximum call depth; calling past it is a fatal fault.
    pub call_stack_size: usize,
    /// Log collector statistics when the program halts.
    pub gc_stats: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            execution_stack_size: EXECUTION_STACK_SIZE,
            call_stack_size: CALL_STACK_SIZE,
            gc_stats: false,
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: RuntimeConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.execution_stack_size == 0 {
            return Err(ConfigError::ZeroCapacity("execution_stack_size"));
        }
        if self.call_stack_size == 0 {
            return Err(ConfigError::ZeroCapacity("call_stack_size"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.execution_stack_size, 128);
        assert_eq!(config.call_stack_size, 64);
        assert!(!config.gc_stats);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = RuntimeConfig::from_toml_str("call_stack_size = 8\n").unwrap();
        assert_eq!(config.call_stack_size, 8);
        assert_eq!(config.execution_stack_size, 128);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let err = RuntimeConfig::from_toml_str("execution_stack_size = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::ZeroCapacity("execution_stack_size")));
    }

    #[test]
    fn test_load_from_file() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("kestrel.toml");
        fs::write(
            &path,
            "execution_stack_size = 256\ncall_stack_size = 32\ngc_stats = true\n",
        )
        .unwrap();

        let config = RuntimeConfig::load(&path).unwrap();
        assert_eq!(
            config,
            RuntimeConfig {
                execution_stack_size: 256,
                call_stack_size: 32,
                gc_stats: true,
            }
        );
    }

    #[test]
    fn test_load_missing_file() {
        let temp = tempdir().unwrap();
        let err = RuntimeConfig::load(&temp.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
