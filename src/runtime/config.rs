//! Runtime configuration.
//!
//! Configuration can be set programmatically or loaded from environment
//! variables.
//!
//! # Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `FIBRANT_YIELD_OP_COUNT` | Instructions a fiber runs before yielding its worker | 2048 |
//! | `FIBRANT_REPORT_UNHANDLED` | Log failures of fibers nobody awaited ("true"/"false") | true |
//!
//! # Example
//!
//! ```rust
//! use fibrant::runtime::RuntimeConfig;
//!
//! let config = RuntimeConfig::builder()
//!     .yield_op_count(512)
//!     .report_unhandled_failures(false)
//!     .build()
//!     .unwrap();
//! assert_eq!(config.yield_op_count(), 512);
//! ```

use std::env;

use thiserror::Error;

const YIELD_OP_COUNT_VAR: &str = "FIBRANT_YIELD_OP_COUNT";
const REPORT_UNHANDLED_VAR: &str = "FIBRANT_REPORT_UNHANDLED";

/// Default number of instructions a fiber runs before yielding.
pub const DEFAULT_YIELD_OP_COUNT: usize = 2048;

/// Settings shared by every fiber started from one
/// [`Runtime`](super::Runtime).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    yield_op_count: usize,
    report_unhandled_failures: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            yield_op_count: DEFAULT_YIELD_OP_COUNT,
            report_unhandled_failures: true,
        }
    }
}

impl RuntimeConfig {
    /// Starts a builder initialised with the defaults.
    #[must_use]
    pub fn builder() -> RuntimeConfigBuilder {
        RuntimeConfigBuilder::new()
    }

    /// Loads the configuration from environment variables, using defaults
    /// for unset variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::EnvParse`] when a variable is set to a value
    /// that cannot be parsed, and [`ConfigError::InvalidValue`] when the
    /// parsed configuration does not validate.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut builder = Self::builder();
        if let Some(count) = parse_env_usize(YIELD_OP_COUNT_VAR)? {
            builder = builder.yield_op_count(count);
        }
        if let Some(report) = parse_env_bool(REPORT_UNHANDLED_VAR)? {
            builder = builder.report_unhandled_failures(report);
        }
        builder.build()
    }

    /// Instructions a fiber runs before giving its worker back.
    #[must_use]
    pub const fn yield_op_count(&self) -> usize {
        self.yield_op_count
    }

    /// Whether failures of fibers that nobody awaited are logged.
    #[must_use]
    pub const fn report_unhandled_failures(&self) -> bool {
        self.report_unhandled_failures
    }

    /// Checks that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for a zero `yield_op_count`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.yield_op_count == 0 {
            return Err(ConfigError::InvalidValue {
                field: "yield_op_count",
                message: "must be at least 1".to_owned(),
            });
        }
        Ok(())
    }
}

/// Invalid runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A field holds a value the runtime cannot work with.
    #[error("invalid value for {field}: {message}")]
    InvalidValue {
        /// Name of the offending field.
        field: &'static str,
        /// What is wrong with it.
        message: String,
    },

    /// An environment variable could not be parsed.
    #[error("failed to parse environment variable {var}: {message}")]
    EnvParse {
        /// Name of the variable.
        var: &'static str,
        /// What is wrong with its value.
        message: String,
    },
}

/// Builder for [`RuntimeConfig`].
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfigBuilder {
    config: RuntimeConfig,
}

impl RuntimeConfigBuilder {
    /// Creates a builder initialised with the defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets how many instructions a fiber runs before yielding.
    #[must_use]
    pub const fn yield_op_count(mut self, count: usize) -> Self {
        self.config.yield_op_count = count;
        self
    }

    /// Sets whether unobserved fiber failures are logged.
    #[must_use]
    pub const fn report_unhandled_failures(mut self, enabled: bool) -> Self {
        self.config.report_unhandled_failures = enabled;
        self
    }

    /// Validates and returns the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if validation fails.
    pub fn build(self) -> Result<RuntimeConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

fn parse_env_usize(var: &'static str) -> Result<Option<usize>, ConfigError> {
    env::var(var).ok().map_or(Ok(None), |value| {
        value
            .trim()
            .parse()
            .map(Some)
            .map_err(|error: std::num::ParseIntError| ConfigError::EnvParse {
                var,
                message: error.to_string(),
            })
    })
}

fn parse_env_bool(var: &'static str) -> Result<Option<bool>, ConfigError> {
    env::var(var).ok().map_or(Ok(None), |value| {
        match value.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(Some(true)),
            "false" | "0" | "no" | "off" => Ok(Some(false)),
            other => Err(ConfigError::EnvParse {
                var,
                message: format!("expected a boolean, got {other:?}"),
            }),
        }
    })
}
