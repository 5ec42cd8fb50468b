//! Configuration builder trait and helpers
//!
//! Provides a common trait for configuration structures to implement,
//! enabling consistent patterns for validation, environment variable loading,
//! and configuration merging across the workspace.

use crate::Result;

/// Trait for configuration structures that support building, validation, and merging
///
/// Implementing this trait provides a consistent API for:
/// - Default configuration creation
/// - Validation of configuration values
/// - Loading from environment variables
/// - Merging multiple configuration sources
///
/// # Example
///
/// ```rust,ignore
/// use stagegraph_toolkit::config::ConfigBuilder;
///
/// #[derive(Clone, Default)]
/// struct MyConfig {
///     pub port: u16,
///     pub host: String,
/// }
///
/// impl ConfigBuilder for MyConfig {
///     fn validate(&self) -> stagegraph_toolkit::Result<()> {
///         if self.port == 0 {
///             return Err(stagegraph_toolkit::ToolingError::General(
///                 "Port must be non-zero".to_string()
///             ));
///         }
///         Ok(())
///     }
///
///     fn from_env(prefix: &str) -> stagegraph_toolkit::Result<Self> {
///         // Load configuration from environment variables
///         Ok(Self::default())
///     }
///
///     fn merge(&mut self, other: Self) -> &mut Self {
///         // Merge other config into self
///         self
///     }
/// }
/// ```
pub trait ConfigBuilder: Default + Clone {
    /// Validate the configuration
    ///
    /// Returns an error if the configuration is invalid.
    /// Should check for:
    /// - Required fields being set
    /// - Values being within valid ranges
    /// - Dependencies between fields
    fn validate(&self) -> Result<()> {
        // Default implementation: always valid
        Ok(())
    }

    /// Load configuration from environment variables
    ///
    /// # Arguments
    ///
    /// * `prefix` - Prefix for environment variable names (e.g., "APP_" for APP_PORT)
    ///
    /// Environment variables should follow the pattern: `{PREFIX}{FIELD_NAME}`
    /// where FIELD_NAME is the uppercased field name.
    ///
    /// # Example
    ///
    /// For a config with field `port` and prefix "APP_":
    /// - Environment variable: `APP_PORT`
    /// - Value: "8080"
    fn from_env(prefix: &str) -> Result<Self>;

    /// Merge another configuration into this one
    ///
    /// Allows combining configurations from multiple sources.
    /// The general strategy is:
    /// - Option fields: `other` value overwrites if Some
    /// - Vec fields: `other` values are appended
    /// - Scalar fields: `other` value overwrites
    ///
    /// Returns self for chaining.
    fn merge(&mut self, other: Self) -> &mut Self;

    /// Create, validate, and return configuration
    ///
    /// Helper method that creates a default config and validates it.
    fn build() -> Result<Self> {
        let config = Self::default();
        config.validate()?;
        Ok(config)
    }

    /// Load from environment, merge defaults, and validate
    ///
    /// Helper method that combines:
    /// 1. Load from environment variables
    /// 2. Merge with defaults
    /// 3. Validate final result
    fn from_env_with_defaults(prefix: &str) -> Result<Self> {
        let mut config = Self::from_env(prefix)?;
        let defaults = Self::default();
        config.merge(defaults);
        config.validate()?;
        Ok(config)
    }
}
