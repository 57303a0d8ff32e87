//! nmstate node handler configuration
//!
//! An immutable [`HandlerConfig`] snapshot is loaded once (file layered under
//! environment overrides) and passed explicitly to every apply and filter
//! call. Watching the file for changes is left to the embedding service.

pub mod handler_config;

pub use handler_config::{
    ApiServerConfig, CommandConfig, ConfigError, HandlerConfig, StatusRetryConfig,
    CONFIG_PATH_ENV, ENV_PREFIX, MAX_TIMEOUT_SECS,
};
