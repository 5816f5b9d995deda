//! Domain-driven configuration for Quarry workers
//!
//! Configuration is split by functional domain (worker, store, logging),
//! each with serde defaults and validation, loaded from YAML with
//! `QUARRY_` environment variable overrides.

pub mod error;
pub mod loader;
pub mod validation;

// Domain-specific configuration modules
pub mod domains;

// Re-export main types
pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;
pub use validation::Validatable;

// Re-export domain configurations
pub use domains::{
    logging::{LogFormat, LogLevel, LoggingConfig},
    store::{StoreBackend, StoreConfig},
    worker::WorkerConfig,
    QuarryConfig,
};

// Re-export utilities
pub use domains::utils::serde_duration;
