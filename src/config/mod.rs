//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (read & deserialize)
//!     → validation.rs (semantic checks)
//!     → ChainwatchConfig (validated, immutable)
//!     → RpcConfig / RetryConfig / FeeConfig handed to their subsystems
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::ChainKind;
pub use schema::ChainwatchConfig;
pub use schema::ObservabilityConfig;
pub use schema::RpcConfig;
