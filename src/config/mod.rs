//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ProxyConfig (validated, immutable)
//!     → handed to ProxyController::new
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; the proxy is restarted to change it
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{InspectorConfig, ListenerConfig, ObservabilityConfig, ProxyConfig, TimeoutConfig};
pub use validation::{validate_config, ValidationError};
