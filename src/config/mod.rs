//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ServerConfig (validated, immutable)
//!     → shared with the server at startup
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → server swaps its HandshakePolicy atomically
//!     → new upgrades negotiate against the new policy
//! ```
//!
//! # Design Decisions
//! - Only handshake policy (path, origin, allow-lists) is hot-reloadable;
//!   listener, limits and timeouts apply at startup
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    HandlerKind, ListenerConfig, ObservabilityConfig, RetryConfig, ServerConfig, TimeoutConfig,
    WebSocketConfig,
};
pub use validation::{validate_config, ValidationError};
pub use watcher::ConfigWatcher;
