pub mod config;
pub mod core;
pub mod errors;

// Re-export commonly used items for convenience
pub use config::{ConversationConfig, ResolvedSessionConfig, SessionOptions};
pub use crate::core::*;
pub use errors::{ConfigError, ConversationError, ConversationResult, SessionError, SessionResult};
