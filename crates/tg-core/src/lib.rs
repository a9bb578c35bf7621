//! tg-core: Core abstractions and configuration for taskgate
//!
//! This crate provides the shared types, the session registry interface
//! the broker drives, settings persistence and configuration helpers used
//! by the broker library and the `taskgate` binary.

pub mod config;
pub mod error;
pub mod memory;
pub mod registry;
pub mod settings;
pub mod types;

pub use error::{ConfigError, RegistryError, SettingsError};
pub use memory::MemoryRegistry;
pub use registry::{CompletionEndpoint, SessionRegistry};
pub use settings::{MemorySettingsStore, SettingsStore, TomlSettingsStore};
pub use types::{SessionCounts, SessionKind, TaskStatus};
pub use tg_protocol::TaskId;
