//! Configuration for the Posuer MCP interposer.
//!
//! Server definitions (transport, policy, optional container isolation),
//! the YAML/JSON loader with include support, and a debounced file
//! watcher for live reconfiguration.

mod capability;
mod container;
mod error;
mod loader;
mod server;
mod watcher;

pub use capability::{equivalent, Capability, CapabilityType};
pub use container::Container;
pub use error::{ConfigError, Result};
pub use loader::{load, load_file, DEFAULT_CONFIG_DIR, DEFAULT_CONFIG_FILE};
pub use server::{ServerConfig, ServerType};
pub use watcher::{ConfigWatcher, DEFAULT_DEBOUNCE};
