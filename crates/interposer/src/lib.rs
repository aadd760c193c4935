//! Posuer, an MCP aggregating interposer.
//!
//! Presents a single MCP server to an upstream client while multiplexing
//! the session across many downstream MCP servers. Capabilities from every
//! enabled backend are merged into one namespace (prefixed by backend
//! name), filtered by per-backend policy, and routed back to their origin
//! on invocation. The backend set can be reconfigured at runtime without
//! dropping the upstream session.

pub mod client;
pub mod engine;
pub mod error;
pub mod facade;
pub mod registry;
pub mod rewrite;
pub mod server;
pub mod session;

pub use client::{client_identity, BackendClient, ClientFactory, IsolatorFactory, RmcpClient};
pub use engine::{ChangeFlags, Interposer};
pub use error::{Error, Result};
pub use facade::{ChangeKind, ServerSurface, UpstreamFacade};
pub use registry::{CapabilityKey, CapabilityRegistry};
pub use server::InterposerServer;
pub use session::BackendSession;
