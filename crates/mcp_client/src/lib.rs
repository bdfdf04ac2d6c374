//! Model Context Protocol client.
//!
//! Connects to the configured servers over stdio, streamable HTTP or legacy
//! HTTP+SSE, performs the `initialize` handshake and merges every server's
//! tools into one [`ToolCatalog`]. A server that fails to connect or later
//! drops is reported and its tools disappear from the catalog; the rest keep
//! working.

mod config;
mod connection;
mod error;
mod manager;
mod protocol;
mod transport;

use std::sync::{Mutex, MutexGuard};

pub use config::{McpConfig, McpServerConfig};
pub use connection::{ConnectionState, McpConnection};
pub use error::McpError;
pub use manager::{
    CatalogEntry, McpManager, McpSettings, McpToolOutput, RejectedTool, RejectionReason, ServerStatus, ToolCatalog,
};
pub use protocol::{CallToolResult, McpTool, ServerInfo, ToolContent, PROTOCOL_VERSION};

pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
