//! MCP protocol adapter
//!
//! Thin translation layer: JSON-RPC over stdio in, engine calls out. All
//! semantics live in the engine; this module only frames and dispatches.

mod handlers;
pub mod protocol;
pub mod tools;

pub use handlers::ToolRouter;
pub use protocol::{McpHandler, McpRequest, McpResponse, McpServer};
