//! MCP server for paper search
//!
//! The live-serving boundary: `search` and `health` tools over stdio.

mod server;

pub use server::run_mcp_server;
