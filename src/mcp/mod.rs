//! MCP protocol surface: JSON-RPC wire types, stdio and HTTP transports,
//! and the inventory tool handlers.

pub mod http;
pub mod server;
pub mod tools;
pub mod tools_assets;
pub mod tools_analysis;
pub mod tools_compliance;
pub mod tools_graph;
pub mod tools_review;
pub mod types;

pub use http::HttpMcpServer;
pub use server::McpServer;
