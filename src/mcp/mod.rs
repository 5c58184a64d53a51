pub mod client;

pub use client::{clean_tool_arguments, McpClient, McpServerState, ToolDescriptor};
