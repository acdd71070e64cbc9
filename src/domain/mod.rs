//! Tekton tools, prompts and resources exposed over the MCP protocol

pub mod prompts;
pub mod resources;
pub mod tools;
pub mod utils;
