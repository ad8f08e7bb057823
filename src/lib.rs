// src/lib.rs

pub mod gateway;

pub use gateway::config::GatewayConfig;
pub use gateway::context::RequestContext;
pub use gateway::dispatcher::{build_router, serve};
pub use gateway::error::GatewayError;
pub use gateway::model::{Chunk, Content, FinishReason, Message, Request, Response, Role, Tool, ToolCall, Usage};
pub use gateway::registry::Registries;
