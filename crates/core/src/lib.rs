//! # oi Core
//!
//! Domain types, traits, and error definitions for the oi streaming chat
//! client. Everything the engine, the wire backends and the CLI share is
//! defined here; implementations live in their own crates.
//!
//! ## Layout
//!
//! - [`message`]: conversation history value types
//! - [`provider`]: the request model and the [`Backend`] exchange contract
//! - [`stream`]: the pull-based [`Stream`] contract and the [`Client`] that opens one
//! - [`tool`]: the tool invocation gateway and the [`ToolRegistry`]
//! - [`cache`]: the conversation cache collaborator
//!
//! All crates depend inward on core, so any seam can be replaced by a mock
//! in tests.

pub mod cache;
pub mod error;
pub mod message;
pub mod provider;
pub mod stream;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use cache::{ConversationCache, ConversationRecord};
pub use error::{CacheError, Error, ProviderError, Result, StreamError, ToolError};
pub use message::{ConversationId, Message, Role, ToolCall};
pub use provider::{Backend, Delta, DeltaSink, Request, RoundRequest, SamplingParams, ToolDefinition};
pub use stream::{Chunk, Client, Stream, ToolCallStatus, call_tool};
pub use tool::{NoTools, Tool, ToolInvoker, ToolRegistry};
