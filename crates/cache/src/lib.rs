//! Conversation persistence for oi.
//!
//! Implements `oi_core::ConversationCache` on top of plain JSON files.

pub mod file_cache;

pub use file_cache::{ConversationSummary, FileCache};
