//! Chat API backends for oi.
//!
//! All backends implement the `oi_core::Backend` trait. The router builds
//! the correct backend for a resolved model.

mod http;
mod lines;
pub mod ollama;
pub mod openai_compat;
pub mod router;

pub use ollama::OllamaBackend;
pub use openai_compat::OpenAiCompatBackend;
pub use router::backend_for;
