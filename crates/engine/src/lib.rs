//! The streaming completion engine.
//!
//! A user turn flows through four pieces:
//!
//! 1. **Setup** ([`setup`]) builds the history from the cache, the format
//!    instruction, the role messages and the new input
//! 2. **Stream** ([`stream`]) runs the backend exchange for each round and
//!    executes requested tool calls between rounds
//! 3. **Completion** ([`orchestrator`]) drains the stream into a render sink
//!    until no tool calls are pending
//! 4. **Retry** ([`retry`]) resubmits a turn that failed mid-stream, with
//!    exponential backoff
//!
//! [`Session`] ties them together and saves finished turns.

pub mod orchestrator;
pub mod retry;
pub mod session;
pub mod setup;
pub mod stream;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use orchestrator::{CancelSet, Completion, RenderSink, TurnOutcome};
pub use retry::{RetryPolicy, cut_prompt};
pub use session::{SaveTarget, Session};
pub use setup::{TurnSetup, load_role_message, truncate_chars};
pub use stream::{ChatStream, StreamClient};
