//! Session persistence for the foreman runtime.
//!
//! The core consumes [`SessionStore`] as a port; database adapters live
//! outside this repository.  Two reference implementations are provided:
//! an in-memory store for tests and embedding, and a JSONL store whose
//! append-only message deltas reconstruct a session's conversation
//! byte-for-byte on replay.

pub mod jsonl;
pub mod memory;
pub mod port;

pub use jsonl::JsonlStore;
pub use memory::MemoryStore;
pub use port::{MessageDelta, SessionStore};
