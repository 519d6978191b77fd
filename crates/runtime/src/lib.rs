//! The foreman runtime core: the Session Supervisor and the Reasoning
//! Loop, plus event fan-out, per-session locking, and cancellation.
//!
//! Entry point: build a [`Runtime`] from the ports and governance pieces,
//! hand it to a [`Supervisor`], then `spawn`/`resume`/`pause`/`cancel`/
//! `subscribe` sessions.

pub mod cancel;
pub mod context;
pub mod events;
pub mod session_lock;
pub mod sink;
pub mod step;
pub mod supervisor;

pub use events::{EventHub, EventStream};
pub use sink::JsonlEventSink;
pub use step::Runtime;
pub use supervisor::Supervisor;
