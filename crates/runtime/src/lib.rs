//! Tokio runtime for the rondo consensus core.
//!
//! Wires the single-threaded [`EventLoop`](event_loop::EventLoop) around the
//! `rondo-consensus` EventHandler, merges the inbound event channel with the
//! PaceMaker's round-timer fires, and connects the concurrent collectors
//! back into the loop through the event channel.

mod event_loop;

pub use event_loop::{EventLoop, EventLoopBuilder, EventLoopError, EventLoopHandle};
