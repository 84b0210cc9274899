//! # Overview
//!
//! `worker` is the body of the sf (send file) and gf (get file) worker
//! processes the dispatcher forks. A worker's lifetime is bounded by one
//! host connection, but it may service several messages in a row through
//! the burst handshake.
//!
//! The send flow walks the generic phases over the protocol session, keeps
//! its job slot in the status area current (under the slot's range lock),
//! writes output/delete log records, and disposes of delivered files into
//! the archive or the bin. The fetch flow mirrors it for retrieve sources.
//!
//! Cancellation arrives as a byte on the worker's control channel; there
//! are no signals in this protocol beyond the final kill escalation.

pub mod archive;
pub mod args;
pub mod burst;
pub mod control;
pub mod fetch;
pub mod send;

pub use args::{FetchArgs, SendArgs};
pub use fetch::run_fetch;
pub use send::run_send;
