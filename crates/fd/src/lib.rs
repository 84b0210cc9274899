//! # Overview
//!
//! `fd` is the dispatcher: a single-threaded, poll-driven supervisor that
//! admits jobs from the message channel, starts transfer workers within
//! the per-host and global parallelism bounds, reaps and classifies their
//! exits, schedules retries and retrieve polls, and hands follow-up jobs
//! to parked workers through the burst handshake.
//!
//! # Design
//!
//! All scheduling state and policy live in [`dispatch::Dispatcher`], which
//! is driven entirely through explicit method calls with the current time
//! passed in; the event loop in [`supervisor`] is a thin shell that wires
//! the named channels, the process spawner and the clock to it. That split
//! keeps every scheduling decision testable without forking anything.
//!
//! Parallelism is processes, never threads: the dispatcher plus up to
//! `max_connections` single-threaded workers.

pub mod channels;
pub mod commands;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod launch;
pub mod retrieve;
pub mod supervisor;

pub use commands::Command;
pub use config::FdConfig;
pub use dispatch::Dispatcher;
pub use launch::{LaunchPlan, ProcessSpawner, Spawner};
pub use supervisor::run;
