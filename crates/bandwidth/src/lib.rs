//! # Overview
//!
//! `bandwidth` centralises transfer-rate handling: decoding textual limits
//! from the host table, the [`RateLimiter`] pacing state machine the
//! workers run their write loops through, and the per-worker share
//! computation the dispatcher refreshes whenever a host's active transfer
//! count changes.
//!
//! # Invariants
//!
//! - Parsed rates are rounded to a whole number of bytes per second.
//! - The limiter never sleeps for intervals shorter than 100 ms, so short
//!   bursts coalesce instead of thrashing the scheduler.
//! - A host's per-worker share is `host_limit / active_transfers`, clamped
//!   to its group's share when the host belongs to a rate-limit group.
//!
//! When the `test-support` feature (or `cfg(test)`) is active, sleep
//! requests are recorded instead of reaching `std::thread::sleep`, keeping
//! tests deterministic.

mod limiter;
mod parse;
mod share;

pub use limiter::RateLimiter;
#[cfg(any(test, feature = "test-support"))]
pub use limiter::{recorded_sleeps, reset_recorded_sleeps};
pub use parse::{parse_rate_limit, RateParseError};
pub use share::per_process_share;
