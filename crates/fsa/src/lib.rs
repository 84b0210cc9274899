//! # Overview
//!
//! `fsa` owns the two memory-mapped status areas the engine coordinates
//! through: the host status area (one record per configured destination,
//! with per-worker job slots) and the directory retrieval area (one record
//! per retrieve source). Both are plain files under `${work}/fifodir/`,
//! mapped by the dispatcher and by every worker it spawns.
//!
//! # Design
//!
//! - [`region::MappedRegion`] is the owned wrapper around one mapped file:
//!   a fixed header (magic, version, generation counter, record count)
//!   followed by a dense array of fixed-size records. All field access goes
//!   through little-endian byte codecs at documented offsets, so the layout
//!   is the contract, not a Rust struct.
//! - [`lock::RegionGuard`] is the scoped byte-range advisory lock handle;
//!   every mutation that crosses a locked region acquires one and releases
//!   it on all exit paths.
//! - [`host::Hsa`] and [`dir::Dra`] hand out typed access to the records;
//!   [`slot`] adds the per-worker job slot, including the burst handshake
//!   state machine.
//! - [`active::ActiveFile`] is the process table + shared shutdown flag
//!   external tools poke to request exit.
//!
//! # Invariants
//!
//! - `0 <= active_transfers <= allowed_transfers` for every host.
//! - A slot with a non-negative process id corresponds to exactly one
//!   in-flight queue entry, and vice versa.
//! - `error_counter > 0` iff the host is considered failing, with
//!   `retry_interval` gating the next attempt.
//!
//! The dispatcher self-corrects counter drift instead of crashing; see the
//! reconciliation pass in the `fd` crate.

pub mod active;
pub mod dir;
pub mod host;
pub mod lock;
pub mod region;
pub mod slot;
pub mod status;

pub use active::ActiveFile;
pub use dir::{Dra, DirSeed};
pub use host::{HostSeed, Hsa};
pub use lock::RegionGuard;
pub use slot::BurstState;
pub use status::{AfdStatus, FdState};
