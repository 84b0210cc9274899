//! # Overview
//!
//! `queue` holds the dispatcher-private scheduling state: the priority
//! queue of transfer jobs, the message cache mapping job-ids onto their
//! evaluated transfer parameters, and the error queue that back-offs
//! persistently failing job-ids.
//!
//! # Design
//!
//! - [`queue::MsgQueue`] is a dense array kept sorted non-decreasing by the
//!   `msg_number` priority key. Insertion is a binary search plus one
//!   contiguous shift; every scan is linear, which is fine at the queue
//!   sizes this engine sees (hundreds to low thousands).
//! - [`cache::MessageCache`] answers job-id lookups with protocol, port,
//!   host index and age limit, with a one-entry last-lookup cache because
//!   messages cluster by job.
//! - [`error_queue::ErrorQueue`] keeps `(first_seen, next_retry)` per
//!   failing job-id and gates both normal starts and burst handoffs.
//!
//! All three persist to files under `${work}/fifodir/` with a shared
//! `(magic, version, generation, count)` header; the layouts are
//! self-consistent but deliberately private to the dispatcher.

pub mod cache;
pub mod entry;
pub mod error_queue;
pub mod queue;

pub use cache::{CacheEntry, MessageCache};
pub use entry::{special_flag, PidState, QueueEntry};
pub use error_queue::{ErrorQueue, ErrorQueueEntry};
pub use queue::{MsgQueue, RETRY_THRESHOLD};
