#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `core` holds the vocabulary every other crate in the workspace speaks:
//! message names and the fixed-size binary message record the directory
//! scanner hands to the dispatcher, the evaluated job specification read
//! from a persisted message file, the closed set of worker exit codes, and
//! the on-disk working-directory layout.
//!
//! # Design
//!
//! - [`ids::MsgName`] is the 30-byte textual identifier that names one unit
//!   of work (a bundle of files in the outgoing spool).
//! - [`message::MessageRecord`] is the fixed-size binary record written into
//!   the `msg` channel; its layout is stable and naturally padded.
//! - [`job::JobSpec`] is the result of evaluating a persisted message file:
//!   destination URL, lock discipline, archive time, rename rules and the
//!   rest of the per-job transfer options.
//! - [`exit::WorkerExit`] enumerates every exit code a transfer worker may
//!   return, together with the dispatcher-side classification.
//! - [`workdir::WorkDir`] resolves every well-known path under the AFD
//!   working directory.
//!
//! The crate is deliberately free of I/O beyond reading message files; all
//! channel and mapped-region handling lives in `fsa` and `fd`.

pub mod exit;
pub mod ids;
pub mod job;
pub mod message;
pub mod workdir;

pub use exit::{Outcome, WorkerExit};
pub use ids::{JobId, MsgName};
pub use job::{JobSpec, LockStyle, ProtocolKind};
pub use message::MessageRecord;
pub use workdir::WorkDir;
