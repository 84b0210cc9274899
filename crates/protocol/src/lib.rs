//! # Overview
//!
//! `protocol` implements the per-protocol transfer sessions the sf/gf
//! workers drive. A send session walks the generic phases (connect,
//! authenticate, per-file open/stream/publish, disconnect) with the
//! protocol-specific parts behind the [`session::SendSession`] trait; a
//! retrieve session mirrors the shape with [`fetch::FetchSession`].
//!
//! Lock-file discipline (dot names, postfix names, VMS dot pairs, a
//! per-connection `LOCKFILE`) is applied through the names the worker
//! passes in; atomic rename-on-publish is each session's `publish`.
//!
//! Errors carry the worker exit code that the dispatcher's reap path will
//! classify, so a failed phase maps one-to-one onto an observable outcome.

pub mod error;
pub mod exec;
pub mod fetch;
pub mod ftp;
pub mod http;
pub mod loc;
pub mod session;
pub mod sftp;
pub mod smtp;
pub mod wmo;

pub use error::TransferError;
pub use fetch::{open_fetch_session, FetchSession, RemoteFile};
pub use session::{open_session, Interrupt, SendSession, SessionConfig};
pub use wmo::counter::WmoCounter;
