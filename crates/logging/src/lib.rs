//! # Overview
//!
//! `logging` owns the domain log records and the append-only writers that
//! carry them: the output log (one record per delivered file), the input
//! log (one per file picked up), the production log, the delete log, and
//! the per-transfer status lines of the transfer log.
//!
//! These are data products consumed by reporting tools, not diagnostics;
//! the engine's own diagnostics go through `tracing` in the binaries.
//!
//! # Design
//!
//! - Every record renders to one line using the fixed [`SEPARATOR`] byte
//!   and parses back into its fields, so downstream tooling can rely on
//!   the round trip.
//! - [`writer::LogWriter`] appends lines to `NAME.0` under the log
//!   directory, flushes on a bounded schedule, and rolls the generation
//!   cascade (`NAME.0` -> `NAME.1` -> ...) at local midnight.

pub mod records;
pub mod writer;

pub use records::{
    DeleteRecord, InputRecord, OutputRecord, ProductionRecord, RecordParseError, Severity,
    TransferLine, SEPARATOR,
};
pub use writer::{LogWriter, BUFFERED_WRITES_BEFORE_FLUSH};
