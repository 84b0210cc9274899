//! The host status area (one record per configured destination).
//!
//! Field access goes through little-endian codecs at the offsets declared
//! below; the offsets are the layout contract shared with every attached
//! worker. Counter mutations that race other processes take the matching
//! byte-range lock first (`LOCK_EC`, `LOCK_HS`, `LOCK_CON`, per-slot).

use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

use afd_core::ids::{JobId, MsgName};

use crate::lock::{lock_region, LockKind, RegionGuard};
use crate::region::{
    read_i32, read_i64, read_str, read_u32, read_u64, write_i32, write_i64, write_str, write_u32,
    write_u64, MappedRegion, RegionError,
};
use crate::slot::{self, BurstState, ConnectStatus, MAX_SLOTS, SLOT_SIZE};

const MAGIC: u32 = 0x4146_5341; // "AFSA"

// Host record field offsets.
const ALIAS: usize = 0;
const ALIAS_LEN: usize = 40;
const DISPLAY: usize = 40;
const DISPLAY_LEN: usize = 42;
const HOST_PRIMARY: usize = 82;
const HOST_SECONDARY: usize = 146;
const HOSTNAME_LEN: usize = 64;
const TOGGLE: usize = 210;
const ORIGINAL_TOGGLE: usize = 211;
const HOST_STATUS: usize = 216;
const PROTOCOL_OPTIONS: usize = 220;
const ALLOWED_TRANSFERS: usize = 224;
const ACTIVE_TRANSFERS: usize = 228;
const ERROR_COUNTER: usize = 232;
const ERROR_HISTORY: usize = 236;
/// Entries kept in the per-host error history.
pub const ERROR_HISTORY_LEN: usize = 5;
const SUCCESSFUL_RETRIES: usize = 244;
const MAX_SUCCESSFUL_RETRIES: usize = 248;
const RETRY_INTERVAL: usize = 252;
const TRANSFER_TIMEOUT: usize = 256;
const KEEP_CONNECTED: usize = 260;
const TRANSFER_RATE_LIMIT: usize = 264;
const TRL_PER_PROCESS: usize = 272;
const TRL_GROUP: usize = 280;
const FIRST_ERROR_TIME: usize = 288;
const LAST_CONNECTION: usize = 296;
const JOBS_QUEUED: usize = 304;
const TOTAL_FILE_COUNTER: usize = 308;
const TOTAL_FILE_SIZE: usize = 312;
const SLOTS: usize = 320;

/// Size of one host record including its job slots.
pub const HOST_RECORD_SIZE: usize = SLOTS + MAX_SLOTS * SLOT_SIZE;

/// Well-known lock offsets within a host record, relative to the record.
pub mod lock_offset {
    use super::{ACTIVE_TRANSFERS, ERROR_COUNTER, HOST_STATUS};

    /// Guards `error_counter` and the error history.
    pub const LOCK_EC: usize = ERROR_COUNTER;
    /// Guards the host status bits.
    pub const LOCK_HS: usize = HOST_STATUS;
    /// Guards connection allocation (`active_transfers`).
    pub const LOCK_CON: usize = ACTIVE_TRANSFERS;
}

/// Host status bits.
pub mod host_status {
    /// Host taken out of the configuration by the operator.
    pub const DISABLED: u32 = 1;
    /// Operator stopped transfers; queueing continues.
    pub const STOP_TRANSFER: u32 = 1 << 1;
    /// Queue auto-paused after the error threshold was reached.
    pub const AUTO_PAUSE_QUEUE: u32 = 1 << 2;
    /// Host known to be offline; error history is not recorded.
    pub const OFFLINE: u32 = 1 << 3;
    /// At least one of this host's job-ids sits in the error queue.
    pub const ERROR_QUEUE_SET: u32 = 1 << 4;
    /// Age-limit expiry must not delete data for this host.
    pub const DO_NOT_DELETE_DATA: u32 = 1 << 5;
}

/// Per-host protocol option bits.
pub mod protocol_options {
    /// Use passive FTP data connections.
    pub const FTP_PASSIVE: u32 = 1;
    /// Use extended passive mode (EPSV).
    pub const FTP_EXTENDED: u32 = 1 << 1;
    /// Do not force binary transfer type.
    pub const FTP_IGNORE_BIN: u32 = 1 << 2;
    /// Never hand a parked worker a follow-up job.
    pub const DISABLE_BURSTING: u32 = 1 << 3;
    /// Preserve source modification times on publish.
    pub const KEEP_TIME_STAMP: u32 = 1 << 4;
    /// Failures never demote the job's queue position.
    pub const NO_AGEING_JOBS: u32 = 1 << 5;
}

/// Which of the two configured hostnames is in use.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HostToggle {
    /// The primary hostname.
    Primary,
    /// The secondary (fallback) hostname.
    Secondary,
}

/// Start-up description of one host, loaded from the host table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HostSeed {
    /// Stable alias the queue and logs refer to.
    pub alias: String,
    /// Name shown in the transfer log; defaults to the alias.
    #[serde(default)]
    pub display_name: Option<String>,
    /// Primary hostname.
    pub hostname: String,
    /// Optional secondary hostname for temp-toggle.
    #[serde(default)]
    pub hostname_secondary: Option<String>,
    /// Parallel transfers allowed, clamped to the slot count.
    #[serde(default = "default_allowed")]
    pub allowed_transfers: u32,
    /// Seconds between retries of a failing host.
    #[serde(default = "default_retry_interval")]
    pub retry_interval: u32,
    /// Per-transfer timeout in seconds.
    #[serde(default = "default_transfer_timeout")]
    pub transfer_timeout: u32,
    /// Seconds an idle worker keeps its connection for bursting.
    #[serde(default)]
    pub keep_connected: u32,
    /// Failures on the primary before temp-toggling to the secondary.
    #[serde(default)]
    pub max_successful_retries: u32,
    /// Bytes per second across all of this host's transfers; 0 = none.
    #[serde(default)]
    pub transfer_rate_limit: u64,
    /// Rate-limit group index; None = ungrouped.
    #[serde(default)]
    pub trl_group: Option<u32>,
    /// Initial protocol option bits.
    #[serde(default)]
    pub protocol_options: u32,
}

const fn default_allowed() -> u32 {
    2
}
const fn default_retry_interval() -> u32 {
    120
}
const fn default_transfer_timeout() -> u32 {
    60
}

/// The mapped host status area.
#[derive(Debug)]
pub struct Hsa {
    region: MappedRegion,
}

impl Hsa {
    /// Creates the area from the configured host table.
    pub fn create(path: &Path, hosts: &[HostSeed]) -> Result<Self, RegionError> {
        let mut region = MappedRegion::create(path, MAGIC, HOST_RECORD_SIZE, hosts.len())?;
        for (i, seed) in hosts.iter().enumerate() {
            let rec = region.record_mut(i);
            write_str(rec, ALIAS, ALIAS_LEN, &seed.alias);
            let display = seed.display_name.as_deref().unwrap_or(&seed.alias);
            write_str(rec, DISPLAY, DISPLAY_LEN, display);
            write_str(rec, HOST_PRIMARY, HOSTNAME_LEN, &seed.hostname);
            write_str(
                rec,
                HOST_SECONDARY,
                HOSTNAME_LEN,
                seed.hostname_secondary.as_deref().unwrap_or(""),
            );
            rec[TOGGLE] = 0;
            rec[ORIGINAL_TOGGLE] = u8::MAX;
            write_u32(rec, PROTOCOL_OPTIONS, seed.protocol_options);
            write_u32(
                rec,
                ALLOWED_TRANSFERS,
                seed.allowed_transfers.clamp(1, MAX_SLOTS as u32),
            );
            write_u32(rec, RETRY_INTERVAL, seed.retry_interval);
            write_u32(rec, TRANSFER_TIMEOUT, seed.transfer_timeout);
            write_u32(rec, KEEP_CONNECTED, seed.keep_connected);
            write_u32(rec, MAX_SUCCESSFUL_RETRIES, seed.max_successful_retries);
            write_u64(rec, TRANSFER_RATE_LIMIT, seed.transfer_rate_limit);
            write_i32(
                rec,
                TRL_GROUP,
                seed.trl_group.map_or(-1, |g| g as i32),
            );
            for k in 0..MAX_SLOTS {
                let off = SLOTS + k * SLOT_SIZE;
                write_i32(rec, off + slot::PROC_ID, -1);
            }
        }
        region.flush().map_err(|source| RegionError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self { region })
    }

    /// Attaches to an existing area.
    pub fn attach(path: &Path) -> Result<Self, RegionError> {
        Ok(Self {
            region: MappedRegion::attach(path, MAGIC, HOST_RECORD_SIZE)?,
        })
    }

    /// Number of hosts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.region.count()
    }

    /// True when no hosts are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Configuration generation, for change detection.
    #[must_use]
    pub fn generation(&self) -> u32 {
        self.region.generation()
    }

    /// Flushes dirty pages.
    pub fn flush(&self) -> io::Result<()> {
        self.region.flush()
    }

    /// Finds a host by alias.
    #[must_use]
    pub fn find(&self, alias: &str) -> Option<usize> {
        (0..self.len()).find(|&i| self.alias(i) == alias)
    }

    // --- scalar accessors -------------------------------------------------

    /// Stable alias of host `i`.
    #[must_use]
    pub fn alias(&self, i: usize) -> String {
        read_str(self.region.record(i), ALIAS, ALIAS_LEN)
    }

    /// Display name used in transfer-log lines.
    #[must_use]
    pub fn display_name(&self, i: usize) -> String {
        read_str(self.region.record(i), DISPLAY, DISPLAY_LEN)
    }

    /// The hostname currently in effect, honouring the toggle.
    #[must_use]
    pub fn effective_hostname(&self, i: usize) -> String {
        let rec = self.region.record(i);
        match self.toggle(i) {
            HostToggle::Primary => read_str(rec, HOST_PRIMARY, HOSTNAME_LEN),
            HostToggle::Secondary => read_str(rec, HOST_SECONDARY, HOSTNAME_LEN),
        }
    }

    /// True when a secondary hostname is configured.
    #[must_use]
    pub fn has_secondary(&self, i: usize) -> bool {
        self.region.record(i)[HOST_SECONDARY] != 0
    }

    /// Which hostname is in use.
    #[must_use]
    pub fn toggle(&self, i: usize) -> HostToggle {
        if self.region.record(i)[TOGGLE] == 0 {
            HostToggle::Primary
        } else {
            HostToggle::Secondary
        }
    }

    /// Switches to the other hostname, remembering the original the first
    /// time so a later success can switch back.
    pub fn temp_toggle(&mut self, i: usize) {
        let rec = self.region.record_mut(i);
        if rec[ORIGINAL_TOGGLE] == u8::MAX {
            rec[ORIGINAL_TOGGLE] = rec[TOGGLE];
        }
        rec[TOGGLE] ^= 1;
    }

    /// Restores the pre-toggle hostname. Returns true when a restore
    /// actually happened.
    pub fn restore_toggle(&mut self, i: usize) -> bool {
        let rec = self.region.record_mut(i);
        if rec[ORIGINAL_TOGGLE] == u8::MAX {
            return false;
        }
        let changed = rec[TOGGLE] != rec[ORIGINAL_TOGGLE];
        rec[TOGGLE] = rec[ORIGINAL_TOGGLE];
        rec[ORIGINAL_TOGGLE] = u8::MAX;
        changed
    }

    /// True while a temp-toggle is in effect.
    #[must_use]
    pub fn is_temp_toggled(&self, i: usize) -> bool {
        self.region.record(i)[ORIGINAL_TOGGLE] != u8::MAX
    }

    /// Host status bits.
    #[must_use]
    pub fn host_status(&self, i: usize) -> u32 {
        read_u32(self.region.record(i), HOST_STATUS)
    }

    /// Sets status bits under the caller's `LOCK_HS` guard.
    pub fn set_host_status_bits(&mut self, i: usize, bits: u32) {
        let rec = self.region.record_mut(i);
        let cur = read_u32(rec, HOST_STATUS);
        write_u32(rec, HOST_STATUS, cur | bits);
    }

    /// Clears status bits under the caller's `LOCK_HS` guard.
    pub fn clear_host_status_bits(&mut self, i: usize, bits: u32) {
        let rec = self.region.record_mut(i);
        let cur = read_u32(rec, HOST_STATUS);
        write_u32(rec, HOST_STATUS, cur & !bits);
    }

    /// Protocol option bits.
    #[must_use]
    pub fn protocol_options(&self, i: usize) -> u32 {
        read_u32(self.region.record(i), PROTOCOL_OPTIONS)
    }

    /// Parallel transfers allowed on this host.
    #[must_use]
    pub fn allowed_transfers(&self, i: usize) -> u32 {
        read_u32(self.region.record(i), ALLOWED_TRANSFERS)
    }

    /// Workers currently attached to this host.
    #[must_use]
    pub fn active_transfers(&self, i: usize) -> u32 {
        read_u32(self.region.record(i), ACTIVE_TRANSFERS)
    }

    /// Adjusts `active_transfers` under the caller's `LOCK_CON` guard.
    pub fn set_active_transfers(&mut self, i: usize, value: u32) {
        write_u32(self.region.record_mut(i), ACTIVE_TRANSFERS, value);
    }

    /// Consecutive-error counter.
    #[must_use]
    pub fn error_counter(&self, i: usize) -> u32 {
        read_u32(self.region.record(i), ERROR_COUNTER)
    }

    /// Sets the error counter under the caller's `LOCK_EC` guard.
    pub fn set_error_counter(&mut self, i: usize, value: u32) {
        write_u32(self.region.record_mut(i), ERROR_COUNTER, value);
    }

    /// The recorded error history, newest first.
    #[must_use]
    pub fn error_history(&self, i: usize) -> [u8; ERROR_HISTORY_LEN] {
        let rec = self.region.record(i);
        let mut out = [0u8; ERROR_HISTORY_LEN];
        out.copy_from_slice(&rec[ERROR_HISTORY..ERROR_HISTORY + ERROR_HISTORY_LEN]);
        out
    }

    /// Shifts the history right and records `code` at the front. Call under
    /// the `LOCK_EC` guard. Offline hosts record zero instead.
    pub fn push_error_history(&mut self, i: usize, code: u8) {
        let offline = self.host_status(i) & host_status::OFFLINE != 0;
        let rec = self.region.record_mut(i);
        let hist = &mut rec[ERROR_HISTORY..ERROR_HISTORY + ERROR_HISTORY_LEN];
        hist.copy_within(0..ERROR_HISTORY_LEN - 1, 1);
        hist[0] = if offline { 0 } else { code };
    }

    /// Zeroes the error history under the caller's `LOCK_EC` guard.
    pub fn clear_error_history(&mut self, i: usize) {
        let rec = self.region.record_mut(i);
        rec[ERROR_HISTORY..ERROR_HISTORY + ERROR_HISTORY_LEN].fill(0);
    }

    /// Successful-retry counter driving temp-toggle.
    #[must_use]
    pub fn successful_retries(&self, i: usize) -> u32 {
        read_u32(self.region.record(i), SUCCESSFUL_RETRIES)
    }

    /// Sets the successful-retry counter.
    pub fn set_successful_retries(&mut self, i: usize, value: u32) {
        write_u32(self.region.record_mut(i), SUCCESSFUL_RETRIES, value);
    }

    /// Failures tolerated on the primary before toggling.
    #[must_use]
    pub fn max_successful_retries(&self, i: usize) -> u32 {
        read_u32(self.region.record(i), MAX_SUCCESSFUL_RETRIES)
    }

    /// Seconds between retries while failing.
    #[must_use]
    pub fn retry_interval(&self, i: usize) -> u32 {
        read_u32(self.region.record(i), RETRY_INTERVAL)
    }

    /// Per-transfer timeout in seconds.
    #[must_use]
    pub fn transfer_timeout(&self, i: usize) -> u32 {
        read_u32(self.region.record(i), TRANSFER_TIMEOUT)
    }

    /// Keep-connected window for bursting, in seconds.
    #[must_use]
    pub fn keep_connected(&self, i: usize) -> u32 {
        read_u32(self.region.record(i), KEEP_CONNECTED)
    }

    /// Host-wide rate limit in bytes per second; 0 = unlimited.
    #[must_use]
    pub fn transfer_rate_limit(&self, i: usize) -> u64 {
        read_u64(self.region.record(i), TRANSFER_RATE_LIMIT)
    }

    /// The share each active worker may use, recomputed by the dispatcher.
    #[must_use]
    pub fn trl_per_process(&self, i: usize) -> u64 {
        read_u64(self.region.record(i), TRL_PER_PROCESS)
    }

    /// Publishes a recomputed per-process share.
    pub fn set_trl_per_process(&mut self, i: usize, value: u64) {
        write_u64(self.region.record_mut(i), TRL_PER_PROCESS, value);
    }

    /// Rate-limit group index, if grouped.
    #[must_use]
    pub fn trl_group(&self, i: usize) -> Option<u32> {
        let v = read_i32(self.region.record(i), TRL_GROUP);
        (v >= 0).then_some(v as u32)
    }

    /// When the current error streak started; 0 = not failing.
    #[must_use]
    pub fn first_error_time(&self, i: usize) -> i64 {
        read_i64(self.region.record(i), FIRST_ERROR_TIME)
    }

    /// Records the start of an error streak (or clears it with 0).
    pub fn set_first_error_time(&mut self, i: usize, value: i64) {
        write_i64(self.region.record_mut(i), FIRST_ERROR_TIME, value);
    }

    /// Last successful connection time.
    #[must_use]
    pub fn last_connection(&self, i: usize) -> i64 {
        read_i64(self.region.record(i), LAST_CONNECTION)
    }

    /// Updates the last successful connection time.
    pub fn set_last_connection(&mut self, i: usize, value: i64) {
        write_i64(self.region.record_mut(i), LAST_CONNECTION, value);
    }

    /// Queue entries currently pending for this host.
    #[must_use]
    pub fn jobs_queued(&self, i: usize) -> u32 {
        read_u32(self.region.record(i), JOBS_QUEUED)
    }

    /// Publishes the pending-entry count.
    pub fn set_jobs_queued(&mut self, i: usize, value: u32) {
        write_u32(self.region.record_mut(i), JOBS_QUEUED, value);
    }

    /// Files known to be waiting across all pending entries.
    #[must_use]
    pub fn total_file_counter(&self, i: usize) -> u32 {
        read_u32(self.region.record(i), TOTAL_FILE_COUNTER)
    }

    /// Bytes known to be waiting across all pending entries.
    #[must_use]
    pub fn total_file_size(&self, i: usize) -> u64 {
        read_u64(self.region.record(i), TOTAL_FILE_SIZE)
    }

    /// Adjusts the waiting totals by a signed delta, saturating at zero.
    pub fn add_totals(&mut self, i: usize, files: i64, bytes: i64) {
        let rec = self.region.record_mut(i);
        let fc = i64::from(read_u32(rec, TOTAL_FILE_COUNTER)) + files;
        write_u32(rec, TOTAL_FILE_COUNTER, fc.max(0) as u32);
        let sz = read_u64(rec, TOTAL_FILE_SIZE) as i64 + bytes;
        write_u64(rec, TOTAL_FILE_SIZE, sz.max(0) as u64);
    }

    // --- slot accessors ---------------------------------------------------

    fn slot_off(k: usize) -> usize {
        assert!(k < MAX_SLOTS, "slot index out of range");
        SLOTS + k * SLOT_SIZE
    }

    /// Connect status of slot `k`.
    #[must_use]
    pub fn connect_status(&self, i: usize, k: usize) -> ConnectStatus {
        ConnectStatus::from_u8(self.region.record(i)[Self::slot_off(k) + slot::CONNECT_STATUS])
    }

    /// Publishes a new connect status.
    pub fn set_connect_status(&mut self, i: usize, k: usize, status: ConnectStatus) {
        self.region.record_mut(i)[Self::slot_off(k) + slot::CONNECT_STATUS] = status as u8;
    }

    /// Worker process id in slot `k`; negative = free.
    #[must_use]
    pub fn slot_pid(&self, i: usize, k: usize) -> i32 {
        read_i32(self.region.record(i), Self::slot_off(k) + slot::PROC_ID)
    }

    /// Records (or clears, with -1) the worker pid.
    pub fn set_slot_pid(&mut self, i: usize, k: usize, pid: i32) {
        write_i32(self.region.record_mut(i), Self::slot_off(k) + slot::PROC_ID, pid);
    }

    /// Job-id the slot is working on.
    #[must_use]
    pub fn slot_job_id(&self, i: usize, k: usize) -> JobId {
        JobId(read_u32(self.region.record(i), Self::slot_off(k) + slot::JOB_ID))
    }

    /// Publishes the slot's job-id.
    pub fn set_slot_job_id(&mut self, i: usize, k: usize, job_id: JobId) {
        write_u32(self.region.record_mut(i), Self::slot_off(k) + slot::JOB_ID, job_id.0);
    }

    /// (files assigned, files done) counters.
    #[must_use]
    pub fn slot_files(&self, i: usize, k: usize) -> (u32, u32) {
        let rec = self.region.record(i);
        let off = Self::slot_off(k);
        (
            read_u32(rec, off + slot::FILES_ASSIGNED),
            read_u32(rec, off + slot::FILES_DONE),
        )
    }

    /// Publishes the file counters.
    pub fn set_slot_files(&mut self, i: usize, k: usize, assigned: u32, done: u32) {
        let rec = self.region.record_mut(i);
        let off = Self::slot_off(k);
        write_u32(rec, off + slot::FILES_ASSIGNED, assigned);
        write_u32(rec, off + slot::FILES_DONE, done);
    }

    /// (bytes assigned, done, in-use, in-use-done) counters.
    #[must_use]
    pub fn slot_bytes(&self, i: usize, k: usize) -> (u64, u64, u64, u64) {
        let rec = self.region.record(i);
        let off = Self::slot_off(k);
        (
            read_u64(rec, off + slot::BYTES_ASSIGNED),
            read_u64(rec, off + slot::BYTES_DONE),
            read_u64(rec, off + slot::BYTES_IN_USE),
            read_u64(rec, off + slot::BYTES_IN_USE_DONE),
        )
    }

    /// Publishes the byte counters.
    pub fn set_slot_bytes(
        &mut self,
        i: usize,
        k: usize,
        assigned: u64,
        done: u64,
        in_use: u64,
        in_use_done: u64,
    ) {
        let rec = self.region.record_mut(i);
        let off = Self::slot_off(k);
        write_u64(rec, off + slot::BYTES_ASSIGNED, assigned);
        write_u64(rec, off + slot::BYTES_DONE, done);
        write_u64(rec, off + slot::BYTES_IN_USE, in_use);
        write_u64(rec, off + slot::BYTES_IN_USE_DONE, in_use_done);
    }

    /// File name the worker is currently transferring.
    #[must_use]
    pub fn file_in_use(&self, i: usize, k: usize) -> String {
        read_str(
            self.region.record(i),
            Self::slot_off(k) + slot::FILE_IN_USE,
            slot::FILE_IN_USE_LEN,
        )
    }

    /// Publishes the file the worker is on.
    pub fn set_file_in_use(&mut self, i: usize, k: usize, name: &str) {
        write_str(
            self.region.record_mut(i),
            Self::slot_off(k) + slot::FILE_IN_USE,
            slot::FILE_IN_USE_LEN,
            name,
        );
    }

    /// Resets every published field of a slot to the free state.
    pub fn clear_slot(&mut self, i: usize, k: usize) {
        let rec = self.region.record_mut(i);
        let off = Self::slot_off(k);
        rec[off..off + SLOT_SIZE].fill(0);
        write_i32(rec, off + slot::PROC_ID, -1);
    }

    // --- burst side-channel ----------------------------------------------

    /// Burst state and nonce of slot `k`.
    #[must_use]
    pub fn burst_state(&self, i: usize, k: usize) -> (BurstState, u8) {
        let rec = self.region.record(i);
        let off = Self::slot_off(k);
        (
            BurstState::from_u8(rec[off + slot::BURST_STATE]),
            rec[off + slot::BURST_NONCE],
        )
    }

    /// Writes a burst state + nonce. Call under the slot lock only.
    pub fn set_burst_state(&mut self, i: usize, k: usize, state: BurstState, nonce: u8) {
        let rec = self.region.record_mut(i);
        let off = Self::slot_off(k);
        rec[off + slot::BURST_STATE] = state as u8;
        rec[off + slot::BURST_NONCE] = nonce;
    }

    /// The handed-off follow-up message name, if any.
    #[must_use]
    pub fn handoff_msg(&self, i: usize, k: usize) -> Option<MsgName> {
        let rec = self.region.record(i);
        let off = Self::slot_off(k) + slot::HANDOFF_MSG;
        let mut buf = [0u8; slot::HANDOFF_MSG_LEN];
        buf.copy_from_slice(&rec[off..off + slot::HANDOFF_MSG_LEN]);
        MsgName::from_fixed(&buf).ok().flatten()
    }

    /// Writes the follow-up message name. Call under the slot lock only.
    pub fn set_handoff_msg(&mut self, i: usize, k: usize, msg: &MsgName) {
        let rec = self.region.record_mut(i);
        let off = Self::slot_off(k) + slot::HANDOFF_MSG;
        rec[off..off + slot::HANDOFF_MSG_LEN].copy_from_slice(&msg.to_fixed());
    }

    // --- range locks ------------------------------------------------------

    /// Locks the error counter + history of host `i`.
    pub fn lock_error_counter(&self, i: usize) -> io::Result<RegionGuard> {
        self.lock_at(i, lock_offset::LOCK_EC, 4 + ERROR_HISTORY_LEN as u64)
    }

    /// Locks the host status bits of host `i`.
    pub fn lock_host_status(&self, i: usize) -> io::Result<RegionGuard> {
        self.lock_at(i, lock_offset::LOCK_HS, 4)
    }

    /// Locks connection allocation of host `i`.
    pub fn lock_connection(&self, i: usize) -> io::Result<RegionGuard> {
        self.lock_at(i, lock_offset::LOCK_CON, 4)
    }

    /// Locks one job slot of host `i`.
    pub fn lock_slot(&self, i: usize, k: usize) -> io::Result<RegionGuard> {
        self.lock_at(i, Self::slot_off(k), SLOT_SIZE as u64)
    }

    fn lock_at(&self, i: usize, rel: usize, len: u64) -> io::Result<RegionGuard> {
        let start = (self.region.record_offset(i) + rel) as u64;
        lock_region(self.region.file(), LockKind::Exclusive, start, len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed(alias: &str) -> HostSeed {
        HostSeed {
            alias: alias.into(),
            display_name: None,
            hostname: format!("{alias}.example"),
            hostname_secondary: None,
            allowed_transfers: 3,
            retry_interval: 120,
            transfer_timeout: 60,
            keep_connected: 0,
            max_successful_retries: 0,
            transfer_rate_limit: 0,
            trl_group: None,
            protocol_options: 0,
        }
    }

    fn area(hosts: &[HostSeed]) -> (tempfile::TempDir, Hsa) {
        let tmp = tempfile::tempdir().expect("tempdir");
        let hsa = Hsa::create(&tmp.path().join("fsa"), hosts).expect("creates");
        (tmp, hsa)
    }

    #[test]
    fn create_populates_seed_fields() {
        let (_tmp, hsa) = area(&[seed("alpha"), seed("beta")]);
        assert_eq!(hsa.len(), 2);
        assert_eq!(hsa.alias(0), "alpha");
        assert_eq!(hsa.display_name(1), "beta");
        assert_eq!(hsa.effective_hostname(0), "alpha.example");
        assert_eq!(hsa.allowed_transfers(0), 3);
        assert_eq!(hsa.active_transfers(0), 0);
        assert_eq!(hsa.find("beta"), Some(1));
        assert_eq!(hsa.find("gamma"), None);
    }

    #[test]
    fn attach_sees_creator_writes() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("fsa");
        let mut hsa = Hsa::create(&path, &[seed("alpha")]).expect("creates");
        hsa.set_error_counter(0, 4);
        hsa.flush().expect("flushes");

        let other = Hsa::attach(&path).expect("attaches");
        assert_eq!(other.error_counter(0), 4);
    }

    #[test]
    fn slots_start_free() {
        let (_tmp, hsa) = area(&[seed("a")]);
        for k in 0..MAX_SLOTS {
            assert_eq!(hsa.slot_pid(0, k), -1);
            assert_eq!(hsa.connect_status(0, k), ConnectStatus::Disconnected);
        }
    }

    #[test]
    fn error_history_shifts_newest_first() {
        let (_tmp, mut hsa) = area(&[seed("a")]);
        hsa.push_error_history(0, 10);
        hsa.push_error_history(0, 11);
        hsa.push_error_history(0, 12);
        assert_eq!(hsa.error_history(0), [12, 11, 10, 0, 0]);
    }

    #[test]
    fn offline_host_records_zero_history() {
        let (_tmp, mut hsa) = area(&[seed("a")]);
        hsa.set_host_status_bits(0, host_status::OFFLINE);
        hsa.push_error_history(0, 42);
        assert_eq!(hsa.error_history(0), [0; ERROR_HISTORY_LEN]);
    }

    #[test]
    fn temp_toggle_switches_and_restores() {
        let mut s = seed("a");
        s.hostname_secondary = Some("a-backup.example".into());
        let (_tmp, mut hsa) = area(&[s]);

        assert_eq!(hsa.toggle(0), HostToggle::Primary);
        hsa.temp_toggle(0);
        assert_eq!(hsa.toggle(0), HostToggle::Secondary);
        assert_eq!(hsa.effective_hostname(0), "a-backup.example");
        assert!(hsa.is_temp_toggled(0));

        assert!(hsa.restore_toggle(0));
        assert_eq!(hsa.toggle(0), HostToggle::Primary);
        assert!(!hsa.is_temp_toggled(0));
        // A second restore is a no-op.
        assert!(!hsa.restore_toggle(0));
    }

    #[test]
    fn status_bits_set_and_clear() {
        let (_tmp, mut hsa) = area(&[seed("a")]);
        hsa.set_host_status_bits(0, host_status::AUTO_PAUSE_QUEUE | host_status::ERROR_QUEUE_SET);
        assert_ne!(hsa.host_status(0) & host_status::AUTO_PAUSE_QUEUE, 0);
        hsa.clear_host_status_bits(0, host_status::AUTO_PAUSE_QUEUE);
        assert_eq!(hsa.host_status(0) & host_status::AUTO_PAUSE_QUEUE, 0);
        assert_ne!(hsa.host_status(0) & host_status::ERROR_QUEUE_SET, 0);
    }

    #[test]
    fn totals_saturate_at_zero() {
        let (_tmp, mut hsa) = area(&[seed("a")]);
        hsa.add_totals(0, 2, 100);
        assert_eq!(hsa.total_file_counter(0), 2);
        assert_eq!(hsa.total_file_size(0), 100);
        hsa.add_totals(0, -5, -500);
        assert_eq!(hsa.total_file_counter(0), 0);
        assert_eq!(hsa.total_file_size(0), 0);
    }

    #[test]
    fn burst_fields_round_trip() {
        use afd_core::ids::JobId;
        let (_tmp, mut hsa) = area(&[seed("a")]);
        hsa.set_burst_state(0, 1, BurstState::Parked, 9);
        assert_eq!(hsa.burst_state(0, 1), (BurstState::Parked, 9));

        let msg = afd_core::ids::MsgName::new(JobId(5), 1, 0x100, 2, 0).expect("valid");
        hsa.set_handoff_msg(0, 1, &msg);
        assert_eq!(hsa.handoff_msg(0, 1), Some(msg));
    }

    #[test]
    fn clear_slot_resets_everything() {
        let (_tmp, mut hsa) = area(&[seed("a")]);
        hsa.set_slot_pid(0, 0, 1234);
        hsa.set_file_in_use(0, 0, "payload.bin");
        hsa.set_slot_bytes(0, 0, 10, 5, 3, 1);
        hsa.clear_slot(0, 0);
        assert_eq!(hsa.slot_pid(0, 0), -1);
        assert_eq!(hsa.file_in_use(0, 0), "");
        assert_eq!(hsa.slot_bytes(0, 0), (0, 0, 0, 0));
    }

    #[test]
    fn slot_locks_are_disjoint_per_slot() {
        let (_tmp, hsa) = area(&[seed("a")]);
        let _g0 = hsa.lock_slot(0, 0).expect("locks slot 0");
        let _g1 = hsa.lock_slot(0, 1).expect("locks slot 1");
        let _ec = hsa.lock_error_counter(0).expect("locks ec");
    }
}
