//! Per-worker job slots and the burst handshake.
//!
//! Each host record carries [`MAX_SLOTS`] job slots. A slot publishes what
//! its worker is doing (connect status, current file, counters) and carries
//! the burst side-channel: one state byte plus a sequence nonce byte the
//! dispatcher bumps on every transition it makes, so a worker that reads a
//! stale state cannot act on it.
//!
//! # Handshake ordering contract
//!
//! The dispatcher may only move `Parked -> Retire` (or `-> HandedOff`,
//! `-> Idle`) while holding the slot range lock; the worker may only move
//! `Parked -> GivingUp` under the same lock. Every dispatcher transition
//! bumps the nonce; the worker passes the nonce it observed when parking,
//! and a mismatch means the dispatcher got there first. This closes the
//! lost-wakeup race where the worker decides to exit while the dispatcher
//! still believes the slot is available.

use afd_core::ids::MAX_MSG_NAME_LENGTH;

/// Job slots per host record.
pub const MAX_SLOTS: usize = 5;

// Slot field offsets.
pub(crate) const CONNECT_STATUS: usize = 0;
pub(crate) const BURST_STATE: usize = 1;
pub(crate) const BURST_NONCE: usize = 2;
pub(crate) const PROC_ID: usize = 4;
pub(crate) const JOB_ID: usize = 8;
pub(crate) const FILES_ASSIGNED: usize = 12;
pub(crate) const FILES_DONE: usize = 16;
pub(crate) const BYTES_ASSIGNED: usize = 24;
pub(crate) const BYTES_DONE: usize = 32;
pub(crate) const BYTES_IN_USE: usize = 40;
pub(crate) const BYTES_IN_USE_DONE: usize = 48;
pub(crate) const FILE_IN_USE: usize = 56;
pub(crate) const FILE_IN_USE_LEN: usize = 64;
pub(crate) const HANDOFF_MSG: usize = 120;
pub(crate) const HANDOFF_MSG_LEN: usize = MAX_MSG_NAME_LENGTH;

/// Size of one job slot within a host record.
pub const SLOT_SIZE: usize = 152;

/// What a worker connection is currently doing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ConnectStatus {
    /// No worker attached.
    #[default]
    Disconnected = 0,
    /// Worker forked, connection being established.
    Connecting = 1,
    /// Transfer in progress.
    Active = 2,
    /// Transfer in progress on a burst-reused connection.
    BurstActive = 3,
    /// Host failing; slot shows the error state.
    NotWorking = 4,
}

impl ConnectStatus {
    /// Decodes a stored byte, folding unknown values to `Disconnected`.
    #[must_use]
    pub const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connecting,
            2 => Self::Active,
            3 => Self::BurstActive,
            4 => Self::NotWorking,
            _ => Self::Disconnected,
        }
    }
}

/// The burst side-channel state byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum BurstState {
    /// Slot idle; no handshake in progress.
    #[default]
    Idle = 0,
    /// Worker finished its batch and waits for a follow-up job.
    Parked = 1,
    /// Dispatcher wrote a follow-up message name into the slot.
    HandedOff = 2,
    /// Worker gave up waiting; it will exit on its own.
    GivingUp = 3,
    /// Dispatcher asks the worker to exit now.
    Retire = 4,
}

impl BurstState {
    /// Decodes a stored byte, folding unknown values to `Idle`.
    #[must_use]
    pub const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Parked,
            2 => Self::HandedOff,
            3 => Self::GivingUp,
            4 => Self::Retire,
            _ => Self::Idle,
        }
    }
}

/// Why a handshake transition was refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransitionError {
    /// The slot is not in the state the transition starts from.
    WrongState(BurstState),
    /// The nonce moved since the caller observed the slot.
    Stale {
        /// Nonce the caller observed.
        observed: u8,
        /// Nonce currently stored.
        current: u8,
    },
}

/// Pure transition rules of the handshake, shared by both sides and by the
/// model-check test below. `(state, nonce)` is the whole protocol state.
pub mod transition {
    use super::{BurstState, TransitionError};

    /// Worker parks after finishing its batch. Valid from `Idle`.
    pub const fn park(state: BurstState, nonce: u8) -> Result<(BurstState, u8), TransitionError> {
        match state {
            BurstState::Idle => Ok((BurstState::Parked, nonce)),
            other => Err(TransitionError::WrongState(other)),
        }
    }

    /// Dispatcher hands a follow-up job to a parked worker.
    pub const fn hand_off(
        state: BurstState,
        nonce: u8,
    ) -> Result<(BurstState, u8), TransitionError> {
        match state {
            BurstState::Parked => Ok((BurstState::HandedOff, nonce.wrapping_add(1))),
            other => Err(TransitionError::WrongState(other)),
        }
    }

    /// Dispatcher found no follow-up job; slot returns to idle.
    pub const fn release(
        state: BurstState,
        nonce: u8,
    ) -> Result<(BurstState, u8), TransitionError> {
        match state {
            BurstState::Parked => Ok((BurstState::Idle, nonce.wrapping_add(1))),
            other => Err(TransitionError::WrongState(other)),
        }
    }

    /// Dispatcher asks a parked worker to exit.
    pub const fn retire(
        state: BurstState,
        nonce: u8,
    ) -> Result<(BurstState, u8), TransitionError> {
        match state {
            BurstState::Parked => Ok((BurstState::Retire, nonce.wrapping_add(1))),
            other => Err(TransitionError::WrongState(other)),
        }
    }

    /// Worker times out waiting. Only valid while the slot is still parked
    /// with the nonce the worker observed when it parked; otherwise the
    /// dispatcher already acted and the worker must honour that instead.
    pub const fn give_up(
        state: BurstState,
        nonce: u8,
        observed: u8,
    ) -> Result<(BurstState, u8), TransitionError> {
        match state {
            BurstState::Parked => {
                if nonce == observed {
                    Ok((BurstState::GivingUp, nonce))
                } else {
                    Err(TransitionError::Stale {
                        observed,
                        current: nonce,
                    })
                }
            }
            other => Err(TransitionError::WrongState(other)),
        }
    }
}
