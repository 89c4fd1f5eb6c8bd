//! Lock-free hand-over of decoding outcomes from the decoder thread to the scheduler.
//!
//! Each terminal owns one `FeedbackBoard` with a slot per (direction, process).
//! A slot is a single `AtomicU32`:
//!
//! ```text
//!  bit 31   valid
//!  bit 30   ack
//!  13..0    tti of the transmission the outcome refers to (< 10240)
//! ```
//!
//! The decoder stores into the slot, the scheduler swaps it back to 0 at the
//! start of its pass and applies the outcome with the tti stamp check.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use harq_core::{Direction, HarqPid, MAX_HARQ_PROC, Rnti, Tti};

const SLOT_VALID: u32 = 1 << 31;
const SLOT_ACK: u32 = 1 << 30;
const SLOT_TTI_MASK: u32 = (1 << 14) - 1;

#[inline]
fn pack(tti: Tti, ack: bool) -> u32 {
    let ack_bit = if ack { SLOT_ACK } else { 0 };
    SLOT_VALID | ack_bit | (tti.to_u32() & SLOT_TTI_MASK)
}

#[inline]
fn unpack(raw: u32) -> Option<(Tti, bool)> {
    if raw & SLOT_VALID == 0 {
        return None;
    }
    Some((Tti::new(raw & SLOT_TTI_MASK), raw & SLOT_ACK != 0))
}

#[inline]
fn slot_index(dir: Direction, pid: HarqPid) -> usize {
    match dir {
        Direction::Dl => pid as usize,
        Direction::Ul => MAX_HARQ_PROC + pid as usize,
    }
}

/// Outcome slots of one terminal
#[derive(Debug)]
pub struct FeedbackBoard {
    rnti: Rnti,
    generation: u64,
    nof_procs: usize,
    detached: AtomicBool,
    slots: [AtomicU32; 2 * MAX_HARQ_PROC],
}

impl FeedbackBoard {
    pub fn new(rnti: Rnti, generation: u64, nof_procs: usize) -> Self {
        Self {
            rnti,
            generation,
            nof_procs: nof_procs.min(MAX_HARQ_PROC),
            detached: AtomicBool::new(false),
            slots: std::array::from_fn(|_| AtomicU32::new(0)),
        }
    }

    pub fn rnti(&self) -> Rnti {
        self.rnti
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::Acquire)
    }

    /// From here on every report is dropped. Pending slots are cleared.
    pub fn detach(&self) {
        self.detached.store(true, Ordering::Release);
        for slot in self.slots.iter() {
            slot.store(0, Ordering::Relaxed);
        }
    }

    fn post(&self, dir: Direction, pid: HarqPid, tti: Tti, ack: bool) -> bool {
        if pid as usize >= self.nof_procs || self.is_detached() {
            return false;
        }
        self.slots[slot_index(dir, pid)].store(pack(tti, ack), Ordering::Release);
        true
    }

    /// Empties the slot and returns the outcome it held, if any
    pub fn take(&self, dir: Direction, pid: HarqPid) -> Option<(Tti, bool)> {
        if pid as usize >= self.nof_procs {
            return None;
        }
        unpack(self.slots[slot_index(dir, pid)].swap(0, Ordering::AcqRel))
    }
}

/// Handed to the decoder side on attach. Holds no strong reference, so a
/// detached terminal's board is freed even while handles are still around.
#[derive(Debug, Clone)]
pub struct FeedbackHandle {
    board: Weak<FeedbackBoard>,
    rnti: Rnti,
    generation: u64,
}

impl FeedbackHandle {
    pub fn new(board: &Arc<FeedbackBoard>) -> Self {
        Self {
            board: Arc::downgrade(board),
            rnti: board.rnti(),
            generation: board.generation(),
        }
    }

    pub fn rnti(&self) -> Rnti {
        self.rnti
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Posts a decoding outcome for the transmission of process `pid` at `tti`.
    /// Returns false if the terminal is gone or the pid is out of range.
    pub fn report(&self, dir: Direction, pid: HarqPid, tti: Tti, ack: bool) -> bool {
        let Some(board) = self.board.upgrade() else {
            tracing::debug!(tti = ?tti, "{} report for released rnti={} pid={} dropped", dir, self.rnti, pid);
            return false;
        };
        if board.generation() != self.generation {
            return false;
        }
        let posted = board.post(dir, pid, tti, ack);
        if !posted {
            tracing::debug!(tti = ?tti, "{} report for rnti={} pid={} dropped", dir, self.rnti, pid);
        }
        posted
    }
}
