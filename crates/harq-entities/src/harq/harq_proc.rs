use core::fmt;

use harq_core::{Direction, HarqPid, Tti};

/// Retransmission ceiling used until a process is configured
pub const DEFAULT_MAX_RETX: u32 = 4;

/// Redundancy version sequence cycled through over retransmissions
pub const RV_CYCLE: [u32; 4] = [0, 2, 3, 1];

/// Redundancy version for the n-th retransmission of a transport block
#[inline]
pub fn rv_idx(n_retx: u32) -> u32 {
    RV_CYCLE[(n_retx % 4) as usize]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarqErr {
    /// A process must allow at least one retransmission
    InvalidMaxRetx(u32),
    InvalidNofProcs(usize),
    InvalidPid(HarqPid),
    /// new_retx called on a process with nothing to retransmit
    NoPendingRetx(HarqPid),
}

impl fmt::Display for HarqErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HarqErr::InvalidMaxRetx(v) => write!(f, "invalid max_retx {}", v),
            HarqErr::InvalidNofProcs(v) => write!(f, "invalid number of HARQ processes {}", v),
            HarqErr::InvalidPid(pid) => write!(f, "invalid HARQ pid {}", pid),
            HarqErr::NoPendingRetx(pid) => write!(f, "HARQ pid {} has no pending retransmission", pid),
        }
    }
}

impl std::error::Error for HarqErr {}

/// Result of applying an ACK/NACK to a process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// Process was not active, nothing changed
    Ignored,
    /// Report for a transmission the process no longer holds, or a repeat of one already applied
    Stale,
    Acked,
    /// Retransmission pending
    Nacked,
    /// NACK after the last allowed retransmission. Process is empty again.
    Abandoned,
}

/// Per-process event counters, summed up by the entity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcCounters {
    pub new_tx: u64,
    pub retx: u64,
    pub acks: u64,
    pub nacks: u64,
    pub abandoned: u64,
    pub overrides: u64,
    pub stale: u64,
}

impl ProcCounters {
    pub fn merge(&mut self, other: &ProcCounters) {
        self.new_tx += other.new_tx;
        self.retx += other.retx;
        self.acks += other.acks;
        self.nacks += other.nacks;
        self.abandoned += other.abandoned;
        self.overrides += other.overrides;
        self.stale += other.stale;
    }
}

/// State shared by downlink and uplink HARQ processes
#[derive(Debug, Clone)]
pub struct HarqProc {
    id: HarqPid,
    dir: Direction,
    active: bool,
    ack: bool,
    ndi: bool,
    n_retx: u32,
    tx_count: u32,
    tti: Option<Tti>,
    last_mcs: u32,
    last_tbs: u32,
    max_retx: u32,
    /// Lower ceiling waiting for the block in flight to end
    next_max_retx: Option<u32>,
    /// Feedback for the latest (re)transmission was already applied
    fb_applied: bool,
    counters: ProcCounters,
}

impl HarqProc {
    pub fn new(dir: Direction) -> Self {
        Self {
            id: 0,
            dir,
            active: false,
            ack: false,
            ndi: false,
            n_retx: 0,
            tx_count: 0,
            tti: None,
            last_mcs: 0,
            last_tbs: 0,
            max_retx: DEFAULT_MAX_RETX,
            next_max_retx: None,
            fb_applied: false,
            counters: ProcCounters::default(),
        }
    }

    pub fn config(&mut self, id: HarqPid, max_retx: u32) -> Result<(), HarqErr> {
        self.set_max_retx(max_retx)?;
        self.id = id;
        Ok(())
    }

    pub fn set_max_retx(&mut self, max_retx: u32) -> Result<(), HarqErr> {
        if max_retx == 0 {
            return Err(HarqErr::InvalidMaxRetx(max_retx));
        }
        if self.n_retx > max_retx {
            // n_retx never exceeds the ceiling, the block in flight keeps the old one
            tracing::debug!("{} pid={} max_retx={} deferred, n_retx={}", self.dir, self.id, max_retx, self.n_retx);
            self.next_max_retx = Some(max_retx);
            return Ok(());
        }
        self.max_retx = max_retx;
        self.next_max_retx = None;
        Ok(())
    }

    fn apply_next_max_retx(&mut self) {
        if let Some(max_retx) = self.next_max_retx.take() {
            self.max_retx = max_retx;
        }
    }

    /// Back to EMPTY. The NDI is kept so that the next new transmission still toggles it.
    pub fn reset(&mut self) {
        self.active = false;
        self.ack = false;
        self.n_retx = 0;
        self.tx_count = 0;
        self.tti = None;
        self.last_mcs = 0;
        self.last_tbs = 0;
        self.fb_applied = false;
        self.apply_next_max_retx();
    }

    /// Starts a new transport block. Returns true if an unacknowledged block was superseded.
    pub fn new_tx_common(&mut self, tti: Tti, mcs: u32, tbs: u32) -> bool {
        let overridden = self.active && !self.ack;
        if overridden {
            tracing::warn!(
                tti = ?tti,
                "{} pid={} new_tx overrides unacknowledged block from {:?} (n_retx={})",
                self.dir, self.id, self.tti, self.n_retx
            );
            self.counters.overrides += 1;
        }

        self.apply_next_max_retx();
        self.active = true;
        self.ack = false;
        self.ndi = !self.ndi;
        self.n_retx = 0;
        self.tx_count += 1;
        self.tti = Some(tti);
        self.last_mcs = mcs;
        self.last_tbs = tbs;
        self.fb_applied = false;
        self.counters.new_tx += 1;

        tracing::trace!(tti = ?tti, "{} pid={} new_tx ndi={} mcs={} tbs={}", self.dir, self.id, self.ndi, mcs, tbs);
        overridden
    }

    /// Replays the stored block. Returns the (mcs, tbs) it was first sent with.
    pub fn new_retx_common(&mut self, tti: Tti) -> Result<(u32, u32), HarqErr> {
        if !self.has_pending_retx_common() {
            return Err(HarqErr::NoPendingRetx(self.id));
        }
        self.n_retx += 1;
        self.tx_count += 1;
        self.tti = Some(tti);
        self.fb_applied = false;
        self.counters.retx += 1;

        tracing::trace!(tti = ?tti, "{} pid={} new_retx n_retx={} rv={}", self.dir, self.id, self.n_retx, rv_idx(self.n_retx));
        Ok((self.last_mcs, self.last_tbs))
    }

    /// Drops the block in flight. EMPTY without a full reset: tx_count and the
    /// last stamp stay readable.
    pub fn abandon(&mut self) {
        tracing::info!(
            "{} pid={} abandoned after {} retransmissions (tbs={})",
            self.dir, self.id, self.n_retx, self.last_tbs
        );
        self.counters.abandoned += 1;
        self.active = false;
        self.ack = false;
    }

    pub fn has_pending_retx_common(&self) -> bool {
        self.active && !self.ack && self.n_retx < self.max_retx
    }

    /// Applies a decoding outcome for the latest transmission of this process
    pub fn set_ack(&mut self, ack: bool) -> AckOutcome {
        if !self.active {
            tracing::debug!("{} pid={} outcome {} on inactive process ignored", self.dir, self.id, ack);
            return AckOutcome::Ignored;
        }
        self.ack = ack;
        self.fb_applied = true;

        if ack {
            self.counters.acks += 1;
            tracing::trace!("{} pid={} ack for {:?}", self.dir, self.id, self.tti);
            return AckOutcome::Acked;
        }

        self.counters.nacks += 1;
        if self.n_retx >= self.max_retx {
            self.abandon();
            AckOutcome::Abandoned
        } else {
            tracing::trace!("{} pid={} nack n_retx={}", self.dir, self.id, self.n_retx);
            AckOutcome::Nacked
        }
    }

    /// Applies an outcome only if it refers to the transmission at `tti` and no
    /// outcome was applied for that transmission yet
    pub fn set_ack_for_tti(&mut self, tti: Tti, ack: bool) -> AckOutcome {
        if !self.active {
            return AckOutcome::Ignored;
        }
        if self.tti != Some(tti) || self.fb_applied {
            tracing::debug!(
                tti = ?tti,
                "{} pid={} stale outcome {} (holding {:?})",
                self.dir, self.id, ack, self.tti
            );
            self.counters.stale += 1;
            return AckOutcome::Stale;
        }
        self.set_ack(ack)
    }

    pub fn is_empty(&self) -> bool {
        !self.active || self.ack
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// An outcome was applied to the latest (re)transmission
    pub fn has_feedback(&self) -> bool {
        self.fb_applied
    }

    pub fn get_id(&self) -> HarqPid {
        self.id
    }

    pub fn direction(&self) -> Direction {
        self.dir
    }

    pub fn nof_tx(&self) -> u32 {
        self.tx_count
    }

    pub fn nof_retx(&self) -> u32 {
        self.n_retx
    }

    pub fn get_tti(&self) -> Option<Tti> {
        self.tti
    }

    pub fn get_ndi(&self) -> bool {
        self.ndi
    }

    pub fn get_ack(&self) -> bool {
        self.ack
    }

    pub fn get_mcs(&self) -> u32 {
        self.last_mcs
    }

    pub fn get_tbs(&self) -> u32 {
        self.last_tbs
    }

    pub fn max_retx(&self) -> u32 {
        self.max_retx
    }

    pub fn counters(&self) -> &ProcCounters {
        &self.counters
    }
}

/// Access to the common state block of a downlink or uplink process.
/// Implementors only provide the two accessors; everything else is shared.
pub trait HarqProcCommon {
    fn common(&self) -> &HarqProc;
    fn common_mut(&mut self) -> &mut HarqProc;

    fn get_id(&self) -> HarqPid {
        self.common().get_id()
    }
    fn is_empty(&self) -> bool {
        self.common().is_empty()
    }
    fn get_ndi(&self) -> bool {
        self.common().get_ndi()
    }
    fn nof_tx(&self) -> u32 {
        self.common().nof_tx()
    }
    fn nof_retx(&self) -> u32 {
        self.common().nof_retx()
    }
    fn get_tti(&self) -> Option<Tti> {
        self.common().get_tti()
    }
    fn get_ack(&self) -> bool {
        self.common().get_ack()
    }
    fn get_mcs(&self) -> u32 {
        self.common().get_mcs()
    }
    fn get_tbs(&self) -> u32 {
        self.common().get_tbs()
    }
    fn max_retx(&self) -> u32 {
        self.common().max_retx()
    }
    /// Redundancy version of the latest (re)transmission
    fn get_rv(&self) -> u32 {
        rv_idx(self.common().nof_retx())
    }
    fn set_max_retx(&mut self, max_retx: u32) -> Result<(), HarqErr> {
        self.common_mut().set_max_retx(max_retx)
    }
    fn set_ack(&mut self, ack: bool) -> AckOutcome {
        self.common_mut().set_ack(ack)
    }
    fn set_ack_for_tti(&mut self, tti: Tti, ack: bool) -> AckOutcome {
        self.common_mut().set_ack_for_tti(tti, ack)
    }
}
