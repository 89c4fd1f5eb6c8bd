use harq_core::tti::UL_HARQ_RTT;
use harq_core::{Direction, HarqPid, Tti, UlAlloc};

use super::harq_proc::{AckOutcome, HarqErr, HarqProc, HarqProcCommon};

/// MCS field value signalling an adaptive retransmission with redundancy version 0.
/// The field carries 28 + rv, the modulation order is kept from the first transmission.
pub const MCS_RETX_BASE: u32 = 28;

/// Uplink HARQ process. Uplink HARQ is synchronous: a retransmission happens
/// exactly one round trip after the previous attempt, either on the same PRBs
/// (non-adaptive, no control message) or on new ones (adaptive).
#[derive(Debug, Clone)]
pub struct UlHarqProc {
    common: HarqProc,
    alloc: UlAlloc,
    /// The allocation of the next attempt was changed with set_alloc
    is_adaptive: bool,
    is_msg3: bool,
    /// Bytes of the block in flight, not yet confirmed by a good CRC
    pending_data: u32,
    /// A PHICH answer is owed for the latest decoding outcome
    need_ack: bool,
    /// MCS granted in the random access response, consumed by the next new_tx
    rar_mcs: Option<u32>,
}

impl UlHarqProc {
    pub fn new() -> Self {
        Self {
            common: HarqProc::new(Direction::Ul),
            alloc: UlAlloc::default(),
            is_adaptive: false,
            is_msg3: false,
            pending_data: 0,
            need_ack: false,
            rar_mcs: None,
        }
    }

    pub fn config(&mut self, id: HarqPid, max_retx: u32) -> Result<(), HarqErr> {
        self.common.config(id, max_retx)
    }

    pub fn reset(&mut self) {
        self.common.reset();
        self.alloc = UlAlloc::default();
        self.is_adaptive = false;
        self.is_msg3 = false;
        self.pending_data = 0;
        self.need_ack = false;
        self.rar_mcs = None;
    }

    /// Starts a new uplink block of `tbs` bits. Consumes a pending RAR MCS override, which
    /// marks the block as Msg3. Returns true if an unacknowledged block was superseded.
    pub fn new_tx(&mut self, tti: Tti, mcs: u32, tbs: u32) -> bool {
        self.is_msg3 = self.rar_mcs.take().is_some();
        self.is_adaptive = false;
        self.need_ack = false;
        self.pending_data = tbs / 8;
        self.common.new_tx_common(tti, mcs, tbs)
    }

    pub fn new_retx(&mut self, tti: Tti) -> Result<(u32, u32), HarqErr> {
        if !self.has_pending_retx(tti) {
            return Err(HarqErr::NoPendingRetx(self.common.get_id()));
        }
        self.need_ack = false;
        self.common.new_retx_common(tti)
    }

    /// A retransmission is due once a full round trip has passed since the last attempt
    pub fn has_pending_retx(&self, tti: Tti) -> bool {
        match self.common.get_tti() {
            Some(last) => self.common.has_pending_retx_common() && tti.interval(last) >= UL_HARQ_RTT,
            None => false,
        }
    }

    /// Drops a block whose last allowed attempt got no CRC within a round trip.
    /// Returns true if the process became empty.
    pub fn expire_unanswered(&mut self, tti: Tti) -> bool {
        let c = &self.common;
        if !c.is_active() || c.get_ack() || c.has_pending_retx_common() {
            return false;
        }
        match c.get_tti() {
            Some(last) if tti.interval(last) >= UL_HARQ_RTT => {}
            _ => return false,
        }
        self.common.abandon();
        self.pending_data = 0;
        self.need_ack = false;
        true
    }

    /// Moves the next attempt to a new allocation (adaptive decision)
    pub fn set_alloc(&mut self, alloc: UlAlloc) {
        self.alloc = alloc;
        self.is_adaptive = true;
    }

    /// Keeps the stored allocation for the next attempt (non-adaptive decision)
    pub fn same_alloc(&mut self) {
        self.is_adaptive = false;
    }

    pub fn get_alloc(&self) -> UlAlloc {
        self.alloc
    }

    pub fn is_adaptive_retx(&self) -> bool {
        self.is_adaptive && self.common.is_active()
    }

    pub fn is_msg3(&self) -> bool {
        self.is_msg3
    }

    /// MCS field of the uplink grant: the real MCS for a new transmission,
    /// 28 + rv for an adaptive retransmission
    pub fn grant_mcs_field(&self) -> u32 {
        if self.common.nof_retx() > 0 {
            MCS_RETX_BASE + self.get_rv()
        } else {
            self.common.get_mcs()
        }
    }

    pub fn has_pending_ack(&self) -> bool {
        self.need_ack && self.common.is_active()
    }

    /// The PHICH value owed to the terminal, handed out once
    pub fn take_pending_ack(&mut self) -> Option<bool> {
        if !self.has_pending_ack() {
            return None;
        }
        self.need_ack = false;
        Some(self.common.get_ack())
    }

    pub fn get_pending_data(&self) -> u32 {
        self.pending_data
    }

    /// Forgets the in-flight bytes once the block is delivered or abandoned
    pub fn reset_pending_data(&mut self) {
        if self.common.is_empty() {
            self.pending_data = 0;
        }
    }

    pub fn set_rar_mcs(&mut self, mcs: u32) {
        self.rar_mcs = Some(mcs);
    }

    pub fn get_rar_mcs(&self) -> Option<u32> {
        self.rar_mcs
    }

    /// MCS for the next new transmission: the RAR override if one is pending,
    /// else the link adaptation choice
    pub fn resolve_new_tx_mcs(&self, la_mcs: u32) -> u32 {
        self.rar_mcs.unwrap_or(la_mcs)
    }

    fn arm_phich(&mut self, outcome: AckOutcome) -> AckOutcome {
        if matches!(outcome, AckOutcome::Acked | AckOutcome::Nacked) {
            self.need_ack = true;
        }
        if outcome == AckOutcome::Abandoned {
            self.pending_data = 0;
        }
        outcome
    }
}

impl Default for UlHarqProc {
    fn default() -> Self {
        Self::new()
    }
}

impl HarqProcCommon for UlHarqProc {
    fn common(&self) -> &HarqProc {
        &self.common
    }
    fn common_mut(&mut self) -> &mut HarqProc {
        &mut self.common
    }

    /// CRC result of the latest uplink attempt
    fn set_ack(&mut self, ack: bool) -> AckOutcome {
        let outcome = self.common.set_ack(ack);
        self.arm_phich(outcome)
    }

    fn set_ack_for_tti(&mut self, tti: Tti, ack: bool) -> AckOutcome {
        let outcome = self.common.set_ack_for_tti(tti, ack);
        self.arm_phich(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured() -> UlHarqProc {
        let mut h = UlHarqProc::new();
        h.config(2, 4).unwrap();
        h
    }

    #[test]
    fn test_rtt_gate() {
        let mut h = configured();
        h.set_alloc(UlAlloc::new(2, 4));
        h.new_tx(Tti::new(10236), 10, 256);
        assert_eq!(h.set_ack(false), AckOutcome::Nacked);

        assert!(!h.has_pending_retx(Tti::new(10239)));
        assert!(!h.has_pending_retx(Tti::new(3)));
        // Wraps around the end of the TTI counter
        assert!(h.has_pending_retx(Tti::new(4)));
        assert!(h.new_retx(Tti::new(3)).is_err());
        assert_eq!(h.new_retx(Tti::new(4)), Ok((10, 256)));
    }

    #[test]
    fn test_phich_answer_once() {
        let mut h = configured();
        h.new_tx(Tti::new(0), 10, 256);
        assert!(!h.has_pending_ack());
        assert_eq!(h.take_pending_ack(), None);

        h.set_ack(false);
        assert!(h.has_pending_ack());
        assert_eq!(h.take_pending_ack(), Some(false));
        assert_eq!(h.take_pending_ack(), None);

        h.new_retx(Tti::new(8)).unwrap();
        h.set_ack(true);
        assert_eq!(h.take_pending_ack(), Some(true));
    }

    #[test]
    fn test_missing_final_crc_frees_process() {
        let mut h = UlHarqProc::new();
        h.config(0, 1).unwrap();
        h.new_tx(Tti::new(0), 10, 256);
        h.set_ack(false);
        h.new_retx(Tti::new(8)).unwrap();

        // Earlier attempts still have a retransmission ahead of them
        assert!(!h.expire_unanswered(Tti::new(15)));
        assert!(h.expire_unanswered(Tti::new(16)));
        assert!(h.is_empty());
        assert_eq!(h.get_pending_data(), 0);
        assert!(!h.has_pending_ack());
        assert!(!h.expire_unanswered(Tti::new(24)));
        assert_eq!(h.set_ack_for_tti(Tti::new(8), true), AckOutcome::Ignored);
    }

    #[test]
    fn test_pending_data_tracking() {
        let mut h = configured();
        h.new_tx(Tti::new(0), 10, 256);
        assert_eq!(h.get_pending_data(), 32);

        h.set_ack(false);
        h.reset_pending_data();
        assert_eq!(h.get_pending_data(), 32);

        h.new_retx(Tti::new(8)).unwrap();
        h.set_ack(true);
        h.reset_pending_data();
        assert_eq!(h.get_pending_data(), 0);
    }

    #[test]
    fn test_adaptive_mcs_field() {
        let mut h = configured();
        h.set_alloc(UlAlloc::new(0, 4));
        h.new_tx(Tti::new(0), 12, 500);
        assert_eq!(h.grant_mcs_field(), 12);

        h.set_ack(false);
        h.set_alloc(UlAlloc::new(6, 4));
        h.new_retx(Tti::new(8)).unwrap();
        assert_eq!(h.grant_mcs_field(), 28 + 2);
        assert!(h.is_adaptive_retx());
    }
}
