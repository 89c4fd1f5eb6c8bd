use harq_core::tti::DL_HARQ_RTT;
use harq_core::{Direction, HarqPid, RbgMask, Tti};

use super::harq_proc::{HarqErr, HarqProc, HarqProcCommon};

/// Downlink HARQ process. The RBG mask chosen for the first transmission is
/// reused unchanged by every retransmission of the same block.
#[derive(Debug, Clone)]
pub struct DlHarqProc {
    common: HarqProc,
    rbg_mask: RbgMask,
    n_cce: u32,
}

impl DlHarqProc {
    pub fn new() -> Self {
        Self {
            common: HarqProc::new(Direction::Dl),
            rbg_mask: RbgMask::EMPTY,
            n_cce: 0,
        }
    }

    pub fn config(&mut self, id: HarqPid, max_retx: u32) -> Result<(), HarqErr> {
        self.common.config(id, max_retx)
    }

    pub fn reset(&mut self) {
        self.common.reset();
        self.rbg_mask = RbgMask::EMPTY;
        self.n_cce = 0;
    }

    /// Returns true if an unacknowledged block was superseded
    pub fn new_tx(&mut self, tti: Tti, mcs: u32, tbs: u32, n_cce: u32) -> bool {
        self.n_cce = n_cce;
        self.common.new_tx_common(tti, mcs, tbs)
    }

    /// Retransmits on the stored RBG mask. The control channel location may change.
    pub fn new_retx(&mut self, tti: Tti, n_cce: u32) -> Result<(u32, u32), HarqErr> {
        let replay = self.common.new_retx_common(tti)?;
        self.n_cce = n_cce;
        Ok(replay)
    }

    /// A retransmission is due once a NACK was applied, or blindly once a full
    /// round trip passed without any outcome for the last attempt
    pub fn has_pending_retx(&self, tti: Tti) -> bool {
        if !self.common.has_pending_retx_common() {
            return false;
        }
        match self.common.get_tti() {
            Some(last) => self.common.has_feedback() || tti.interval(last) >= DL_HARQ_RTT,
            None => false,
        }
    }

    pub fn set_rbgmask(&mut self, mask: RbgMask) {
        harq_core::assert_warn!(
            !self.common.has_pending_retx_common(),
            "dl pid={} rbg mask changed while a retransmission is pending",
            self.common.get_id()
        );
        self.rbg_mask = mask;
    }

    pub fn get_rbgmask(&self) -> RbgMask {
        self.rbg_mask
    }

    pub fn get_n_cce(&self) -> u32 {
        self.n_cce
    }
}

impl Default for DlHarqProc {
    fn default() -> Self {
        Self::new()
    }
}

impl HarqProcCommon for DlHarqProc {
    fn common(&self) -> &HarqProc {
        &self.common
    }
    fn common_mut(&mut self) -> &mut HarqProc {
        &mut self.common
    }
}
