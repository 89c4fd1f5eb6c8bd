use harq_core::Rnti;

use crate::harq::harq_entity::HarqEntity;

/// Scheduler view of one attached terminal
pub struct SchedUe {
    pub harq: HarqEntity,
    /// Downlink bytes waiting for a first transmission
    pub dl_buffer: u32,
    /// Uplink bytes last reported in a buffer status report
    pub ul_bsr: u32,
}

impl SchedUe {
    pub fn new(harq: HarqEntity) -> Self {
        Self { harq, dl_buffer: 0, ul_bsr: 0 }
    }

    pub fn rnti(&self) -> Rnti {
        self.harq.rnti()
    }

    /// Reported uplink bytes not already in flight
    pub fn pending_ul_new_data(&self) -> u32 {
        self.ul_bsr.saturating_sub(self.harq.pending_ul_old_data())
    }
}
