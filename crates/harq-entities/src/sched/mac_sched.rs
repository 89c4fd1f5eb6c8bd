use core::fmt;
use std::collections::BTreeMap;

use harq_config::{MAX_MCS, SharedConfig, StackConfig};
use harq_core::alloc::{AllocErr, nof_rbg, rbg_size};
use harq_core::tti::NOF_SF_X_FRAME;
use harq_core::{PrbUsage, RbgMask, Rnti, Tti, UlAlloc};

use crate::harq::dl_harq::DlHarqProc;
use crate::harq::feedback::FeedbackHandle;
use crate::harq::harq_entity::{HarqEntity, HarqStats};
use crate::harq::harq_proc::{AckOutcome, HarqErr, HarqProcCommon};
use crate::harq::ul_harq::UlHarqProc;

use super::link_adapt::{LinkAdapt, tbs_bits};
use super::sched_result::{DlGrant, Phich, SchedResult, UlGrant};
use super::sched_ue::SchedUe;

/// CCEs taken by one DCI
pub const PDCCH_AGGR_LEVEL: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedErr {
    UnknownRnti(Rnti),
    /// Not usable as a C-RNTI
    InvalidRnti(Rnti),
    InvalidMcs(u32),
    /// Another Msg3 already holds this uplink subframe
    Msg3Busy(Tti),
    Harq(HarqErr),
    Alloc(AllocErr),
}

impl fmt::Display for SchedErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedErr::UnknownRnti(rnti) => write!(f, "unknown rnti {}", rnti),
            SchedErr::InvalidRnti(rnti) => write!(f, "rnti {} is not a C-RNTI", rnti),
            SchedErr::InvalidMcs(mcs) => write!(f, "invalid mcs {}", mcs),
            SchedErr::Msg3Busy(tti) => write!(f, "msg3 already scheduled at {}", tti),
            SchedErr::Harq(e) => write!(f, "{}", e),
            SchedErr::Alloc(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for SchedErr {}

impl From<HarqErr> for SchedErr {
    fn from(e: HarqErr) -> Self {
        SchedErr::Harq(e)
    }
}

impl From<AllocErr> for SchedErr {
    fn from(e: AllocErr) -> Self {
        SchedErr::Alloc(e)
    }
}

#[derive(Debug, Clone, Copy)]
struct PendingMsg3 {
    rnti: Rnti,
    tti: Tti,
    alloc: UlAlloc,
    mcs: u32,
}

/// Hands out PDCCH locations for one TTI. One CCE per PRB approximates a
/// control region of three OFDM symbols.
struct CceAlloc {
    next: u32,
    nof_cce: u32,
}

impl CceAlloc {
    fn new(nof_prb: u32) -> Self {
        Self { next: 0, nof_cce: nof_prb }
    }

    fn alloc(&mut self) -> Option<u32> {
        if self.next + PDCCH_AGGR_LEVEL > self.nof_cce {
            return None;
        }
        let n_cce = self.next;
        self.next += PDCCH_AGGR_LEVEL;
        Some(n_cce)
    }
}

fn dl_grant(rnti: Rnti, h: &DlHarqProc) -> DlGrant {
    DlGrant {
        rnti,
        pid: h.get_id(),
        ndi: h.get_ndi(),
        rv: h.get_rv(),
        mcs: h.get_mcs(),
        tbs: h.get_tbs(),
        rbg_mask: h.get_rbgmask(),
        n_cce: h.get_n_cce(),
        is_retx: h.nof_retx() > 0,
    }
}

fn ul_grant(rnti: Rnti, h: &UlHarqProc, n_cce: Option<u32>) -> UlGrant {
    UlGrant {
        rnti,
        pid: h.get_id(),
        ndi: h.get_ndi(),
        rv: h.get_rv(),
        mcs_field: h.grant_mcs_field(),
        tbs: h.get_tbs(),
        alloc: h.get_alloc(),
        n_cce,
        is_msg3: h.is_msg3(),
        is_retx: h.nof_retx() > 0,
    }
}

/// Per-TTI MAC scheduler. Round robin over the attached terminals, first fit
/// on resources, with HARQ retransmissions served before new data.
pub struct MacScheduler {
    config: SharedConfig,
    la: LinkAdapt,
    ues: BTreeMap<Rnti, SchedUe>,
    next_generation: u64,
    /// Msg3 grants from random access responses, indexed by subframe
    pending_msg3: [Option<PendingMsg3>; NOF_SF_X_FRAME as usize],
    /// Uplink PRB occupancy at the start of every TTI (PUCCH edges reserved)
    ul_base: PrbUsage,
    rr_offset: usize,
    max_retx: u32,
    /// Counters of terminals that already detached
    retired: HarqStats,
}

impl MacScheduler {
    pub fn new(config: SharedConfig) -> Result<Self, SchedErr> {
        let cfg = config.config();
        let nof_prb = cfg.cell.nof_prb;
        let nrb_pucch = cfg.cell.nrb_pucch;

        let mut ul_base = PrbUsage::new(nof_prb)?;
        if nrb_pucch > 0 {
            ul_base.reserve(UlAlloc::new(0, nrb_pucch))?;
            ul_base.reserve(UlAlloc::new(nof_prb - nrb_pucch, nrb_pucch))?;
        }

        let max_retx = config.effective_max_retx();
        Ok(Self {
            la: LinkAdapt::new(&cfg.sched),
            config,
            ues: BTreeMap::new(),
            next_generation: 1,
            pending_msg3: [None; NOF_SF_X_FRAME as usize],
            ul_base,
            rr_offset: 0,
            max_retx,
            retired: HarqStats::default(),
        })
    }

    /// Creates the HARQ entity of a terminal. The returned handle is what the
    /// decoder side uses to report outcomes. Attaching an RNTI that is already
    /// known replaces its entity; handles of the old one go dead.
    pub fn ue_attach(&mut self, rnti: Rnti) -> Result<FeedbackHandle, SchedErr> {
        if !rnti.is_crnti() {
            return Err(SchedErr::InvalidRnti(rnti));
        }
        if self.ues.contains_key(&rnti) {
            tracing::warn!("rnti={} attached again, dropping previous HARQ state", rnti);
            self.ue_detach(rnti);
        }

        let cfg = self.config.config();
        let mut harq = HarqEntity::new(rnti, self.next_generation, &cfg.harq)?;
        harq.set_max_retx(self.max_retx)?;
        self.next_generation += 1;

        let handle = harq.feedback_handle();
        tracing::info!("rnti={} attached, generation {}", rnti, harq.generation());
        self.ues.insert(rnti, SchedUe::new(harq));
        self.config.state_write().nof_attached = self.ues.len();
        Ok(handle)
    }

    /// Removes a terminal. Outcomes still in flight for it are dropped.
    pub fn ue_detach(&mut self, rnti: Rnti) -> Option<HarqStats> {
        let mut ue = self.ues.remove(&rnti)?;
        ue.harq.detach();

        for slot in self.pending_msg3.iter_mut() {
            if slot.is_some_and(|m| m.rnti == rnti) {
                *slot = None;
            }
        }

        let stats = ue.harq.stats();
        self.retired.merge(&stats);
        self.config.state_write().nof_attached = self.ues.len();
        tracing::info!("rnti={} detached", rnti);
        Some(stats)
    }

    fn ue_mut(&mut self, rnti: Rnti) -> Result<&mut SchedUe, SchedErr> {
        self.ues.get_mut(&rnti).ok_or(SchedErr::UnknownRnti(rnti))
    }

    /// Downlink bytes queued for the terminal
    pub fn dl_buffer_state(&mut self, rnti: Rnti, bytes: u32) -> Result<(), SchedErr> {
        self.ue_mut(rnti)?.dl_buffer = bytes;
        Ok(())
    }

    /// Uplink buffer status report
    pub fn ul_bsr(&mut self, rnti: Rnti, bytes: u32) -> Result<(), SchedErr> {
        self.ue_mut(rnti)?.ul_bsr = bytes;
        Ok(())
    }

    /// Books the Msg3 granted in a random access response
    pub fn rar_grant(&mut self, rnti: Rnti, msg3_tti: Tti, alloc: UlAlloc, mcs: u32) -> Result<(), SchedErr> {
        if !self.ues.contains_key(&rnti) {
            return Err(SchedErr::UnknownRnti(rnti));
        }
        if mcs > MAX_MCS {
            return Err(SchedErr::InvalidMcs(mcs));
        }
        let cfg = self.config.config();
        let limit = cfg.cell.nof_prb - cfg.cell.nrb_pucch;
        if alloc.is_empty() || alloc.rb_start < cfg.cell.nrb_pucch || alloc.rb_end() > limit {
            return Err(SchedErr::Alloc(AllocErr::OutOfRange { start: alloc.rb_start, len: alloc.len, limit }));
        }

        let slot = &mut self.pending_msg3[msg3_tti.sf_idx() as usize];
        if slot.is_some() {
            return Err(SchedErr::Msg3Busy(msg3_tti));
        }
        *slot = Some(PendingMsg3 { rnti, tti: msg3_tti, alloc, mcs });
        tracing::debug!(tti = ?msg3_tti, "rnti={} msg3 booked at {} mcs={}", rnti, alloc, mcs);
        Ok(())
    }

    /// Downlink ACK/NACK delivered directly instead of through a feedback handle
    pub fn dl_ack_info(&mut self, rnti: Rnti, tti_tx: Tti, ack: bool) -> Result<Option<u32>, SchedErr> {
        Ok(self.ue_mut(rnti)?.harq.set_dl_ack(tti_tx, ack))
    }

    /// Uplink CRC delivered directly instead of through a feedback handle
    pub fn ul_crc_info(&mut self, rnti: Rnti, tti: Tti, crc: bool) -> Result<AckOutcome, SchedErr> {
        Ok(self.ue_mut(rnti)?.harq.set_ul_crc(tti, crc))
    }

    pub fn nof_ues(&self) -> usize {
        self.ues.len()
    }

    pub fn rntis(&self) -> Vec<Rnti> {
        self.ues.keys().copied().collect()
    }

    pub fn harq(&self, rnti: Rnti) -> Option<&HarqEntity> {
        self.ues.get(&rnti).map(|ue| &ue.harq)
    }

    pub fn harq_mut(&mut self, rnti: Rnti) -> Option<&mut HarqEntity> {
        self.ues.get_mut(&rnti).map(|ue| &mut ue.harq)
    }

    /// Counters over every terminal seen so far, attached or not
    pub fn stats(&self) -> HarqStats {
        let mut stats = self.retired;
        for ue in self.ues.values() {
            stats.merge(&ue.harq.stats());
        }
        stats
    }

    /// Picks up a changed retransmission ceiling from the shared state
    fn sync_max_retx(&mut self) {
        let max_retx = self.config.effective_max_retx();
        if max_retx == self.max_retx {
            return;
        }
        tracing::info!("max_retx changed from {} to {}", self.max_retx, max_retx);
        for ue in self.ues.values_mut() {
            if let Err(e) = ue.harq.set_max_retx(max_retx) {
                tracing::warn!("rnti={} keeping max_retx: {}", ue.rnti(), e);
            }
        }
        self.max_retx = max_retx;
    }

    fn rr_order(&self) -> Vec<Rnti> {
        let mut order: Vec<Rnti> = self.ues.keys().copied().collect();
        if !order.is_empty() {
            let len = order.len();
            order.rotate_left(self.rr_offset % len);
        }
        order
    }

    /// Runs one scheduling pass
    pub fn tick(&mut self, tti: Tti) -> SchedResult {
        let cfg = self.config.config();
        self.sync_max_retx();
        let mut result = SchedResult::new(tti);

        for ue in self.ues.values_mut() {
            ue.harq.apply_feedback();
            ue.harq.reset_old_pending_pids(tti);
        }

        for ue in self.ues.values_mut() {
            let rnti = ue.rnti();
            if let Some(ack) = ue.harq.get_ul_harq_mut(tti).take_pending_ack() {
                result.phich.push(Phich { rnti, ack });
            }
        }

        let order = self.rr_order();
        self.rr_offset = self.rr_offset.wrapping_add(1);

        let mut cce = CceAlloc::new(cfg.cell.nof_prb);
        self.sched_ul(tti, &cfg, &order, &mut cce, &mut result);
        self.sched_dl(tti, &cfg, &order, &mut cce, &mut result);

        for ue in self.ues.values_mut() {
            ue.harq.reset_pending_data();
        }

        for g in result.ul.iter() {
            tracing::debug!(tti = ?tti, "{}", g);
        }
        for g in result.dl.iter() {
            tracing::debug!(tti = ?tti, "{}", g);
        }
        result
    }

    fn sched_msg3(&mut self, tti: Tti, cfg: &StackConfig, usage: &mut PrbUsage, result: &mut SchedResult) -> Option<Rnti> {
        let idx = tti.sf_idx() as usize;
        let msg3 = self.pending_msg3[idx]?;
        if msg3.tti != tti {
            if tti.diff(msg3.tti) > 0 {
                tracing::warn!(tti = ?tti, "rnti={} msg3 booked for {} was missed", msg3.rnti, msg3.tti);
                self.pending_msg3[idx] = None;
            }
            return None;
        }
        self.pending_msg3[idx] = None;

        let Some(ue) = self.ues.get_mut(&msg3.rnti) else {
            return None;
        };
        if let Err(e) = usage.reserve(msg3.alloc) {
            tracing::warn!(tti = ?tti, "rnti={} msg3 dropped: {}", msg3.rnti, e);
            return None;
        }

        let h = ue.harq.get_ul_harq_mut(tti);
        if let Err(e) = h.set_max_retx(cfg.harq.max_msg3_retx) {
            tracing::warn!("rnti={} msg3 keeps max_retx: {}", msg3.rnti, e);
        }
        h.set_alloc(msg3.alloc);
        h.set_rar_mcs(msg3.mcs);
        let mcs = h.resolve_new_tx_mcs(self.la.ul_mcs());
        h.new_tx(tti, mcs, tbs_bits(mcs, msg3.alloc.len));
        result.ul.push(ul_grant(msg3.rnti, h, None));
        Some(msg3.rnti)
    }

    fn sched_ul(&mut self, tti: Tti, cfg: &StackConfig, order: &[Rnti], cce: &mut CceAlloc, result: &mut SchedResult) {
        let mut usage = self.ul_base.clone();
        let msg3_rnti = self.sched_msg3(tti, cfg, &mut usage, result);

        for &rnti in order {
            if msg3_rnti == Some(rnti) {
                continue;
            }
            let Some(ue) = self.ues.get_mut(&rnti) else { continue };
            let new_data = ue.pending_ul_new_data();
            let max_retx = ue.harq.max_retx();
            let h = ue.harq.get_ul_harq_mut(tti);

            if h.has_pending_retx(tti) {
                let prev = h.get_alloc();
                let n_cce = if usage.is_free(prev) {
                    h.same_alloc();
                    None
                } else {
                    // Same size elsewhere, signalled with a DCI
                    let Some(alloc) = usage.find_contiguous(prev.len) else {
                        tracing::debug!(tti = ?tti, "rnti={} ul retx pid={} postponed, no room", rnti, h.get_id());
                        continue;
                    };
                    let Some(n_cce) = cce.alloc() else { continue };
                    h.set_alloc(alloc);
                    Some(n_cce)
                };
                if let Err(e) = usage.reserve(h.get_alloc()) {
                    tracing::warn!(tti = ?tti, "rnti={} ul retx: {}", rnti, e);
                    continue;
                }
                match h.new_retx(tti) {
                    Ok(_) => result.ul.push(ul_grant(rnti, h, n_cce)),
                    Err(e) => tracing::warn!(tti = ?tti, "rnti={} ul retx: {}", rnti, e),
                }
                continue;
            }

            if !h.is_empty() || new_data == 0 {
                continue;
            }
            let mcs = h.resolve_new_tx_mcs(self.la.ul_mcs());
            let want = self.la.ul_prbs_for(mcs, new_data, cfg.sched.max_ul_prb_per_ue);
            let Some(alloc) = (1..=want).rev().find_map(|len| usage.find_contiguous(len)) else {
                continue;
            };
            let Some(n_cce) = cce.alloc() else { continue };
            if let Err(e) = usage.reserve(alloc) {
                tracing::warn!(tti = ?tti, "rnti={} ul new tx: {}", rnti, e);
                continue;
            }
            // Back to the ordinary ceiling after a Msg3
            if h.max_retx() != max_retx {
                if let Err(e) = h.set_max_retx(max_retx) {
                    tracing::warn!("rnti={} {}", rnti, e);
                }
            }
            h.set_alloc(alloc);
            h.new_tx(tti, mcs, tbs_bits(mcs, alloc.len));
            result.ul.push(ul_grant(rnti, h, Some(n_cce)));
        }
    }

    fn sched_dl(&mut self, tti: Tti, cfg: &StackConfig, order: &[Rnti], cce: &mut CceAlloc, result: &mut SchedResult) {
        let nof_prb = cfg.cell.nof_prb;
        let n_rbg = nof_rbg(nof_prb);
        let p = rbg_size(nof_prb);
        let mut used = RbgMask::EMPTY;

        for &rnti in order {
            let Some(ue) = self.ues.get_mut(&rnti) else { continue };

            if let Some(h) = ue.harq.get_pending_dl_harq(tti) {
                // A retransmission keeps its groups, or waits
                let mask = h.get_rbgmask();
                if mask.overlaps(used) {
                    tracing::debug!(tti = ?tti, "rnti={} dl retx pid={} postponed, {} busy", rnti, h.get_id(), mask);
                    continue;
                }
                let Some(n_cce) = cce.alloc() else { continue };
                match h.new_retx(tti, n_cce) {
                    Ok(_) => {
                        used = used.union(mask);
                        result.dl.push(dl_grant(rnti, h));
                    }
                    Err(e) => tracing::warn!(tti = ?tti, "rnti={} dl retx: {}", rnti, e),
                }
                continue;
            }

            if ue.dl_buffer == 0 {
                continue;
            }
            let want = self.la.dl_rbgs_for(ue.dl_buffer, p, cfg.sched.max_dl_rbg_per_ue);
            let Some(mask) = RbgMask::first_fit(used, want, n_rbg) else { continue };
            let mcs = self.la.dl_mcs();
            let Some(h) = ue.harq.get_empty_dl_harq(tti) else { continue };
            let Some(n_cce) = cce.alloc() else { continue };

            let tbs = tbs_bits(mcs, mask.nof_prb(nof_prb));
            h.set_rbgmask(mask);
            h.new_tx(tti, mcs, tbs, n_cce);
            used = used.union(mask);
            result.dl.push(dl_grant(rnti, h));
            ue.dl_buffer = ue.dl_buffer.saturating_sub(tbs / 8);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sched() -> MacScheduler {
        MacScheduler::new(SharedConfig::from_config(StackConfig::new(25))).unwrap()
    }

    #[test]
    fn test_cce_exhaustion() {
        let mut cce = CceAlloc::new(6);
        assert_eq!(cce.alloc(), Some(0));
        assert_eq!(cce.alloc(), Some(2));
        assert_eq!(cce.alloc(), Some(4));
        assert_eq!(cce.alloc(), None);
    }

    #[test]
    fn test_attach_rules() {
        let mut s = sched();
        assert_eq!(s.ue_attach(Rnti(0)).err(), Some(SchedErr::InvalidRnti(Rnti(0))));
        let h1 = s.ue_attach(Rnti(0x46)).unwrap();
        let h2 = s.ue_attach(Rnti(0x46)).unwrap();
        assert_ne!(h1.generation(), h2.generation());
        assert_eq!(s.nof_ues(), 1);
        assert_eq!(s.dl_buffer_state(Rnti(0x47), 10), Err(SchedErr::UnknownRnti(Rnti(0x47))));
    }

    #[test]
    fn test_rar_grant_checks() {
        let mut s = sched();
        s.ue_attach(Rnti(0x46)).unwrap();
        s.ue_attach(Rnti(0x47)).unwrap();
        // PUCCH occupies PRBs 0..2 and 23..25
        assert!(s.rar_grant(Rnti(0x46), Tti::new(6), UlAlloc::new(0, 3), 4).is_err());
        assert!(s.rar_grant(Rnti(0x46), Tti::new(6), UlAlloc::new(2, 3), 29).is_err());
        assert!(s.rar_grant(Rnti(0x46), Tti::new(6), UlAlloc::new(2, 3), 4).is_ok());
        assert_eq!(
            s.rar_grant(Rnti(0x47), Tti::new(16), UlAlloc::new(8, 3), 4),
            Err(SchedErr::Msg3Busy(Tti::new(16)))
        );
    }
}
