use core::fmt;
use std::sync::Arc;

use harq_config::CfgHarq;
use harq_core::tti::UL_HARQ_RTT;
use harq_core::{Direction, HarqPid, MAX_HARQ_PROC, Rnti, Tti};

use super::dl_harq::DlHarqProc;
use super::feedback::{FeedbackBoard, FeedbackHandle};
use super::harq_proc::{AckOutcome, HarqErr, HarqProcCommon, ProcCounters};
use super::ul_harq::UlHarqProc;

/// Event counters of one terminal, per direction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HarqStats {
    pub dl: ProcCounters,
    pub ul: ProcCounters,
}

impl HarqStats {
    pub fn merge(&mut self, other: &HarqStats) {
        self.dl.merge(&other.dl);
        self.ul.merge(&other.ul);
    }
}

impl fmt::Display for HarqStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (dir, c) in [("dl", &self.dl), ("ul", &self.ul)] {
            writeln!(
                f,
                "{}: new_tx={} retx={} ack={} nack={} abandoned={} overrides={} stale={}",
                dir, c.new_tx, c.retx, c.acks, c.nacks, c.abandoned, c.overrides, c.stale
            )?;
        }
        Ok(())
    }
}

/// HARQ state of one terminal: a fixed pool of downlink and uplink processes,
/// indexed by process id, plus the outcome slots the decoder writes into
pub struct HarqEntity {
    rnti: Rnti,
    dl: Box<[DlHarqProc]>,
    ul: Box<[UlHarqProc]>,
    board: Arc<FeedbackBoard>,
    max_retx: u32,
    dl_async: bool,
    pid_timeout_ttis: u32,
}

impl HarqEntity {
    pub fn new(rnti: Rnti, generation: u64, cfg: &CfgHarq) -> Result<Self, HarqErr> {
        let nof_procs = cfg.nof_procs;
        // Synchronous uplink needs the pid sent at n to come back at n + UL_HARQ_RTT
        if nof_procs == 0 || nof_procs > MAX_HARQ_PROC || UL_HARQ_RTT as usize % nof_procs != 0 {
            return Err(HarqErr::InvalidNofProcs(nof_procs));
        }
        if cfg.max_retx == 0 {
            return Err(HarqErr::InvalidMaxRetx(cfg.max_retx));
        }

        let mut dl = vec![DlHarqProc::new(); nof_procs].into_boxed_slice();
        let mut ul = vec![UlHarqProc::new(); nof_procs].into_boxed_slice();
        for (pid, (d, u)) in dl.iter_mut().zip(ul.iter_mut()).enumerate() {
            d.config(pid as HarqPid, cfg.max_retx)?;
            u.config(pid as HarqPid, cfg.max_retx)?;
        }

        Ok(Self {
            rnti,
            dl,
            ul,
            board: Arc::new(FeedbackBoard::new(rnti, generation, nof_procs)),
            max_retx: cfg.max_retx,
            dl_async: cfg.dl_async,
            pid_timeout_ttis: cfg.pid_timeout_ttis,
        })
    }

    pub fn rnti(&self) -> Rnti {
        self.rnti
    }

    pub fn generation(&self) -> u64 {
        self.board.generation()
    }

    pub fn nof_procs(&self) -> usize {
        self.dl.len()
    }

    pub fn max_retx(&self) -> u32 {
        self.max_retx
    }

    pub fn feedback_handle(&self) -> FeedbackHandle {
        FeedbackHandle::new(&self.board)
    }

    #[inline]
    fn pid_for(&self, tti: Tti) -> usize {
        tti.to_u32() as usize % self.dl.len()
    }

    pub fn get_dl_harq(&self, tti: Tti) -> &DlHarqProc {
        &self.dl[self.pid_for(tti)]
    }

    pub fn get_dl_harq_mut(&mut self, tti: Tti) -> &mut DlHarqProc {
        let pid = self.pid_for(tti);
        &mut self.dl[pid]
    }

    pub fn get_ul_harq(&self, tti: Tti) -> &UlHarqProc {
        &self.ul[self.pid_for(tti)]
    }

    pub fn get_ul_harq_mut(&mut self, tti: Tti) -> &mut UlHarqProc {
        let pid = self.pid_for(tti);
        &mut self.ul[pid]
    }

    pub fn dl_harq(&self, pid: HarqPid) -> Result<&DlHarqProc, HarqErr> {
        self.dl.get(pid as usize).ok_or(HarqErr::InvalidPid(pid))
    }

    pub fn dl_harq_mut(&mut self, pid: HarqPid) -> Result<&mut DlHarqProc, HarqErr> {
        self.dl.get_mut(pid as usize).ok_or(HarqErr::InvalidPid(pid))
    }

    pub fn ul_harq(&self, pid: HarqPid) -> Result<&UlHarqProc, HarqErr> {
        self.ul.get(pid as usize).ok_or(HarqErr::InvalidPid(pid))
    }

    pub fn ul_harq_mut(&mut self, pid: HarqPid) -> Result<&mut UlHarqProc, HarqErr> {
        self.ul.get_mut(pid as usize).ok_or(HarqErr::InvalidPid(pid))
    }

    /// Downlink process to retransmit at `tti`, if any. With asynchronous HARQ
    /// this is the process whose last attempt is the oldest.
    pub fn get_pending_dl_harq(&mut self, tti: Tti) -> Option<&mut DlHarqProc> {
        if !self.dl_async {
            let h = self.get_dl_harq_mut(tti);
            return if h.has_pending_retx(tti) { Some(h) } else { None };
        }
        self.dl
            .iter_mut()
            .filter(|h| h.has_pending_retx(tti))
            .max_by_key(|h| h.get_tti().map_or(0, |last| tti.interval(last)))
    }

    /// Downlink process free for a new transport block at `tti`, if any
    pub fn get_empty_dl_harq(&mut self, tti: Tti) -> Option<&mut DlHarqProc> {
        if !self.dl_async {
            let h = self.get_dl_harq_mut(tti);
            return if h.is_empty() { Some(h) } else { None };
        }
        self.dl.iter_mut().find(|h| h.is_empty())
    }

    /// Downlink process whose latest attempt went out at `tti_tx`
    pub fn find_dl_harq(&mut self, tti_tx: Tti) -> Option<&mut DlHarqProc> {
        self.dl.iter_mut().find(|h| h.common().is_active() && h.get_tti() == Some(tti_tx))
    }

    /// Applies a downlink ACK/NACK. Returns the size of the delivered block
    /// (0 if not delivered), or None if no process transmitted at `tti_tx`.
    pub fn set_dl_ack(&mut self, tti_tx: Tti, ack: bool) -> Option<u32> {
        let rnti = self.rnti;
        let Some(h) = self.find_dl_harq(tti_tx) else {
            tracing::debug!(tti = ?tti_tx, "rnti={} dl outcome {} for unknown transmission", rnti, ack);
            return None;
        };
        let tbs = h.get_tbs();
        match h.set_ack_for_tti(tti_tx, ack) {
            AckOutcome::Acked => Some(tbs),
            _ => Some(0),
        }
    }

    /// Applies the CRC result of the uplink block received at `tti`
    pub fn set_ul_crc(&mut self, tti: Tti, crc: bool) -> AckOutcome {
        self.get_ul_harq_mut(tti).set_ack_for_tti(tti, crc)
    }

    /// Drains the outcome slots written by the decoder. Returns the number of outcomes taken.
    pub fn apply_feedback(&mut self) -> usize {
        let mut taken = 0;
        for pid in 0..self.dl.len() {
            if let Some((tti, ack)) = self.board.take(Direction::Dl, pid as HarqPid) {
                self.dl[pid].set_ack_for_tti(tti, ack);
                taken += 1;
            }
            if let Some((tti, ack)) = self.board.take(Direction::Ul, pid as HarqPid) {
                self.ul[pid].set_ack_for_tti(tti, ack);
                taken += 1;
            }
        }
        taken
    }

    /// Resets downlink processes whose feedback never arrived, and frees uplink
    /// processes whose final attempt got no CRC
    pub fn reset_old_pending_pids(&mut self, tti: Tti) {
        for h in self.ul.iter_mut() {
            if h.expire_unanswered(tti) {
                tracing::debug!(tti = ?tti, "rnti={} ul pid={} no crc for the last attempt", self.rnti, h.get_id());
            }
        }
        for h in self.dl.iter_mut() {
            if h.is_empty() {
                continue;
            }
            let Some(last) = h.get_tti() else { continue };
            if tti.interval(last) > self.pid_timeout_ttis {
                tracing::info!(
                    tti = ?tti,
                    "rnti={} dl pid={} pending since {} without feedback, resetting",
                    self.rnti, h.get_id(), last
                );
                h.reset();
            }
        }
    }

    /// Uplink bytes transmitted but not yet confirmed
    pub fn pending_ul_old_data(&self) -> u32 {
        self.ul.iter().map(|h| h.get_pending_data()).sum()
    }

    /// Drops the in-flight byte count of uplink blocks that are delivered or abandoned
    pub fn reset_pending_data(&mut self) {
        for h in self.ul.iter_mut() {
            h.reset_pending_data();
        }
    }

    pub fn is_first_dl_tx(&self) -> bool {
        self.dl.iter().all(|h| h.nof_tx() == 0)
    }

    pub fn set_max_retx(&mut self, max_retx: u32) -> Result<(), HarqErr> {
        if max_retx == 0 {
            return Err(HarqErr::InvalidMaxRetx(max_retx));
        }
        for h in self.dl.iter_mut() {
            h.set_max_retx(max_retx)?;
        }
        for h in self.ul.iter_mut() {
            h.set_max_retx(max_retx)?;
        }
        self.max_retx = max_retx;
        Ok(())
    }

    /// Returns every process to EMPTY
    pub fn reset(&mut self) {
        for h in self.dl.iter_mut() {
            h.reset();
        }
        for h in self.ul.iter_mut() {
            h.reset();
        }
    }

    /// Stops accepting outcomes, then empties all processes
    pub fn detach(&mut self) {
        self.board.detach();
        self.reset();
        tracing::debug!("rnti={} harq entity detached", self.rnti);
    }

    pub fn stats(&self) -> HarqStats {
        let mut stats = HarqStats::default();
        for h in self.dl.iter() {
            stats.dl.merge(h.common().counters());
        }
        for h in self.ul.iter() {
            stats.ul.merge(h.common().counters());
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(nof_procs: usize, dl_async: bool) -> HarqEntity {
        let cfg = CfgHarq { nof_procs, dl_async, ..CfgHarq::default() };
        HarqEntity::new(Rnti(0x46), 1, &cfg).unwrap()
    }

    #[test]
    fn test_construction_checks() {
        let cfg = CfgHarq { nof_procs: 0, ..CfgHarq::default() };
        assert_eq!(HarqEntity::new(Rnti(0x46), 1, &cfg).err(), Some(HarqErr::InvalidNofProcs(0)));
        let cfg = CfgHarq { nof_procs: 9, ..CfgHarq::default() };
        assert!(HarqEntity::new(Rnti(0x46), 1, &cfg).is_err());
        let cfg = CfgHarq { max_retx: 0, ..CfgHarq::default() };
        assert_eq!(HarqEntity::new(Rnti(0x46), 1, &cfg).err(), Some(HarqErr::InvalidMaxRetx(0)));

        let e = entity(8, true);
        assert!(e.is_first_dl_tx());
        assert_eq!(e.dl_harq(8).err(), Some(HarqErr::InvalidPid(8)));
        for pid in 0..8 {
            assert_eq!(e.ul_harq(pid).unwrap().get_id(), pid);
        }
    }

    #[test]
    fn test_pid_by_tti() {
        let e = entity(8, false);
        assert_eq!(e.get_dl_harq(Tti::new(13)).get_id(), 5);
        assert_eq!(e.get_ul_harq(Tti::new(10239)).get_id(), 7);
        let e = entity(4, false);
        assert_eq!(e.get_ul_harq(Tti::new(10239)).get_id(), 3);
        assert_eq!(e.get_ul_harq(Tti::new(8)).get_id(), 0);
    }

    #[test]
    fn test_pool_size_must_divide_ul_rtt() {
        for nof_procs in [3, 5, 6, 7] {
            let cfg = CfgHarq { nof_procs, ..CfgHarq::default() };
            assert_eq!(HarqEntity::new(Rnti(0x46), 1, &cfg).err(), Some(HarqErr::InvalidNofProcs(nof_procs)));
        }
        for nof_procs in [1, 2, 4, 8] {
            let e = entity(nof_procs, true);
            assert_eq!(e.get_ul_harq(Tti::new(3)).get_id(), e.get_ul_harq(Tti::new(3 + UL_HARQ_RTT)).get_id());
        }
    }

    #[test]
    fn test_async_picks_oldest_pending() {
        let mut e = entity(8, true);
        for (pid, t) in [(2, 100), (5, 96), (6, 104)] {
            let h = e.dl_harq_mut(pid).unwrap();
            h.new_tx(Tti::new(t), 10, 100, 0);
            h.set_ack(false);
        }
        let h = e.get_pending_dl_harq(Tti::new(110)).unwrap();
        assert_eq!(h.get_id(), 5);

        let empty = e.get_empty_dl_harq(Tti::new(110)).unwrap();
        assert_eq!(empty.get_id(), 0);
    }

    #[test]
    fn test_sync_dl_selection() {
        let mut e = entity(8, false);
        e.get_dl_harq_mut(Tti::new(3)).new_tx(Tti::new(3), 10, 100, 0);
        assert!(e.get_empty_dl_harq(Tti::new(11)).is_none());
        assert!(e.get_pending_dl_harq(Tti::new(10)).is_none());

        assert_eq!(e.set_dl_ack(Tti::new(3), false), Some(0));
        assert_eq!(e.get_pending_dl_harq(Tti::new(11)).map(|h| h.get_id()), Some(3));
        assert!(e.get_pending_dl_harq(Tti::new(12)).is_none());

        // Without any outcome the block goes again after a round trip
        e.get_dl_harq_mut(Tti::new(4)).new_tx(Tti::new(4), 10, 100, 0);
        assert!(e.get_pending_dl_harq(Tti::new(4)).is_none());
        assert_eq!(e.get_pending_dl_harq(Tti::new(12)).map(|h| h.get_id()), Some(4));
    }

    #[test]
    fn test_dl_ack_returns_tbs() {
        let mut e = entity(8, true);
        e.dl_harq_mut(1).unwrap().new_tx(Tti::new(20), 10, 777, 0);
        assert_eq!(e.set_dl_ack(Tti::new(21), true), None);
        assert_eq!(e.set_dl_ack(Tti::new(20), true), Some(777));
        assert!(!e.is_first_dl_tx());
        assert_eq!(e.stats().dl.acks, 1);
    }

    #[test]
    fn test_old_pending_pids_reset() {
        let mut e = entity(8, true);
        e.dl_harq_mut(4).unwrap().new_tx(Tti::new(10230), 10, 100, 0);
        e.reset_old_pending_pids(Tti::new(40));
        assert!(!e.dl_harq(4).unwrap().is_empty());
        e.reset_old_pending_pids(Tti::new(41));
        assert!(e.dl_harq(4).unwrap().is_empty());
    }

    #[test]
    fn test_unanswered_last_ul_attempt_expires() {
        let cfg = CfgHarq { max_retx: 2, ..CfgHarq::default() };
        let mut e = HarqEntity::new(Rnti(0x46), 1, &cfg).unwrap();
        e.get_ul_harq_mut(Tti::new(0)).new_tx(Tti::new(0), 10, 256);
        assert_eq!(e.set_ul_crc(Tti::new(0), false), AckOutcome::Nacked);
        e.get_ul_harq_mut(Tti::new(8)).new_retx(Tti::new(8)).unwrap();
        assert_eq!(e.set_ul_crc(Tti::new(8), false), AckOutcome::Nacked);
        e.get_ul_harq_mut(Tti::new(16)).new_retx(Tti::new(16)).unwrap();

        e.reset_old_pending_pids(Tti::new(23));
        assert!(!e.get_ul_harq(Tti::new(16)).is_empty());
        assert_eq!(e.pending_ul_old_data(), 32);

        e.reset_old_pending_pids(Tti::new(24));
        assert!(e.get_ul_harq(Tti::new(24)).is_empty());
        assert_eq!(e.pending_ul_old_data(), 0);
        assert_eq!(e.stats().ul.abandoned, 1);

        assert!(!e.get_ul_harq_mut(Tti::new(24)).new_tx(Tti::new(24), 10, 256));
        assert_eq!(e.stats().ul.overrides, 0);
    }

    #[test]
    fn test_feedback_drained_once() {
        let mut e = entity(8, true);
        let handle = e.feedback_handle();
        e.dl_harq_mut(0).unwrap().new_tx(Tti::new(0), 10, 100, 0);
        e.get_ul_harq_mut(Tti::new(1)).new_tx(Tti::new(1), 10, 800);

        assert!(handle.report(Direction::Dl, 0, Tti::new(0), true));
        assert!(handle.report(Direction::Ul, 1, Tti::new(1), false));
        assert_eq!(e.apply_feedback(), 2);
        assert_eq!(e.apply_feedback(), 0);
        assert!(e.dl_harq(0).unwrap().is_empty());
        assert!(e.get_ul_harq(Tti::new(9)).has_pending_retx(Tti::new(9)));
        assert_eq!(e.pending_ul_old_data(), 100);

        e.detach();
        assert!(!handle.report(Direction::Dl, 0, Tti::new(0), true));
        assert_eq!(e.pending_ul_old_data(), 0);
    }
}
