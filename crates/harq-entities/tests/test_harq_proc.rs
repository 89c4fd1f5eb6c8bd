mod common;

use harq_core::{RbgMask, Tti, UlAlloc, debug};
use harq_entities::{AckOutcome, DlHarqProc, HarqErr, HarqProcCommon, UlHarqProc, rv_idx};
use common::{default_test_config, test_entity};

fn dl_proc(max_retx: u32) -> DlHarqProc {
    let mut h = DlHarqProc::new();
    h.config(0, max_retx).unwrap();
    h
}

fn ul_proc(max_retx: u32) -> UlHarqProc {
    let mut h = UlHarqProc::new();
    h.config(0, max_retx).unwrap();
    h
}

#[test]
fn test_retx_bounded_then_abandoned() {
    // max_retx=3, three NACKs are retransmitted, the fourth abandons the block
    debug::setup_logging_verbose();
    let mut h = dl_proc(3);
    h.set_rbgmask(RbgMask::from_range(0, 2));
    h.new_tx(Tti::new(0), 5, 100, 0);

    for i in 1..=3u32 {
        assert_eq!(h.set_ack(false), AckOutcome::Nacked);
        assert!(h.has_pending_retx(Tti::new(i * 8)));
        assert_eq!(h.new_retx(Tti::new(i * 8), 0), Ok((5, 100)));
        assert_eq!(h.nof_retx(), i);
        assert!(h.nof_retx() <= h.max_retx());
    }

    assert_eq!(h.set_ack(false), AckOutcome::Abandoned);
    assert!(h.is_empty());
    assert!(!h.has_pending_retx(Tti::new(32)));
    assert_eq!(h.new_retx(Tti::new(32), 0), Err(HarqErr::NoPendingRetx(0)));
    assert_eq!(h.nof_tx(), 4);
}

#[test]
fn test_ack_then_new_block_toggles_ndi() {
    debug::setup_logging_verbose();
    let mut h = dl_proc(4);
    h.new_tx(Tti::new(0), 5, 100, 0);
    let ndi = h.get_ndi();

    assert_eq!(h.set_ack(true), AckOutcome::Acked);
    assert!(h.is_empty());
    assert!(!h.has_pending_retx(Tti::new(8)));

    assert!(!h.new_tx(Tti::new(8), 7, 200, 2));
    assert_ne!(h.get_ndi(), ndi);
    assert_eq!(h.nof_retx(), 0);
    assert_eq!(h.get_tti(), Some(Tti::new(8)));
}

#[test]
fn test_ndi_stable_over_retransmissions() {
    debug::setup_logging_verbose();
    let mut h = ul_proc(4);
    let mut ndi = h.get_ndi();
    for block in 0..3u32 {
        let t0 = block * 40;
        h.new_tx(Tti::new(t0), 10, 256);
        assert_ne!(h.get_ndi(), ndi);
        ndi = h.get_ndi();

        for r in 1..=3u32 {
            h.set_ack(false);
            h.same_alloc();
            h.new_retx(Tti::new(t0 + r * 8)).unwrap();
            assert_eq!(h.get_ndi(), ndi);
            assert_eq!(h.get_rv(), rv_idx(r));
        }
        h.set_ack(true);
    }
}

#[test]
fn test_reset_returns_to_empty() {
    debug::setup_logging_verbose();
    let mut h = ul_proc(4);
    h.set_alloc(UlAlloc::new(3, 5));
    h.new_tx(Tti::new(100), 10, 800);
    h.set_ack(false);
    h.new_retx(Tti::new(108)).unwrap();

    h.reset();
    assert!(h.is_empty());
    assert_eq!(h.nof_retx(), 0);
    assert_eq!(h.nof_tx(), 0);
    assert_eq!(h.get_tti(), None);
    assert!(!h.has_pending_retx(Tti::new(116)));
    assert!(!h.has_pending_ack());
    assert_eq!(h.get_pending_data(), 0);
    // An outcome arriving after the reset does nothing
    assert_eq!(h.set_ack_for_tti(Tti::new(108), false), AckOutcome::Ignored);
}

#[test]
fn test_ul_adaptive_then_non_adaptive() {
    debug::setup_logging_verbose();
    let mut h = ul_proc(4);
    h.set_alloc(UlAlloc::new(0, 4));
    h.new_tx(Tti::new(0), 10, 544);
    assert!(!h.is_adaptive_retx());

    h.set_ack(false);
    h.set_alloc(UlAlloc::new(10, 4));
    h.new_retx(Tti::new(8)).unwrap();
    assert_eq!(h.get_alloc(), UlAlloc::new(10, 4));
    assert!(h.is_adaptive_retx());

    h.set_ack(false);
    h.same_alloc();
    h.new_retx(Tti::new(16)).unwrap();
    assert_eq!(h.get_alloc(), UlAlloc::new(10, 4));
    assert!(!h.is_adaptive_retx());
}

#[test]
fn test_rar_mcs_applies_once() {
    debug::setup_logging_verbose();
    let mut h = ul_proc(4);
    h.set_rar_mcs(4);
    assert_eq!(h.get_rar_mcs(), Some(4));

    let mcs = h.resolve_new_tx_mcs(10);
    assert_eq!(mcs, 4);
    h.new_tx(Tti::new(6), mcs, 208);
    assert!(h.is_msg3());
    assert_eq!(h.get_mcs(), 4);
    assert_eq!(h.get_rar_mcs(), None);

    h.set_ack(true);
    let mcs = h.resolve_new_tx_mcs(10);
    assert_eq!(mcs, 10);
    h.new_tx(Tti::new(14), mcs, 544);
    assert!(!h.is_msg3());
    assert_eq!(h.get_mcs(), 10);
}

#[test]
fn test_repeated_outcome_is_idempotent() {
    debug::setup_logging_verbose();
    let snapshot = |h: &DlHarqProc| (h.is_empty(), h.get_ack(), h.nof_retx(), h.nof_tx(), h.has_pending_retx(Tti::new(0)));

    for ack in [true, false] {
        let mut once = dl_proc(4);
        let mut twice = dl_proc(4);
        for h in [&mut once, &mut twice] {
            h.new_tx(Tti::new(3), 5, 100, 0);
            h.set_ack(false);
            h.new_retx(Tti::new(11), 0).unwrap();
        }

        once.set_ack_for_tti(Tti::new(11), ack);
        twice.set_ack_for_tti(Tti::new(11), ack);
        assert_eq!(twice.set_ack_for_tti(Tti::new(11), ack), AckOutcome::Stale);
        assert_eq!(snapshot(&once), snapshot(&twice));
    }
}

#[test]
fn test_stale_report_after_reuse() {
    debug::setup_logging_verbose();
    let mut e = test_entity(&default_test_config().harq);
    let h = e.get_dl_harq_mut(Tti::new(1));
    h.new_tx(Tti::new(1), 5, 100, 0);
    h.set_ack(true);
    h.new_tx(Tti::new(9), 5, 100, 0);

    // A late NACK for the first block must not touch the second
    assert_eq!(h.set_ack_for_tti(Tti::new(1), false), AckOutcome::Stale);
    assert!(!h.has_pending_retx(Tti::new(10)));
    assert_eq!(e.set_dl_ack(Tti::new(1), false), None);
    assert_eq!(e.stats().dl.stale, 1);
}

#[test]
fn test_override_is_counted() {
    debug::setup_logging_verbose();
    let mut e = test_entity(&default_test_config().harq);
    let h = e.get_ul_harq_mut(Tti::new(2));
    h.new_tx(Tti::new(2), 10, 256);
    let ndi = h.get_ndi();
    assert!(h.new_tx(Tti::new(10), 10, 512));
    assert_ne!(h.get_ndi(), ndi);
    assert_eq!(h.get_pending_data(), 64);

    let stats = e.stats();
    assert_eq!(stats.ul.overrides, 1);
    assert_eq!(stats.ul.new_tx, 2);
    assert_eq!(stats.dl.new_tx, 0);
}

#[test]
fn test_entity_max_retx_update() {
    debug::setup_logging_verbose();
    let mut e = test_entity(&default_test_config().harq);
    assert_eq!(e.set_max_retx(0), Err(HarqErr::InvalidMaxRetx(0)));
    e.set_max_retx(1).unwrap();

    let h = e.dl_harq_mut(2).unwrap();
    h.new_tx(Tti::new(0), 5, 100, 0);
    assert_eq!(h.set_ack(false), AckOutcome::Nacked);
    h.new_retx(Tti::new(1), 0).unwrap();
    assert_eq!(h.set_ack(false), AckOutcome::Abandoned);
    assert_eq!(e.stats().dl.abandoned, 1);
}

#[test]
fn test_lower_ceiling_mid_block() {
    debug::setup_logging_verbose();
    let mut e = test_entity(&default_test_config().harq);
    let h = e.dl_harq_mut(3).unwrap();
    h.new_tx(Tti::new(3), 5, 100, 0);
    for i in 1..=3u32 {
        h.set_ack(false);
        h.new_retx(Tti::new(3 + i * 8), 0).unwrap();
    }

    e.set_max_retx(1).unwrap();
    assert_eq!(e.max_retx(), 1);
    let h = e.dl_harq_mut(3).unwrap();
    assert_eq!(h.nof_retx(), 3);
    assert!(h.nof_retx() <= h.max_retx());
    assert!(!h.has_pending_retx(Tti::new(35)));

    assert_eq!(h.set_ack(false), AckOutcome::Abandoned);
    assert!(h.is_empty());
    h.new_tx(Tti::new(35), 5, 100, 0);
    assert_eq!(h.max_retx(), 1);

    // Processes with nothing in flight take the new ceiling at once
    assert_eq!(e.dl_harq(0).unwrap().max_retx(), 1);
}
