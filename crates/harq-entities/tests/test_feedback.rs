mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use crossbeam_channel::unbounded;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use harq_core::{Direction, HarqPid, Tti, debug};
use harq_entities::HarqProcCommon;
use common::{default_test_config, test_entity};

struct Job {
    pid: HarqPid,
    tti: Tti,
}

#[test]
fn test_outcomes_from_decoder_thread() {
    // Scheduler loop on this thread, decoder with 30% BLER on another one.
    // Every transmission gets exactly one outcome, applied on the next TTI.
    debug::setup_logging_verbose();
    let mut cfg = default_test_config();
    cfg.harq.dl_async = false;
    let mut e = test_entity(&cfg.harq);
    let handle = e.feedback_handle();

    let (job_tx, job_rx) = unbounded::<Job>();
    let (done_tx, done_rx) = unbounded::<bool>();
    let decoder = thread::spawn(move || {
        let mut rng = StdRng::seed_from_u64(7);
        for job in job_rx.iter() {
            let ack = rng.random_bool(0.7);
            assert!(handle.report(Direction::Dl, job.pid, job.tti, ack));
            let _ = done_tx.send(ack);
        }
    });

    let mut nof_jobs = 0u64;
    let mut nof_acks = 0u64;
    for t in 0..2000u32 {
        let tti = Tti::new(t);
        e.apply_feedback();

        let h = e.get_dl_harq_mut(tti);
        assert!(h.nof_retx() <= h.max_retx());
        let sent = if h.has_pending_retx(tti) {
            h.new_retx(tti, 0).is_ok()
        } else if h.is_empty() {
            h.new_tx(tti, 10, 1000, 0);
            true
        } else {
            false
        };
        if sent {
            job_tx.send(Job { pid: h.get_id(), tti }).unwrap();
            nof_jobs += 1;
            if done_rx.recv().unwrap() {
                nof_acks += 1;
            }
        }
    }
    e.apply_feedback();
    drop(job_tx);
    decoder.join().unwrap();

    let stats = e.stats();
    assert_eq!(stats.dl.new_tx + stats.dl.retx, nof_jobs);
    assert_eq!(stats.dl.acks, nof_acks);
    assert_eq!(stats.dl.acks + stats.dl.nacks, nof_jobs);
    assert_eq!(stats.dl.stale, 0);
    assert!(stats.dl.abandoned > 0);
    assert_eq!(stats.dl.overrides, 0);
}

#[test]
fn test_late_report_is_stale() {
    debug::setup_logging_verbose();
    let mut e = test_entity(&default_test_config().harq);
    let handle = e.feedback_handle();

    let h = e.get_ul_harq_mut(Tti::new(5));
    h.new_tx(Tti::new(5), 10, 256);
    h.set_ack(true);
    h.new_tx(Tti::new(13), 10, 256);

    assert!(handle.report(Direction::Ul, 5, Tti::new(5), false));
    assert_eq!(e.apply_feedback(), 1);
    let h = e.get_ul_harq(Tti::new(13));
    assert!(!h.has_pending_retx(Tti::new(21)));
    assert!(!h.has_pending_ack());
    assert_eq!(e.stats().ul.stale, 1);
}

#[test]
fn test_detach_while_decoder_reports() {
    debug::setup_logging_verbose();
    let mut e = test_entity(&default_test_config().harq);
    let handle = e.feedback_handle();
    for pid in 0..8 {
        e.dl_harq_mut(pid).unwrap().new_tx(Tti::new(pid), 10, 1000, 0);
    }

    let stop = Arc::new(AtomicBool::new(false));
    let reporter = {
        let stop = stop.clone();
        let handle = handle.clone();
        thread::spawn(move || {
            let mut posted_after_stop = 0u32;
            let mut t = 0u32;
            while !stop.load(Ordering::Relaxed) {
                let pid = t % 8;
                handle.report(Direction::Dl, pid, Tti::new(pid), t % 3 == 0);
                t += 1;
            }
            // The entity is gone by now, nothing may land anywhere
            for pid in 0..8 {
                if handle.report(Direction::Dl, pid, Tti::new(pid), true) {
                    posted_after_stop += 1;
                }
            }
            posted_after_stop
        })
    };

    for _ in 0..100 {
        e.apply_feedback();
    }
    e.detach();
    for pid in 0..8 {
        assert!(e.dl_harq(pid).unwrap().is_empty());
    }
    drop(e);
    stop.store(true, Ordering::Relaxed);

    assert_eq!(reporter.join().unwrap(), 0);
    assert!(!handle.report(Direction::Ul, 0, Tti::new(0), true));
}
