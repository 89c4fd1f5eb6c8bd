use clap::Parser;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use harq_config::stack_config_sim::CfgSim;
use harq_config::{SharedConfig, toml_config};
use harq_core::rnti::FIRST_CRNTI;
use harq_core::tti::TTI_WRAP;
use harq_core::{Direction, Rnti, Tti, UlAlloc, debug};
use harq_entities::{FeedbackHandle, MacScheduler, SchedResult};

mod decoder;
use decoder::{DecodeJob, DecodeOutcome, Decoder};

/// Subframe offset between the random access response and its Msg3
const MSG3_DELAY: u32 = 6;
const MSG3_NOF_PRB: u32 = 3;
const MSG3_MCS: u32 = 4;

/// Load configuration file
fn load_config_from_toml(cfg_path: &str) -> SharedConfig {
    match toml_config::from_file(cfg_path) {
        Ok(c) => c,
        Err(e) => {
            println!("Failed to load configuration from {}: {}", cfg_path, e);
            std::process::exit(1);
        }
    }
}

/// Traffic model of one simulated terminal
struct SimUe {
    handle: FeedbackHandle,
    dl_queue: u32,
    ul_queue: u32,
}

/// Attaches the terminals and books a Msg3 for each one, in consecutive subframes
fn attach_ues(sched: &mut MacScheduler, cfg: &SharedConfig, nof_ues: u16) -> BTreeMap<Rnti, SimUe> {
    let nrb_pucch = cfg.config().cell.nrb_pucch;
    let mut ues = BTreeMap::new();

    for i in 0..nof_ues {
        let rnti = Rnti(FIRST_CRNTI + i);
        let handle = match sched.ue_attach(rnti) {
            Ok(h) => h,
            Err(e) => {
                tracing::warn!("rnti={} attach failed: {}", rnti, e);
                continue;
            }
        };

        let msg3_tti = Tti::new(MSG3_DELAY + i as u32);
        let alloc = UlAlloc::new(nrb_pucch, MSG3_NOF_PRB);
        if let Err(e) = sched.rar_grant(rnti, msg3_tti, alloc, MSG3_MCS) {
            // Only one Msg3 fits in each subframe of the frame
            tracing::info!("rnti={} no msg3: {}", rnti, e);
        }
        ues.insert(rnti, SimUe { handle, dl_queue: 0, ul_queue: 0 });
    }
    ues
}

/// Turns the grants of one TTI into decoder jobs and drains the downlink queues
fn collect_jobs(res: &SchedResult, ues: &mut BTreeMap<Rnti, SimUe>) -> Vec<DecodeJob> {
    let mut jobs = Vec::with_capacity(res.dl.len() + res.ul.len());
    for g in res.dl.iter() {
        let Some(ue) = ues.get_mut(&g.rnti) else { continue };
        if !g.is_retx {
            ue.dl_queue = ue.dl_queue.saturating_sub(g.tbs / 8);
        }
        jobs.push(DecodeJob { handle: ue.handle.clone(), dir: Direction::Dl, pid: g.pid, tti: res.tti, tbs: g.tbs });
    }
    for g in res.ul.iter() {
        let Some(ue) = ues.get(&g.rnti) else { continue };
        jobs.push(DecodeJob { handle: ue.handle.clone(), dir: Direction::Ul, pid: g.pid, tti: res.tti, tbs: g.tbs });
    }
    jobs
}

fn apply_outcomes(outcomes: &[DecodeOutcome], ues: &mut BTreeMap<Rnti, SimUe>) -> usize {
    let mut dropped = 0;
    for o in outcomes {
        if !o.posted {
            dropped += 1;
            continue;
        }
        if o.dir.is_ul() && o.ack {
            if let Some(ue) = ues.get_mut(&o.rnti) {
                ue.ul_queue = ue.ul_queue.saturating_sub(o.tbs / 8);
            }
        }
    }
    dropped
}

fn run_sim(sched: &mut MacScheduler, cfg: &SharedConfig, sim: &CfgSim, max_ticks: Option<usize>, running: Arc<AtomicBool>) {
    let mut ues = attach_ues(sched, cfg, sim.nof_ues);
    let decoder = Decoder::spawn(sim.dl_bler, sim.ul_bler, sim.seed);

    let tick_len = Duration::from_millis(1);
    let start = Instant::now();
    let mut nof_grants = 0usize;
    let mut nof_dropped = 0usize;
    let mut t = 0usize;

    while running.load(Ordering::SeqCst) {
        if max_ticks.is_some_and(|n| t >= n) {
            break;
        }
        let tti = Tti::new((t % TTI_WRAP as usize) as u32);

        for (rnti, ue) in ues.iter_mut() {
            ue.dl_queue = ue.dl_queue.saturating_add(sim.dl_rate_bytes);
            ue.ul_queue = ue.ul_queue.saturating_add(sim.ul_rate_bytes);
            if let Err(e) = sched.dl_buffer_state(*rnti, ue.dl_queue).and_then(|_| sched.ul_bsr(*rnti, ue.ul_queue)) {
                tracing::warn!(tti = ?tti, "rnti={} buffer update: {}", rnti, e);
            }
        }

        let res = sched.tick(tti);
        nof_grants += res.dl.len() + res.ul.len();
        let jobs = collect_jobs(&res, &mut ues);
        if !decoder.submit(jobs) {
            tracing::error!("decoder thread is gone");
            break;
        }

        // The decoder may still be reporting for this terminal
        if sim.detach_at_tti == Some(t) {
            if let Some(&rnti) = ues.keys().next() {
                ues.remove(&rnti);
                if let Some(stats) = sched.ue_detach(rnti) {
                    tracing::info!(tti = ?tti, "rnti={} detached with counters\n{}", rnti, stats);
                }
            }
        }

        let Some(outcomes) = decoder.wait() else {
            tracing::error!("decoder thread is gone");
            break;
        };
        nof_dropped += apply_outcomes(&outcomes, &mut ues);

        t += 1;
        if sim.realtime {
            let deadline = start + tick_len * t as u32;
            if let Some(left) = deadline.checked_duration_since(Instant::now()) {
                std::thread::sleep(left);
            }
        }
    }

    tracing::info!(
        "ran {} TTIs in {:?}, {} grants, {} outcomes dropped after detach, {} terminals attached",
        t,
        start.elapsed(),
        nof_grants,
        nof_dropped,
        cfg.state_read().nof_attached
    );
    tracing::info!("HARQ counters\n{}", sched.stats());
}

#[derive(Parser, Debug)]
#[command(
    version,
    about = "HARQ scheduler simulator",
    long_about = "Runs the MAC scheduler and its HARQ process pools against a simulated decoder, using the provided TOML configuration file"
)]
struct Args {
    /// Config file (required)
    #[arg(help = "TOML config with cell, HARQ and simulation parameters")]
    config: String,

    /// Overrides sim.nof_ttis
    #[arg(long)]
    ticks: Option<usize>,

    /// Overrides debug_log
    #[arg(long)]
    log_file: Option<String>,
}

fn main() {
    let args = Args::parse();
    let cfg = load_config_from_toml(&args.config);
    let log_file = args.log_file.or_else(|| cfg.config().debug_log.clone());
    let _log_guard = debug::setup_logging_default(log_file);

    let sim = cfg.config().sim.clone().unwrap_or_default();
    let max_ticks = args.ticks.or(sim.nof_ttis);

    let mut sched = match MacScheduler::new(cfg.clone()) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("failed to create scheduler: {}", e);
            std::process::exit(1);
        }
    };

    // Set up Ctrl+C handler for graceful shutdown
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .expect("failed to set Ctrl+C handler");

    run_sim(&mut sched, &cfg, &sim, max_ticks, running);
}
