use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, unbounded};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use harq_core::{Direction, HarqPid, Rnti, Tti};
use harq_entities::FeedbackHandle;

/// One transmission handed to the decoder
pub struct DecodeJob {
    pub handle: FeedbackHandle,
    pub dir: Direction,
    pub pid: HarqPid,
    pub tti: Tti,
    pub tbs: u32,
}

/// What the decoder made of a transmission
#[derive(Debug, Clone, Copy)]
pub struct DecodeOutcome {
    pub rnti: Rnti,
    pub dir: Direction,
    pub tbs: u32,
    pub ack: bool,
    /// False if the terminal was gone by the time the outcome was reported
    pub posted: bool,
}

/// Channel model running on its own thread. Every batch is answered with one
/// outcome per job, in order, after all outcomes were posted to the feedback boards.
pub struct Decoder {
    job_tx: Sender<Vec<DecodeJob>>,
    done_rx: Receiver<Vec<DecodeOutcome>>,
    worker: Option<JoinHandle<()>>,
}

impl Decoder {
    pub fn spawn(dl_bler: f64, ul_bler: f64, seed: u64) -> Self {
        let (job_tx, job_rx) = unbounded::<Vec<DecodeJob>>();
        let (done_tx, done_rx) = unbounded::<Vec<DecodeOutcome>>();

        let worker = thread::spawn(move || {
            let mut rng = StdRng::seed_from_u64(seed);
            for batch in job_rx.iter() {
                let outcomes = batch
                    .into_iter()
                    .map(|job| {
                        let bler = if job.dir.is_dl() { dl_bler } else { ul_bler };
                        let ack = !rng.random_bool(bler);
                        let posted = job.handle.report(job.dir, job.pid, job.tti, ack);
                        DecodeOutcome { rnti: job.handle.rnti(), dir: job.dir, tbs: job.tbs, ack, posted }
                    })
                    .collect();
                if done_tx.send(outcomes).is_err() {
                    break;
                }
            }
        });

        Self { job_tx, done_rx, worker: Some(worker) }
    }

    pub fn submit(&self, batch: Vec<DecodeJob>) -> bool {
        self.job_tx.send(batch).is_ok()
    }

    /// Blocks until the decoder answered the oldest submitted batch
    pub fn wait(&self) -> Option<Vec<DecodeOutcome>> {
        self.done_rx.recv().ok()
    }
}

impl Drop for Decoder {
    fn drop(&mut self) {
        // Closing the job channel ends the worker loop
        let (dead_tx, _) = unbounded();
        self.job_tx = dead_tx;
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
