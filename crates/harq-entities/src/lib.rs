//! HARQ process pool and the per-TTI MAC scheduler built on top of it
//!
//! - `harq`: downlink and uplink HARQ processes, the per-terminal entity and
//!   the lock-free outcome slots written by the decoder
//! - `sched`: round robin scheduler deciding new transmission, retransmission
//!   or idle for every terminal each TTI

pub mod harq;
pub mod sched;

pub use harq::dl_harq::DlHarqProc;
pub use harq::feedback::{FeedbackBoard, FeedbackHandle};
pub use harq::harq_entity::{HarqEntity, HarqStats};
pub use harq::harq_proc::{AckOutcome, HarqErr, HarqProc, HarqProcCommon, rv_idx};
pub use harq::ul_harq::UlHarqProc;
pub use sched::mac_sched::{MacScheduler, SchedErr};
pub use sched::sched_result::{DlGrant, Phich, SchedResult, UlGrant};
