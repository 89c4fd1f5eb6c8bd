use std::sync::{Arc, RwLock};

use harq_core::MAX_HARQ_PROC;
use harq_core::alloc::{MAX_NOF_PRB, nof_rbg};

use super::stack_config_sim::CfgSim;

/// Highest MCS index usable for a new transmission. 29..31 are reserved for
/// signalling the redundancy version of an adaptive retransmission.
pub const MAX_MCS: u32 = 28;

#[derive(Debug, Clone)]
pub struct CfgCell {
    /// Carrier bandwidth in PRBs: 6, 15, 25, 50, 75 or 100
    pub nof_prb: u32,
    /// PRBs reserved for PUCCH at each edge of the uplink carrier
    pub nrb_pucch: u32,
}

impl Default for CfgCell {
    fn default() -> Self {
        Self {
            nof_prb: default_nof_prb(),
            nrb_pucch: 2,
        }
    }
}

#[inline]
fn default_nof_prb() -> u32 {
    25
}

#[derive(Debug, Clone)]
pub struct CfgHarq {
    /// Parallel HARQ processes per terminal and direction
    pub nof_procs: usize,
    /// Retransmission ceiling for ordinary transport blocks
    pub max_retx: u32,
    /// Retransmission ceiling for Msg3, the first uplink block after random access
    pub max_msg3_retx: u32,
    /// Asynchronous downlink HARQ. If false, the downlink process is picked by tti modulo nof_procs
    pub dl_async: bool,
    /// A downlink process left non-empty for longer than this many TTIs is considered lost and reset
    pub pid_timeout_ttis: u32,
}

impl Default for CfgHarq {
    fn default() -> Self {
        Self {
            nof_procs: MAX_HARQ_PROC,
            max_retx: 4,
            max_msg3_retx: 4,
            dl_async: true,
            pid_timeout_ttis: 50,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CfgSched {
    /// Fixed downlink MCS used for new transmissions
    pub dl_mcs: u32,
    /// Fixed uplink MCS used for new transmissions without RAR override
    pub ul_mcs: u32,
    /// Cap on the RBGs granted to one terminal in one TTI
    pub max_dl_rbg_per_ue: u32,
    /// Cap on the contiguous PRBs granted to one terminal in one TTI
    pub max_ul_prb_per_ue: u32,
}

impl Default for CfgSched {
    fn default() -> Self {
        Self {
            dl_mcs: 16,
            ul_mcs: 10,
            max_dl_rbg_per_ue: 4,
            max_ul_prb_per_ue: 8,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StackConfig {
    pub debug_log: Option<String>,

    pub cell: CfgCell,
    pub harq: CfgHarq,
    pub sched: CfgSched,

    /// Only used by the simulation driver
    pub sim: Option<CfgSim>,
}

impl StackConfig {
    pub fn new(nof_prb: u32) -> Self {
        StackConfig {
            debug_log: None,
            cell: CfgCell { nof_prb, ..CfgCell::default() },
            harq: CfgHarq::default(),
            sched: CfgSched::default(),
            sim: None,
        }
    }

    /// Validate that all configuration fields are within range.
    pub fn validate(&self) -> Result<(), &str> {
        if !matches!(self.cell.nof_prb, 6 | 15 | 25 | 50 | 75 | 100) {
            return Err("cell nof_prb must be one of 6, 15, 25, 50, 75, 100");
        }
        debug_assert!(self.cell.nof_prb <= MAX_NOF_PRB);
        if 2 * self.cell.nrb_pucch >= self.cell.nof_prb {
            return Err("cell nrb_pucch leaves no PRBs for PUSCH");
        }

        if self.harq.nof_procs == 0 || self.harq.nof_procs > MAX_HARQ_PROC {
            return Err("harq nof_procs must be in 1..=8");
        }
        if harq_core::tti::UL_HARQ_RTT as usize % self.harq.nof_procs != 0 {
            return Err("harq nof_procs must divide the uplink round trip of 8 TTIs");
        }
        if self.harq.max_retx == 0 {
            return Err("harq max_retx must be at least 1");
        }
        if self.harq.max_msg3_retx == 0 {
            return Err("harq max_msg3_retx must be at least 1");
        }
        if self.harq.pid_timeout_ttis < 2 * harq_core::tti::UL_HARQ_RTT {
            return Err("harq pid_timeout_ttis must cover at least two round trips");
        }

        if self.sched.dl_mcs > MAX_MCS || self.sched.ul_mcs > MAX_MCS {
            return Err("sched mcs values must be in 0..=28");
        }
        if self.sched.max_dl_rbg_per_ue == 0 || self.sched.max_dl_rbg_per_ue > nof_rbg(self.cell.nof_prb) {
            return Err("sched max_dl_rbg_per_ue out of range for the carrier");
        }
        if self.sched.max_ul_prb_per_ue == 0 || self.sched.max_ul_prb_per_ue > self.cell.nof_prb - 2 * self.cell.nrb_pucch {
            return Err("sched max_ul_prb_per_ue out of range for the carrier");
        }

        if let Some(ref sim) = self.sim {
            sim.validate()?;
        }

        Ok(())
    }
}

/// Mutable, stack-editable state (lock-protected).
#[derive(Debug, Clone, Default)]
pub struct StackState {
    /// Operator override for the retransmission ceiling, applied to newly attached and existing terminals
    pub max_retx_override: Option<u32>,
    /// Number of terminals currently holding a HARQ entity
    pub nof_attached: usize,
}

/// Global shared configuration: immutable config + mutable state.
#[derive(Clone)]
pub struct SharedConfig {
    /// Read-only configuration (immutable after construction).
    cfg: Arc<StackConfig>,
    /// Mutable state guarded with RwLock (write by the scheduler, read by others).
    state: Arc<RwLock<StackState>>,
}

impl SharedConfig {
    pub fn new(nof_prb: u32) -> Self {
        Self::from_config(StackConfig::new(nof_prb))
    }

    pub fn from_config(cfg: StackConfig) -> Self {
        Self::from_parts(cfg, StackState::default())
    }

    /// Panics on an invalid configuration. Use try_from_parts where the
    /// configuration comes from user input.
    pub fn from_parts(cfg: StackConfig, state: StackState) -> Self {
        match Self::try_from_parts(cfg, state) {
            Ok(c) => c,
            Err(e) => panic!("Invalid stack configuration: {}", e),
        }
    }

    pub fn try_from_parts(cfg: StackConfig, state: StackState) -> Result<Self, String> {
        cfg.validate()?;
        if let Some(max_retx) = state.max_retx_override {
            if max_retx == 0 {
                return Err("max_retx_override must be at least 1".to_string());
            }
        }

        Ok(Self {
            cfg: Arc::new(cfg),
            state: Arc::new(RwLock::new(state)),
        })
    }

    /// Access immutable config.
    pub fn config(&self) -> Arc<StackConfig> {
        Arc::clone(&self.cfg)
    }

    /// Retransmission ceiling currently in force
    pub fn effective_max_retx(&self) -> u32 {
        self.state_read().max_retx_override.unwrap_or(self.cfg.harq.max_retx)
    }

    /// Read guard for mutable state.
    pub fn state_read(&self) -> std::sync::RwLockReadGuard<'_, StackState> {
        self.state.read().expect("StackState RwLock blocked")
    }

    /// Write guard for mutable state.
    pub fn state_write(&self) -> std::sync::RwLockWriteGuard<'_, StackState> {
        self.state.write().expect("StackState RwLock blocked")
    }
}
