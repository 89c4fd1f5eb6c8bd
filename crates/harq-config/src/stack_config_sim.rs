use std::collections::HashMap;

use serde::Deserialize;
use toml::Value;

/// Traffic and channel model for the simulation driver
#[derive(Debug, Clone)]
pub struct CfgSim {
    /// Terminals attached through random access at start-up
    pub nof_ues: u16,
    /// Probability that a downlink transmission is NACKed
    pub dl_bler: f64,
    /// Probability that an uplink transmission fails its CRC
    pub ul_bler: f64,
    /// Seed for the block error generator, for reproducible runs
    pub seed: u64,
    /// Stop after this many TTIs. None runs until interrupted.
    pub nof_ttis: Option<usize>,
    /// Detach the first terminal at this TTI count, exercising late feedback after detach
    pub detach_at_tti: Option<usize>,
    /// Bytes arriving in each terminal's downlink buffer per TTI
    pub dl_rate_bytes: u32,
    /// Bytes reported by each terminal's buffer status per TTI
    pub ul_rate_bytes: u32,
    /// Pace the scheduler at one TTI per millisecond instead of free running
    pub realtime: bool,
}

impl Default for CfgSim {
    fn default() -> Self {
        Self {
            nof_ues: 4,
            dl_bler: 0.1,
            ul_bler: 0.1,
            seed: 1,
            nof_ttis: Some(1000),
            detach_at_tti: None,
            dl_rate_bytes: 200,
            ul_rate_bytes: 50,
            realtime: false,
        }
    }
}

impl CfgSim {
    pub fn validate(&self) -> Result<(), &str> {
        if self.nof_ues == 0 {
            return Err("sim nof_ues must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.dl_bler) || !(0.0..=1.0).contains(&self.ul_bler) {
            return Err("sim bler values must be within 0.0..=1.0");
        }
        Ok(())
    }
}

#[derive(Default, Deserialize)]
pub struct CfgSimDto {
    pub nof_ues: Option<u16>,
    pub dl_bler: Option<f64>,
    pub ul_bler: Option<f64>,
    pub seed: Option<u64>,
    pub nof_ttis: Option<usize>,
    pub detach_at_tti: Option<usize>,
    pub dl_rate_bytes: Option<u32>,
    pub ul_rate_bytes: Option<u32>,
    #[serde(default)]
    pub realtime: bool,

    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

/// Convert a CfgSimDto (from TOML) into a CfgSim, filling in defaults
pub fn apply_sim_patch(src: CfgSimDto) -> CfgSim {
    let mut dst = CfgSim::default();
    if let Some(v) = src.nof_ues {
        dst.nof_ues = v;
    }
    if let Some(v) = src.dl_bler {
        dst.dl_bler = v;
    }
    if let Some(v) = src.ul_bler {
        dst.ul_bler = v;
    }
    if let Some(v) = src.seed {
        dst.seed = v;
    }
    // An explicit nof_ttis of 0 means run forever
    if let Some(v) = src.nof_ttis {
        dst.nof_ttis = if v == 0 { None } else { Some(v) };
    }
    dst.detach_at_tti = src.detach_at_tti;
    if let Some(v) = src.dl_rate_bytes {
        dst.dl_rate_bytes = v;
    }
    if let Some(v) = src.ul_rate_bytes {
        dst.ul_rate_bytes = v;
    }
    dst.realtime = src.realtime;
    dst
}
