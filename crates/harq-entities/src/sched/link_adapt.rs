use harq_config::CfgSched;

/// Transport block size in bits for one PRB, indexed by I_TBS (36.213 table 7.1.7.2.1-1, first column)
const TBS_ONE_PRB: [u32; 27] = [
    16, 24, 32, 40, 56, 72, 88, 104, 120, 136, 144, 176, 208, 224, 256, 280, 328, 336, 376, 408, 440, 488, 520, 552,
    584, 616, 712,
];

/// TBS index for an MCS index (36.213 table 7.1.7.1-1, 64QAM capable)
pub fn mcs_to_itbs(mcs: u32) -> u32 {
    match mcs {
        0..=9 => mcs,
        10..=16 => mcs - 1,
        17..=27 => mcs - 2,
        _ => 26,
    }
}

/// Transport block size in bits. Linear in the PRB count, which is close
/// enough for scheduling purposes.
pub fn tbs_bits(mcs: u32, nof_prb: u32) -> u32 {
    TBS_ONE_PRB[mcs_to_itbs(mcs) as usize] * nof_prb
}

/// Fixed-MCS link adaptation
#[derive(Debug, Clone)]
pub struct LinkAdapt {
    dl_mcs: u32,
    ul_mcs: u32,
}

impl LinkAdapt {
    pub fn new(cfg: &CfgSched) -> Self {
        Self { dl_mcs: cfg.dl_mcs, ul_mcs: cfg.ul_mcs }
    }

    pub fn dl_mcs(&self) -> u32 {
        self.dl_mcs
    }

    pub fn ul_mcs(&self) -> u32 {
        self.ul_mcs
    }

    /// Smallest PRB count in 1..=max_prb whose block carries `bytes`, else max_prb
    pub fn ul_prbs_for(&self, mcs: u32, bytes: u32, max_prb: u32) -> u32 {
        (1..=max_prb).find(|&n| tbs_bits(mcs, n) / 8 >= bytes).unwrap_or(max_prb)
    }

    /// Smallest RBG count in 1..=max_rbg whose block carries `bytes`, else max_rbg.
    /// Assumes full-size groups.
    pub fn dl_rbgs_for(&self, bytes: u32, rbg_size: u32, max_rbg: u32) -> u32 {
        (1..=max_rbg)
            .find(|&n| tbs_bits(self.dl_mcs, n * rbg_size) / 8 >= bytes)
            .unwrap_or(max_rbg)
    }
}
