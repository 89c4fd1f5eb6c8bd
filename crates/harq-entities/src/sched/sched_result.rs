use core::fmt;

use harq_core::{HarqPid, RbgMask, Rnti, Tti, UlAlloc};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DlGrant {
    pub rnti: Rnti,
    pub pid: HarqPid,
    pub ndi: bool,
    pub rv: u32,
    pub mcs: u32,
    /// Transport block size in bits
    pub tbs: u32,
    pub rbg_mask: RbgMask,
    pub n_cce: u32,
    pub is_retx: bool,
}

impl fmt::Display for DlGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "-> DL rnti={} pid={} ndi={} rv={} mcs={} tbs={} rbg={} cce={}{}",
            self.rnti,
            self.pid,
            self.ndi as u8,
            self.rv,
            self.mcs,
            self.tbs,
            self.rbg_mask,
            self.n_cce,
            if self.is_retx { " retx" } else { "" }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UlGrant {
    pub rnti: Rnti,
    pub pid: HarqPid,
    pub ndi: bool,
    pub rv: u32,
    /// MCS field as signalled: the MCS for a first transmission, 28 + rv for an adaptive retransmission
    pub mcs_field: u32,
    pub tbs: u32,
    pub alloc: UlAlloc,
    /// None for grants that need no DCI: non-adaptive retransmissions and Msg3 granted in the RAR
    pub n_cce: Option<u32>,
    pub is_msg3: bool,
    pub is_retx: bool,
}

impl UlGrant {
    /// Retransmission moved to new PRBs and announced with a DCI
    pub fn is_adaptive(&self) -> bool {
        self.is_retx && self.n_cce.is_some()
    }
}

impl fmt::Display for UlGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "-> UL rnti={} pid={} ndi={} rv={} mcs={} tbs={} prb={}",
            self.rnti, self.pid, self.ndi as u8, self.rv, self.mcs_field, self.tbs, self.alloc
        )?;
        match self.n_cce {
            Some(cce) => write!(f, " cce={}", cce)?,
            None => write!(f, " no-pdcch")?,
        }
        if self.is_msg3 {
            write!(f, " msg3")?;
        }
        if self.is_retx {
            write!(f, " retx")?;
        }
        Ok(())
    }
}

/// Uplink HARQ indicator sent on PHICH
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Phich {
    pub rnti: Rnti,
    pub ack: bool,
}

/// Everything decided for one TTI
#[derive(Debug, Clone, Default)]
pub struct SchedResult {
    pub tti: Tti,
    pub dl: Vec<DlGrant>,
    pub ul: Vec<UlGrant>,
    pub phich: Vec<Phich>,
}

impl SchedResult {
    pub fn new(tti: Tti) -> Self {
        Self { tti, ..Default::default() }
    }

    pub fn is_empty(&self) -> bool {
        self.dl.is_empty() && self.ul.is_empty() && self.phich.is_empty()
    }

    pub fn dl_for(&self, rnti: Rnti) -> Option<&DlGrant> {
        self.dl.iter().find(|g| g.rnti == rnti)
    }

    pub fn ul_for(&self, rnti: Rnti) -> Option<&UlGrant> {
        self.ul.iter().find(|g| g.rnti == rnti)
    }

    pub fn phich_for(&self, rnti: Rnti) -> Option<bool> {
        self.phich.iter().find(|p| p.rnti == rnti).map(|p| p.ack)
    }
}
