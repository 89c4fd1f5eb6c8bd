use core::fmt;

/// Maximum number of PRBs in a 20 MHz LTE carrier
pub const MAX_NOF_PRB: u32 = 100;

/// Maximum number of resource block groups (20 MHz carrier, RBG size 4)
pub const MAX_NOF_RBG: u32 = 25;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllocErr {
    InvalidNofPrb(u32),
    OutOfRange { start: u32, len: u32, limit: u32 },
    InUse { start: u32, len: u32 },
}

impl fmt::Display for AllocErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocErr::InvalidNofPrb(n) => write!(f, "invalid number of PRBs {}", n),
            AllocErr::OutOfRange { start, len, limit } => write!(f, "allocation ({}, {}) exceeds {}", start, len, limit),
            AllocErr::InUse { start, len } => write!(f, "allocation ({}, {}) already in use", start, len),
        }
    }
}

/// RBG size P as a function of the downlink bandwidth, 36.213 table 7.1.6.1-1
pub fn rbg_size(nof_prb: u32) -> u32 {
    match nof_prb {
        0..=10 => 1,
        11..=26 => 2,
        27..=63 => 3,
        _ => 4,
    }
}

/// Number of RBGs covering the carrier. The last group may be smaller than P.
pub fn nof_rbg(nof_prb: u32) -> u32 {
    nof_prb.div_ceil(rbg_size(nof_prb))
}

/// Downlink resource allocation type 0: one bit per resource block group.
/// Bit i set means RBG i is part of the allocation.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct RbgMask(pub u32);

impl RbgMask {
    pub const EMPTY: RbgMask = RbgMask(0);

    /// Mask with `len` consecutive groups starting at `start`. Groups past bit 31 are dropped.
    pub fn from_range(start: u32, len: u32) -> RbgMask {
        if len == 0 || start >= 32 {
            return RbgMask::EMPTY;
        }
        let bits = if len >= 32 { u32::MAX } else { (1u32 << len) - 1 };
        RbgMask(bits << start)
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn count(&self) -> u32 {
        self.0.count_ones()
    }

    pub fn overlaps(&self, other: RbgMask) -> bool {
        self.0 & other.0 != 0
    }

    pub fn union(&self, other: RbgMask) -> RbgMask {
        RbgMask(self.0 | other.0)
    }

    /// Number of PRBs covered by this mask on a carrier of nof_prb PRBs
    pub fn nof_prb(&self, nof_prb: u32) -> u32 {
        let p = rbg_size(nof_prb);
        let n_rbg = nof_rbg(nof_prb);
        let mut total = 0;
        for rbg in 0..n_rbg {
            if self.0 & (1 << rbg) != 0 {
                // The last group is truncated to the carrier edge
                total += p.min(nof_prb - rbg * p);
            }
        }
        total
    }

    /// Picks up to `wanted` free groups, lowest index first.
    /// Returns None when no group is free.
    pub fn first_fit(used: RbgMask, wanted: u32, nof_rbg: u32) -> Option<RbgMask> {
        let mut mask = 0u32;
        let mut taken = 0;
        for rbg in 0..nof_rbg {
            if taken == wanted {
                break;
            }
            if used.0 & (1 << rbg) == 0 {
                mask |= 1 << rbg;
                taken += 1;
            }
        }
        if mask == 0 { None } else { Some(RbgMask(mask)) }
    }
}

impl fmt::Debug for RbgMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:07x}", self.0)
    }
}

impl fmt::Display for RbgMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:07x}", self.0)
    }
}

/// Uplink resource allocation type 0: one contiguous run of PRBs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UlAlloc {
    pub rb_start: u32,
    /// Number of contiguous PRBs
    pub len: u32,
}

impl UlAlloc {
    pub fn new(rb_start: u32, len: u32) -> Self {
        Self { rb_start, len }
    }

    pub fn rb_end(&self) -> u32 {
        self.rb_start + self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl fmt::Display for UlAlloc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.rb_start, self.rb_end())
    }
}

/// Per-TTI occupancy of the uplink PRBs of one carrier
#[derive(Debug, Clone)]
pub struct PrbUsage {
    used: u128,
    nof_prb: u32,
}

impl PrbUsage {
    pub fn new(nof_prb: u32) -> Result<Self, AllocErr> {
        if nof_prb == 0 || nof_prb > MAX_NOF_PRB {
            return Err(AllocErr::InvalidNofPrb(nof_prb));
        }
        Ok(Self { used: 0, nof_prb })
    }

    fn range_bits(alloc: UlAlloc) -> u128 {
        if alloc.len == 0 {
            return 0;
        }
        let bits = if alloc.len >= 128 { u128::MAX } else { (1u128 << alloc.len) - 1 };
        bits << alloc.rb_start
    }

    pub fn nof_prb(&self) -> u32 {
        self.nof_prb
    }

    pub fn clear(&mut self) {
        self.used = 0;
    }

    pub fn is_free(&self, alloc: UlAlloc) -> bool {
        alloc.rb_end() <= self.nof_prb && self.used & Self::range_bits(alloc) == 0
    }

    /// Marks the allocation as used. Fails if any PRB is already taken or out of range.
    pub fn reserve(&mut self, alloc: UlAlloc) -> Result<(), AllocErr> {
        if alloc.rb_end() > self.nof_prb {
            return Err(AllocErr::OutOfRange { start: alloc.rb_start, len: alloc.len, limit: self.nof_prb });
        }
        if !self.is_free(alloc) {
            return Err(AllocErr::InUse { start: alloc.rb_start, len: alloc.len });
        }
        self.used |= Self::range_bits(alloc);
        Ok(())
    }

    /// Finds the lowest free contiguous run of exactly `len` PRBs
    pub fn find_contiguous(&self, len: u32) -> Option<UlAlloc> {
        if len == 0 || len > self.nof_prb {
            return None;
        }
        (0..=self.nof_prb - len)
            .map(|start| UlAlloc::new(start, len))
            .find(|alloc| self.is_free(*alloc))
    }

    pub fn nof_free(&self) -> u32 {
        self.nof_prb - (self.used.count_ones())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rbg_geometry() {
        assert_eq!(rbg_size(6), 1);
        assert_eq!(rbg_size(25), 2);
        assert_eq!(rbg_size(50), 3);
        assert_eq!(rbg_size(100), 4);
        assert_eq!(nof_rbg(25), 13);
        assert_eq!(nof_rbg(50), 17);
        assert_eq!(nof_rbg(100), 25);

        // Last RBG of a 25 PRB carrier holds a single PRB
        assert_eq!(RbgMask(1 << 12).nof_prb(25), 1);
        assert_eq!(RbgMask::from_range(0, 13).nof_prb(25), 25);
    }

    #[test]
    fn test_rbg_range_edges() {
        assert_eq!(RbgMask::from_range(32, 2), RbgMask::EMPTY);
        assert_eq!(RbgMask::from_range(40, 1), RbgMask::EMPTY);
        assert_eq!(RbgMask::from_range(31, 4), RbgMask(1 << 31));
        assert_eq!(RbgMask::from_range(3, 0), RbgMask::EMPTY);
    }

    #[test]
    fn test_rbg_first_fit() {
        let used = RbgMask::from_range(0, 2);
        let mask = RbgMask::first_fit(used, 3, 13).unwrap();
        assert_eq!(mask, RbgMask::from_range(2, 3));
        assert!(!mask.overlaps(used));

        let full = RbgMask::from_range(0, 13);
        assert!(RbgMask::first_fit(full, 1, 13).is_none());
    }

    #[test]
    fn test_prb_usage() {
        let mut usage = PrbUsage::new(25).unwrap();
        usage.reserve(UlAlloc::new(0, 2)).unwrap();
        usage.reserve(UlAlloc::new(23, 2)).unwrap();
        assert_eq!(usage.nof_free(), 21);

        assert_eq!(usage.reserve(UlAlloc::new(1, 4)), Err(AllocErr::InUse { start: 1, len: 4 }));
        assert!(matches!(usage.reserve(UlAlloc::new(24, 4)), Err(AllocErr::OutOfRange { .. })));

        assert_eq!(usage.find_contiguous(4), Some(UlAlloc::new(2, 4)));
        assert_eq!(usage.find_contiguous(22), None);
        assert!(PrbUsage::new(0).is_err());
    }
}
