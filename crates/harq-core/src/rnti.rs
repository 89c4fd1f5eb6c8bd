use core::fmt;

/// Radio Network Temporary Identifier, the cell-local terminal address
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Rnti(pub u16);

/// First C-RNTI value handed out by the random access procedure
pub const FIRST_CRNTI: u16 = 0x46;

impl Rnti {
    /// C-RNTIs lie in 0x0001..=0xFFF3, the remainder is reserved
    pub fn is_crnti(&self) -> bool {
        self.0 >= 0x0001 && self.0 <= 0xFFF3
    }
}

impl fmt::Display for Rnti {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04x}", self.0)
    }
}

impl fmt::Debug for Rnti {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04x}", self.0)
    }
}
