use core::fmt;

/// Link direction of a HARQ process or a scheduling decision
#[derive(Debug, Clone, PartialEq, Eq, Hash, Copy)]
pub enum Direction {
    /// Uplink, terminal to base station
    Ul,
    /// Downlink, base station to terminal
    Dl,
}

impl Direction {
    #[inline]
    pub fn is_ul(&self) -> bool {
        matches!(self, Direction::Ul)
    }

    #[inline]
    pub fn is_dl(&self) -> bool {
        matches!(self, Direction::Dl)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Ul => write!(f, "UL"),
            Direction::Dl => write!(f, "DL"),
        }
    }
}
