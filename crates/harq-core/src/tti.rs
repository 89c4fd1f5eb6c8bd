use core::fmt;

/// Value of the TTI counter where it wraps back to 0 (1024 radio frames of 10 subframes)
pub const TTI_WRAP: u32 = 10240;

/// Number of subframes in a radio frame
pub const NOF_SF_X_FRAME: u32 = 10;

/// FDD delay between a transmission and its HARQ feedback, in TTIs
pub const FDD_HARQ_DELAY_MS: u32 = 4;

/// Synchronous uplink HARQ round trip. A retransmission for the block sent at
/// TTI n can happen no earlier than n + UL_HARQ_RTT.
pub const UL_HARQ_RTT: u32 = 2 * FDD_HARQ_DELAY_MS;

/// Round trip after which a downlink block without any outcome is sent again
pub const DL_HARQ_RTT: u32 = 2 * FDD_HARQ_DELAY_MS;

/// Difference between two int ttis, handling wrap-around of the frame number.
pub fn tti_int_diff(a: i32, b: i32) -> i32 {
    let wrap = TTI_WRAP as i32;
    let mut diff = a - b;
    while diff < -wrap / 2 { diff += wrap; }
    while diff >= wrap / 2 { diff -= wrap; }
    diff
}

/// Transmission time interval counter, 0..TTI_WRAP.
/// One TTI is a 1 ms LTE subframe.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Tti(u32);

impl Tti {
    pub fn new(tti: u32) -> Tti {
        Tti(tti % TTI_WRAP)
    }

    /// Converts a signed tti into a Tti, wrapping negative values
    pub fn from_int(tti: i32) -> Tti {
        Tti(tti.rem_euclid(TTI_WRAP as i32) as u32)
    }

    #[inline(always)]
    pub fn to_u32(self) -> u32 {
        self.0
    }

    /// System frame number, 0..1023
    pub fn sfn(self) -> u32 {
        self.0 / NOF_SF_X_FRAME
    }

    /// Subframe index within the radio frame, 0..9
    pub fn sf_idx(self) -> u32 {
        self.0 % NOF_SF_X_FRAME
    }

    /// Add a (possibly negative) number of TTIs
    pub fn add(self, n: i32) -> Tti {
        Tti::from_int(self.0 as i32 + n)
    }

    /// Signed difference self - b in TTIs, in range -TTI_WRAP/2..TTI_WRAP/2
    pub fn diff(self, b: Tti) -> i32 {
        tti_int_diff(self.0 as i32, b.0 as i32)
    }

    /// Unsigned distance from an earlier tti to self, modulo TTI_WRAP
    #[inline(always)]
    pub fn interval(self, earlier: Tti) -> u32 {
        (self.0 + TTI_WRAP - earlier.0) % TTI_WRAP
    }

    /// TTI at which a downlink transmission scheduled when the uplink subframe
    /// tti_rx is received goes on air
    pub fn tx_dl(self) -> Tti {
        self.add(FDD_HARQ_DELAY_MS as i32)
    }

    /// TTI at which the HARQ feedback for a transmission at self is received
    pub fn rx_ack(self) -> Tti {
        self.add(FDD_HARQ_DELAY_MS as i32)
    }
}

impl fmt::Display for Tti {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:4}.{}", self.sfn(), self.sf_idx())
    }
}

impl fmt::Debug for Tti {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:4}.{}", self.sfn(), self.sf_idx())
    }
}
