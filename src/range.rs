use crate::error::RangeError;
use std::net::Ipv4Addr;

/// Inclusive IPv4 range whose addresses are requested one by one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressRange {
    pub start: Ipv4Addr,
    pub end: Ipv4Addr,
}

impl AddressRange {
    pub fn new(start: Ipv4Addr, end: Ipv4Addr) -> Self {
        Self { start, end }
    }

    /// Returns every address from `start` to `end` inclusive, in increasing order.
    ///
    /// Fails without yielding anything when `start` sorts after `end`.
    pub fn hosts(&self) -> Result<impl Iterator<Item = Ipv4Addr> + use<>, RangeError> {
        self.validate()?;
        Ok((u32::from(self.start)..=u32::from(self.end)).map(Ipv4Addr::from))
    }

    pub fn validate(&self) -> Result<(), RangeError> {
        if u32::from(self.start) > u32::from(self.end) {
            return Err(RangeError {
                start: self.start,
                end: self.end,
                count: self.ip_range_count(),
            });
        }
        Ok(())
    }

    /// `end - start` as integers. One less than the number of hosts; the
    /// summary line has always printed it this way.
    pub fn ip_range_count(&self) -> i64 {
        i64::from(u32::from(self.end)) - i64::from(u32::from(self.start))
    }
}
