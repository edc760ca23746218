//! Log Sequence Number: PostgreSQL's WAL position type
//!
//! A `Lsn` is a 64-bit WAL byte offset. PostgreSQL prints it as two
//! hexadecimal 32-bit halves separated by a slash, e.g. `16/B374D848`.

use std::fmt;
use std::str::FromStr;

use crate::core::errors::{CdcError, CdcResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Lsn(pub u64);

impl Lsn {
    pub const ZERO: Lsn = Lsn(0);

    pub fn from_u64(value: u64) -> Self {
        Lsn(value)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:X}/{:08X}", self.0 >> 32 & 0xFFFF_FFFF, self.0 & 0xFFFF_FFFF)
    }
}

impl FromStr for Lsn {
    type Err = CdcError;

    fn from_str(s: &str) -> CdcResult<Self> {
        let (high, low) = s
            .split_once('/')
            .ok_or_else(|| CdcError::protocol(format!("malformed LSN '{s}': missing '/'")))?;
        let high = u32::from_str_radix(high, 16)
            .map_err(|_| CdcError::protocol(format!("malformed LSN '{s}': bad high half")))?;
        let low = u32::from_str_radix(low, 16)
            .map_err(|_| CdcError::protocol(format!("malformed LSN '{s}': bad low half")))?;
        Ok(Lsn(((high as u64) << 32) | low as u64))
    }
}

impl From<u64> for Lsn {
    fn from(value: u64) -> Self {
        Lsn(value)
    }
}

impl From<Lsn> for u64 {
    fn from(value: Lsn) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_like_postgres() {
        assert_eq!(Lsn(0x16_B374_D848).to_string(), "16/B374D848");
    }

    #[test]
    fn parses_formatted_string() {
        let lsn: Lsn = "16/B374D848".parse().unwrap();
        assert_eq!(lsn.as_u64(), 0x16_B374_D848);
    }

    #[test]
    fn rejects_missing_slash() {
        assert!("16B374D848".parse::<Lsn>().is_err());
    }

    proptest::proptest! {
        #[test]
        fn round_trips_through_text(value: u64) {
            let lsn = Lsn::from_u64(value);
            let parsed: Lsn = lsn.to_string().parse().unwrap();
            proptest::prop_assert_eq!(parsed, lsn);
        }
    }
}
