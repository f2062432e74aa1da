use std::fmt::{Display, Formatter};
use std::num::ParseIntError;
use std::str::FromStr;

/// Address in the analyzed target address space.
///
/// All caches and mapping registries key by this type, never by a raw
/// hex string, so the same location can not hide behind two spellings.
#[derive(Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Debug, Default)]
pub struct Addr(u64);

impl Addr {
    pub fn as_u64(self) -> u64 {
        self.0
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Offset of this address inside a region starting at `base`.
    pub fn offset_from(self, base: Addr) -> u64 {
        self.0.saturating_sub(base.0)
    }

    pub fn add(self, offset: u64) -> Addr {
        Addr(self.0 + offset)
    }

    pub fn in_range(self, base: Addr, size: u64) -> bool {
        self.0 >= base.0 && self.0 < base.0 + size
    }
}

impl From<u64> for Addr {
    fn from(addr: u64) -> Self {
        Addr(addr)
    }
}

impl From<usize> for Addr {
    fn from(addr: usize) -> Self {
        Addr(addr as u64)
    }
}

impl From<Addr> for u64 {
    fn from(addr: Addr) -> Self {
        addr.0
    }
}

impl FromStr for Addr {
    type Err = ParseIntError;

    /// Parse an address the way the external tool prints one: `0x`-prefixed
    /// hex (`s` output, `?v` output) or plain decimal.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let value = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            Some(hex) => u64::from_str_radix(hex, 16)?,
            None => s.parse::<u64>()?,
        };
        Ok(Addr(value))
    }
}

impl Display for Addr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}
