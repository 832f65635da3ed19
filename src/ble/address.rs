//! BD address and address-type types.
//!
//! A `Copy` 6-byte newtype with `Display`/`FromStr`, matching the shape
//! a BD address and its type naturally take.

use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
pub struct BDAddr {
    address: [u8; 6],
}

impl BDAddr {
    pub fn from_bytes(address: [u8; 6]) -> Self {
        Self { address }
    }

    pub fn into_bytes(self) -> [u8; 6] {
        self.address
    }
}

impl fmt::Display for BDAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let a = self.address;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            a[5], a[4], a[3], a[2], a[1], a[0]
        )
    }
}

#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
#[error("invalid BD address string: {0}")]
pub struct ParseBDAddrError(String);

impl FromStr for BDAddr {
    type Err = ParseBDAddrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 6 {
            return Err(ParseBDAddrError(s.to_string()));
        }
        let mut address = [0u8; 6];
        for (i, part) in parts.iter().enumerate() {
            address[5 - i] =
                u8::from_str_radix(part, 16).map_err(|_| ParseBDAddrError(s.to_string()))?;
        }
        Ok(BDAddr { address })
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum AddressType {
    Public,
    Random,
}

impl Default for AddressType {
    fn default() -> Self {
        AddressType::Public
    }
}

impl AddressType {
    pub fn from_u8(v: u8) -> Option<AddressType> {
        match v {
            0 => Some(AddressType::Public),
            1 => Some(AddressType::Random),
            _ => None,
        }
    }

    pub fn num(self) -> u8 {
        match self {
            AddressType::Public => 0,
            AddressType::Random => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_and_parse_round_trip() {
        let addr = BDAddr::from_bytes([0xA6, 0xA5, 0xA4, 0xA3, 0xA2, 0xA1]);
        let s = addr.to_string();
        assert_eq!(s, "A1:A2:A3:A4:A5:A6");
        assert_eq!(BDAddr::from_str(&s).unwrap(), addr);
    }

    #[test]
    fn address_type_round_trips() {
        for t in [AddressType::Public, AddressType::Random] {
            assert_eq!(AddressType::from_u8(t.num()), Some(t));
        }
    }
}
