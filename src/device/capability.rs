//! DeviceInfo capability words: top octet is the domain, low 24 bits are
//! a per-domain capability bitmask.

use bitflags::bitflags;

bitflags! {
    /// Per-domain capability bits packed into the low 24 bits of a
    /// capability word.
    #[derive(Debug, Clone, Copy, Eq, PartialEq)]
    pub struct Capability: u32 {
        const SCAN             = 1 << 0;
        const SNIFF             = 1 << 1;
        const INJECT            = 1 << 2;
        const JAM               = 1 << 3;
        const HIJACK            = 1 << 4;
        const HOOK              = 1 << 5;
        const MASTER_ROLE       = 1 << 6;
        const SLAVE_ROLE        = 1 << 7;
        const NO_RAW_DATA       = 1 << 8;
        const END_DEVICE_ROLE   = 1 << 9;
        const COORDINATOR_ROLE  = 1 << 10;
        const ROUTER_ROLE       = 1 << 11;
    }
}

/// Splits a capability word into its domain octet and capability bits.
pub fn split_capability_word(word: u32) -> (u8, Capability) {
    let domain = (word >> 24) as u8;
    let bits = Capability::from_bits_truncate(word & 0x00FF_FFFF);
    (domain, bits)
}

/// Packs a domain octet and capability bits back into a capability word.
pub fn pack_capability_word(domain: u8, caps: Capability) -> u32 {
    ((domain as u32) << 24) | (caps.bits() & 0x00FF_FFFF)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_and_pack_round_trip() {
        let word = pack_capability_word(0x02, Capability::SCAN | Capability::MASTER_ROLE);
        let (domain, caps) = split_capability_word(word);
        assert_eq!(domain, 0x02);
        assert!(caps.contains(Capability::SCAN));
        assert!(caps.contains(Capability::MASTER_ROLE));
        assert!(!caps.contains(Capability::JAM));
    }
}
