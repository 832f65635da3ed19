//! L2CAP — fixed-channel demultiplexing and segmentation/reassembly.
//!
//! Three fixed CIDs are assigned here (ATT, LE-signalling, SMP), and the
//! basic-frame header is a 2-byte length + 2-byte CID, little-endian.

use std::collections::HashMap;

use crate::message::wire::{WireDecode, WireEncode};
use crate::{Error, Result};

pub const CID_ATT: u16 = 0x0004;
pub const CID_LE_SIGNALLING: u16 = 0x0005;
pub const CID_SMP: u16 = 0x0006;

/// A reassembled or single-fragment L2CAP SDU bound for one fixed channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct L2capSdu {
    pub cid: u16,
    pub payload: Vec<u8>,
}

impl WireEncode for L2capSdu {
    fn encode(&self, out: &mut Vec<u8>) {
        use byteorder::{WriteBytesExt, LE};
        out.write_u16::<LE>(self.payload.len() as u16).unwrap();
        out.write_u16::<LE>(self.cid).unwrap();
        out.extend_from_slice(&self.payload);
    }
}

impl WireDecode for L2capSdu {
    fn decode(buf: &mut &[u8]) -> Result<Self> {
        use byteorder::{ReadBytesExt, LE};
        let len = buf.read_u16::<LE>().map_err(|_| Error::Truncated)? as usize;
        let cid = buf.read_u16::<LE>().map_err(|_| Error::Truncated)?;
        if buf.len() < len {
            return Err(Error::Truncated);
        }
        let (payload, rest) = buf.split_at(len);
        *buf = rest;
        Ok(L2capSdu {
            cid,
            payload: payload.to_vec(),
        })
    }
}

/// Reassembly state for one direction of one connection's L2CAP channel,
/// keyed by CID because ATT/SMP/signalling reassemble independently: a new
/// first fragment arriving before a prior reassembly on the same CID
/// completed raises a fragmentation error event.
#[derive(Default)]
struct Reassembly {
    expected_len: usize,
    cid: u16,
    buffer: Vec<u8>,
}

/// Per-connection L2CAP channel demultiplexer.
pub struct L2capChannel {
    mtu: usize,
    reassembly: HashMap<u16, Reassembly>,
}

impl L2capChannel {
    pub const DEFAULT_MTU: usize = 23;

    pub fn new() -> Self {
        Self {
            mtu: Self::DEFAULT_MTU,
            reassembly: HashMap::new(),
        }
    }

    pub fn mtu(&self) -> usize {
        self.mtu
    }

    pub fn set_mtu(&mut self, mtu: usize) {
        self.mtu = mtu;
    }

    /// Feeds one link-layer L2CAP fragment. Returns a complete SDU once
    /// reassembly finishes, or `None` while more fragments are expected.
    /// `is_first_fragment` comes from the link-layer LLID (start/complete
    /// vs continuation), since that's the only reassembly signal BLE gives.
    pub fn feed(
        &mut self,
        cid_hint: u16,
        is_first_fragment: bool,
        data: &[u8],
    ) -> Result<Option<L2capSdu>> {
        if is_first_fragment {
            use byteorder::{ReadBytesExt, LE};
            if data.len() < 4 {
                return Err(Error::Truncated);
            }
            let mut cur = &data[..4];
            let len = cur.read_u16::<LE>().unwrap() as usize;
            let cid = cur.read_u16::<LE>().unwrap();
            let body = &data[4..];

            if body.len() >= len {
                return Ok(Some(L2capSdu {
                    cid,
                    payload: body[..len].to_vec(),
                }));
            }

            if self.reassembly.remove(&cid_hint).is_some() {
                log::warn!(
                    "l2cap: new first fragment on cid {cid_hint:#06x} while a prior reassembly \
                     was still pending; discarding the stale one"
                );
                return Err(Error::FragmentationError);
            }
            self.reassembly.insert(
                cid_hint,
                Reassembly {
                    expected_len: len,
                    cid,
                    buffer: body.to_vec(),
                },
            );
            Ok(None)
        } else {
            let Some(state) = self.reassembly.get_mut(&cid_hint) else {
                return Err(Error::FragmentationError);
            };
            state.buffer.extend_from_slice(data);
            if state.buffer.len() >= state.expected_len {
                let state = self.reassembly.remove(&cid_hint).unwrap();
                Ok(Some(L2capSdu {
                    cid: state.cid,
                    payload: state.buffer[..state.expected_len].to_vec(),
                }))
            } else {
                Ok(None)
            }
        }
    }

    /// Splits an outbound SDU into link-layer-sized fragments, each
    /// carrying the 4-byte L2CAP header only on the first fragment.
    pub fn fragment(&self, cid: u16, payload: &[u8]) -> Vec<Vec<u8>> {
        use byteorder::{WriteBytesExt, LE};
        let mut header = Vec::with_capacity(4);
        header.write_u16::<LE>(payload.len() as u16).unwrap();
        header.write_u16::<LE>(cid).unwrap();

        let mut whole = header;
        whole.extend_from_slice(payload);

        let chunk_size = self.mtu.max(1);
        whole
            .chunks(chunk_size)
            .map(|chunk| chunk.to_vec())
            .collect()
    }
}

impl Default for L2capChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_fragment_sdu_completes_immediately() {
        let mut ch = L2capChannel::new();
        let sdu = L2capSdu {
            cid: CID_ATT,
            payload: vec![0x01, 0x02, 0x03],
        };
        let mut bytes = Vec::new();
        sdu.encode(&mut bytes);
        let result = ch.feed(CID_ATT, true, &bytes).unwrap();
        assert_eq!(result, Some(sdu));
    }

    #[test]
    fn reassembles_across_fragments() {
        let mut ch = L2capChannel::new();
        let payload = vec![0xAAu8; 40];
        let mut whole = Vec::new();
        {
            use byteorder::{WriteBytesExt, LE};
            whole.write_u16::<LE>(40).unwrap();
            whole.write_u16::<LE>(CID_ATT).unwrap();
        }
        whole.extend_from_slice(&payload);

        let first = &whole[..20];
        let second = &whole[20..];

        assert_eq!(ch.feed(CID_ATT, true, first).unwrap(), None);
        let sdu = ch.feed(CID_ATT, false, second).unwrap().unwrap();
        assert_eq!(sdu.cid, CID_ATT);
        assert_eq!(sdu.payload, payload);
    }

    #[test]
    fn continuation_without_prior_first_fragment_is_an_error() {
        let mut ch = L2capChannel::new();
        let err = ch.feed(CID_ATT, false, &[0x01, 0x02]).unwrap_err();
        assert!(matches!(err, Error::FragmentationError));
    }

    #[test]
    fn new_first_fragment_mid_reassembly_discards_prior_sdu_and_errors() {
        let mut ch = L2capChannel::new();
        let payload = vec![0xAAu8; 40];
        let mut whole = Vec::new();
        {
            use byteorder::{WriteBytesExt, LE};
            whole.write_u16::<LE>(40).unwrap();
            whole.write_u16::<LE>(CID_ATT).unwrap();
        }
        whole.extend_from_slice(&payload);
        let first = &whole[..20];

        assert_eq!(ch.feed(CID_ATT, true, first).unwrap(), None);

        // A second first-fragment arrives before the first SDU finished
        // reassembling: the stale partial is discarded and this is an error.
        let err = ch.feed(CID_ATT, true, first).unwrap_err();
        assert!(matches!(err, Error::FragmentationError));

        // The stale entry is gone, so a fresh reassembly can start clean.
        assert_eq!(ch.feed(CID_ATT, true, first).unwrap(), None);
        let sdu = ch.feed(CID_ATT, false, &whole[20..]).unwrap().unwrap();
        assert_eq!(sdu.payload, payload);
    }

    #[test]
    fn fragments_respect_mtu() {
        let mut ch = L2capChannel::new();
        ch.set_mtu(10);
        let fragments = ch.fragment(CID_ATT, &[0u8; 25]);
        assert!(fragments.iter().all(|f| f.len() <= 10));
        assert!(fragments.len() > 1);
    }
}
