//! Link layer proxy.
//!
//! `reshape_pdu` strips the SN/NESN/MD bits the firmware's own link-layer
//! handles. `crc24` and the channel/frequency mapping carry known-answer
//! test vectors that this module's unit tests reproduce verbatim.

use std::sync::Arc;
use std::time::Duration;

use crate::connector::ConnectorBase;
use crate::message::ble::{BleMessage, PduDirection, SendPdu};
use crate::message::generic::{GenericMessage, ResultCode};
use crate::message::Message;
use crate::Result;

/// Advertising channel indices map to fixed frequencies; data channel
/// indices (0-36) map linearly in 2 MHz steps, skipping the three
/// advertising frequencies.
pub fn channel_to_frequency(channel: u8) -> Option<u16> {
    match channel {
        37 => Some(2402),
        38 => Some(2426),
        39 => Some(2480),
        0..=10 => Some(2404 + 2 * channel as u16),
        11..=36 => Some(2428 + 2 * (channel as u16 - 11)),
        _ => None,
    }
}

pub fn frequency_to_channel(frequency: u16) -> Option<u8> {
    match frequency {
        2402 => Some(37),
        2426 => Some(38),
        2480 => Some(39),
        2404..=2424 if frequency % 2 == 0 => Some(((frequency - 2404) / 2) as u8),
        2428..=2478 if frequency % 2 == 0 => Some(((frequency - 2428) / 2) as u8 + 11),
        _ => None,
    }
}

/// BLE CRC24 over an LE link-layer PDU. `init` is `0x555555` for
/// advertising-channel PDUs (and the initiator-provided `CRCInit` for data
/// channel PDUs once a connection is established).
pub fn crc(data: &[u8]) -> [u8; 3] {
    crc_with_init(data, 0x555555)
}

pub fn crc_with_init(data: &[u8], init: u32) -> [u8; 3] {
    const LFSR_MASK: u32 = 0x5a6000;
    let mut state = init & 0x00ff_ffff;
    for &byte in data {
        let mut cur = byte;
        for _ in 0..8 {
            let next_bit = (state ^ cur as u32) & 1;
            state >>= 1;
            cur >>= 1;
            if next_bit != 0 {
                state |= 1 << 23;
                state ^= LFSR_MASK;
            }
        }
    }
    [
        (state & 0xff) as u8,
        ((state >> 8) & 0xff) as u8,
        ((state >> 16) & 0xff) as u8,
    ]
}

/// LLID values carried in a `BTLE_DATA` header's low two bits.
const LLID_CONTINUATION_OR_EMPTY: u8 = 0x01;
const LLID_START_OR_COMPLETE: u8 = 0x02;
const LLID_CONTROL: u8 = 0x03;

/// Whether `pdu` looks like a well-formed link-layer data PDU worth
/// reshaping, per `is_pdu_valid` in `proxy.py`.
pub fn is_reshapeable(pdu: &[u8]) -> bool {
    if pdu.len() < 2 {
        return false;
    }
    let llid = pdu[0] & 0x03;
    llid == LLID_CONTINUATION_OR_EMPTY || llid == LLID_START_OR_COMPLETE || llid == LLID_CONTROL
}

/// Rebuilds a data-channel PDU's header with only the LLID bits kept,
/// zeroing NESN/SN/MD so a dongle that manages these at firmware level
/// does not see conflicting values.
pub fn reshape_pdu(pdu: &[u8]) -> Vec<u8> {
    if pdu.len() < 2 {
        return pdu.to_vec();
    }
    let llid = pdu[0] & 0x03;
    if llid == LLID_CONTROL {
        // Control PDUs pass through unmodified.
        return pdu.to_vec();
    }
    let mut out = Vec::with_capacity(pdu.len());
    out.push(llid);
    out.extend_from_slice(&pdu[1..]);
    out
}

/// Thin proxy over the command channel that applies [`reshape_pdu`] before
/// handing outbound PDUs to the device.
pub struct LinkLayerProxy {
    base: Arc<ConnectorBase>,
}

impl LinkLayerProxy {
    pub fn new(base: Arc<ConnectorBase>) -> Self {
        Self { base }
    }

    pub fn send_pdu(
        &self,
        pdu: &[u8],
        access_address: u32,
        conn_handle: u16,
        direction: PduDirection,
    ) -> Result<()> {
        let clean = reshape_pdu(pdu);
        let message = Message::Ble(BleMessage::SendPdu(SendPdu {
            conn_handle,
            direction,
            access_address,
            pdu: clean,
        }));
        self.base.send_command(
            message,
            Box::new(|m| matches!(m, Message::Generic(GenericMessage::CmdResult(_)))),
            Duration::from_secs(2),
        )?;
        Ok(())
    }
}

#[allow(dead_code)]
fn cmd_result_ok(message: &Message) -> bool {
    matches!(
        message,
        Message::Generic(GenericMessage::CmdResult(ResultCode::Success))
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_to_frequency_matches_spec_vectors() {
        assert_eq!(channel_to_frequency(37), Some(2402));
        assert_eq!(channel_to_frequency(0), Some(2404));
        assert_eq!(channel_to_frequency(39), Some(2480));
        assert_eq!(channel_to_frequency(42), None);
        assert_eq!(channel_to_frequency(10), Some(2424));
        assert_eq!(channel_to_frequency(38), Some(2426));
        assert_eq!(channel_to_frequency(11), Some(2428));
        assert_eq!(channel_to_frequency(36), Some(2478));
    }

    #[test]
    fn channel_frequency_are_mutual_inverses() {
        for ch in 0..=39u8 {
            let freq = channel_to_frequency(ch).unwrap();
            assert_eq!(frequency_to_channel(freq), Some(ch));
        }
    }

    #[test]
    fn crc_matches_spec_vector() {
        let data = hex::decode("0215110006000461ca0ce41b1e430559ac74e382667051").unwrap();
        assert_eq!(crc(&data), [0x54, 0x5d, 0x96]);
    }

    #[test]
    fn reshape_strips_sn_nesn_md() {
        // LLID=0x02 (start/complete), NESN=1, SN=1, MD=1 all set.
        let pdu = [0b0001_1110, 0x03, 0xAA, 0xBB, 0xCC];
        let clean = reshape_pdu(&pdu);
        assert_eq!(clean[0], 0x02);
        assert_eq!(&clean[1..], &pdu[1..]);
    }

    #[test]
    fn reshape_passes_control_pdus_through() {
        let pdu = [0x03, 0x02, 0x00, 0x01];
        assert_eq!(reshape_pdu(&pdu), pdu.to_vec());
    }
}
