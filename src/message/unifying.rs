//! `unifying` domain messages — Logitech Unifying discovery/pairing, built
//! on the same PTX/PRX roles as `esb`.

use super::wire::*;
use crate::Result;

#[derive(Debug, Clone)]
pub enum UnifyingMessage {
    StartDongle,
    StartKeyboard,
    PairingRequest { device_serial: [u8; 4] },
    PairingKeySeedFragment { index: u8, fragment: [u8; 4] },
    Send { data: Vec<u8> },
    Received { data: Vec<u8> },
}

impl WireEncode for UnifyingMessage {
    fn encode(&self, out: &mut Vec<u8>) {
        match self {
            UnifyingMessage::StartDongle => write_u8(out, 0),
            UnifyingMessage::StartKeyboard => write_u8(out, 1),
            UnifyingMessage::PairingRequest { device_serial } => {
                write_u8(out, 2);
                write_fixed(out, device_serial);
            }
            UnifyingMessage::PairingKeySeedFragment { index, fragment } => {
                write_u8(out, 3);
                write_u8(out, *index);
                write_fixed(out, fragment);
            }
            UnifyingMessage::Send { data } => {
                write_u8(out, 4);
                write_bytes(out, data);
            }
            UnifyingMessage::Received { data } => {
                write_u8(out, 5);
                write_bytes(out, data);
            }
        }
    }
}

impl WireDecode for UnifyingMessage {
    fn decode(buf: &mut &[u8]) -> Result<Self> {
        match read_u8(buf)? {
            0 => Ok(UnifyingMessage::StartDongle),
            1 => Ok(UnifyingMessage::StartKeyboard),
            2 => Ok(UnifyingMessage::PairingRequest {
                device_serial: read_array::<4>(buf)?,
            }),
            3 => Ok(UnifyingMessage::PairingKeySeedFragment {
                index: read_u8(buf)?,
                fragment: read_array::<4>(buf)?,
            }),
            4 => Ok(UnifyingMessage::Send {
                data: read_bytes(buf)?,
            }),
            5 => Ok(UnifyingMessage::Received {
                data: read_bytes(buf)?,
            }),
            other => Err(crate::Error::Parse(format!(
                "unknown unifying sub-tag {other}"
            ))),
        }
    }
}
