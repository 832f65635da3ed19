//! `phy` domain messages — raw PHY capture/injection, used by `esb` and
//! `unifying` connectors when the dongle exposes no domain-specific
//! framing.

use super::wire::*;
use crate::Result;

#[derive(Debug, Clone)]
pub enum PhyMessage {
    SetFrequency { mhz: u32 },
    Send { data: Vec<u8> },
    PacketReceived { rssi: i8, data: Vec<u8> },
    Jam { mhz: u32 },
}

impl WireEncode for PhyMessage {
    fn encode(&self, out: &mut Vec<u8>) {
        match self {
            PhyMessage::SetFrequency { mhz } => {
                write_u8(out, 0);
                write_u32(out, *mhz);
            }
            PhyMessage::Send { data } => {
                write_u8(out, 1);
                write_bytes(out, data);
            }
            PhyMessage::PacketReceived { rssi, data } => {
                write_u8(out, 2);
                write_u8(out, *rssi as u8);
                write_bytes(out, data);
            }
            PhyMessage::Jam { mhz } => {
                write_u8(out, 3);
                write_u32(out, *mhz);
            }
        }
    }
}

impl WireDecode for PhyMessage {
    fn decode(buf: &mut &[u8]) -> Result<Self> {
        match read_u8(buf)? {
            0 => Ok(PhyMessage::SetFrequency {
                mhz: read_u32(buf)?,
            }),
            1 => Ok(PhyMessage::Send {
                data: read_bytes(buf)?,
            }),
            2 => Ok(PhyMessage::PacketReceived {
                rssi: read_u8(buf)? as i8,
                data: read_bytes(buf)?,
            }),
            3 => Ok(PhyMessage::Jam {
                mhz: read_u32(buf)?,
            }),
            other => Err(crate::Error::Parse(format!("unknown phy sub-tag {other}"))),
        }
    }
}
