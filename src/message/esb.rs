//! `esb` domain messages — Enhanced ShockBurst PTX/PRX roles, and the
//! Logitech Unifying link-key pairing exchange that rides on top of it.

use super::wire::*;
use crate::Result;

#[derive(Debug, Clone)]
pub enum EsbMessage {
    SetAddress { address: Vec<u8> },
    StartPtx,
    StartPrx,
    Send { pipe: u8, data: Vec<u8> },
    Received { pipe: u8, data: Vec<u8> },
}

impl WireEncode for EsbMessage {
    fn encode(&self, out: &mut Vec<u8>) {
        match self {
            EsbMessage::SetAddress { address } => {
                write_u8(out, 0);
                write_bytes(out, address);
            }
            EsbMessage::StartPtx => write_u8(out, 1),
            EsbMessage::StartPrx => write_u8(out, 2),
            EsbMessage::Send { pipe, data } => {
                write_u8(out, 3);
                write_u8(out, *pipe);
                write_bytes(out, data);
            }
            EsbMessage::Received { pipe, data } => {
                write_u8(out, 4);
                write_u8(out, *pipe);
                write_bytes(out, data);
            }
        }
    }
}

impl WireDecode for EsbMessage {
    fn decode(buf: &mut &[u8]) -> Result<Self> {
        match read_u8(buf)? {
            0 => Ok(EsbMessage::SetAddress {
                address: read_bytes(buf)?,
            }),
            1 => Ok(EsbMessage::StartPtx),
            2 => Ok(EsbMessage::StartPrx),
            3 => Ok(EsbMessage::Send {
                pipe: read_u8(buf)?,
                data: read_bytes(buf)?,
            }),
            4 => Ok(EsbMessage::Received {
                pipe: read_u8(buf)?,
                data: read_bytes(buf)?,
            }),
            other => Err(crate::Error::Parse(format!("unknown esb sub-tag {other}"))),
        }
    }
}
