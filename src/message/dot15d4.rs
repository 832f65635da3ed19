//! `dot15d4` domain messages — IEEE 802.15.4 MAC commands, kept to
//! the operations the MAC association/scan/data state machine actually
//! drives; exhaustive PIB attribute coverage is out of scope.

use super::wire::*;
use crate::Result;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum AddressingMode {
    Short,
    Extended,
}

impl AddressingMode {
    fn to_u8(self) -> u8 {
        match self {
            AddressingMode::Short => 0,
            AddressingMode::Extended => 1,
        }
    }
    fn from_u8(v: u8) -> Result<Self> {
        match v {
            0 => Ok(AddressingMode::Short),
            1 => Ok(AddressingMode::Extended),
            other => Err(crate::Error::Parse(format!("unknown addr mode {other}"))),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Dot15d4Message {
    SetChannel { channel: u8 },
    StartCoordinator { pan_id: u16 },
    BeaconScan,
    ActiveScan,
    OrphanScan,
    AssociateTo { coordinator: [u8; 8], pan_id: u16 },
    Send {
        dest: [u8; 8],
        mode: AddressingMode,
        ack_required: bool,
        data: Vec<u8>,
    },
    DataReceived {
        src: [u8; 8],
        mode: AddressingMode,
        rssi: i8,
        data: Vec<u8>,
    },
    AssociationSuccess { short_address: u16 },
    AssociationFailure,
    DataAckReceived,
    DataAckTimeout,
    BeaconReceived {
        coordinator: [u8; 8],
        pan_id: u16,
        rssi: i8,
    },
}

impl WireEncode for Dot15d4Message {
    fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Dot15d4Message::SetChannel { channel } => {
                write_u8(out, 0);
                write_u8(out, *channel);
            }
            Dot15d4Message::StartCoordinator { pan_id } => {
                write_u8(out, 1);
                write_u16(out, *pan_id);
            }
            Dot15d4Message::BeaconScan => write_u8(out, 2),
            Dot15d4Message::ActiveScan => write_u8(out, 3),
            Dot15d4Message::OrphanScan => write_u8(out, 4),
            Dot15d4Message::AssociateTo { coordinator, pan_id } => {
                write_u8(out, 5);
                write_fixed(out, coordinator);
                write_u16(out, *pan_id);
            }
            Dot15d4Message::Send {
                dest,
                mode,
                ack_required,
                data,
            } => {
                write_u8(out, 6);
                write_fixed(out, dest);
                write_u8(out, mode.to_u8());
                write_u8(out, *ack_required as u8);
                write_bytes(out, data);
            }
            Dot15d4Message::DataReceived {
                src,
                mode,
                rssi,
                data,
            } => {
                write_u8(out, 7);
                write_fixed(out, src);
                write_u8(out, mode.to_u8());
                write_u8(out, *rssi as u8);
                write_bytes(out, data);
            }
            Dot15d4Message::AssociationSuccess { short_address } => {
                write_u8(out, 8);
                write_u16(out, *short_address);
            }
            Dot15d4Message::AssociationFailure => write_u8(out, 9),
            Dot15d4Message::DataAckReceived => write_u8(out, 10),
            Dot15d4Message::DataAckTimeout => write_u8(out, 11),
            Dot15d4Message::BeaconReceived {
                coordinator,
                pan_id,
                rssi,
            } => {
                write_u8(out, 12);
                write_fixed(out, coordinator);
                write_u16(out, *pan_id);
                write_u8(out, *rssi as u8);
            }
        }
    }
}

impl WireDecode for Dot15d4Message {
    fn decode(buf: &mut &[u8]) -> Result<Self> {
        match read_u8(buf)? {
            0 => Ok(Dot15d4Message::SetChannel {
                channel: read_u8(buf)?,
            }),
            1 => Ok(Dot15d4Message::StartCoordinator {
                pan_id: read_u16(buf)?,
            }),
            2 => Ok(Dot15d4Message::BeaconScan),
            3 => Ok(Dot15d4Message::ActiveScan),
            4 => Ok(Dot15d4Message::OrphanScan),
            5 => Ok(Dot15d4Message::AssociateTo {
                coordinator: read_array::<8>(buf)?,
                pan_id: read_u16(buf)?,
            }),
            6 => Ok(Dot15d4Message::Send {
                dest: read_array::<8>(buf)?,
                mode: AddressingMode::from_u8(read_u8(buf)?)?,
                ack_required: read_u8(buf)? != 0,
                data: read_bytes(buf)?,
            }),
            7 => Ok(Dot15d4Message::DataReceived {
                src: read_array::<8>(buf)?,
                mode: AddressingMode::from_u8(read_u8(buf)?)?,
                rssi: read_u8(buf)? as i8,
                data: read_bytes(buf)?,
            }),
            8 => Ok(Dot15d4Message::AssociationSuccess {
                short_address: read_u16(buf)?,
            }),
            9 => Ok(Dot15d4Message::AssociationFailure),
            10 => Ok(Dot15d4Message::DataAckReceived),
            11 => Ok(Dot15d4Message::DataAckTimeout),
            12 => Ok(Dot15d4Message::BeaconReceived {
                coordinator: read_array::<8>(buf)?,
                pan_id: read_u16(buf)?,
                rssi: read_u8(buf)? as i8,
            }),
            other => Err(crate::Error::Parse(format!(
                "unknown dot15d4 sub-tag {other}"
            ))),
        }
    }
}
