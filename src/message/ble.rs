//! `ble` domain messages — the commands and notifications the BLE
//! connector exchanges with the dongle.

use super::wire::*;
use crate::Result;

/// Which end of the link a PDU travelled. Mirrors the `direction` parameter
/// `LinkLayerProxy::send_pdu` takes.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum PduDirection {
    MasterToSlave,
    SlaveToMaster,
}

impl PduDirection {
    fn to_u8(self) -> u8 {
        match self {
            PduDirection::MasterToSlave => 0,
            PduDirection::SlaveToMaster => 1,
        }
    }

    fn from_u8(v: u8) -> Result<Self> {
        match v {
            0 => Ok(PduDirection::MasterToSlave),
            1 => Ok(PduDirection::SlaveToMaster),
            other => Err(crate::Error::Parse(format!(
                "unknown PDU direction {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SendPdu {
    pub conn_handle: u16,
    pub direction: PduDirection,
    pub access_address: u32,
    pub pdu: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct ConnectedNotification {
    pub conn_handle: u16,
    pub peer_address: [u8; 6],
    pub peer_address_type: u8,
    pub access_address: u32,
    /// `true` if we are the central (master) of this link.
    pub central_role: bool,
}

#[derive(Debug, Clone)]
pub struct DisconnectedNotification {
    pub conn_handle: u16,
    pub reason: u8,
}

#[derive(Debug, Clone)]
pub struct AdvPduNotification {
    pub address: [u8; 6],
    pub address_type: u8,
    pub adv_type: u8,
    pub rssi: Option<i8>,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct PduReceivedNotification {
    pub conn_handle: u16,
    pub direction: PduDirection,
    pub pdu: Vec<u8>,
}

#[derive(Debug, Clone)]
pub enum BleMessage {
    SetBdAddress {
        address: [u8; 6],
        address_type: u8,
    },
    SetAdvData {
        adv_data: Vec<u8>,
    },
    SetScanResponseData {
        scan_rsp: Vec<u8>,
    },
    StartAdvertising,
    StopAdvertising,
    EnablePairing {
        enable: bool,
    },
    SetScanMode {
        active: bool,
    },
    StartScan,
    StopScan,
    ConnectTo {
        address: [u8; 6],
        address_type: u8,
    },
    Disconnect {
        conn_handle: u16,
    },
    SendPdu(SendPdu),
    Connected(ConnectedNotification),
    Disconnected(DisconnectedNotification),
    AdvPdu(AdvPduNotification),
    PduReceived(PduReceivedNotification),
    Desynchronized,
}

impl WireEncode for BleMessage {
    fn encode(&self, out: &mut Vec<u8>) {
        match self {
            BleMessage::SetBdAddress {
                address,
                address_type,
            } => {
                write_u8(out, 0);
                write_fixed(out, address);
                write_u8(out, *address_type);
            }
            BleMessage::SetAdvData { adv_data } => {
                write_u8(out, 1);
                write_bytes(out, adv_data);
            }
            BleMessage::SetScanResponseData { scan_rsp } => {
                write_u8(out, 2);
                write_bytes(out, scan_rsp);
            }
            BleMessage::StartAdvertising => write_u8(out, 3),
            BleMessage::StopAdvertising => write_u8(out, 4),
            BleMessage::EnablePairing { enable } => {
                write_u8(out, 5);
                write_u8(out, *enable as u8);
            }
            BleMessage::SetScanMode { active } => {
                write_u8(out, 6);
                write_u8(out, *active as u8);
            }
            BleMessage::StartScan => write_u8(out, 7),
            BleMessage::StopScan => write_u8(out, 8),
            BleMessage::ConnectTo {
                address,
                address_type,
            } => {
                write_u8(out, 9);
                write_fixed(out, address);
                write_u8(out, *address_type);
            }
            BleMessage::Disconnect { conn_handle } => {
                write_u8(out, 10);
                write_u16(out, *conn_handle);
            }
            BleMessage::SendPdu(p) => {
                write_u8(out, 11);
                write_u16(out, p.conn_handle);
                write_u8(out, p.direction.to_u8());
                write_u32(out, p.access_address);
                write_bytes(out, &p.pdu);
            }
            BleMessage::Connected(c) => {
                write_u8(out, 12);
                write_u16(out, c.conn_handle);
                write_fixed(out, &c.peer_address);
                write_u8(out, c.peer_address_type);
                write_u32(out, c.access_address);
                write_u8(out, c.central_role as u8);
            }
            BleMessage::Disconnected(d) => {
                write_u8(out, 13);
                write_u16(out, d.conn_handle);
                write_u8(out, d.reason);
            }
            BleMessage::AdvPdu(a) => {
                write_u8(out, 14);
                write_fixed(out, &a.address);
                write_u8(out, a.address_type);
                write_u8(out, a.adv_type);
                write_u8(out, a.rssi.is_some() as u8);
                write_u8(out, a.rssi.unwrap_or(0) as u8);
                write_bytes(out, &a.data);
            }
            BleMessage::PduReceived(p) => {
                write_u8(out, 15);
                write_u16(out, p.conn_handle);
                write_u8(out, p.direction.to_u8());
                write_bytes(out, &p.pdu);
            }
            BleMessage::Desynchronized => write_u8(out, 16),
        }
    }
}

impl WireDecode for BleMessage {
    fn decode(buf: &mut &[u8]) -> Result<Self> {
        match read_u8(buf)? {
            0 => Ok(BleMessage::SetBdAddress {
                address: read_array::<6>(buf)?,
                address_type: read_u8(buf)?,
            }),
            1 => Ok(BleMessage::SetAdvData {
                adv_data: read_bytes(buf)?,
            }),
            2 => Ok(BleMessage::SetScanResponseData {
                scan_rsp: read_bytes(buf)?,
            }),
            3 => Ok(BleMessage::StartAdvertising),
            4 => Ok(BleMessage::StopAdvertising),
            5 => Ok(BleMessage::EnablePairing {
                enable: read_u8(buf)? != 0,
            }),
            6 => Ok(BleMessage::SetScanMode {
                active: read_u8(buf)? != 0,
            }),
            7 => Ok(BleMessage::StartScan),
            8 => Ok(BleMessage::StopScan),
            9 => Ok(BleMessage::ConnectTo {
                address: read_array::<6>(buf)?,
                address_type: read_u8(buf)?,
            }),
            10 => Ok(BleMessage::Disconnect {
                conn_handle: read_u16(buf)?,
            }),
            11 => Ok(BleMessage::SendPdu(SendPdu {
                conn_handle: read_u16(buf)?,
                direction: PduDirection::from_u8(read_u8(buf)?)?,
                access_address: read_u32(buf)?,
                pdu: read_bytes(buf)?,
            })),
            12 => Ok(BleMessage::Connected(ConnectedNotification {
                conn_handle: read_u16(buf)?,
                peer_address: read_array::<6>(buf)?,
                peer_address_type: read_u8(buf)?,
                access_address: read_u32(buf)?,
                central_role: read_u8(buf)? != 0,
            })),
            13 => Ok(BleMessage::Disconnected(DisconnectedNotification {
                conn_handle: read_u16(buf)?,
                reason: read_u8(buf)?,
            })),
            14 => {
                let address = read_array::<6>(buf)?;
                let address_type = read_u8(buf)?;
                let adv_type = read_u8(buf)?;
                let has_rssi = read_u8(buf)? != 0;
                let rssi_raw = read_u8(buf)? as i8;
                let data = read_bytes(buf)?;
                Ok(BleMessage::AdvPdu(AdvPduNotification {
                    address,
                    address_type,
                    adv_type,
                    rssi: has_rssi.then_some(rssi_raw),
                    data,
                }))
            }
            15 => Ok(BleMessage::PduReceived(PduReceivedNotification {
                conn_handle: read_u16(buf)?,
                direction: PduDirection::from_u8(read_u8(buf)?)?,
                pdu: read_bytes(buf)?,
            })),
            16 => Ok(BleMessage::Desynchronized),
            other => Err(crate::Error::Parse(format!("unknown ble sub-tag {other}"))),
        }
    }
}
