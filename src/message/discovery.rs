//! `discovery` domain messages — capability negotiation.

use super::wire::*;
use crate::Result;

#[derive(Debug, Clone)]
pub struct DeviceInfoQuery {
    pub proto_version: u16,
}

/// Wire form of `DeviceInfo`. `capabilities` entries pack the domain in the
/// top octet and a 24-bit capability bitmask in the low bits.
#[derive(Debug, Clone)]
pub struct DeviceInfoResp {
    pub fw_author: String,
    pub fw_url: String,
    pub fw_version: (u8, u8, u8),
    pub max_speed: u32,
    pub device_id: [u8; 16],
    pub device_type: u8,
    pub capabilities: Vec<u32>,
}

#[derive(Debug, Clone)]
pub struct DeviceDomainInfoQuery {
    pub domain: u8,
}

#[derive(Debug, Clone)]
pub struct DeviceDomainInfoResp {
    pub domain: u8,
    pub supported_commands: u32,
}

#[derive(Debug, Clone)]
pub struct SetTransportSpeed {
    pub speed: u32,
}

#[derive(Debug, Clone)]
pub struct ResetQuery;

#[derive(Debug, Clone)]
pub struct ReadyResp;

#[derive(Debug, Clone)]
pub enum DiscoveryMessage {
    InfoQuery(DeviceInfoQuery),
    InfoResp(DeviceInfoResp),
    DomainQuery(DeviceDomainInfoQuery),
    DomainResp(DeviceDomainInfoResp),
    SetTransportSpeed(SetTransportSpeed),
    ResetQuery(ResetQuery),
    ReadyResp(ReadyResp),
}

impl WireEncode for DiscoveryMessage {
    fn encode(&self, out: &mut Vec<u8>) {
        match self {
            DiscoveryMessage::InfoQuery(q) => {
                write_u8(out, 0);
                write_u16(out, q.proto_version);
            }
            DiscoveryMessage::InfoResp(r) => {
                write_u8(out, 1);
                write_bytes(out, r.fw_author.as_bytes());
                write_bytes(out, r.fw_url.as_bytes());
                write_u8(out, r.fw_version.0);
                write_u8(out, r.fw_version.1);
                write_u8(out, r.fw_version.2);
                write_u32(out, r.max_speed);
                write_fixed(out, &r.device_id);
                write_u8(out, r.device_type);
                write_u16(out, r.capabilities.len() as u16);
                for cap in &r.capabilities {
                    write_u32(out, *cap);
                }
            }
            DiscoveryMessage::DomainQuery(q) => {
                write_u8(out, 2);
                write_u8(out, q.domain);
            }
            DiscoveryMessage::DomainResp(r) => {
                write_u8(out, 3);
                write_u8(out, r.domain);
                write_u32(out, r.supported_commands);
            }
            DiscoveryMessage::SetTransportSpeed(s) => {
                write_u8(out, 4);
                write_u32(out, s.speed);
            }
            DiscoveryMessage::ResetQuery(_) => {
                write_u8(out, 5);
            }
            DiscoveryMessage::ReadyResp(_) => {
                write_u8(out, 6);
            }
        }
    }
}

impl WireDecode for DiscoveryMessage {
    fn decode(buf: &mut &[u8]) -> Result<Self> {
        match read_u8(buf)? {
            0 => Ok(DiscoveryMessage::InfoQuery(DeviceInfoQuery {
                proto_version: read_u16(buf)?,
            })),
            1 => {
                let fw_author = String::from_utf8_lossy(&read_bytes(buf)?).into_owned();
                let fw_url = String::from_utf8_lossy(&read_bytes(buf)?).into_owned();
                let fw_version = (read_u8(buf)?, read_u8(buf)?, read_u8(buf)?);
                let max_speed = read_u32(buf)?;
                let device_id = read_array::<16>(buf)?;
                let device_type = read_u8(buf)?;
                let n = read_u16(buf)? as usize;
                let mut capabilities = Vec::with_capacity(n);
                for _ in 0..n {
                    capabilities.push(read_u32(buf)?);
                }
                Ok(DiscoveryMessage::InfoResp(DeviceInfoResp {
                    fw_author,
                    fw_url,
                    fw_version,
                    max_speed,
                    device_id,
                    device_type,
                    capabilities,
                }))
            }
            2 => Ok(DiscoveryMessage::DomainQuery(DeviceDomainInfoQuery {
                domain: read_u8(buf)?,
            })),
            3 => Ok(DiscoveryMessage::DomainResp(DeviceDomainInfoResp {
                domain: read_u8(buf)?,
                supported_commands: read_u32(buf)?,
            })),
            4 => Ok(DiscoveryMessage::SetTransportSpeed(SetTransportSpeed {
                speed: read_u32(buf)?,
            })),
            5 => Ok(DiscoveryMessage::ResetQuery(ResetQuery)),
            6 => Ok(DiscoveryMessage::ReadyResp(ReadyResp)),
            other => Err(crate::Error::Parse(format!(
                "unknown discovery sub-tag {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn info_resp_round_trips() {
        let msg = DiscoveryMessage::InfoResp(DeviceInfoResp {
            fw_author: "whad".into(),
            fw_url: "https://example.invalid".into(),
            fw_version: (1, 2, 3),
            max_speed: 115_200,
            device_id: [7u8; 16],
            device_type: 1,
            capabilities: vec![0x02_00_00_07, 0x03_00_00_01],
        });
        let mut out = Vec::new();
        msg.encode(&mut out);
        let decoded = DiscoveryMessage::decode(&mut out.as_slice()).unwrap();
        match decoded {
            DiscoveryMessage::InfoResp(r) => {
                assert_eq!(r.fw_author, "whad");
                assert_eq!(r.max_speed, 115_200);
                assert_eq!(r.capabilities.len(), 2);
            }
            _ => panic!("wrong variant"),
        }
    }
}
