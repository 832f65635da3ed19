//! GATT client: service/characteristic discovery, MTU-aware long
//! read/write, and CCCD subscription management.

use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

use crate::ble::att::{AttErrorCode, AttPdu};
use crate::ble::gatt::attribute::{
    Uuid, GATT_CHARACTERISTIC, GATT_CLIENT_CHARACTERISTIC_CONFIGURATION, GATT_PRIMARY_SERVICE,
};
use crate::{Error, Result};

const GATT_INCLUDE: [u8; 2] = [0x02, 0x28];

/// Sends an ATT PDU and, for requests, blocks for the matching response.
/// Abstracts over the device/connection plumbing so the client logic here
/// is testable without a live transport.
pub trait AttChannel: Send + Sync {
    fn request(&self, pdu: &AttPdu, timeout: Duration) -> Result<AttPdu>;
    fn command(&self, pdu: &AttPdu) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    pub start_handle: u16,
    pub end_handle: u16,
    pub uuid: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludedService {
    pub declaration_handle: u16,
    pub start_handle: u16,
    pub end_handle: u16,
    /// Only present when the short form carries a 16-bit Bluetooth UUID
    /// inline; a 128-bit included service UUID must be read separately
    /// via a Read Request on `declaration_handle`.
    pub uuid: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicDescriptor {
    pub declaration_handle: u16,
    pub value_handle: u16,
    pub properties: u8,
    pub uuid: Uuid,
}

pub struct GattClient<C: AttChannel> {
    channel: C,
    mtu: AtomicU16,
    timeout: Duration,
}

impl<C: AttChannel> GattClient<C> {
    pub fn new(channel: C) -> Self {
        Self {
            channel,
            mtu: AtomicU16::new(23),
            timeout: Duration::from_secs(5),
        }
    }

    pub fn mtu(&self) -> u16 {
        self.mtu.load(Ordering::SeqCst)
    }

    /// Exchanges MTU and records the negotiated value.
    pub fn exchange_mtu(&self, client_rx_mtu: u16) -> Result<u16> {
        let reply = self.channel.request(
            &AttPdu::ExchangeMtuRequest { client_rx_mtu },
            self.timeout,
        )?;
        match reply {
            AttPdu::ExchangeMtuResponse { server_rx_mtu } => {
                let negotiated = crate::ble::att::negotiate_mtu(client_rx_mtu, server_rx_mtu);
                self.mtu.store(negotiated, Ordering::SeqCst);
                Ok(negotiated)
            }
            AttPdu::ErrorResponse { error, .. } => Err(att_error(error)),
            _ => Err(Error::Parse("unexpected ATT reply to MTU exchange".into())),
        }
    }

    pub fn discover_primary_services(&self) -> Result<Vec<ServiceDescriptor>> {
        let mut services = Vec::new();
        let mut start = 0x0001u16;
        loop {
            let reply = self.channel.request(
                &AttPdu::ReadByGroupTypeRequest {
                    start_handle: start,
                    end_handle: 0xFFFF,
                    attribute_type: GATT_PRIMARY_SERVICE.to_bytes(),
                },
                self.timeout,
            )?;
            match reply {
                AttPdu::ReadByGroupTypeResponse { groups } => {
                    if groups.is_empty() {
                        break;
                    }
                    let mut last_end = start;
                    for (handle, end_handle, value) in groups {
                        let uuid = Uuid::from_bytes(&value)
                            .ok_or_else(|| Error::Parse("malformed service UUID".into()))?;
                        services.push(ServiceDescriptor {
                            start_handle: handle,
                            end_handle,
                            uuid,
                        });
                        last_end = end_handle;
                    }
                    if last_end == 0xFFFF {
                        break;
                    }
                    start = last_end + 1;
                }
                AttPdu::ErrorResponse {
                    error: AttErrorCode::AttributeNotFound,
                    ..
                } => break,
                AttPdu::ErrorResponse { error, .. } => return Err(att_error(error)),
                _ => return Err(Error::Parse("unexpected ATT reply to service discovery".into())),
            }
        }
        Ok(services)
    }

    pub fn discover_characteristics(
        &self,
        service: &ServiceDescriptor,
    ) -> Result<Vec<CharacteristicDescriptor>> {
        let mut out = Vec::new();
        let mut start = service.start_handle;
        loop {
            let reply = self.channel.request(
                &AttPdu::ReadByTypeRequest {
                    start_handle: start,
                    end_handle: service.end_handle,
                    attribute_type: GATT_CHARACTERISTIC.to_bytes(),
                },
                self.timeout,
            )?;
            match reply {
                AttPdu::ReadByTypeResponse { pairs } => {
                    if pairs.is_empty() {
                        break;
                    }
                    let mut last_handle = start;
                    for (handle, value) in pairs {
                        if value.len() < 3 {
                            return Err(Error::Parse("malformed characteristic declaration".into()));
                        }
                        let properties = value[0];
                        let value_handle = u16::from_le_bytes([value[1], value[2]]);
                        let uuid = Uuid::from_bytes(&value[3..])
                            .ok_or_else(|| Error::Parse("malformed characteristic UUID".into()))?;
                        out.push(CharacteristicDescriptor {
                            declaration_handle: handle,
                            value_handle,
                            properties,
                            uuid,
                        });
                        last_handle = handle;
                    }
                    if last_handle >= service.end_handle {
                        break;
                    }
                    start = last_handle + 1;
                }
                AttPdu::ErrorResponse {
                    error: AttErrorCode::AttributeNotFound,
                    ..
                } => break,
                AttPdu::ErrorResponse { error, .. } => return Err(att_error(error)),
                _ => return Err(Error::Parse("unexpected ATT reply to characteristic discovery".into())),
            }
        }
        Ok(out)
    }

    /// Discovers included services within a service's handle range, via
    /// Read By Type on the Include declaration UUID.
    pub fn discover_included_services(
        &self,
        service: &ServiceDescriptor,
    ) -> Result<Vec<IncludedService>> {
        let mut out = Vec::new();
        let mut start = service.start_handle;
        loop {
            let reply = self.channel.request(
                &AttPdu::ReadByTypeRequest {
                    start_handle: start,
                    end_handle: service.end_handle,
                    attribute_type: GATT_INCLUDE.to_vec(),
                },
                self.timeout,
            )?;
            match reply {
                AttPdu::ReadByTypeResponse { pairs } => {
                    if pairs.is_empty() {
                        break;
                    }
                    let mut last_handle = start;
                    for (handle, value) in pairs {
                        if value.len() < 4 {
                            return Err(Error::Parse("malformed include declaration".into()));
                        }
                        let included_start = u16::from_le_bytes([value[0], value[1]]);
                        let included_end = u16::from_le_bytes([value[2], value[3]]);
                        let uuid = Uuid::from_bytes(&value[4..]);
                        out.push(IncludedService {
                            declaration_handle: handle,
                            start_handle: included_start,
                            end_handle: included_end,
                            uuid,
                        });
                        last_handle = handle;
                    }
                    if last_handle >= service.end_handle {
                        break;
                    }
                    start = last_handle + 1;
                }
                AttPdu::ErrorResponse {
                    error: AttErrorCode::AttributeNotFound,
                    ..
                } => break,
                AttPdu::ErrorResponse { error, .. } => return Err(att_error(error)),
                _ => return Err(Error::Parse("unexpected ATT reply to included-service discovery".into())),
            }
        }
        Ok(out)
    }

    /// Discovers every descriptor (including the CCCD) in a characteristic's
    /// handle range via Find Information, the generic "what's the type of
    /// every attribute here" query.
    pub fn discover_descriptors(&self, start_handle: u16, end_handle: u16) -> Result<Vec<(u16, Uuid)>> {
        let mut out = Vec::new();
        let mut start = start_handle;
        loop {
            let reply = self.channel.request(
                &AttPdu::FindInformationRequest {
                    start_handle: start,
                    end_handle,
                },
                self.timeout,
            )?;
            match reply {
                AttPdu::FindInformationResponse { pairs } => {
                    if pairs.is_empty() {
                        break;
                    }
                    let mut last_handle = start;
                    for (handle, uuid_bytes) in pairs {
                        let uuid = Uuid::from_bytes(&uuid_bytes)
                            .ok_or_else(|| Error::Parse("malformed descriptor UUID".into()))?;
                        out.push((handle, uuid));
                        last_handle = handle;
                    }
                    if last_handle >= end_handle {
                        break;
                    }
                    start = last_handle + 1;
                }
                AttPdu::ErrorResponse {
                    error: AttErrorCode::AttributeNotFound,
                    ..
                } => break,
                AttPdu::ErrorResponse { error, .. } => return Err(att_error(error)),
                _ => return Err(Error::Parse("unexpected ATT reply to descriptor discovery".into())),
            }
        }
        Ok(out)
    }

    /// Reads a value, transparently following up with Read Blob requests
    /// when the initial response fills the MTU, i.e. is `MTU - 1` bytes:
    /// that's the server's only way to say "there's more".
    pub fn read(&self, handle: u16) -> Result<Vec<u8>> {
        let mtu = self.mtu();
        let reply = self
            .channel
            .request(&AttPdu::ReadRequest { handle }, self.timeout)?;
        let mut value = match reply {
            AttPdu::ReadResponse { value } => value,
            AttPdu::ErrorResponse { error, .. } => return Err(att_error(error)),
            _ => return Err(Error::Parse("unexpected ATT reply to read request".into())),
        };

        while value.len() as u16 == mtu - 1 {
            let reply = self.channel.request(
                &AttPdu::ReadBlobRequest {
                    handle,
                    offset: value.len() as u16,
                },
                self.timeout,
            )?;
            match reply {
                AttPdu::ReadBlobResponse { value: chunk } => {
                    if chunk.is_empty() {
                        break;
                    }
                    let chunk_len = chunk.len();
                    value.extend_from_slice(&chunk);
                    if (chunk_len as u16) < mtu - 1 {
                        break;
                    }
                }
                AttPdu::ErrorResponse {
                    error: AttErrorCode::InvalidOffset,
                    ..
                } => break,
                AttPdu::ErrorResponse { error, .. } => return Err(att_error(error)),
                _ => return Err(Error::Parse("unexpected ATT reply to read blob".into())),
            }
        }
        Ok(value)
    }

    /// Writes a value, switching to Prepare Write / Execute Write chunking
    /// when it doesn't fit in one `MTU - 3`-byte Write Request.
    pub fn write(&self, handle: u16, value: &[u8]) -> Result<()> {
        let mtu = self.mtu() as usize;
        let chunk_cap = mtu.saturating_sub(3).max(1);

        if value.len() <= chunk_cap {
            let reply = self.channel.request(
                &AttPdu::WriteRequest {
                    handle,
                    value: value.to_vec(),
                },
                self.timeout,
            )?;
            return match reply {
                AttPdu::WriteResponse => Ok(()),
                AttPdu::ErrorResponse { error, .. } => Err(att_error(error)),
                _ => Err(Error::Parse("unexpected ATT reply to write request".into())),
            };
        }

        for (i, chunk) in value.chunks(chunk_cap).enumerate() {
            let offset = (i * chunk_cap) as u16;
            let reply = self.channel.request(
                &AttPdu::PrepareWriteRequest {
                    handle,
                    offset,
                    value: chunk.to_vec(),
                },
                self.timeout,
            )?;
            match reply {
                AttPdu::PrepareWriteResponse { .. } => {}
                AttPdu::ErrorResponse { error, .. } => {
                    // Cancel any queued prepared writes before surfacing the error.
                    let _ = self
                        .channel
                        .request(&AttPdu::ExecuteWriteRequest { flags: 0x00 }, self.timeout);
                    return Err(att_error(error));
                }
                _ => return Err(Error::Parse("unexpected ATT reply to prepare write".into())),
            }
        }

        let reply = self
            .channel
            .request(&AttPdu::ExecuteWriteRequest { flags: 0x01 }, self.timeout)?;
        match reply {
            AttPdu::ExecuteWriteResponse => Ok(()),
            AttPdu::ErrorResponse { error, .. } => Err(att_error(error)),
            _ => Err(Error::Parse("unexpected ATT reply to execute write".into())),
        }
    }

    pub fn write_command(&self, handle: u16, value: &[u8]) -> Result<()> {
        self.channel.command(&AttPdu::WriteCommand {
            handle,
            value: value.to_vec(),
        })
    }

    /// Subscribes by writing the CCCD handle, keyed by the CCCD handle
    /// itself per the resolved subscription-canonical-key decision.
    pub fn subscribe(&self, cccd_handle: u16, indications: bool) -> Result<()> {
        let value = if indications { [0x02, 0x00] } else { [0x01, 0x00] };
        self.write(cccd_handle, &value)
    }

    pub fn unsubscribe(&self, cccd_handle: u16) -> Result<()> {
        self.write(cccd_handle, &[0x00, 0x00])
    }

    pub fn cccd_handle_for(
        &self,
        characteristic: &CharacteristicDescriptor,
        service: &ServiceDescriptor,
        char_list: &[CharacteristicDescriptor],
    ) -> Result<u16> {
        let next_start = char_list
            .iter()
            .map(|c| c.declaration_handle)
            .filter(|h| *h > characteristic.declaration_handle)
            .min()
            .map(|h| h - 1)
            .unwrap_or(service.end_handle);

        let reply = self.channel.request(
            &AttPdu::ReadByTypeRequest {
                start_handle: characteristic.value_handle,
                end_handle: next_start,
                attribute_type: GATT_CLIENT_CHARACTERISTIC_CONFIGURATION.to_bytes(),
            },
            self.timeout,
        )?;
        match reply {
            AttPdu::ReadByTypeResponse { pairs } => pairs
                .first()
                .map(|(h, _)| *h)
                .ok_or_else(|| Error::Parse("characteristic has no CCCD".into())),
            AttPdu::ErrorResponse { error, .. } => Err(att_error(error)),
            _ => Err(Error::Parse("unexpected ATT reply locating CCCD".into())),
        }
    }
}

fn att_error(reason: AttErrorCode) -> Error {
    Error::Att {
        opcode: 0,
        handle: 0,
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FakeChannel {
        responses: Mutex<Vec<AttPdu>>,
    }

    impl AttChannel for FakeChannel {
        fn request(&self, _pdu: &AttPdu, _timeout: Duration) -> Result<AttPdu> {
            Ok(self.responses.lock().unwrap().remove(0))
        }
        fn command(&self, _pdu: &AttPdu) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn read_follows_up_with_read_blob_when_response_fills_mtu() {
        let channel = FakeChannel {
            responses: Mutex::new(vec![
                AttPdu::ReadResponse {
                    value: vec![0xAA; 22],
                },
                AttPdu::ReadBlobResponse {
                    value: vec![0xBB; 5],
                },
            ]),
        };
        let client = GattClient::new(channel);
        let value = client.read(0x0010).unwrap();
        assert_eq!(value.len(), 27);
    }

    #[test]
    fn write_uses_single_request_within_mtu() {
        let channel = FakeChannel {
            responses: Mutex::new(vec![AttPdu::WriteResponse]),
        };
        let client = GattClient::new(channel);
        client.write(0x0010, &[1, 2, 3]).unwrap();
    }

    #[test]
    fn discover_included_services_parses_short_uuid() {
        let channel = FakeChannel {
            responses: Mutex::new(vec![
                AttPdu::ReadByTypeResponse {
                    pairs: vec![(0x0003, vec![0x10, 0x00, 0x20, 0x00, 0x0F, 0x18])],
                },
                AttPdu::ErrorResponse {
                    request_opcode: 0,
                    handle: 0x0004,
                    error: AttErrorCode::AttributeNotFound,
                },
            ]),
        };
        let client = GattClient::new(channel);
        let service = ServiceDescriptor {
            start_handle: 0x0001,
            end_handle: 0x0010,
            uuid: Uuid::Short(0x1800),
        };
        let included = client.discover_included_services(&service).unwrap();
        assert_eq!(
            included,
            vec![IncludedService {
                declaration_handle: 0x0003,
                start_handle: 0x0010,
                end_handle: 0x0020,
                uuid: Some(Uuid::Short(0x180F)),
            }]
        );
    }

    #[test]
    fn discover_descriptors_stops_on_attribute_not_found() {
        let channel = FakeChannel {
            responses: Mutex::new(vec![
                AttPdu::FindInformationResponse {
                    pairs: vec![(0x0005, vec![0x02, 0x29])],
                },
                AttPdu::ErrorResponse {
                    request_opcode: 0,
                    handle: 0x0006,
                    error: AttErrorCode::AttributeNotFound,
                },
            ]),
        };
        let client = GattClient::new(channel);
        let descriptors = client.discover_descriptors(0x0005, 0x0008).unwrap();
        assert_eq!(descriptors, vec![(0x0005, Uuid::Short(0x2902))]);
    }

    #[test]
    fn write_chunks_via_prepare_execute_beyond_mtu() {
        let channel = FakeChannel {
            responses: Mutex::new(vec![
                AttPdu::PrepareWriteResponse {
                    handle: 0x0010,
                    offset: 0,
                    value: vec![0; 20],
                },
                AttPdu::PrepareWriteResponse {
                    handle: 0x0010,
                    offset: 20,
                    value: vec![0; 5],
                },
                AttPdu::ExecuteWriteResponse,
            ]),
        };
        let client = GattClient::new(channel);
        client.write(0x0010, &[0u8; 25]).unwrap();
    }
}
