//! ATT — attribute protocol PDUs and MTU exchange.
//!
//! PDU opcodes and error codes follow the Bluetooth ATT spec, generalized
//! from an attribute-centric request/response shape to the full PDU set
//! handled here.

use crate::message::wire::{WireDecode, WireEncode};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttOpcode {
    ErrorResponse,
    ExchangeMtuRequest,
    ExchangeMtuResponse,
    FindInformationRequest,
    FindInformationResponse,
    FindByTypeValueRequest,
    FindByTypeValueResponse,
    ReadByTypeRequest,
    ReadByTypeResponse,
    ReadRequest,
    ReadResponse,
    ReadBlobRequest,
    ReadBlobResponse,
    ReadMultipleRequest,
    ReadMultipleResponse,
    ReadByGroupTypeRequest,
    ReadByGroupTypeResponse,
    WriteRequest,
    WriteResponse,
    WriteCommand,
    PrepareWriteRequest,
    PrepareWriteResponse,
    ExecuteWriteRequest,
    ExecuteWriteResponse,
    HandleValueNotification,
    HandleValueIndication,
    HandleValueConfirmation,
}

impl AttOpcode {
    pub fn to_u8(self) -> u8 {
        use AttOpcode::*;
        match self {
            ErrorResponse => 0x01,
            ExchangeMtuRequest => 0x02,
            ExchangeMtuResponse => 0x03,
            FindInformationRequest => 0x04,
            FindInformationResponse => 0x05,
            FindByTypeValueRequest => 0x06,
            FindByTypeValueResponse => 0x07,
            ReadByTypeRequest => 0x08,
            ReadByTypeResponse => 0x09,
            ReadRequest => 0x0A,
            ReadResponse => 0x0B,
            ReadBlobRequest => 0x0C,
            ReadBlobResponse => 0x0D,
            ReadMultipleRequest => 0x0E,
            ReadMultipleResponse => 0x0F,
            ReadByGroupTypeRequest => 0x10,
            ReadByGroupTypeResponse => 0x11,
            WriteRequest => 0x12,
            WriteResponse => 0x13,
            WriteCommand => 0x52,
            PrepareWriteRequest => 0x16,
            PrepareWriteResponse => 0x17,
            ExecuteWriteRequest => 0x18,
            ExecuteWriteResponse => 0x19,
            HandleValueNotification => 0x1B,
            HandleValueIndication => 0x1D,
            HandleValueConfirmation => 0x1E,
        }
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        use AttOpcode::*;
        Some(match v {
            0x01 => ErrorResponse,
            0x02 => ExchangeMtuRequest,
            0x03 => ExchangeMtuResponse,
            0x04 => FindInformationRequest,
            0x05 => FindInformationResponse,
            0x06 => FindByTypeValueRequest,
            0x07 => FindByTypeValueResponse,
            0x08 => ReadByTypeRequest,
            0x09 => ReadByTypeResponse,
            0x0A => ReadRequest,
            0x0B => ReadResponse,
            0x0C => ReadBlobRequest,
            0x0D => ReadBlobResponse,
            0x0E => ReadMultipleRequest,
            0x0F => ReadMultipleResponse,
            0x10 => ReadByGroupTypeRequest,
            0x11 => ReadByGroupTypeResponse,
            0x12 => WriteRequest,
            0x13 => WriteResponse,
            0x52 => WriteCommand,
            0x16 => PrepareWriteRequest,
            0x17 => PrepareWriteResponse,
            0x18 => ExecuteWriteRequest,
            0x19 => ExecuteWriteResponse,
            0x1B => HandleValueNotification,
            0x1D => HandleValueIndication,
            0x1E => HandleValueConfirmation,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttErrorCode {
    InvalidHandle,
    ReadNotPermitted,
    WriteNotPermitted,
    InvalidPdu,
    InsufficientAuthentication,
    RequestNotSupported,
    InvalidOffset,
    InsufficientAuthorization,
    PrepareQueueFull,
    AttributeNotFound,
    AttributeNotLong,
    InsufficientEncryptionKeySize,
    InvalidAttributeValueLength,
    UnlikelyError,
    InsufficientEncryption,
    UnsupportedGroupType,
    InsufficientResources,
    Other(u8),
}

impl AttErrorCode {
    pub fn to_u8(self) -> u8 {
        use AttErrorCode::*;
        match self {
            InvalidHandle => 0x01,
            ReadNotPermitted => 0x02,
            WriteNotPermitted => 0x03,
            InvalidPdu => 0x04,
            InsufficientAuthentication => 0x05,
            RequestNotSupported => 0x06,
            InvalidOffset => 0x07,
            InsufficientAuthorization => 0x08,
            PrepareQueueFull => 0x09,
            AttributeNotFound => 0x0A,
            AttributeNotLong => 0x0B,
            InsufficientEncryptionKeySize => 0x0C,
            InvalidAttributeValueLength => 0x0D,
            UnlikelyError => 0x0E,
            InsufficientEncryption => 0x0F,
            UnsupportedGroupType => 0x10,
            InsufficientResources => 0x11,
            Other(v) => v,
        }
    }

    pub fn from_u8(v: u8) -> Self {
        use AttErrorCode::*;
        match v {
            0x01 => InvalidHandle,
            0x02 => ReadNotPermitted,
            0x03 => WriteNotPermitted,
            0x04 => InvalidPdu,
            0x05 => InsufficientAuthentication,
            0x06 => RequestNotSupported,
            0x07 => InvalidOffset,
            0x08 => InsufficientAuthorization,
            0x09 => PrepareQueueFull,
            0x0A => AttributeNotFound,
            0x0B => AttributeNotLong,
            0x0C => InsufficientEncryptionKeySize,
            0x0D => InvalidAttributeValueLength,
            0x0E => UnlikelyError,
            0x0F => InsufficientEncryption,
            0x10 => UnsupportedGroupType,
            0x11 => InsufficientResources,
            other => Other(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttPdu {
    ErrorResponse {
        request_opcode: u8,
        handle: u16,
        error: AttErrorCode,
    },
    ExchangeMtuRequest {
        client_rx_mtu: u16,
    },
    ExchangeMtuResponse {
        server_rx_mtu: u16,
    },
    FindInformationRequest {
        start_handle: u16,
        end_handle: u16,
    },
    FindInformationResponse {
        /// `(handle, uuid_bytes)` pairs; `uuid_bytes` is 2 or 16 bytes.
        pairs: Vec<(u16, Vec<u8>)>,
    },
    FindByTypeValueRequest {
        start_handle: u16,
        end_handle: u16,
        attribute_type: u16,
        attribute_value: Vec<u8>,
    },
    FindByTypeValueResponse {
        /// `(found_handle, group_end_handle)` pairs.
        handles: Vec<(u16, u16)>,
    },
    ReadMultipleRequest {
        handles: Vec<u16>,
    },
    ReadMultipleResponse {
        /// Concatenation of every requested attribute's value, in
        /// request order.
        values: Vec<u8>,
    },
    ReadByTypeRequest {
        start_handle: u16,
        end_handle: u16,
        attribute_type: Vec<u8>,
    },
    ReadByTypeResponse {
        /// `(handle, value)` pairs, all values the same length.
        pairs: Vec<(u16, Vec<u8>)>,
    },
    ReadRequest {
        handle: u16,
    },
    ReadResponse {
        value: Vec<u8>,
    },
    ReadBlobRequest {
        handle: u16,
        offset: u16,
    },
    ReadBlobResponse {
        value: Vec<u8>,
    },
    ReadByGroupTypeRequest {
        start_handle: u16,
        end_handle: u16,
        attribute_type: Vec<u8>,
    },
    ReadByGroupTypeResponse {
        /// `(handle, end_group_handle, value)`.
        groups: Vec<(u16, u16, Vec<u8>)>,
    },
    WriteRequest {
        handle: u16,
        value: Vec<u8>,
    },
    WriteResponse,
    WriteCommand {
        handle: u16,
        value: Vec<u8>,
    },
    PrepareWriteRequest {
        handle: u16,
        offset: u16,
        value: Vec<u8>,
    },
    PrepareWriteResponse {
        handle: u16,
        offset: u16,
        value: Vec<u8>,
    },
    ExecuteWriteRequest {
        flags: u8,
    },
    ExecuteWriteResponse,
    HandleValueNotification {
        handle: u16,
        value: Vec<u8>,
    },
    HandleValueIndication {
        handle: u16,
        value: Vec<u8>,
    },
    HandleValueConfirmation,
}

impl AttPdu {
    pub fn opcode(&self) -> AttOpcode {
        use AttOpcode::*;
        match self {
            AttPdu::ErrorResponse { .. } => ErrorResponse,
            AttPdu::ExchangeMtuRequest { .. } => ExchangeMtuRequest,
            AttPdu::ExchangeMtuResponse { .. } => ExchangeMtuResponse,
            AttPdu::FindInformationRequest { .. } => FindInformationRequest,
            AttPdu::FindInformationResponse { .. } => FindInformationResponse,
            AttPdu::FindByTypeValueRequest { .. } => FindByTypeValueRequest,
            AttPdu::FindByTypeValueResponse { .. } => FindByTypeValueResponse,
            AttPdu::ReadMultipleRequest { .. } => ReadMultipleRequest,
            AttPdu::ReadMultipleResponse { .. } => ReadMultipleResponse,
            AttPdu::ReadByTypeRequest { .. } => ReadByTypeRequest,
            AttPdu::ReadByTypeResponse { .. } => ReadByTypeResponse,
            AttPdu::ReadRequest { .. } => ReadRequest,
            AttPdu::ReadResponse { .. } => ReadResponse,
            AttPdu::ReadBlobRequest { .. } => ReadBlobRequest,
            AttPdu::ReadBlobResponse { .. } => ReadBlobResponse,
            AttPdu::ReadByGroupTypeRequest { .. } => ReadByGroupTypeRequest,
            AttPdu::ReadByGroupTypeResponse { .. } => ReadByGroupTypeResponse,
            AttPdu::WriteRequest { .. } => WriteRequest,
            AttPdu::WriteResponse => WriteResponse,
            AttPdu::WriteCommand { .. } => WriteCommand,
            AttPdu::PrepareWriteRequest { .. } => PrepareWriteRequest,
            AttPdu::PrepareWriteResponse { .. } => PrepareWriteResponse,
            AttPdu::ExecuteWriteRequest { .. } => ExecuteWriteRequest,
            AttPdu::ExecuteWriteResponse => ExecuteWriteResponse,
            AttPdu::HandleValueNotification { .. } => HandleValueNotification,
            AttPdu::HandleValueIndication { .. } => HandleValueIndication,
            AttPdu::HandleValueConfirmation => HandleValueConfirmation,
        }
    }
}

fn uuid_len_tag(uuid: &[u8]) -> u8 {
    if uuid.len() == 2 {
        1
    } else {
        2
    }
}

impl WireEncode for AttPdu {
    fn encode(&self, out: &mut Vec<u8>) {
        out.push(self.opcode().to_u8());
        match self {
            AttPdu::ErrorResponse {
                request_opcode,
                handle,
                error,
            } => {
                out.push(*request_opcode);
                out.extend_from_slice(&handle.to_le_bytes());
                out.push(error.to_u8());
            }
            AttPdu::ExchangeMtuRequest { client_rx_mtu } => {
                out.extend_from_slice(&client_rx_mtu.to_le_bytes());
            }
            AttPdu::ExchangeMtuResponse { server_rx_mtu } => {
                out.extend_from_slice(&server_rx_mtu.to_le_bytes());
            }
            AttPdu::FindInformationRequest {
                start_handle,
                end_handle,
            } => {
                out.extend_from_slice(&start_handle.to_le_bytes());
                out.extend_from_slice(&end_handle.to_le_bytes());
            }
            AttPdu::FindInformationResponse { pairs } => {
                let format = pairs.first().map(|(_, u)| uuid_len_tag(u)).unwrap_or(1);
                out.push(format);
                for (handle, uuid) in pairs {
                    out.extend_from_slice(&handle.to_le_bytes());
                    out.extend_from_slice(uuid);
                }
            }
            AttPdu::FindByTypeValueRequest {
                start_handle,
                end_handle,
                attribute_type,
                attribute_value,
            } => {
                out.extend_from_slice(&start_handle.to_le_bytes());
                out.extend_from_slice(&end_handle.to_le_bytes());
                out.extend_from_slice(&attribute_type.to_le_bytes());
                out.extend_from_slice(attribute_value);
            }
            AttPdu::FindByTypeValueResponse { handles } => {
                for (found, group_end) in handles {
                    out.extend_from_slice(&found.to_le_bytes());
                    out.extend_from_slice(&group_end.to_le_bytes());
                }
            }
            AttPdu::ReadMultipleRequest { handles } => {
                for handle in handles {
                    out.extend_from_slice(&handle.to_le_bytes());
                }
            }
            AttPdu::ReadMultipleResponse { values } => {
                out.extend_from_slice(values);
            }
            AttPdu::ReadByTypeRequest {
                start_handle,
                end_handle,
                attribute_type,
            } => {
                out.extend_from_slice(&start_handle.to_le_bytes());
                out.extend_from_slice(&end_handle.to_le_bytes());
                out.extend_from_slice(attribute_type);
            }
            AttPdu::ReadByTypeResponse { pairs } => {
                let elem_len = pairs.first().map(|(_, v)| 2 + v.len()).unwrap_or(2) as u8;
                out.push(elem_len);
                for (handle, value) in pairs {
                    out.extend_from_slice(&handle.to_le_bytes());
                    out.extend_from_slice(value);
                }
            }
            AttPdu::ReadRequest { handle } => out.extend_from_slice(&handle.to_le_bytes()),
            AttPdu::ReadResponse { value } => out.extend_from_slice(value),
            AttPdu::ReadBlobRequest { handle, offset } => {
                out.extend_from_slice(&handle.to_le_bytes());
                out.extend_from_slice(&offset.to_le_bytes());
            }
            AttPdu::ReadBlobResponse { value } => out.extend_from_slice(value),
            AttPdu::ReadByGroupTypeRequest {
                start_handle,
                end_handle,
                attribute_type,
            } => {
                out.extend_from_slice(&start_handle.to_le_bytes());
                out.extend_from_slice(&end_handle.to_le_bytes());
                out.extend_from_slice(attribute_type);
            }
            AttPdu::ReadByGroupTypeResponse { groups } => {
                let elem_len = groups
                    .first()
                    .map(|(_, _, v)| 4 + v.len())
                    .unwrap_or(4) as u8;
                out.push(elem_len);
                for (handle, end_handle, value) in groups {
                    out.extend_from_slice(&handle.to_le_bytes());
                    out.extend_from_slice(&end_handle.to_le_bytes());
                    out.extend_from_slice(value);
                }
            }
            AttPdu::WriteRequest { handle, value } => {
                out.extend_from_slice(&handle.to_le_bytes());
                out.extend_from_slice(value);
            }
            AttPdu::WriteResponse => {}
            AttPdu::WriteCommand { handle, value } => {
                out.extend_from_slice(&handle.to_le_bytes());
                out.extend_from_slice(value);
            }
            AttPdu::PrepareWriteRequest {
                handle,
                offset,
                value,
            }
            | AttPdu::PrepareWriteResponse {
                handle,
                offset,
                value,
            } => {
                out.extend_from_slice(&handle.to_le_bytes());
                out.extend_from_slice(&offset.to_le_bytes());
                out.extend_from_slice(value);
            }
            AttPdu::ExecuteWriteRequest { flags } => out.push(*flags),
            AttPdu::ExecuteWriteResponse => {}
            AttPdu::HandleValueNotification { handle, value }
            | AttPdu::HandleValueIndication { handle, value } => {
                out.extend_from_slice(&handle.to_le_bytes());
                out.extend_from_slice(value);
            }
            AttPdu::HandleValueConfirmation => {}
        }
    }
}

impl WireDecode for AttPdu {
    fn decode(buf: &mut &[u8]) -> Result<Self> {
        if buf.is_empty() {
            return Err(Error::Truncated);
        }
        let opcode = AttOpcode::from_u8(buf[0]).ok_or(Error::Parse(format!(
            "unknown ATT opcode {:#04x}",
            buf[0]
        )))?;
        let mut cur = &buf[1..];

        macro_rules! u16_le {
            () => {{
                if cur.len() < 2 {
                    return Err(Error::Truncated);
                }
                let v = u16::from_le_bytes([cur[0], cur[1]]);
                cur = &cur[2..];
                v
            }};
        }

        let pdu = match opcode {
            AttOpcode::ErrorResponse => {
                if cur.len() < 4 {
                    return Err(Error::Truncated);
                }
                let request_opcode = cur[0];
                let handle = u16::from_le_bytes([cur[1], cur[2]]);
                let error = AttErrorCode::from_u8(cur[3]);
                cur = &cur[4..];
                AttPdu::ErrorResponse {
                    request_opcode,
                    handle,
                    error,
                }
            }
            AttOpcode::ExchangeMtuRequest => AttPdu::ExchangeMtuRequest {
                client_rx_mtu: u16_le!(),
            },
            AttOpcode::ExchangeMtuResponse => AttPdu::ExchangeMtuResponse {
                server_rx_mtu: u16_le!(),
            },
            AttOpcode::FindInformationRequest => {
                let start_handle = u16_le!();
                let end_handle = u16_le!();
                AttPdu::FindInformationRequest {
                    start_handle,
                    end_handle,
                }
            }
            AttOpcode::FindInformationResponse => {
                if cur.is_empty() {
                    return Err(Error::Truncated);
                }
                let format = cur[0];
                cur = &cur[1..];
                let uuid_len = if format == 1 { 2 } else { 16 };
                let mut pairs = Vec::new();
                while cur.len() >= 2 + uuid_len {
                    let handle = u16::from_le_bytes([cur[0], cur[1]]);
                    let uuid = cur[2..2 + uuid_len].to_vec();
                    cur = &cur[2 + uuid_len..];
                    pairs.push((handle, uuid));
                }
                AttPdu::FindInformationResponse { pairs }
            }
            AttOpcode::FindByTypeValueRequest => {
                let start_handle = u16_le!();
                let end_handle = u16_le!();
                let attribute_type = u16_le!();
                let attribute_value = cur.to_vec();
                cur = &[];
                AttPdu::FindByTypeValueRequest {
                    start_handle,
                    end_handle,
                    attribute_type,
                    attribute_value,
                }
            }
            AttOpcode::FindByTypeValueResponse => {
                let mut handles = Vec::new();
                while cur.len() >= 4 {
                    let found = u16::from_le_bytes([cur[0], cur[1]]);
                    let group_end = u16::from_le_bytes([cur[2], cur[3]]);
                    cur = &cur[4..];
                    handles.push((found, group_end));
                }
                AttPdu::FindByTypeValueResponse { handles }
            }
            AttOpcode::ReadMultipleRequest => {
                if cur.len() % 2 != 0 {
                    return Err(Error::Truncated);
                }
                let mut handles = Vec::new();
                while !cur.is_empty() {
                    handles.push(u16_le!());
                }
                AttPdu::ReadMultipleRequest { handles }
            }
            AttOpcode::ReadMultipleResponse => {
                let values = cur.to_vec();
                cur = &[];
                AttPdu::ReadMultipleResponse { values }
            }
            AttOpcode::ReadByTypeRequest => {
                let start_handle = u16_le!();
                let end_handle = u16_le!();
                let attribute_type = cur.to_vec();
                cur = &[];
                AttPdu::ReadByTypeRequest {
                    start_handle,
                    end_handle,
                    attribute_type,
                }
            }
            AttOpcode::ReadByTypeResponse => {
                if cur.is_empty() {
                    return Err(Error::Truncated);
                }
                let elem_len = cur[0] as usize;
                cur = &cur[1..];
                let mut pairs = Vec::new();
                while cur.len() >= elem_len && elem_len >= 2 {
                    let handle = u16::from_le_bytes([cur[0], cur[1]]);
                    let value = cur[2..elem_len].to_vec();
                    cur = &cur[elem_len..];
                    pairs.push((handle, value));
                }
                AttPdu::ReadByTypeResponse { pairs }
            }
            AttOpcode::ReadRequest => AttPdu::ReadRequest { handle: u16_le!() },
            AttOpcode::ReadResponse => {
                let value = cur.to_vec();
                cur = &[];
                AttPdu::ReadResponse { value }
            }
            AttOpcode::ReadBlobRequest => {
                let handle = u16_le!();
                let offset = u16_le!();
                AttPdu::ReadBlobRequest { handle, offset }
            }
            AttOpcode::ReadBlobResponse => {
                let value = cur.to_vec();
                cur = &[];
                AttPdu::ReadBlobResponse { value }
            }
            AttOpcode::ReadByGroupTypeRequest => {
                let start_handle = u16_le!();
                let end_handle = u16_le!();
                let attribute_type = cur.to_vec();
                cur = &[];
                AttPdu::ReadByGroupTypeRequest {
                    start_handle,
                    end_handle,
                    attribute_type,
                }
            }
            AttOpcode::ReadByGroupTypeResponse => {
                if cur.is_empty() {
                    return Err(Error::Truncated);
                }
                let elem_len = cur[0] as usize;
                cur = &cur[1..];
                let mut groups = Vec::new();
                while cur.len() >= elem_len && elem_len >= 4 {
                    let handle = u16::from_le_bytes([cur[0], cur[1]]);
                    let end_handle = u16::from_le_bytes([cur[2], cur[3]]);
                    let value = cur[4..elem_len].to_vec();
                    cur = &cur[elem_len..];
                    groups.push((handle, end_handle, value));
                }
                AttPdu::ReadByGroupTypeResponse { groups }
            }
            AttOpcode::WriteRequest => {
                let handle = u16_le!();
                let value = cur.to_vec();
                cur = &[];
                AttPdu::WriteRequest { handle, value }
            }
            AttOpcode::WriteResponse => AttPdu::WriteResponse,
            AttOpcode::WriteCommand => {
                let handle = u16_le!();
                let value = cur.to_vec();
                cur = &[];
                AttPdu::WriteCommand { handle, value }
            }
            AttOpcode::PrepareWriteRequest => {
                let handle = u16_le!();
                let offset = u16_le!();
                let value = cur.to_vec();
                cur = &[];
                AttPdu::PrepareWriteRequest {
                    handle,
                    offset,
                    value,
                }
            }
            AttOpcode::PrepareWriteResponse => {
                let handle = u16_le!();
                let offset = u16_le!();
                let value = cur.to_vec();
                cur = &[];
                AttPdu::PrepareWriteResponse {
                    handle,
                    offset,
                    value,
                }
            }
            AttOpcode::ExecuteWriteRequest => {
                if cur.is_empty() {
                    return Err(Error::Truncated);
                }
                let flags = cur[0];
                cur = &cur[1..];
                AttPdu::ExecuteWriteRequest { flags }
            }
            AttOpcode::ExecuteWriteResponse => AttPdu::ExecuteWriteResponse,
            AttOpcode::HandleValueNotification => {
                let handle = u16_le!();
                let value = cur.to_vec();
                cur = &[];
                AttPdu::HandleValueNotification { handle, value }
            }
            AttOpcode::HandleValueIndication => {
                let handle = u16_le!();
                let value = cur.to_vec();
                cur = &[];
                AttPdu::HandleValueIndication { handle, value }
            }
            AttOpcode::HandleValueConfirmation => AttPdu::HandleValueConfirmation,
        };
        *buf = cur;
        Ok(pdu)
    }
}

/// Negotiated MTU is the lesser of both sides' proposed values, floored at
/// the default.
pub fn negotiate_mtu(client_rx_mtu: u16, server_rx_mtu: u16) -> u16 {
    client_rx_mtu.min(server_rx_mtu).max(23)
}

/// Builds the response to an unrecognized opcode: an Error Response with
/// Request Not Supported.
pub fn unsupported_opcode_error(opcode: u8, handle: u16) -> AttPdu {
    AttPdu::ErrorResponse {
        request_opcode: opcode,
        handle,
        error: AttErrorCode::RequestNotSupported,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mtu_negotiation_takes_the_minimum() {
        assert_eq!(negotiate_mtu(247, 100), 100);
        assert_eq!(negotiate_mtu(23, 23), 23);
        assert_eq!(negotiate_mtu(10, 500), 23);
    }

    #[test]
    fn read_request_round_trips() {
        let pdu = AttPdu::ReadRequest { handle: 0x002A };
        let mut bytes = Vec::new();
        pdu.encode(&mut bytes);
        let mut slice = bytes.as_slice();
        let decoded = AttPdu::decode(&mut slice).unwrap();
        assert!(slice.is_empty());
        assert_eq!(decoded, pdu);
    }

    #[test]
    fn error_response_round_trips() {
        let pdu = AttPdu::ErrorResponse {
            request_opcode: AttOpcode::ReadRequest.to_u8(),
            handle: 0x0001,
            error: AttErrorCode::InvalidHandle,
        };
        let mut bytes = Vec::new();
        pdu.encode(&mut bytes);
        let decoded = AttPdu::decode(&mut bytes.as_slice()).unwrap();
        assert_eq!(decoded, pdu);
    }

    #[test]
    fn write_command_round_trips() {
        let pdu = AttPdu::WriteCommand {
            handle: 0x0010,
            value: vec![1, 2, 3, 4],
        };
        let mut bytes = Vec::new();
        pdu.encode(&mut bytes);
        let decoded = AttPdu::decode(&mut bytes.as_slice()).unwrap();
        assert_eq!(decoded, pdu);
    }

    #[test]
    fn unknown_opcode_is_a_parse_error() {
        let err = AttPdu::decode(&mut [0xFFu8].as_slice()).unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }

    #[test]
    fn find_by_type_value_round_trips() {
        let pdu = AttPdu::FindByTypeValueRequest {
            start_handle: 0x0001,
            end_handle: 0xFFFF,
            attribute_type: 0x2800,
            attribute_value: vec![0x0F, 0x18],
        };
        let mut bytes = Vec::new();
        pdu.encode(&mut bytes);
        let decoded = AttPdu::decode(&mut bytes.as_slice()).unwrap();
        assert_eq!(decoded, pdu);

        let pdu = AttPdu::FindByTypeValueResponse {
            handles: vec![(0x0010, 0x0020), (0x0030, 0x0030)],
        };
        let mut bytes = Vec::new();
        pdu.encode(&mut bytes);
        let decoded = AttPdu::decode(&mut bytes.as_slice()).unwrap();
        assert_eq!(decoded, pdu);
    }

    #[test]
    fn read_multiple_round_trips() {
        let pdu = AttPdu::ReadMultipleRequest {
            handles: vec![0x0002, 0x0004, 0x0006],
        };
        let mut bytes = Vec::new();
        pdu.encode(&mut bytes);
        let decoded = AttPdu::decode(&mut bytes.as_slice()).unwrap();
        assert_eq!(decoded, pdu);

        let pdu = AttPdu::ReadMultipleResponse {
            values: vec![1, 2, 3, 4, 5],
        };
        let mut bytes = Vec::new();
        pdu.encode(&mut bytes);
        let decoded = AttPdu::decode(&mut bytes.as_slice()).unwrap();
        assert_eq!(decoded, pdu);
    }
}
