//! `generic` domain messages — device-wide results, errors and resets not
//! tied to a specific protocol domain.

use super::wire::*;
use crate::Result;

/// Mirrors `whad.protocol.generic_pb2.ResultCode`: the outcome of the most
/// recent command. `UnsupportedDomain` is fatal for the whole device
///; every other non-`Success` value fails only the issuing command.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ResultCode {
    Success,
    Error,
    ParameterError,
    Busy,
    WrongMode,
    UnsupportedDomain,
    Other(u8),
}

impl ResultCode {
    fn to_u8(self) -> u8 {
        match self {
            ResultCode::Success => 0,
            ResultCode::Error => 1,
            ResultCode::ParameterError => 2,
            ResultCode::Busy => 3,
            ResultCode::WrongMode => 4,
            ResultCode::UnsupportedDomain => 5,
            ResultCode::Other(v) => v,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => ResultCode::Success,
            1 => ResultCode::Error,
            2 => ResultCode::ParameterError,
            3 => ResultCode::Busy,
            4 => ResultCode::WrongMode,
            5 => ResultCode::UnsupportedDomain,
            other => ResultCode::Other(other),
        }
    }
}

#[derive(Debug, Clone)]
pub enum GenericMessage {
    /// Result of the most recently-issued command.
    CmdResult(ResultCode),
    /// Fired by the dongle if it wants to assert a debug message; carried
    /// along verbatim for application-level logging.
    Debug { level: u8, message: String },
}

impl WireEncode for GenericMessage {
    fn encode(&self, out: &mut Vec<u8>) {
        match self {
            GenericMessage::CmdResult(code) => {
                write_u8(out, 0);
                write_u8(out, code.to_u8());
            }
            GenericMessage::Debug { level, message } => {
                write_u8(out, 1);
                write_u8(out, *level);
                write_bytes(out, message.as_bytes());
            }
        }
    }
}

impl WireDecode for GenericMessage {
    fn decode(buf: &mut &[u8]) -> Result<Self> {
        match read_u8(buf)? {
            0 => Ok(GenericMessage::CmdResult(ResultCode::from_u8(read_u8(buf)?))),
            1 => {
                let level = read_u8(buf)?;
                let message = String::from_utf8_lossy(&read_bytes(buf)?).into_owned();
                Ok(GenericMessage::Debug { level, message })
            }
            other => Err(crate::Error::Parse(format!(
                "unknown generic sub-tag {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cmd_result_round_trips() {
        let msg = GenericMessage::CmdResult(ResultCode::UnsupportedDomain);
        let mut out = Vec::new();
        msg.encode(&mut out);
        let decoded = GenericMessage::decode(&mut out.as_slice()).unwrap();
        assert!(matches!(
            decoded,
            GenericMessage::CmdResult(ResultCode::UnsupportedDomain)
        ));
    }
}
