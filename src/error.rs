//! Crate-wide error type.
//!
//! Every subsystem (transport, message codec, device, ATT/GATT, SMP, bridge)
//! contributes variants to a single [`Error`] enum instead of inventing its
//! own, so callers only ever need to match on `whad::Error`.

use thiserror::Error;

use crate::ble::att::AttErrorCode;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("frame too large ({0} bytes, max 65535)")]
    FrameTooLarge(usize),

    #[error("message parse error: {0}")]
    Parse(String),

    #[error("truncated message")]
    Truncated,

    #[error(
        "l2cap fragmentation error: continuation fragment with no prior first fragment, \
         or a new first fragment arrived while a reassembly was still pending"
    )]
    FragmentationError,

    #[error("link desynchronized from the dongle's radio clock")]
    Desynchronized,

    #[error("unsupported domain")]
    UnsupportedDomain,

    #[error("unsupported capability for domain {domain:#x}")]
    UnsupportedCapability { domain: u8 },

    #[error("device is not ready")]
    NotReady,

    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("access denied opening device: {0}")]
    AccessDenied(String),

    #[error("operation timed out")]
    Timeout,

    #[error("connection lost")]
    ConnectionLost,

    #[error("ATT error: opcode={opcode:#04x} handle={handle:#06x} reason={reason:?}")]
    Att {
        opcode: u8,
        handle: u16,
        reason: AttErrorCode,
    },

    #[error("GATT operation timed out")]
    GattTimeout,

    #[error("pairing failed: {0:?}")]
    PairingFailed(crate::ble::smp::SmPairingFailedReason),

    #[error("invalid profile document: {0}")]
    InvalidProfile(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("attribute database handle collision at {0:#06x}")]
    HandleCollision(u16),

    #[error("{0}")]
    Other(String),
}
