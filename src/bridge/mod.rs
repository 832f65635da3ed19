//! Packet bridge ("pipe") — joins two BLE connectors into a
//! man-in-the-middle relay, rewriting connection handles and synthesising
//! raw-PDU fields when only one side needs them.
//!
//! Each side keeps its own pending-PDU queue, flushed once that side's
//! connection notification arrives, and leans on
//! [`crate::ble::link::reshape_pdu`] for outbound PDU cleanup.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;

use crate::ble::link::reshape_pdu;
use crate::connector::ConnectorBase;
use crate::message::ble::{BleMessage, PduDirection, SendPdu};
use crate::message::generic::GenericMessage;
use crate::message::Message;
use crate::Result;

/// Default access address synthesised for a side that only forwards raw
/// link-layer PDUs when the other side doesn't supply one.
pub const DEFAULT_ACCESS_ADDRESS: u32 = 0x1122_3344;

/// Upper bound on packets buffered per direction while the far side is
/// disconnected; above the cap the oldest is dropped with a logged
/// warning.
pub const PENDING_CAP: usize = 256;

/// Resolves the access address to rewrite an outbound PDU with: the one
/// recorded off a prior `Connected` notification, or the synthesised
/// default.
pub fn resolve_access_address(recorded: Option<u32>) -> u32 {
    recorded.unwrap_or(DEFAULT_ACCESS_ADDRESS)
}

/// Whether a forwarded PDU needs a synthesised zero CRC appended: true only
/// when the two sides disagree on raw-PDU support and the near side (which
/// produced the PDU) is the one *without* it.
pub fn needs_crc_synthesis(raw_pdu_mode: bool, far_supports_raw: bool, near_supports_raw: bool) -> bool {
    raw_pdu_mode && far_supports_raw && !near_supports_raw
}

/// One direction of the bridge: the side that *receives* a notification
/// and the handle that side's outbound sends are currently rewritten to.
struct Side {
    base: ConnectorBase,
    handle: Mutex<Option<u16>>,
    access_address: Mutex<Option<u32>>,
    pending: Mutex<VecDeque<(u32, Vec<u8>)>>,
}

impl Side {
    fn new(base: ConnectorBase) -> Self {
        Self {
            base,
            handle: Mutex::new(None),
            access_address: Mutex::new(None),
            pending: Mutex::new(VecDeque::new()),
        }
    }

    /// The access address to use when forwarding a PDU to this side: the
    /// one its own `Connected` notification reported, or the synthesised
    /// default if this side never supplied one.
    fn access_address(&self) -> u32 {
        resolve_access_address(*self.access_address.lock())
    }

    fn queue_or_send(&self, access_address: u32, pdu: Vec<u8>) -> Result<()> {
        let handle = *self.handle.lock();
        match handle {
            Some(h) => self.send(h, access_address, pdu),
            None => {
                let mut pending = self.pending.lock();
                if pending.len() >= PENDING_CAP {
                    pending.pop_front();
                    log::warn!(
                        "bridge: pending queue full ({PENDING_CAP} packets), dropping oldest"
                    );
                }
                pending.push_back((access_address, pdu));
                Ok(())
            }
        }
    }

    fn send(&self, handle: u16, access_address: u32, pdu: Vec<u8>) -> Result<()> {
        self.base.send_command(
            Message::Ble(BleMessage::SendPdu(SendPdu {
                conn_handle: handle,
                direction: PduDirection::MasterToSlave,
                access_address,
                pdu: reshape_pdu(&pdu),
            })),
            Box::new(|m| matches!(m, Message::Generic(GenericMessage::CmdResult(_)))),
            Duration::from_secs(2),
        )?;
        Ok(())
    }

    /// Records the new connection handle and replays whatever was queued
    /// while disconnected, in arrival order.
    fn on_connected(&self, handle: u16, access_address: u32) {
        *self.handle.lock() = Some(handle);
        *self.access_address.lock() = Some(access_address);
        let queued: Vec<(u32, Vec<u8>)> = self.pending.lock().drain(..).collect();
        for (access_address, pdu) in queued {
            if let Err(e) = self.send(handle, access_address, pdu) {
                log::warn!("bridge: failed to replay queued packet: {e}");
            }
        }
    }

    /// Locks the side (stop forwarding, start queueing) until a new
    /// connection.
    fn on_disconnected(&self) {
        *self.handle.lock() = None;
    }
}

/// Joins `input` and `output` connectors: `input`'s notifications are
/// forwarded to `output` as send-commands (and vice-versa), rewriting the
/// connection handle each time.
pub struct Bridge {
    input: Side,
    output: Side,
    raw_pdu_mode: bool,
}

impl Bridge {
    pub fn new(input: ConnectorBase, output: ConnectorBase) -> Self {
        let raw_pdu_mode = input.supports_raw_pdu() != output.supports_raw_pdu();
        Self {
            input: Side::new(input),
            output: Side::new(output),
            raw_pdu_mode,
        }
    }

    pub fn raw_pdu_mode(&self) -> bool {
        self.raw_pdu_mode
    }

    /// Feeds a notification observed on the input connector. `Connected`
    /// updates the input-side rewrite handle; `PduReceived` is forwarded to
    /// the output side using the output's current handle (queued if unset).
    pub fn on_input_message(&self, message: &Message) {
        self.on_side_message(&self.input, &self.output, message);
    }

    /// Symmetric counterpart for the output connector's notifications.
    pub fn on_output_message(&self, message: &Message) {
        self.on_side_message(&self.output, &self.input, message);
    }

    fn on_side_message(&self, near: &Side, far: &Side, message: &Message) {
        match message {
            Message::Ble(BleMessage::Connected(c)) => {
                near.on_connected(c.conn_handle, c.access_address)
            }
            Message::Ble(BleMessage::Disconnected(_)) => near.on_disconnected(),
            Message::Ble(BleMessage::PduReceived(p)) => {
                let mut pdu = p.pdu.clone();
                // The near side produced a PDU with no CRC; if the far side
                // expects a raw PDU (CRC included), synthesise a zero CRC
                // rather than drop the packet.
                if needs_crc_synthesis(
                    self.raw_pdu_mode,
                    far.base.supports_raw_pdu(),
                    near.base.supports_raw_pdu(),
                ) {
                    pdu.extend_from_slice(&[0, 0, 0]);
                }
                if let Err(e) = far.queue_or_send(far.access_address(), pdu) {
                    log::warn!("bridge: forwarding failed: {e}");
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn side_queues_until_connected_then_replays_in_order() {
        let pending: Mutex<VecDeque<(u32, Vec<u8>)>> = Mutex::new(VecDeque::new());
        pending.lock().push_back((1, vec![0xAA]));
        pending.lock().push_back((2, vec![0xBB]));
        let drained: Vec<_> = pending.lock().drain(..).collect();
        assert_eq!(drained, vec![(1, vec![0xAA]), (2, vec![0xBB])]);
    }

    #[test]
    fn access_address_falls_back_to_default_until_connected() {
        assert_eq!(resolve_access_address(None), DEFAULT_ACCESS_ADDRESS);
        assert_eq!(resolve_access_address(Some(0xAABBCCDD)), 0xAABBCCDD);
    }

    #[test]
    fn crc_synthesis_only_when_sides_disagree_and_near_lacks_it() {
        assert!(!needs_crc_synthesis(false, true, false));
        assert!(!needs_crc_synthesis(true, false, false));
        assert!(!needs_crc_synthesis(true, true, true));
        assert!(needs_crc_synthesis(true, true, false));
    }

    #[test]
    fn pending_cap_drops_oldest() {
        let mut pending: VecDeque<(u32, Vec<u8>)> = VecDeque::new();
        for i in 0..PENDING_CAP + 5 {
            if pending.len() >= PENDING_CAP {
                pending.pop_front();
            }
            pending.push_back((0, vec![i as u8]));
        }
        assert_eq!(pending.len(), PENDING_CAP);
        assert_eq!(pending.front().unwrap().1, vec![5]);
    }
}
