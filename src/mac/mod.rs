//! IEEE 802.15.4 MAC — association, beacon/active/orphan scan, and the
//! `data` service with a per-request acknowledgement timeout.
//!
//! CSMA-CA is assumed to be handled by the dongle firmware; this
//! module only drives the MAC state machine: scanning, association, and
//! acknowledged data transmission, following an associate-then-send flow.

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::connector::{Connector, ConnectorBase, CoordinatorRole, EndDeviceRole};
use crate::device::{Device, DeviceObserver};
use crate::message::dot15d4::{AddressingMode, Dot15d4Message};
use crate::message::generic::GenericMessage;
use crate::message::Message;
use crate::{Error, Result};

pub const DOMAIN_DOT15D4: u8 = 0x03;

/// Hard timeout a MAC data request's acknowledgement is awaited with.
pub const ACK_TIMEOUT: Duration = Duration::from_millis(500);

/// Result of a beacon/active/orphan scan: one entry per coordinator heard.
#[derive(Debug, Clone)]
pub struct ScanResult {
    pub coordinator: [u8; 8],
    pub pan_id: u16,
    pub rssi: i8,
}

/// Per-device MAC association state.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum AssociationState {
    Unassociated,
    Associating,
    Associated { short_address: u16 },
}

/// End-device MAC connector: scans, associates with a coordinator, and
/// exchanges acknowledged data frames.
pub struct Dot15d4EndDevice {
    base: ConnectorBase,
    state: Mutex<AssociationState>,
    scan_results: Mutex<Vec<ScanResult>>,
    pending_ack: Mutex<Option<std::sync::mpsc::Sender<bool>>>,
}

impl Dot15d4EndDevice {
    pub fn new(device: Arc<Device>) -> Arc<Self> {
        let connector = Arc::new(Self {
            base: ConnectorBase::new(device.clone(), DOMAIN_DOT15D4),
            state: Mutex::new(AssociationState::Unassociated),
            scan_results: Mutex::new(Vec::new()),
            pending_ack: Mutex::new(None),
        });
        device.register_connector(connector.clone() as Arc<dyn DeviceObserver>);
        connector
    }

    pub fn state(&self) -> AssociationState {
        *self.state.lock()
    }

    pub fn set_channel(&self, channel: u8) -> Result<()> {
        self.base.send_command(
            Message::Dot15d4(Dot15d4Message::SetChannel { channel }),
            Box::new(cmd_result_filter),
            Duration::from_secs(2),
        )?;
        Ok(())
    }

    /// Passive beacon scan: listens for beacons without transmitting a scan
    /// request.
    pub fn beacon_scan(&self) -> Result<Vec<ScanResult>> {
        self.scan(Dot15d4Message::BeaconScan)
    }

    /// Active scan: transmits a beacon request and collects responses.
    pub fn active_scan(&self) -> Result<Vec<ScanResult>> {
        self.scan(Dot15d4Message::ActiveScan)
    }

    /// Orphan scan: used by a device that lost synchronisation with its
    /// coordinator to relocate it.
    pub fn orphan_scan(&self) -> Result<Vec<ScanResult>> {
        self.scan(Dot15d4Message::OrphanScan)
    }

    /// Window a scan request is left open for beacon reports to accumulate
    ///.
    const SCAN_WINDOW: Duration = Duration::from_millis(250);

    fn scan(&self, request: Dot15d4Message) -> Result<Vec<ScanResult>> {
        self.base.assert_domain_supported()?;
        self.scan_results.lock().clear();
        self.base.send_command(
            Message::Dot15d4(request),
            Box::new(cmd_result_filter),
            Duration::from_secs(5),
        )?;
        std::thread::sleep(Self::SCAN_WINDOW);
        Ok(self.scan_results.lock().clone())
    }

    /// Associates with `coordinator` on `pan_id`, blocking for the
    /// association result.
    pub fn associate(&self, coordinator: [u8; 8], pan_id: u16) -> Result<u16> {
        self.base.assert_domain_supported()?;
        *self.state.lock() = AssociationState::Associating;
        let reply = self.base.send_command(
            Message::Dot15d4(Dot15d4Message::AssociateTo { coordinator, pan_id }),
            Box::new(|m| {
                matches!(
                    m,
                    Message::Dot15d4(Dot15d4Message::AssociationSuccess { .. })
                        | Message::Dot15d4(Dot15d4Message::AssociationFailure)
                )
            }),
            Duration::from_secs(10),
        )?;
        match reply {
            Message::Dot15d4(Dot15d4Message::AssociationSuccess { short_address }) => {
                *self.state.lock() = AssociationState::Associated { short_address };
                Ok(short_address)
            }
            _ => {
                *self.state.lock() = AssociationState::Unassociated;
                Err(Error::Other("802.15.4 association refused".into()))
            }
        }
    }

    /// Sends a data frame to `dest`, optionally awaiting a MAC-level
    /// acknowledgement with [`ACK_TIMEOUT`].
    pub fn send(
        &self,
        dest: [u8; 8],
        mode: AddressingMode,
        ack_required: bool,
        data: Vec<u8>,
    ) -> Result<()> {
        self.base.assert_domain_supported()?;
        let (tx, rx) = std::sync::mpsc::channel();
        if ack_required {
            *self.pending_ack.lock() = Some(tx);
        }
        self.base.send_command(
            Message::Dot15d4(Dot15d4Message::Send {
                dest,
                mode,
                ack_required,
                data,
            }),
            Box::new(cmd_result_filter),
            Duration::from_secs(2),
        )?;
        if ack_required {
            match rx.recv_timeout(ACK_TIMEOUT) {
                Ok(true) => Ok(()),
                Ok(false) | Err(_) => {
                    self.pending_ack.lock().take();
                    Err(Error::Timeout)
                }
            }
        } else {
            Ok(())
        }
    }
}

impl Connector for Dot15d4EndDevice {
    fn base(&self) -> &ConnectorBase {
        &self.base
    }
}

impl EndDeviceRole for Dot15d4EndDevice {
    fn associate(&self, coordinator: [u8; 8], pan_id: u16) -> Result<()> {
        self.associate(coordinator, pan_id).map(|_| ())
    }
}

impl DeviceObserver for Dot15d4EndDevice {
    fn on_message(&self, message: &Message) {
        match message {
            Message::Dot15d4(Dot15d4Message::BeaconReceived {
                coordinator,
                pan_id,
                rssi,
            }) => {
                self.scan_results.lock().push(ScanResult {
                    coordinator: *coordinator,
                    pan_id: *pan_id,
                    rssi: *rssi,
                });
            }
            Message::Dot15d4(Dot15d4Message::DataAckReceived) => {
                if let Some(tx) = self.pending_ack.lock().take() {
                    let _ = tx.send(true);
                }
            }
            Message::Dot15d4(Dot15d4Message::DataAckTimeout) => {
                if let Some(tx) = self.pending_ack.lock().take() {
                    let _ = tx.send(false);
                }
            }
            _ => {}
        }
    }
}

/// Coordinator MAC connector: starts a PAN and tracks the next free short
/// address to hand out on association (simplified allocator; a full PAN
/// coordinator also validates capacity and extended-address uniqueness).
pub struct Dot15d4Coordinator {
    base: ConnectorBase,
    next_short_address: AtomicU16,
}

impl Dot15d4Coordinator {
    pub fn new(device: Arc<Device>) -> Arc<Self> {
        let connector = Arc::new(Self {
            base: ConnectorBase::new(device.clone(), DOMAIN_DOT15D4),
            next_short_address: AtomicU16::new(1),
        });
        device.register_connector(connector.clone() as Arc<dyn DeviceObserver>);
        connector
    }

    pub fn allocate_short_address(&self) -> u16 {
        self.next_short_address.fetch_add(1, Ordering::SeqCst)
    }
}

impl Connector for Dot15d4Coordinator {
    fn base(&self) -> &ConnectorBase {
        &self.base
    }
}

impl CoordinatorRole for Dot15d4Coordinator {
    fn start_coordinator(&self, pan_id: u16) -> Result<()> {
        self.base.assert_domain_supported()?;
        self.base.send_command(
            Message::Dot15d4(Dot15d4Message::StartCoordinator { pan_id }),
            Box::new(cmd_result_filter),
            Duration::from_secs(2),
        )?;
        Ok(())
    }
}

impl DeviceObserver for Dot15d4Coordinator {
    fn on_message(&self, _message: &Message) {}
}

fn cmd_result_filter(m: &Message) -> bool {
    matches!(m, Message::Generic(GenericMessage::CmdResult(_)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_address_allocation_increments() {
        let next = AtomicU16::new(1);
        assert_eq!(next.fetch_add(1, Ordering::SeqCst), 1);
        assert_eq!(next.fetch_add(1, Ordering::SeqCst), 2);
    }

    #[test]
    fn association_state_transitions() {
        let state = Mutex::new(AssociationState::Unassociated);
        *state.lock() = AssociationState::Associating;
        assert_eq!(*state.lock(), AssociationState::Associating);
        *state.lock() = AssociationState::Associated { short_address: 0x1234 };
        assert_eq!(
            *state.lock(),
            AssociationState::Associated { short_address: 0x1234 }
        );
    }
}
