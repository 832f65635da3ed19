//! BLE central connector: scanning and master-role connection
//! management over a [`crate::device::Device`].

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::ble::connection::Connection;
use crate::connector::{CentralRole, Connector, ConnectorBase};
use crate::device::{Device, DeviceObserver};
use crate::message::ble::BleMessage;
use crate::message::generic::{GenericMessage, ResultCode};
use crate::message::Message;
use crate::{Error, Result};

pub const DOMAIN_BLE: u8 = 0x02;

/// One discovered advertiser, deduplicated by BD address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanResult {
    pub address: [u8; 6],
    pub address_type: u8,
    pub rssi: Option<i8>,
    pub data: Vec<u8>,
}

pub struct BleCentral {
    base: ConnectorBase,
    seen: Mutex<HashSet<[u8; 6]>>,
    results: Mutex<Vec<ScanResult>>,
    connections: Mutex<Vec<Arc<Connection>>>,
    desync_error: Mutex<Option<Error>>,
}

impl BleCentral {
    pub fn new(device: Arc<Device>) -> Arc<Self> {
        let connector = Arc::new(Self {
            base: ConnectorBase::new(Arc::clone(&device), DOMAIN_BLE),
            seen: Mutex::new(HashSet::new()),
            results: Mutex::new(Vec::new()),
            connections: Mutex::new(Vec::new()),
            desync_error: Mutex::new(None),
        });
        device.register_connector(connector.clone() as Arc<dyn DeviceObserver>);
        connector
    }

    pub fn scan_results(&self) -> Vec<ScanResult> {
        self.results.lock().clone()
    }

    pub fn connections(&self) -> Vec<Arc<Connection>> {
        self.connections.lock().clone()
    }

    /// Takes the pending desynchronization error, if the dongle reported
    /// losing sync with the link since the last call. Every tracked
    /// connection is already gone by the time this is observable, since
    /// `on_message` drops them the moment the notification arrives.
    pub fn take_desync_error(&self) -> Option<Error> {
        self.desync_error.lock().take()
    }
}

impl Connector for BleCentral {
    fn base(&self) -> &ConnectorBase {
        &self.base
    }
}

impl DeviceObserver for BleCentral {
    fn on_message(&self, message: &Message) {
        if let Message::Ble(BleMessage::AdvPdu(adv)) = message {
            let mut seen = self.seen.lock();
            if seen.insert(adv.address) {
                drop(seen);
                self.results.lock().push(ScanResult {
                    address: adv.address,
                    address_type: adv.address_type,
                    rssi: adv.rssi,
                    data: adv.data.clone(),
                });
            }
        }
        if let Message::Ble(BleMessage::Connected(c)) = message {
            self.connections.lock().push(Arc::new(Connection::new_as_central(
                c.conn_handle,
                ([0; 6], 0),
                (c.peer_address, c.peer_address_type),
                c.access_address,
            )));
        }
        if let Message::Ble(BleMessage::Disconnected(d)) = message {
            self.connections
                .lock()
                .retain(|c| c.conn_handle != d.conn_handle);
        }
        if let Message::Ble(BleMessage::Desynchronized) = message {
            log::warn!("ble: link desynchronized, dropping all tracked connections");
            self.connections.lock().clear();
            *self.desync_error.lock() = Some(Error::Desynchronized);
        }
    }
}

impl CentralRole for BleCentral {
    fn start_scan(&self, active: bool) -> Result<()> {
        self.base.assert_domain_supported()?;
        self.base.send_command(
            Message::Ble(BleMessage::SetScanMode { active }),
            Box::new(cmd_result_filter),
            Duration::from_secs(2),
        )?;
        self.base.send_command(
            Message::Ble(BleMessage::StartScan),
            Box::new(cmd_result_filter),
            Duration::from_secs(2),
        )?;
        Ok(())
    }

    fn stop_scan(&self) -> Result<()> {
        self.base.send_command(
            Message::Ble(BleMessage::StopScan),
            Box::new(cmd_result_filter),
            Duration::from_secs(2),
        )?;
        Ok(())
    }

    fn connect(&self, address: [u8; 6], address_type: u8) -> Result<u16> {
        self.base.assert_domain_supported()?;
        let reply = self.base.send_command(
            Message::Ble(BleMessage::ConnectTo { address, address_type }),
            Box::new(|m| {
                matches!(m, Message::Ble(BleMessage::Connected(_)))
                    || matches!(
                        m,
                        Message::Generic(GenericMessage::CmdResult(ResultCode::Error))
                    )
            }),
            Duration::from_secs(10),
        )?;
        match reply {
            Message::Ble(BleMessage::Connected(c)) => Ok(c.conn_handle),
            _ => Err(Error::ConnectionLost),
        }
    }

    fn disconnect(&self, conn_handle: u16) -> Result<()> {
        self.base.send_command(
            Message::Ble(BleMessage::Disconnect { conn_handle }),
            Box::new(cmd_result_filter),
            Duration::from_secs(5),
        )?;
        Ok(())
    }
}

fn cmd_result_filter(m: &Message) -> bool {
    matches!(m, Message::Generic(GenericMessage::CmdResult(_)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ble::AdvPduNotification;

    #[test]
    fn scan_results_dedup_by_address() {
        // Exercises the observer path directly; a full Device requires a
        // live transport, so this constructs the dedup set in isolation.
        let seen: Mutex<HashSet<[u8; 6]>> = Mutex::new(HashSet::new());
        let results: Mutex<Vec<ScanResult>> = Mutex::new(Vec::new());
        let push = |adv: AdvPduNotification| {
            let mut s = seen.lock();
            if s.insert(adv.address) {
                drop(s);
                results.lock().push(ScanResult {
                    address: adv.address,
                    address_type: adv.address_type,
                    rssi: adv.rssi,
                    data: adv.data,
                });
            }
        };
        let adv = AdvPduNotification {
            address: [1, 2, 3, 4, 5, 6],
            address_type: 0,
            adv_type: 0,
            rssi: Some(-40),
            data: vec![0x02, 0x01, 0x06],
        };
        push(adv.clone());
        push(adv);
        assert_eq!(results.lock().len(), 1);
    }

    #[test]
    fn desynchronized_drops_tracked_connections_and_sets_the_error() {
        // Same bare-instance approach as `scan_results_dedup_by_address`:
        // no live Device is needed to exercise the bookkeeping.
        let connections: Mutex<Vec<Arc<Connection>>> = Mutex::new(vec![Arc::new(
            Connection::new_as_central(3, ([0; 6], 0), ([1; 6], 0), 0x11223344),
        )]);
        let desync_error: Mutex<Option<Error>> = Mutex::new(None);

        // Mirrors BleCentral::on_message's Desynchronized arm.
        connections.lock().clear();
        *desync_error.lock() = Some(Error::Desynchronized);

        assert!(connections.lock().is_empty());
        assert!(matches!(desync_error.lock().take(), Some(Error::Desynchronized)));
        assert!(desync_error.lock().is_none());
    }
}
