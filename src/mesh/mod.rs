//! Bluetooth Mesh — access → upper transport → lower transport →
//! network → bearer pipeline, network/application keys, heartbeat
//! publication/subscription, and minimal configuration server/client model
//! state.
//!
//! Mesh rides the BLE advertising bearer (PB-ADV / mesh beacon AD types),
//! so this module is built on [`crate::ble`] sniff/inject primitives the
//! way a mesh connector subclassing a BLE sniffer would. The
//! configuration-model operation set is narrowed to key add/update and
//! heartbeat pub/sub.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::ble::central::DOMAIN_BLE;
use crate::connector::{Connector, ConnectorBase};
use crate::device::{Device, DeviceObserver};
use crate::message::ble::{BleMessage, PduDirection, SendPdu};
use crate::message::generic::GenericMessage;
use crate::message::Message;
use crate::Result;

/// One entry of the network-key list, indexed the way the Mesh Profile's
/// network key list is.
#[derive(Debug, Clone)]
pub struct NetKey {
    pub index: u16,
    pub key: [u8; 16],
}

/// One entry of the application-key list, bound to the network key it was
/// derived under.
#[derive(Debug, Clone)]
pub struct AppKey {
    pub index: u16,
    pub bound_net_key_index: u16,
    pub key: [u8; 16],
}

/// Heartbeat publication state.
#[derive(Debug, Clone, Default)]
pub struct HeartbeatPublication {
    pub destination: u16,
    pub count_log: u8,
    pub period_log: u8,
    pub ttl: u8,
    pub net_key_index: u16,
}

/// Heartbeat subscription state: counts received heartbeats
/// from `source` to `destination` within the subscription period.
#[derive(Debug, Clone, Default)]
pub struct HeartbeatSubscription {
    pub source: u16,
    pub destination: u16,
    pub count: u16,
    pub min_hops: u8,
    pub max_hops: u8,
}

/// The fixed pipeline a PDU travels through on receipt: access carries an
/// opcode + model
/// payload, upper transport (de)obfuscates/decrypts under an app or device
/// key, lower transport (re)segments, network (de)obfuscates/decrypts under
/// a network key and enforces the TTL/sequence-number replay window, and
/// the bearer is the underlying BLE advertising channel.
#[derive(Debug, Clone)]
pub struct AccessMessage {
    pub src: u16,
    pub dst: u16,
    pub opcode: u32,
    pub payload: Vec<u8>,
}

/// Minimal configuration server model state: the key lists and heartbeat
/// pub/sub every node carries.
#[derive(Default)]
pub struct ConfigurationModel {
    net_keys: Mutex<HashMap<u16, NetKey>>,
    app_keys: Mutex<HashMap<u16, AppKey>>,
    heartbeat_pub: Mutex<Option<HeartbeatPublication>>,
    heartbeat_sub: Mutex<Option<HeartbeatSubscription>>,
}

impl ConfigurationModel {
    pub fn add_net_key(&self, net_key: NetKey) {
        self.net_keys.lock().insert(net_key.index, net_key);
    }

    pub fn add_app_key(&self, app_key: AppKey) -> Result<()> {
        if !self.net_keys.lock().contains_key(&app_key.bound_net_key_index) {
            return Err(crate::Error::Other(format!(
                "app key bound to unknown net key index {}",
                app_key.bound_net_key_index
            )));
        }
        self.app_keys.lock().insert(app_key.index, app_key);
        Ok(())
    }

    pub fn net_key(&self, index: u16) -> Option<NetKey> {
        self.net_keys.lock().get(&index).cloned()
    }

    pub fn app_key(&self, index: u16) -> Option<AppKey> {
        self.app_keys.lock().get(&index).cloned()
    }

    pub fn set_heartbeat_publication(&self, pub_: HeartbeatPublication) {
        *self.heartbeat_pub.lock() = Some(pub_);
    }

    pub fn set_heartbeat_subscription(&self, sub: HeartbeatSubscription) {
        *self.heartbeat_sub.lock() = Some(sub);
    }

    /// Counts one received heartbeat toward the active subscription, if it
    /// matches the subscribed `(source, destination)` pair.
    pub fn on_heartbeat_received(&self, source: u16, destination: u16, hops: u8) {
        let mut sub = self.heartbeat_sub.lock();
        if let Some(s) = sub.as_mut() {
            if s.source == source && s.destination == destination {
                s.count = s.count.saturating_add(1);
                s.min_hops = s.min_hops.min(hops);
                s.max_hops = s.max_hops.max(hops);
            }
        }
    }

    pub fn heartbeat_subscription(&self) -> Option<HeartbeatSubscription> {
        self.heartbeat_sub.lock().clone()
    }
}

/// Mesh node connector: sniffs/injects advertising-bearer PDUs and exposes
/// the configuration model state.
pub struct MeshNode {
    base: ConnectorBase,
    pub configuration: ConfigurationModel,
}

impl MeshNode {
    pub fn new(device: Arc<Device>) -> Arc<Self> {
        let connector = Arc::new(Self {
            base: ConnectorBase::new(device.clone(), DOMAIN_BLE),
            configuration: ConfigurationModel::default(),
        });
        device.register_connector(connector.clone() as Arc<dyn DeviceObserver>);
        connector
    }

    /// Runs one inbound advertising PDU through the bearer → network →
    /// lower transport → upper transport → access pipeline. Segmentation
    /// reassembly and encryption are intentionally not modeled bit-for-bit
    /// here; this demonstrates and tests the layer boundaries and heartbeat
    /// counting.
    pub fn on_network_pdu(&self, src: u16, dst: u16, ttl: u8, payload: Vec<u8>) {
        if payload.len() >= 2 && payload[0] == 0x00 {
            // Heartbeat access opcode 0x00 carries (init_ttl, features);
            // `hops = init_ttl - ttl + 1`.
            let init_ttl = payload[1];
            let hops = init_ttl.saturating_sub(ttl).saturating_add(1);
            self.configuration.on_heartbeat_received(src, dst, hops);
            return;
        }
        log::debug!("mesh: access payload from {src:#06x} to {dst:#06x}: {payload:?}");
    }

    /// The fixed advertising-channel access address, since mesh PDUs ride unconnected advertising events.
    const ADV_ACCESS_ADDRESS: u32 = 0x8E89_BED6;

    pub fn send_advertising_pdu(&self, raw: Vec<u8>) -> Result<()> {
        self.base.assert_domain_supported()?;
        self.base.send_command(
            Message::Ble(BleMessage::SendPdu(SendPdu {
                conn_handle: 0,
                direction: PduDirection::SlaveToMaster,
                access_address: Self::ADV_ACCESS_ADDRESS,
                pdu: raw,
            })),
            Box::new(|m| matches!(m, Message::Generic(GenericMessage::CmdResult(_)))),
            Duration::from_secs(2),
        )?;
        Ok(())
    }
}

impl Connector for MeshNode {
    fn base(&self) -> &ConnectorBase {
        &self.base
    }
}

impl DeviceObserver for MeshNode {
    fn on_message(&self, message: &Message) {
        if let Message::Ble(BleMessage::AdvPdu(adv)) = message {
            // A real implementation demultiplexes the mesh AD types (mesh
            // beacon / mesh message / mesh provisioning) before handing the
            // network PDU onward; left as the minimal bearer tap this
            // module needs to exercise `on_network_pdu`.
            log::trace!("mesh: observed {} byte adv pdu", adv.data.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_key_must_bind_to_a_known_net_key() {
        let config = ConfigurationModel::default();
        let err = config.add_app_key(AppKey {
            index: 0,
            bound_net_key_index: 0,
            key: [0; 16],
        });
        assert!(err.is_err());

        config.add_net_key(NetKey {
            index: 0,
            key: [1; 16],
        });
        assert!(config
            .add_app_key(AppKey {
                index: 0,
                bound_net_key_index: 0,
                key: [2; 16],
            })
            .is_ok());
        assert_eq!(config.app_key(0).unwrap().key, [2; 16]);
    }

    #[test]
    fn heartbeat_subscription_counts_matching_reports() {
        let config = ConfigurationModel::default();
        config.set_heartbeat_subscription(HeartbeatSubscription {
            source: 0x0001,
            destination: 0x0002,
            count: 0,
            min_hops: 0xff,
            max_hops: 0,
        });
        config.on_heartbeat_received(0x0001, 0x0002, 3);
        config.on_heartbeat_received(0x0001, 0x0002, 1);
        config.on_heartbeat_received(0x0099, 0x0002, 1); // different source, ignored

        let sub = config.heartbeat_subscription().unwrap();
        assert_eq!(sub.count, 2);
        assert_eq!(sub.min_hops, 1);
        assert_eq!(sub.max_hops, 3);
    }
}
