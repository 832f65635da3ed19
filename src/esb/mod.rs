//! Enhanced ShockBurst PTX/PRX roles, and the Logitech Unifying
//! discovery/pairing exchange that derives a link key from XORed key-seed
//! fragments on top of the same roles.
//!
//! The PTX role's address/channel/start sequencing replays
//! `set_node_address` then `enable_ptx_mode` then `start` on any
//! channel/address change.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::connector::{Connector, ConnectorBase, PrxRole, PtxRole};
use crate::device::{Device, DeviceObserver};
use crate::message::esb::EsbMessage;
use crate::message::generic::GenericMessage;
use crate::message::unifying::UnifyingMessage;
use crate::message::Message;
use crate::Result;

pub const DOMAIN_ESB: u8 = 0x04;
pub const DOMAIN_UNIFYING: u8 = 0x05;

/// Primary Transmitter role: owns the pipe address/channel and (re-)enables
/// itself on any change, mirroring `PTX._enable_role` in the original
/// project.
pub struct Ptx {
    base: ConnectorBase,
    address: Mutex<Vec<u8>>,
    channel: Mutex<u8>,
}

impl Ptx {
    pub fn new(device: Arc<Device>) -> Arc<Self> {
        let connector = Arc::new(Self {
            base: ConnectorBase::new(device.clone(), DOMAIN_ESB),
            address: Mutex::new(vec![0x11, 0x22, 0x33, 0x44, 0x55]),
            channel: Mutex::new(8),
        });
        device.register_connector(connector.clone() as Arc<dyn DeviceObserver>);
        connector
    }

    pub fn set_address(&self, address: Vec<u8>) -> Result<()> {
        *self.address.lock() = address;
        self.start_ptx()
    }

    pub fn set_channel(&self, channel: u8) -> Result<()> {
        *self.channel.lock() = channel;
        self.start_ptx()
    }

    pub fn send(&self, pipe: u8, data: Vec<u8>) -> Result<()> {
        self.base.assert_domain_supported()?;
        self.base.send_command(
            Message::Esb(EsbMessage::Send { pipe, data }),
            Box::new(cmd_result_filter),
            Duration::from_secs(2),
        )?;
        Ok(())
    }
}

impl Connector for Ptx {
    fn base(&self) -> &ConnectorBase {
        &self.base
    }
}

impl PtxRole for Ptx {
    fn start_ptx(&self) -> Result<()> {
        self.base.assert_domain_supported()?;
        self.base.send_command(
            Message::Esb(EsbMessage::SetAddress {
                address: self.address.lock().clone(),
            }),
            Box::new(cmd_result_filter),
            Duration::from_secs(2),
        )?;
        self.base.send_command(
            Message::Esb(EsbMessage::StartPtx),
            Box::new(cmd_result_filter),
            Duration::from_secs(2),
        )?;
        Ok(())
    }
}

impl DeviceObserver for Ptx {
    fn on_message(&self, _message: &Message) {}
}

/// Primary Receiver role: the counterpart of [`Ptx`], listening on pipes
/// rather than addressing a peer directly.
pub struct Prx {
    base: ConnectorBase,
}

impl Prx {
    pub fn new(device: Arc<Device>) -> Arc<Self> {
        let connector = Arc::new(Self {
            base: ConnectorBase::new(device.clone(), DOMAIN_ESB),
        });
        device.register_connector(connector.clone() as Arc<dyn DeviceObserver>);
        connector
    }
}

impl Connector for Prx {
    fn base(&self) -> &ConnectorBase {
        &self.base
    }
}

impl PrxRole for Prx {
    fn start_prx(&self) -> Result<()> {
        self.base.assert_domain_supported()?;
        self.base.send_command(
            Message::Esb(EsbMessage::StartPrx),
            Box::new(cmd_result_filter),
            Duration::from_secs(2),
        )?;
        Ok(())
    }
}

impl DeviceObserver for Prx {
    fn on_message(&self, _message: &Message) {}
}

/// Logitech Unifying pairing: the dongle and device each contribute
/// 4-byte key-seed fragments, XORed together in sequence order to build the
/// 16-byte link key used to encrypt the subsequent HID++ traffic.
#[derive(Debug, Default)]
pub struct KeySeedAccumulator {
    fragments: Vec<(u8, [u8; 4])>,
}

impl KeySeedAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_fragment(&mut self, index: u8, fragment: [u8; 4]) {
        self.fragments.push((index, fragment));
    }

    /// Folds every received fragment into the link key by XOR, ordered by
    /// fragment index so the dongle and device derive the same key
    /// regardless of arrival order.
    pub fn derive_link_key(&self) -> [u8; 16] {
        let mut ordered = self.fragments.clone();
        ordered.sort_by_key(|(index, _)| *index);
        let mut key = [0u8; 16];
        for (i, (_, fragment)) in ordered.iter().enumerate() {
            let offset = (i % 4) * 4;
            for b in 0..4 {
                key[offset + b] ^= fragment[b];
            }
        }
        key
    }
}

/// Logitech Unifying dongle connector: drives discovery/pairing atop the
/// ESB PTX role.
pub struct UnifyingDongle {
    base: ConnectorBase,
    key_seed: Mutex<KeySeedAccumulator>,
}

impl UnifyingDongle {
    pub fn new(device: Arc<Device>) -> Arc<Self> {
        let connector = Arc::new(Self {
            base: ConnectorBase::new(device.clone(), DOMAIN_UNIFYING),
            key_seed: Mutex::new(KeySeedAccumulator::new()),
        });
        device.register_connector(connector.clone() as Arc<dyn DeviceObserver>);
        connector
    }

    pub fn start(&self) -> Result<()> {
        self.base.assert_domain_supported()?;
        self.base.send_command(
            Message::Unifying(UnifyingMessage::StartDongle),
            Box::new(cmd_result_filter),
            Duration::from_secs(2),
        )?;
        Ok(())
    }

    pub fn link_key(&self) -> [u8; 16] {
        self.key_seed.lock().derive_link_key()
    }
}

impl Connector for UnifyingDongle {
    fn base(&self) -> &ConnectorBase {
        &self.base
    }
}

impl DeviceObserver for UnifyingDongle {
    fn on_message(&self, message: &Message) {
        if let Message::Unifying(UnifyingMessage::PairingKeySeedFragment { index, fragment }) =
            message
        {
            self.key_seed.lock().add_fragment(*index, *fragment);
        }
    }
}

fn cmd_result_filter(m: &Message) -> bool {
    matches!(m, Message::Generic(GenericMessage::CmdResult(_)))
}
