//! Connector — binds a [`crate::device::Device`] to a domain stack.

use std::sync::Arc;
use std::time::Duration;

use crate::device::capability::Capability;
use crate::device::{Device, DeviceObserver};
use crate::message::Message;
use crate::{Error, Result};

/// Shared state every domain connector needs: a handle back to the device
/// it drives, the domain byte it speaks, and the capability/command cache
/// populated by discovery. A thin base every domain stack wraps, carrying
/// `send_message`/`send_command` plumbing so each stack only adds its own
/// operations on top.
pub struct ConnectorBase {
    pub device: Arc<Device>,
    pub domain: u8,
}

impl ConnectorBase {
    pub fn new(device: Arc<Device>, domain: u8) -> Self {
        Self { device, domain }
    }

    /// Asserts the domain is supported by the underlying device.
    pub fn assert_domain_supported(&self) -> Result<()> {
        match self.device.info() {
            Some(info) if info.has_domain(self.domain) => Ok(()),
            Some(_) => Err(Error::UnsupportedDomain),
            None => Err(Error::NotReady),
        }
    }

    pub fn has_capability(&self, cap: Capability) -> bool {
        self.device
            .info()
            .and_then(|info| info.domain_capabilities(self.domain))
            .is_some_and(|caps| caps.contains(cap))
    }

    pub fn can_send(&self) -> bool {
        self.device.is_ready()
    }

    pub fn supports_raw_pdu(&self) -> bool {
        !self
            .device
            .info()
            .and_then(|info| info.domain_capabilities(self.domain))
            .is_some_and(|caps| caps.contains(Capability::NO_RAW_DATA))
    }

    pub fn send_command(
        &self,
        message: Message,
        filter: Box<dyn Fn(&Message) -> bool + Send>,
        timeout: Duration,
    ) -> Result<Message> {
        self.device.send_command(message, filter, timeout)
    }

    pub fn send_message(&self, message: &Message) -> Result<()> {
        self.device.send_message(message, None).map(|_| ())
    }
}

/// Common connector interface: translates stack-bound requests into
/// commands and dongle notifications into stack events.
pub trait Connector: DeviceObserver {
    fn base(&self) -> &ConnectorBase;

    fn domain(&self) -> u8 {
        self.base().domain
    }

    fn can_send(&self) -> bool {
        self.base().can_send()
    }

    fn supports_raw_pdu(&self) -> bool {
        self.base().supports_raw_pdu()
    }

    fn has_capability(&self, cap: Capability) -> bool {
        self.base().has_capability(cap)
    }
}

/// Result of a hook invocation on inbound traffic.
#[derive(Debug)]
pub enum HookAction<T> {
    Forward,
    Replace(T),
    Drop,
    Deny(Error),
}

/// Role specializations. Each adds one role-start command plus
/// role-specific callbacks on top of a [`Connector`].
pub trait CentralRole: Connector {
    fn start_scan(&self, active: bool) -> Result<()>;
    fn stop_scan(&self) -> Result<()>;
    fn connect(&self, address: [u8; 6], address_type: u8) -> Result<u16>;
    fn disconnect(&self, conn_handle: u16) -> Result<()>;
}

pub trait PeripheralRole: Connector {
    fn start_advertising(&self) -> Result<()>;
    fn stop_advertising(&self) -> Result<()>;
    fn enable_pairing(&self, enable: bool) -> Result<()>;
}

pub trait SnifferRole: Connector {
    fn start_sniffing(&self) -> Result<()>;
}

pub trait InjectorRole: Connector {
    fn inject(&self, pdu: &[u8]) -> Result<()>;
}

pub trait JammerRole: Connector {
    fn jam(&self, channel: u8) -> Result<()>;
}

pub trait CoordinatorRole: Connector {
    fn start_coordinator(&self, pan_id: u16) -> Result<()>;
}

pub trait EndDeviceRole: Connector {
    fn associate(&self, coordinator: [u8; 8], pan_id: u16) -> Result<()>;
}

pub trait PtxRole: Connector {
    fn start_ptx(&self) -> Result<()>;
}

pub trait PrxRole: Connector {
    fn start_prx(&self) -> Result<()>;
}
