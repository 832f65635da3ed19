//! `whad` — a host-side framework for driving software radio dongles across
//! short-range wireless protocols (BLE, 802.15.4, Zigbee, Bluetooth Mesh,
//! ESB, Logitech Unifying) over a framed serial/unix-socket transport.
//!
//! The crate is organised the way the system overview lays out the
//! stack, leaves first: [`transport`] moves bytes, [`message`] turns them
//! into typed protocol messages, [`device`] owns a dongle and runs
//! discovery/dispatch, [`connector`] adapts a device to a domain stack,
//! [`layer`] is the generic per-connection state-machine runtime that
//! [`ble`], [`mac`] (802.15.4), [`zigbee`], [`mesh`] and [`esb`] build their
//! protocol stacks on, [`bridge`] wires two connectors into a relay, and
//! [`monitor`] taps a connector's packet stream.

pub mod ble;
pub mod bridge;
pub mod connector;
pub mod device;
pub mod error;
pub mod esb;
pub mod layer;
pub mod mac;
pub mod message;
pub mod mesh;
pub mod monitor;
pub mod profile;
pub mod transport;
pub mod zigbee;

pub use device::Device;
pub use error::{Error, Result};
