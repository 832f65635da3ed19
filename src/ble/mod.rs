//! BLE stack: link layer, L2CAP, ATT, GATT client/server, SMP pairing
//! and the central/peripheral connectors built on top of them.

pub mod address;
pub mod att;
pub mod central;
pub mod connection;
pub mod gatt;
pub mod l2cap;
pub mod link;
pub mod peripheral;
pub mod smp;

pub use address::BDAddr;
pub use central::BleCentral;
pub use connection::{Connection, SecurityState};
pub use peripheral::BlePeripheral;
