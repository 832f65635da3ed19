//! GATT — attribute database, client and server.

pub mod attribute;
pub mod client;
pub mod server;

pub use attribute::{AttributeDatabase, AttributePermissions, Uuid};
pub use client::GattClient;
pub use server::GattServer;
