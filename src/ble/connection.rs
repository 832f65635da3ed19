//! Connection — per-link state binding the link layer, L2CAP, ATT,
//! GATT and SMP together.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::ble::gatt::attribute::AttributeDatabase;
use crate::ble::gatt::server::GattServer;
use crate::ble::l2cap::L2capChannel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityState {
    Unencrypted,
    /// Short-term key established after legacy/LESC pairing, not yet
    /// bonded (no long-term key stored).
    StkEstablished { stk: [u8; 16] },
    /// Long-term key in use, from a bonded pairing.
    LtkEstablished { ltk: [u8; 16] },
}

/// One active BLE connection. Owns its own L2CAP reassembly
/// state, GATT server instance and subscription map; central-role clients
/// instead hold a [`crate::ble::gatt::client::GattClient`] against the
/// same handle.
pub struct Connection {
    pub conn_handle: u16,
    pub local_address: ([u8; 6], u8),
    pub peer_address: ([u8; 6], u8),
    pub access_address: u32,
    pub central_role: bool,
    l2cap: RwLock<L2capChannel>,
    server: Option<GattServer>,
    security: RwLock<SecurityState>,
    /// CCCD handle -> (notify, indicate) mirror of [`GattServer`]'s own
    /// table, kept here too so a sniffer/bridge connector that doesn't own
    /// a `GattServer` can still track subscriptions.
    subscriptions: RwLock<HashMap<u16, (bool, bool)>>,
}

impl Connection {
    pub fn new_as_peripheral(
        conn_handle: u16,
        local_address: ([u8; 6], u8),
        peer_address: ([u8; 6], u8),
        access_address: u32,
        db: AttributeDatabase,
    ) -> Self {
        Self {
            conn_handle,
            local_address,
            peer_address,
            access_address,
            central_role: false,
            l2cap: RwLock::new(L2capChannel::new()),
            server: Some(GattServer::new(db)),
            security: RwLock::new(SecurityState::Unencrypted),
            subscriptions: RwLock::new(HashMap::new()),
        }
    }

    pub fn new_as_central(
        conn_handle: u16,
        local_address: ([u8; 6], u8),
        peer_address: ([u8; 6], u8),
        access_address: u32,
    ) -> Self {
        Self {
            conn_handle,
            local_address,
            peer_address,
            access_address,
            central_role: true,
            l2cap: RwLock::new(L2capChannel::new()),
            server: None,
            security: RwLock::new(SecurityState::Unencrypted),
            subscriptions: RwLock::new(HashMap::new()),
        }
    }

    pub fn l2cap(&self) -> &RwLock<L2capChannel> {
        &self.l2cap
    }

    pub fn gatt_server(&self) -> Option<&GattServer> {
        self.server.as_ref()
    }

    pub fn security(&self) -> SecurityState {
        *self.security.read()
    }

    pub fn set_security(&self, state: SecurityState) {
        *self.security.write() = state;
    }

    pub fn record_subscription(&self, cccd_handle: u16, notify: bool, indicate: bool) {
        self.subscriptions.write().insert(cccd_handle, (notify, indicate));
    }

    pub fn subscription(&self, cccd_handle: u16) -> Option<(bool, bool)> {
        self.subscriptions.read().get(&cccd_handle).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::gatt::attribute::AttributeDatabase;

    #[test]
    fn peripheral_connection_owns_a_gatt_server() {
        let conn = Connection::new_as_peripheral(
            1,
            ([0; 6], 0),
            ([1; 6], 1),
            0x11223344,
            AttributeDatabase::new(),
        );
        assert!(conn.gatt_server().is_some());
        assert_eq!(conn.security(), SecurityState::Unencrypted);
    }

    #[test]
    fn central_connection_has_no_gatt_server() {
        let conn = Connection::new_as_central(1, ([0; 6], 0), ([1; 6], 1), 0x11223344);
        assert!(conn.gatt_server().is_none());
    }
}
