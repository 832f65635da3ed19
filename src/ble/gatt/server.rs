//! GATT server: request handling over an [`AttributeDatabase`], permission
//! enforcement, and notify/indicate delivery with at most one outstanding
//! indication per CCCD handle.

use std::collections::HashSet;

use parking_lot::Mutex;

use crate::ble::att::{unsupported_opcode_error, AttErrorCode, AttOpcode, AttPdu};
use crate::ble::gatt::attribute::{AttributeDatabase, AttributePermissions};
use crate::connector::HookAction;

/// Per-connection CCCD subscription state, keyed by the CCCD attribute
/// handle.
#[derive(Default)]
struct SubscriptionState {
    notify: HashSet<u16>,
    indicate: HashSet<u16>,
    /// Indication handles awaiting a Handle Value Confirmation; a new
    /// indication on the same handle must wait for at most one outstanding
    /// indication per CCCD.
    outstanding_indications: HashSet<u16>,
}

type RequestHook = Box<dyn Fn(&AttPdu) -> HookAction<AttPdu> + Send>;

pub struct GattServer {
    db: Mutex<AttributeDatabase>,
    mtu: Mutex<u16>,
    subscriptions: Mutex<SubscriptionState>,
    hooks: Mutex<Vec<RequestHook>>,
}

impl GattServer {
    pub fn new(db: AttributeDatabase) -> Self {
        Self {
            db: Mutex::new(db),
            mtu: Mutex::new(23),
            subscriptions: Mutex::new(SubscriptionState::default()),
            hooks: Mutex::new(Vec::new()),
        }
    }

    pub fn mtu(&self) -> u16 {
        *self.mtu.lock()
    }

    /// Registers a hook run against every inbound request before the
    /// default handling: `Forward` dispatches `request` as-is, `Replace`
    /// dispatches the substituted PDU instead, `Drop` silently discards it
    /// (`handle` returns `None`), and `Deny` short-circuits straight to an
    /// error response without touching the attribute database. Hooks run
    /// in registration order; the first to return anything but `Forward`
    /// wins.
    pub fn add_hook(&self, hook: RequestHook) {
        self.hooks.lock().push(hook);
    }

    /// Handles one inbound ATT PDU, returning the response to send back
    /// (`None` for commands, which get no reply).
    pub fn handle(&self, request: AttPdu) -> Option<AttPdu> {
        let opcode = request.opcode();
        let request = match self.run_hooks(request) {
            HookAction::Forward => unreachable!("run_hooks never returns Forward"),
            HookAction::Replace(replacement) => replacement,
            HookAction::Drop => return None,
            HookAction::Deny(err) => {
                log::warn!("gatt: request denied by hook: {err}");
                return Some(error_response(opcode, 0x0000, AttErrorCode::InsufficientAuthorization));
            }
        };
        match request {
            AttPdu::ExchangeMtuRequest { client_rx_mtu } => {
                let server_rx_mtu = 247u16;
                *self.mtu.lock() = crate::ble::att::negotiate_mtu(client_rx_mtu, server_rx_mtu);
                Some(AttPdu::ExchangeMtuResponse { server_rx_mtu })
            }
            AttPdu::ReadRequest { handle } => Some(self.handle_read(handle)),
            AttPdu::ReadBlobRequest { handle, offset } => Some(self.handle_read_blob(handle, offset)),
            AttPdu::ReadByGroupTypeRequest {
                start_handle,
                end_handle,
                attribute_type,
            } => Some(self.handle_read_by_group_type(start_handle, end_handle, &attribute_type)),
            AttPdu::FindInformationRequest {
                start_handle,
                end_handle,
            } => Some(self.handle_find_information(start_handle, end_handle)),
            AttPdu::ReadByTypeRequest {
                start_handle,
                end_handle,
                attribute_type,
            } => Some(self.handle_read_by_type(start_handle, end_handle, &attribute_type)),
            AttPdu::FindByTypeValueRequest {
                start_handle,
                end_handle,
                attribute_type,
                attribute_value,
            } => Some(self.handle_find_by_type_value(
                start_handle,
                end_handle,
                attribute_type,
                &attribute_value,
            )),
            AttPdu::ReadMultipleRequest { handles } => Some(self.handle_read_multiple(&handles)),
            AttPdu::WriteRequest { handle, value } => Some(self.handle_write(handle, value, true)),
            AttPdu::WriteCommand { handle, value } => {
                self.handle_write(handle, value, false);
                None
            }
            AttPdu::PrepareWriteRequest {
                handle,
                offset,
                value,
            } => Some(AttPdu::PrepareWriteResponse {
                handle,
                offset,
                value,
            }),
            AttPdu::ExecuteWriteRequest { .. } => Some(AttPdu::ExecuteWriteResponse),
            AttPdu::HandleValueConfirmation => {
                // The caller is responsible for telling us which handle this
                // confirms via `confirm_indication`; GATT servers in this
                // stack track one in-flight indication per connection at a
                // time at the connector layer.
                None
            }
            other => Some(unsupported_opcode_error(other.opcode().to_u8(), 0x0000)),
        }
    }

    fn handle_read(&self, handle: u16) -> AttPdu {
        let db = self.db.lock();
        match db.get(handle) {
            Some(attr) if attr.permissions.contains(AttributePermissions::READ) => {
                AttPdu::ReadResponse {
                    value: attr.value.clone(),
                }
            }
            Some(_) => error_response(AttOpcode::ReadRequest, handle, AttErrorCode::ReadNotPermitted),
            None => error_response(AttOpcode::ReadRequest, handle, AttErrorCode::InvalidHandle),
        }
    }

    fn handle_read_blob(&self, handle: u16, offset: u16) -> AttPdu {
        let db = self.db.lock();
        match db.get(handle) {
            Some(attr) if !attr.permissions.contains(AttributePermissions::READ) => {
                error_response(AttOpcode::ReadBlobRequest, handle, AttErrorCode::ReadNotPermitted)
            }
            Some(attr) => {
                let offset = offset as usize;
                if offset > attr.value.len() {
                    return error_response(
                        AttOpcode::ReadBlobRequest,
                        handle,
                        AttErrorCode::InvalidOffset,
                    );
                }
                AttPdu::ReadBlobResponse {
                    value: attr.value[offset..].to_vec(),
                }
            }
            None => error_response(AttOpcode::ReadBlobRequest, handle, AttErrorCode::InvalidHandle),
        }
    }

    fn handle_read_by_group_type(&self, start: u16, end: u16, attribute_type: &[u8]) -> AttPdu {
        let db = self.db.lock();
        let Some(uuid) = crate::ble::gatt::attribute::Uuid::from_bytes(attribute_type) else {
            return error_response(AttOpcode::ReadByGroupTypeRequest, start, AttErrorCode::InvalidPdu);
        };
        let groups: Vec<(u16, u16, Vec<u8>)> = db
            .find_by_type(start, end, uuid)
            .into_iter()
            .map(|a| {
                let group_end = group_end_for(&db, a.handle, uuid);
                (a.handle, group_end, a.value.clone())
            })
            .collect();
        if groups.is_empty() {
            error_response(
                AttOpcode::ReadByGroupTypeRequest,
                start,
                AttErrorCode::AttributeNotFound,
            )
        } else {
            AttPdu::ReadByGroupTypeResponse { groups }
        }
    }

    /// Find Information: `(handle, type uuid)` pairs, stopping as soon as
    /// the UUID length format would change within a single response
    ///.
    fn handle_find_information(&self, start: u16, end: u16) -> AttPdu {
        let db = self.db.lock();
        let mut pairs: Vec<(u16, Vec<u8>)> = Vec::new();
        let mut format: Option<usize> = None;
        for attr in db.range(start, end) {
            let uuid_bytes = attr.attribute_type.to_bytes();
            match format {
                None => format = Some(uuid_bytes.len()),
                Some(len) if len != uuid_bytes.len() => break,
                _ => {}
            }
            pairs.push((attr.handle, uuid_bytes));
        }
        if pairs.is_empty() {
            error_response(
                AttOpcode::FindInformationRequest,
                start,
                AttErrorCode::AttributeNotFound,
            )
        } else {
            AttPdu::FindInformationResponse { pairs }
        }
    }

    fn handle_read_by_type(&self, start: u16, end: u16, attribute_type: &[u8]) -> AttPdu {
        let db = self.db.lock();
        let Some(uuid) = crate::ble::gatt::attribute::Uuid::from_bytes(attribute_type) else {
            return error_response(AttOpcode::ReadByTypeRequest, start, AttErrorCode::InvalidPdu);
        };
        let pairs: Vec<(u16, Vec<u8>)> = db
            .find_by_type(start, end, uuid)
            .into_iter()
            .map(|a| (a.handle, a.value.clone()))
            .collect();
        if pairs.is_empty() {
            error_response(AttOpcode::ReadByTypeRequest, start, AttErrorCode::AttributeNotFound)
        } else {
            AttPdu::ReadByTypeResponse { pairs }
        }
    }

    /// Find By Type Value: same grouping rule as Read By Group Type, with
    /// an extra filter on the attribute's value.
    fn handle_find_by_type_value(
        &self,
        start: u16,
        end: u16,
        attribute_type: u16,
        attribute_value: &[u8],
    ) -> AttPdu {
        let db = self.db.lock();
        let uuid = crate::ble::gatt::attribute::Uuid::Short(attribute_type);
        let handles: Vec<(u16, u16)> = db
            .find_by_type(start, end, uuid)
            .into_iter()
            .filter(|a| a.value == attribute_value)
            .map(|a| (a.handle, group_end_for(&db, a.handle, uuid)))
            .collect();
        if handles.is_empty() {
            error_response(
                AttOpcode::FindByTypeValueRequest,
                start,
                AttErrorCode::AttributeNotFound,
            )
        } else {
            AttPdu::FindByTypeValueResponse { handles }
        }
    }

    fn handle_read_multiple(&self, handles: &[u16]) -> AttPdu {
        let db = self.db.lock();
        let mut values = Vec::new();
        for &handle in handles {
            match db.get(handle) {
                Some(attr) if attr.permissions.contains(AttributePermissions::READ) => {
                    values.extend_from_slice(&attr.value)
                }
                Some(_) => {
                    return error_response(
                        AttOpcode::ReadMultipleRequest,
                        handle,
                        AttErrorCode::ReadNotPermitted,
                    )
                }
                None => {
                    return error_response(
                        AttOpcode::ReadMultipleRequest,
                        handle,
                        AttErrorCode::InvalidHandle,
                    )
                }
            }
        }
        AttPdu::ReadMultipleResponse { values }
    }

    fn handle_write(&self, handle: u16, value: Vec<u8>, needs_response: bool) -> AttPdu {
        use crate::ble::gatt::attribute::GATT_CLIENT_CHARACTERISTIC_CONFIGURATION;

        let mut db = self.db.lock();
        let Some(attr) = db.get(handle) else {
            return error_response(AttOpcode::WriteRequest, handle, AttErrorCode::InvalidHandle);
        };
        if !attr.permissions.contains(AttributePermissions::WRITE)
            && attr.attribute_type != GATT_CLIENT_CHARACTERISTIC_CONFIGURATION
        {
            return error_response(AttOpcode::WriteRequest, handle, AttErrorCode::WriteNotPermitted);
        }

        if attr.attribute_type == GATT_CLIENT_CHARACTERISTIC_CONFIGURATION && value.len() == 2 {
            let mut subs = self.subscriptions.lock();
            subs.notify.remove(&handle);
            subs.indicate.remove(&handle);
            match (value[0], value[1]) {
                (0x01, 0x00) => {
                    subs.notify.insert(handle);
                }
                (0x02, 0x00) => {
                    subs.indicate.insert(handle);
                }
                _ => {}
            }
        }

        let _ = db.set_value(handle, value);
        let _ = needs_response; // Write Request and Write Command share this path; only the former replies.
        AttPdu::WriteResponse
    }

    /// Whether `cccd_handle` is currently subscribed for notify/indicate.
    pub fn is_subscribed(&self, cccd_handle: u16) -> (bool, bool) {
        let subs = self.subscriptions.lock();
        (
            subs.notify.contains(&cccd_handle),
            subs.indicate.contains(&cccd_handle),
        )
    }

    /// Builds a notification PDU if the handle's CCCD is subscribed for
    /// notify, else `None`.
    pub fn notify(&self, value_handle: u16, cccd_handle: u16, value: Vec<u8>) -> Option<AttPdu> {
        if self.subscriptions.lock().notify.contains(&cccd_handle) {
            Some(AttPdu::HandleValueNotification {
                handle: value_handle,
                value,
            })
        } else {
            None
        }
    }

    /// Builds an indication PDU, refusing if one is already outstanding on
    /// this CCCD.
    pub fn indicate(
        &self,
        value_handle: u16,
        cccd_handle: u16,
        value: Vec<u8>,
    ) -> Option<AttPdu> {
        let mut subs = self.subscriptions.lock();
        if !subs.indicate.contains(&cccd_handle) {
            return None;
        }
        if !subs.outstanding_indications.insert(cccd_handle) {
            log::warn!("dropping indication on handle {cccd_handle:#06x}: one already outstanding");
            return None;
        }
        Some(AttPdu::HandleValueIndication {
            handle: value_handle,
            value,
        })
    }

    pub fn confirm_indication(&self, cccd_handle: u16) {
        self.subscriptions.lock().outstanding_indications.remove(&cccd_handle);
    }

    /// Runs every registered hook against `request` in order, stopping at
    /// the first one that doesn't forward. No hooks (or all of them
    /// forwarding) falls through to `Replace(request)`, so `handle` never
    /// sees a bare `Forward`.
    fn run_hooks(&self, request: AttPdu) -> HookAction<AttPdu> {
        for hook in self.hooks.lock().iter() {
            match hook(&request) {
                HookAction::Forward => continue,
                other => return other,
            }
        }
        HookAction::Replace(request)
    }
}

fn error_response(opcode: AttOpcode, handle: u16, error: AttErrorCode) -> AttPdu {
    AttPdu::ErrorResponse {
        request_opcode: opcode.to_u8(),
        handle,
        error,
    }
}

fn group_end_for(
    db: &AttributeDatabase,
    start: u16,
    group_type: crate::ble::gatt::attribute::Uuid,
) -> u16 {
    let mut end = start;
    for attr in db.iter() {
        if attr.handle <= start {
            continue;
        }
        if attr.attribute_type == group_type {
            break;
        }
        end = attr.handle;
    }
    if end == start {
        db.max_handle()
    } else {
        end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::gatt::attribute::{GATT_CHARACTERISTIC, GATT_PRIMARY_SERVICE};

    fn build_simple_db() -> AttributeDatabase {
        let mut db = AttributeDatabase::new();
        db.insert(GATT_PRIMARY_SERVICE, AttributePermissions::READ, vec![0x0F, 0x18]);
        db.insert(
            GATT_CHARACTERISTIC,
            AttributePermissions::READ,
            vec![0x02, 0x03, 0x00],
        );
        db.insert(
            crate::ble::gatt::attribute::Uuid::Short(0x2A19),
            AttributePermissions::READ | AttributePermissions::NOTIFY,
            vec![100],
        );
        db.insert(
            crate::ble::gatt::attribute::GATT_CLIENT_CHARACTERISTIC_CONFIGURATION,
            AttributePermissions::READ | AttributePermissions::WRITE,
            vec![0x00, 0x00],
        );
        db
    }

    #[test]
    fn read_returns_value_for_readable_attribute() {
        let server = GattServer::new(build_simple_db());
        let reply = server.handle(AttPdu::ReadRequest { handle: 3 });
        assert_eq!(reply, Some(AttPdu::ReadResponse { value: vec![100] }));
    }

    #[test]
    fn read_unknown_handle_is_invalid_handle_error() {
        let server = GattServer::new(build_simple_db());
        let reply = server.handle(AttPdu::ReadRequest { handle: 99 });
        assert_eq!(
            reply,
            Some(AttPdu::ErrorResponse {
                request_opcode: AttOpcode::ReadRequest.to_u8(),
                handle: 99,
                error: AttErrorCode::InvalidHandle,
            })
        );
    }

    #[test]
    fn cccd_write_enables_notify_and_blocks_double_indication() {
        let server = GattServer::new(build_simple_db());
        server.handle(AttPdu::WriteRequest {
            handle: 4,
            value: vec![0x02, 0x00],
        });
        assert!(server.indicate(3, 4, vec![1]).is_some());
        assert!(server.indicate(3, 4, vec![2]).is_none());
        server.confirm_indication(4);
        assert!(server.indicate(3, 4, vec![3]).is_some());
    }

    #[test]
    fn handle_value_confirmation_clears_outstanding_indication_and_gets_no_reply() {
        let server = GattServer::new(build_simple_db());
        let reply = server.handle(AttPdu::HandleValueConfirmation);
        assert!(reply.is_none());
    }

    #[test]
    fn unrecognized_request_variant_gets_request_not_supported() {
        // `ReadByGroupTypeResponse` is a response PDU a server never expects
        // to receive; it falls through `handle`'s `other =>` arm.
        let server = GattServer::new(build_simple_db());
        let reply = server.handle(AttPdu::ReadByGroupTypeResponse { groups: vec![] });
        assert_eq!(
            reply,
            Some(AttPdu::ErrorResponse {
                request_opcode: AttOpcode::ReadByGroupTypeResponse.to_u8(),
                handle: 0x0000,
                error: AttErrorCode::RequestNotSupported,
            })
        );
    }

    #[test]
    fn find_by_type_value_matches_on_value_and_groups_to_end() {
        let server = GattServer::new(build_simple_db());
        let reply = server.handle(AttPdu::FindByTypeValueRequest {
            start_handle: 1,
            end_handle: 0xFFFF,
            attribute_type: 0x2800,
            attribute_value: vec![0x0F, 0x18],
        });
        assert_eq!(
            reply,
            Some(AttPdu::FindByTypeValueResponse {
                handles: vec![(1, 4)],
            })
        );
    }

    #[test]
    fn find_by_type_value_no_match_is_attribute_not_found() {
        let server = GattServer::new(build_simple_db());
        let reply = server.handle(AttPdu::FindByTypeValueRequest {
            start_handle: 1,
            end_handle: 0xFFFF,
            attribute_type: 0x2800,
            attribute_value: vec![0xAA, 0xBB],
        });
        assert_eq!(
            reply,
            Some(AttPdu::ErrorResponse {
                request_opcode: AttOpcode::FindByTypeValueRequest.to_u8(),
                handle: 1,
                error: AttErrorCode::AttributeNotFound,
            })
        );
    }

    #[test]
    fn read_multiple_concatenates_values_in_request_order() {
        let server = GattServer::new(build_simple_db());
        let reply = server.handle(AttPdu::ReadMultipleRequest {
            handles: vec![3, 4],
        });
        assert_eq!(
            reply,
            Some(AttPdu::ReadMultipleResponse {
                values: vec![100, 0x00, 0x00],
            })
        );
    }

    #[test]
    fn read_multiple_stops_at_first_invalid_handle() {
        let server = GattServer::new(build_simple_db());
        let reply = server.handle(AttPdu::ReadMultipleRequest {
            handles: vec![3, 99],
        });
        assert_eq!(
            reply,
            Some(AttPdu::ErrorResponse {
                request_opcode: AttOpcode::ReadMultipleRequest.to_u8(),
                handle: 99,
                error: AttErrorCode::InvalidHandle,
            })
        );
    }

    #[test]
    fn hook_can_deny_a_request_before_it_reaches_the_database() {
        let server = GattServer::new(build_simple_db());
        server.add_hook(Box::new(|req| match req {
            AttPdu::ReadRequest { handle } if *handle == 3 => {
                HookAction::Deny(crate::Error::UnsupportedCapability { domain: 0x02 })
            }
            _ => HookAction::Forward,
        }));

        let denied = server.handle(AttPdu::ReadRequest { handle: 3 });
        assert_eq!(
            denied,
            Some(AttPdu::ErrorResponse {
                request_opcode: AttOpcode::ReadRequest.to_u8(),
                handle: 0x0000,
                error: AttErrorCode::InsufficientAuthorization,
            })
        );

        // A handle the hook doesn't care about still reaches the database.
        let allowed = server.handle(AttPdu::ReadRequest { handle: 4 });
        assert_eq!(allowed, Some(AttPdu::ReadResponse { value: vec![0x00, 0x00] }));
    }

    #[test]
    fn hook_can_replace_a_request_with_a_different_one() {
        let server = GattServer::new(build_simple_db());
        server.add_hook(Box::new(|req| match req {
            AttPdu::ReadRequest { handle } if *handle == 99 => {
                HookAction::Replace(AttPdu::ReadRequest { handle: 3 })
            }
            _ => HookAction::Forward,
        }));

        let reply = server.handle(AttPdu::ReadRequest { handle: 99 });
        assert_eq!(reply, Some(AttPdu::ReadResponse { value: vec![100] }));
    }

    #[test]
    fn hook_can_drop_a_request_silently() {
        let server = GattServer::new(build_simple_db());
        server.add_hook(Box::new(|_req| HookAction::Drop));
        let reply = server.handle(AttPdu::ReadRequest { handle: 3 });
        assert!(reply.is_none());
    }

    #[test]
    fn find_information_returns_type_pairs_in_range() {
        let server = GattServer::new(build_simple_db());
        let reply = server.handle(AttPdu::FindInformationRequest {
            start_handle: 1,
            end_handle: 2,
        });
        assert_eq!(
            reply,
            Some(AttPdu::FindInformationResponse {
                pairs: vec![
                    (1, GATT_PRIMARY_SERVICE.to_bytes()),
                    (2, GATT_CHARACTERISTIC.to_bytes()),
                ],
            })
        );
    }
}
