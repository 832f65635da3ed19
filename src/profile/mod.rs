//! Profile file — a JSON document describing a peripheral to emulate:
//! device info (address, advertising/scan-response data) plus a
//! services/characteristics tree that seeds a [`AttributeDatabase`] at
//! load time.
//!
//! Profile documents are produced by a separate tool, not the host
//! framework itself; the schema is built with `serde`/`serde_json`, the
//! same crates the rest of this codebase already uses for its own
//! wire-adjacent JSON.

use crate::ble::address::AddressType;
use crate::ble::gatt::attribute::{AttributeDatabase, AttributePermissions, Uuid};
use crate::{Error, Result};

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
struct RawProfile {
    devinfo: RawDeviceInfo,
    #[serde(default)]
    services: Vec<RawService>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawDeviceInfo {
    bd_addr: String,
    addr_type: RawAddrType,
    #[serde(default)]
    adv_data: String,
    #[serde(default)]
    scan_rsp: String,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
enum RawAddrType {
    Public,
    Random,
}

#[derive(Debug, Clone, Deserialize)]
struct RawService {
    uuid: String,
    #[serde(default)]
    characteristics: Vec<RawCharacteristic>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawCharacteristic {
    uuid: String,
    #[serde(default)]
    handle: Option<u16>,
    #[serde(default)]
    permissions: Vec<String>,
    #[serde(default)]
    value: String,
}

/// Parsed device info block: `devinfo.bd_addr`, `devinfo.addr_type`,
/// `devinfo.adv_data`, `devinfo.scan_rsp`.
#[derive(Debug, Clone)]
pub struct ProfileDeviceInfo {
    pub bd_addr: [u8; 6],
    pub addr_type: AddressType,
    pub adv_data: Vec<u8>,
    pub scan_rsp: Vec<u8>,
}

/// A loaded peripheral emulation profile: device info plus the attribute
/// database built from its services/characteristics tree.
#[derive(Debug, Clone)]
pub struct Profile {
    pub devinfo: ProfileDeviceInfo,
    pub attributes: AttributeDatabase,
}

impl Profile {
    /// Parses and validates a profile document, building its attribute
    /// database in declaration order (services, then each characteristic)
    /// so that an explicit `handle` on one characteristic and auto-assigned
    /// handles on its siblings still satisfy the attribute database's
    /// strictly-increasing-handle invariant, or fails with
    /// [`Error::InvalidProfile`]/[`Error::HandleCollision`] if the document
    /// violates it.
    pub fn from_json(text: &str) -> Result<Self> {
        let raw: RawProfile = serde_json::from_str(text)?;

        let bd_addr = parse_bd_addr(&raw.devinfo.bd_addr)?;
        let addr_type = match raw.devinfo.addr_type {
            RawAddrType::Public => AddressType::Public,
            RawAddrType::Random => AddressType::Random,
        };
        let adv_data = parse_hex(&raw.devinfo.adv_data)?;
        let scan_rsp = parse_hex(&raw.devinfo.scan_rsp)?;

        let mut attributes = AttributeDatabase::new();
        for service in &raw.services {
            let service_uuid = parse_uuid(&service.uuid)?;
            attributes.insert(
                crate::ble::gatt::attribute::GATT_PRIMARY_SERVICE,
                AttributePermissions::READ,
                service_uuid.to_bytes(),
            );
            for characteristic in &service.characteristics {
                let char_uuid = parse_uuid(&characteristic.uuid)?;
                let permissions = parse_permissions(&characteristic.permissions)?;
                let value = parse_hex(&characteristic.value)?;
                match characteristic.handle {
                    Some(handle) => {
                        attributes.insert_at(handle, char_uuid, permissions, value)?;
                    }
                    None => {
                        attributes.insert(char_uuid, permissions, value);
                    }
                }
            }
        }

        Ok(Self {
            devinfo: ProfileDeviceInfo {
                bd_addr,
                addr_type,
                adv_data,
                scan_rsp,
            },
            attributes,
        })
    }
}

fn parse_bd_addr(s: &str) -> Result<[u8; 6]> {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() != 6 {
        return Err(Error::InvalidProfile(format!("invalid bd_addr {s:?}")));
    }
    let mut addr = [0u8; 6];
    for (i, part) in parts.iter().enumerate() {
        addr[i] = u8::from_str_radix(part, 16)
            .map_err(|_| Error::InvalidProfile(format!("invalid bd_addr {s:?}")))?;
    }
    Ok(addr)
}

fn parse_hex(s: &str) -> Result<Vec<u8>> {
    if s.is_empty() {
        return Ok(Vec::new());
    }
    hex::decode(s).map_err(|_| Error::InvalidProfile(format!("invalid hex string {s:?}")))
}

fn parse_uuid(s: &str) -> Result<Uuid> {
    let bytes = hex::decode(s.replace('-', ""))
        .map_err(|_| Error::InvalidProfile(format!("invalid uuid {s:?}")))?;
    Uuid::from_bytes(&bytes).ok_or_else(|| Error::InvalidProfile(format!("invalid uuid {s:?}")))
}

fn parse_permissions(names: &[String]) -> Result<AttributePermissions> {
    let mut permissions = AttributePermissions::empty();
    for name in names {
        let flag = match name.to_ascii_lowercase().as_str() {
            "read" => AttributePermissions::READ,
            "write" => AttributePermissions::WRITE,
            "write_without_response" => AttributePermissions::WRITE_WITHOUT_RESPONSE,
            "notify" => AttributePermissions::NOTIFY,
            "indicate" => AttributePermissions::INDICATE,
            "requires_authentication" => AttributePermissions::REQUIRES_AUTHENTICATION,
            "requires_authorization" => AttributePermissions::REQUIRES_AUTHORIZATION,
            "requires_encryption" => AttributePermissions::REQUIRES_ENCRYPTION,
            other => {
                return Err(Error::InvalidProfile(format!(
                    "unknown permission {other:?}"
                )))
            }
        };
        permissions |= flag;
    }
    Ok(permissions)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
    {
        "devinfo": {
            "bd_addr": "AA:BB:CC:DD:EE:FF",
            "addr_type": "public",
            "adv_data": "0201060303181a",
            "scan_rsp": ""
        },
        "services": [
            {
                "uuid": "1800",
                "characteristics": [
                    {
                        "uuid": "2a00",
                        "handle": 3,
                        "permissions": ["read"],
                        "value": "576861640a"
                    }
                ]
            }
        ]
    }
    "#;

    #[test]
    fn parses_devinfo_and_seeds_attribute_database() {
        let profile = Profile::from_json(SAMPLE).unwrap();
        assert_eq!(
            profile.devinfo.bd_addr,
            [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]
        );
        assert!(matches!(profile.devinfo.addr_type, AddressType::Public));
        assert_eq!(profile.devinfo.adv_data, hex::decode("0201060303181a").unwrap());
        assert!(profile.devinfo.scan_rsp.is_empty());

        let service_attr = profile.attributes.get(1).unwrap();
        assert_eq!(
            service_attr.attribute_type,
            crate::ble::gatt::attribute::GATT_PRIMARY_SERVICE
        );

        let char_attr = profile.attributes.get(3).unwrap();
        assert_eq!(char_attr.value, hex::decode("576861640a").unwrap());
        assert!(char_attr.permissions.contains(AttributePermissions::READ));
    }

    #[test]
    fn rejects_handle_collision_with_an_earlier_insertion() {
        let json = r#"
        {
            "devinfo": {"bd_addr": "00:00:00:00:00:00", "addr_type": "random", "adv_data": "", "scan_rsp": ""},
            "services": [
                {"uuid": "1800", "characteristics": [
                    {"uuid": "2a00", "handle": 2, "permissions": [], "value": ""},
                    {"uuid": "2a01", "handle": 2, "permissions": [], "value": ""}
                ]}
            ]
        }
        "#;
        let err = Profile::from_json(json).unwrap_err();
        assert!(matches!(err, Error::HandleCollision(2)));
    }

    #[test]
    fn rejects_unknown_permission_names() {
        let json = r#"
        {
            "devinfo": {"bd_addr": "00:00:00:00:00:00", "addr_type": "public", "adv_data": "", "scan_rsp": ""},
            "services": [
                {"uuid": "1800", "characteristics": [
                    {"uuid": "2a00", "permissions": ["bogus"], "value": ""}
                ]}
            ]
        }
        "#;
        assert!(Profile::from_json(json).is_err());
    }
}
