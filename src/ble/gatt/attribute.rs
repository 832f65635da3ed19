//! GATT attribute database.
//!
//! `AttributePermissions` generalizes a `CharPropFlags`-style bitflags set
//! from characteristic properties to the full read/write/notify/indicate/
//! auth permission set an attribute entry needs. `Uuid` wraps the
//! `uuid::Uuid` crate with the 16-bit short form GATT profiles actually
//! use.

use std::collections::BTreeMap;

use bitflags::bitflags;

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Uuid {
    Short(u16),
    Full(uuid::Uuid),
}

impl Uuid {
    pub fn to_bytes(self) -> Vec<u8> {
        match self {
            Uuid::Short(v) => v.to_le_bytes().to_vec(),
            Uuid::Full(u) => {
                let mut bytes = u.as_bytes().to_vec();
                bytes.reverse();
                bytes
            }
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        match bytes.len() {
            2 => Some(Uuid::Short(u16::from_le_bytes([bytes[0], bytes[1]]))),
            16 => {
                let mut b: [u8; 16] = bytes.try_into().ok()?;
                b.reverse();
                Some(Uuid::Full(uuid::Uuid::from_bytes(b)))
            }
            _ => None,
        }
    }
}

bitflags! {
    /// Generalizes `CharPropFlags` from "what a characteristic supports"
    /// to "what an attribute database entry permits".
    #[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
    pub struct AttributePermissions: u16 {
        const READ = 0x0001;
        const WRITE = 0x0002;
        const WRITE_WITHOUT_RESPONSE = 0x0004;
        const NOTIFY = 0x0008;
        const INDICATE = 0x0010;
        const REQUIRES_AUTHENTICATION = 0x0020;
        const REQUIRES_AUTHORIZATION = 0x0040;
        const REQUIRES_ENCRYPTION = 0x0080;
    }
}

pub const GATT_PRIMARY_SERVICE: Uuid = Uuid::Short(0x2800);
pub const GATT_SECONDARY_SERVICE: Uuid = Uuid::Short(0x2801);
pub const GATT_CHARACTERISTIC: Uuid = Uuid::Short(0x2803);
pub const GATT_CLIENT_CHARACTERISTIC_CONFIGURATION: Uuid = Uuid::Short(0x2902);

#[derive(Debug, Clone)]
pub struct Attribute {
    pub handle: u16,
    pub attribute_type: Uuid,
    pub permissions: AttributePermissions,
    pub value: Vec<u8>,
}

/// Holds every attribute for one GATT server, indexed by handle, enforcing
/// a strictly-increasing-handle invariant shared by both the server-side
/// store and the profile loader that builds it.
#[derive(Debug, Default, Clone)]
pub struct AttributeDatabase {
    attributes: BTreeMap<u16, Attribute>,
    next_handle: u16,
}

impl AttributeDatabase {
    pub fn new() -> Self {
        Self {
            attributes: BTreeMap::new(),
            next_handle: 1,
        }
    }

    /// Appends a new attribute at the next free handle. Returns the handle
    /// assigned.
    pub fn insert(&mut self, attribute_type: Uuid, permissions: AttributePermissions, value: Vec<u8>) -> u16 {
        let handle = self.next_handle;
        self.next_handle += 1;
        self.attributes.insert(
            handle,
            Attribute {
                handle,
                attribute_type,
                permissions,
                value,
            },
        );
        handle
    }

    /// Inserts at an explicit handle (used when loading a profile document
    /// that pins handles). Fails if the handle already exists or would
    /// violate strictly-increasing insertion order.
    pub fn insert_at(
        &mut self,
        handle: u16,
        attribute_type: Uuid,
        permissions: AttributePermissions,
        value: Vec<u8>,
    ) -> Result<()> {
        if handle < self.next_handle || self.attributes.contains_key(&handle) {
            return Err(Error::HandleCollision(handle));
        }
        self.attributes.insert(
            handle,
            Attribute {
                handle,
                attribute_type,
                permissions,
                value,
            },
        );
        self.next_handle = handle + 1;
        Ok(())
    }

    pub fn get(&self, handle: u16) -> Option<&Attribute> {
        self.attributes.get(&handle)
    }

    pub fn get_mut(&mut self, handle: u16) -> Option<&mut Attribute> {
        self.attributes.get_mut(&handle)
    }

    pub fn set_value(&mut self, handle: u16, value: Vec<u8>) -> Result<()> {
        self.attributes
            .get_mut(&handle)
            .map(|a| a.value = value)
            .ok_or(Error::InvalidProfile(format!("no attribute at handle {handle:#06x}")))
    }

    pub fn range(&self, start: u16, end: u16) -> impl Iterator<Item = &Attribute> {
        self.attributes.range(start..=end).map(|(_, a)| a)
    }

    pub fn find_by_type(&self, start: u16, end: u16, attribute_type: Uuid) -> Vec<&Attribute> {
        self.range(start, end)
            .filter(|a| a.attribute_type == attribute_type)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Attribute> {
        self.attributes.values()
    }

    pub fn max_handle(&self) -> u16 {
        self.next_handle.saturating_sub(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_increase_strictly() {
        let mut db = AttributeDatabase::new();
        let h1 = db.insert(GATT_PRIMARY_SERVICE, AttributePermissions::READ, vec![]);
        let h2 = db.insert(GATT_CHARACTERISTIC, AttributePermissions::READ, vec![]);
        assert!(h2 > h1);
    }

    #[test]
    fn insert_at_rejects_non_increasing_handle() {
        let mut db = AttributeDatabase::new();
        db.insert_at(5, GATT_PRIMARY_SERVICE, AttributePermissions::READ, vec![])
            .unwrap();
        let err = db
            .insert_at(3, GATT_CHARACTERISTIC, AttributePermissions::READ, vec![])
            .unwrap_err();
        assert!(matches!(err, Error::HandleCollision(3)));
    }

    #[test]
    fn uuid_short_round_trips() {
        let uuid = Uuid::Short(0x180F);
        let bytes = uuid.to_bytes();
        assert_eq!(Uuid::from_bytes(&bytes), Some(uuid));
    }
}
