//! Host-side cache of a dongle's reported identity, domains and per-domain
//! commands. The capability and supported-command bitmasks are cached here
//! once at discovery time so the rest of the crate never has to re-query
//! the dongle to check "can this device do X".

use std::collections::HashMap;

use super::capability::{split_capability_word, Capability};
use crate::message::discovery::DeviceInfoResp;

#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub fw_author: String,
    pub fw_url: String,
    pub fw_version: (u8, u8, u8),
    pub max_speed: u32,
    pub device_id: [u8; 16],
    pub device_type: u8,
    domains: HashMap<u8, Capability>,
    commands: HashMap<u8, u32>,
}

impl DeviceInfo {
    pub fn from_resp(resp: DeviceInfoResp) -> Self {
        let mut domains = HashMap::new();
        let mut commands = HashMap::new();
        for word in resp.capabilities {
            let (domain, caps) = split_capability_word(word);
            domains.insert(domain, caps);
            commands.insert(domain, 0);
        }
        Self {
            fw_author: resp.fw_author,
            fw_url: resp.fw_url,
            fw_version: resp.fw_version,
            max_speed: resp.max_speed,
            device_id: resp.device_id,
            device_type: resp.device_type,
            domains,
            commands,
        }
    }

    pub fn version_str(&self) -> String {
        format!(
            "{}.{}.{}",
            self.fw_version.0, self.fw_version.1, self.fw_version.2
        )
    }

    /// Records the supported-command bitmask returned by a
    /// `DeviceDomainInfoResp` for `domain`.
    pub fn add_supported_commands(&mut self, domain: u8, commands: u32) {
        if self.domains.contains_key(&domain) {
            self.commands.insert(domain, commands);
        }
    }

    pub fn has_domain(&self, domain: u8) -> bool {
        self.domains.contains_key(&domain)
    }

    pub fn has_domain_cap(&self, domain: u8, cap: Capability) -> bool {
        self.domains
            .get(&domain)
            .is_some_and(|caps| caps.contains(cap))
    }

    pub fn domain_capabilities(&self, domain: u8) -> Option<Capability> {
        self.domains.get(&domain).copied()
    }

    pub fn domain_commands(&self, domain: u8) -> Option<u32> {
        self.commands.get(&domain).copied()
    }

    pub fn domains(&self) -> impl Iterator<Item = u8> + '_ {
        self.domains.keys().copied()
    }
}
