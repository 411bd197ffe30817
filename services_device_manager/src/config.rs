//! Boot configuration
//!
//! Names the trusted device table, which service owns each window, the
//! policy rule set, and the services to start. Ownership comes from here and
//! never from names held inside the kernel.

use core_types::{DeviceClass, DeviceWindow, ServiceId};
use policy::{DenyAllPolicy, DevicePolicy, LocalPolicyClient, RuleSet};
use serde::{Deserialize, Serialize};
use sim_kernel::{DeviceWindowRegistry, RegistryError};
use std::collections::BTreeMap;
use thiserror::Error;

/// Boot configuration errors
#[derive(Debug, Error)]
pub enum BootError {
    #[error("Failed to parse boot configuration: {0}")]
    Parse(String),

    #[error("Invalid address {0:?}")]
    InvalidAddress(String),

    #[error("Device table rejected: {0}")]
    Registry(#[from] RegistryError),

    #[error("Owner entry for {class} matches no registered window")]
    NoSuchDevice { class: DeviceClass },

    #[error("Window {window} has more than one owner ({first}, {second})")]
    DuplicateOwner {
        window: DeviceWindow,
        first: ServiceId,
        second: ServiceId,
    },

    #[error("{service} would own {count} windows without a bring-up exception")]
    TooManyWindows { service: ServiceId, count: usize },
}

/// Physical address written as a JSON number or a `"0x..."` string
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigAddr {
    Number(u64),
    Text(String),
}

impl ConfigAddr {
    pub fn value(&self) -> Result<u64, BootError> {
        match self {
            ConfigAddr::Number(n) => Ok(*n),
            ConfigAddr::Text(text) => {
                let trimmed = text.trim();
                let parsed = match trimmed
                    .strip_prefix("0x")
                    .or_else(|| trimmed.strip_prefix("0X"))
                {
                    Some(hex) => u64::from_str_radix(&hex.replace('_', ""), 16),
                    None => trimmed.replace('_', "").parse(),
                };
                parsed.map_err(|_| BootError::InvalidAddress(text.clone()))
            }
        }
    }
}

impl From<u64> for ConfigAddr {
    fn from(value: u64) -> Self {
        ConfigAddr::Number(value)
    }
}

/// One entry of the trusted device table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceEntry {
    pub class: DeviceClass,
    pub base: ConfigAddr,
    pub len: ConfigAddr,
}

impl DeviceEntry {
    pub fn window(&self) -> Result<DeviceWindow, BootError> {
        Ok(DeviceWindow::new(
            self.class,
            self.base.value()?,
            self.len.value()?,
        ))
    }
}

/// Designated owner of the windows of one class
///
/// `base` pins the entry to a single window when several share a class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerEntry {
    pub class: DeviceClass,
    pub service: ServiceId,
    #[serde(default)]
    pub base: Option<ConfigAddr>,
    /// Temporarily lets `service` own more than one window
    #[serde(default)]
    pub bringup_exception: bool,
}

/// Owner resolved for one window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Owner {
    pub service: ServiceId,
    pub bringup_exception: bool,
}

/// Window-to-owner table, in registry order
#[derive(Debug, Clone, Default)]
pub struct OwnerTable {
    entries: Vec<(DeviceWindow, Owner)>,
}

impl OwnerTable {
    pub fn owner_of(&self, window: &DeviceWindow) -> Option<&Owner> {
        self.entries
            .iter()
            .find(|(w, _)| w == window)
            .map(|(_, owner)| owner)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(DeviceWindow, Owner)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Parsed boot configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootConfig {
    /// Trusted device table; the QEMU `virt` table when absent
    #[serde(default)]
    pub devices: Option<Vec<DeviceEntry>>,
    #[serde(default)]
    pub owners: Vec<OwnerEntry>,
    /// Rule set for the decision point; without one every request is denied
    #[serde(default)]
    pub policy: Option<RuleSet>,
    /// Services spawned before distribution
    #[serde(default)]
    pub services: Vec<ServiceId>,
}

impl BootConfig {
    pub fn from_json(json: &str) -> Result<Self, BootError> {
        serde_json::from_str(json).map_err(|err| BootError::Parse(err.to_string()))
    }

    /// Builds the sealed device registry
    pub fn registry(&self) -> Result<DeviceWindowRegistry, BootError> {
        match &self.devices {
            None => Ok(DeviceWindowRegistry::qemu_virt()?),
            Some(entries) => {
                let mut builder = DeviceWindowRegistry::builder();
                for entry in entries {
                    builder.register(entry.window()?)?;
                }
                Ok(builder.seal())
            }
        }
    }

    /// Resolves owners against `registry`, enforcing one owner per window and
    /// one window per service unless a bring-up exception is set
    pub fn owner_table(&self, registry: &DeviceWindowRegistry) -> Result<OwnerTable, BootError> {
        let mut table = OwnerTable::default();

        for entry in &self.owners {
            let pinned = entry.base.as_ref().map(ConfigAddr::value).transpose()?;
            let mut matched = 0usize;
            for window in registry
                .find_by_class(entry.class)
                .filter(|w| pinned.map_or(true, |base| w.base.as_u64() == base))
            {
                matched += 1;
                if let Some(existing) = table.owner_of(window) {
                    return Err(BootError::DuplicateOwner {
                        window: *window,
                        first: existing.service.clone(),
                        second: entry.service.clone(),
                    });
                }
                table.entries.push((
                    *window,
                    Owner {
                        service: entry.service.clone(),
                        bringup_exception: entry.bringup_exception,
                    },
                ));
            }
            if matched == 0 {
                return Err(BootError::NoSuchDevice { class: entry.class });
            }
        }

        let mut per_service: BTreeMap<&ServiceId, (usize, bool)> = BTreeMap::new();
        for (_, owner) in &table.entries {
            let slot = per_service.entry(&owner.service).or_insert((0, false));
            slot.0 += 1;
            slot.1 |= owner.bringup_exception;
        }
        for (service, (count, exception)) in per_service {
            if count > 1 && !exception {
                return Err(BootError::TooManyWindows {
                    service: service.clone(),
                    count,
                });
            }
            if count > 1 {
                log::warn!("{service} owns {count} windows under a bring-up exception");
            }
        }

        table
            .entries
            .sort_by_key(|(window, _)| registry.iter().position(|w| w == window));
        Ok(table)
    }

    /// Checks the whole configuration without side effects
    pub fn validate(&self) -> Result<(), BootError> {
        let registry = self.registry()?;
        self.owner_table(&registry)?;
        Ok(())
    }

    /// Decision point client for the configured rule set
    pub fn policy_client(&self) -> LocalPolicyClient {
        match &self.policy {
            Some(rules) => LocalPolicyClient::for_device_policy(DevicePolicy::from_rule_set(
                rules.clone(),
            )),
            None => {
                log::warn!("no policy rule set configured; every distribution will be denied");
                LocalPolicyClient::new(Box::new(DenyAllPolicy))
            }
        }
    }
}
