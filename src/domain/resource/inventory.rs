use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::rset::ResourceSet;
use crate::domain::utils::{hostlist, id::Rank, idset::Idset};
use crate::error::{Error, Result};

/// Where the resource description came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InventoryMethod {
    Configuration,
    Kvs,
    ParentInstance,
    DynamicDiscovery,
    /// Followers only: fetched from the tree parent.
    TreeParent,
}

impl InventoryMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            InventoryMethod::Configuration => "configuration",
            InventoryMethod::Kvs => "kvs",
            InventoryMethod::ParentInstance => "parent-instance",
            InventoryMethod::DynamicDiscovery => "dynamic-discovery",
            InventoryMethod::TreeParent => "tree-parent",
        }
    }

    /// R loaded from storage is already durable.
    pub fn needs_commit(&self) -> bool {
        *self != InventoryMethod::Kvs
    }
}

impl fmt::Display for InventoryMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Holds the authoritative R of the instance. Set at most once.
#[derive(Debug)]
pub struct Inventory {
    size: Rank,
    r: Option<ResourceSet>,
    method: Option<InventoryMethod>,
}

impl Inventory {
    pub fn new(size: Rank) -> Self {
        Self { size, r: None, method: None }
    }

    pub fn put(&mut self, r: ResourceSet, method: InventoryMethod) -> Result<()> {
        if let Some(have) = self.method {
            return Err(Error::AlreadyExists(format!("resource description already set by {}", have)));
        }
        r.ranks().check_bounds(self.size)?;
        self.r = Some(r);
        self.method = Some(method);
        Ok(())
    }

    pub fn get(&self) -> Result<&ResourceSet> {
        self.r.as_ref().ok_or_else(|| Error::NoData("resource description is not yet defined".to_string()))
    }

    pub fn method(&self) -> Option<InventoryMethod> {
        self.method
    }

    pub fn is_defined(&self) -> bool {
        self.r.is_some()
    }

    /// Resolves an idset or a hostlist into ranks. Hostnames are looked up
    /// in R, so hostlists only work once R is defined.
    pub fn targets_to_ranks(&self, targets: &str) -> Result<Idset> {
        if targets.trim().is_empty() {
            return Err(Error::InvalidArgument("empty target expression".to_string()));
        }
        if targets.bytes().all(|b| b.is_ascii_digit() || b"-,[] ".contains(&b)) {
            return Idset::decode_bounded(targets, self.size);
        }

        let r = self.get()?;
        let hosts = hostlist::decode_limited(targets, self.size as usize)
            .map_err(|e| Error::InvalidArgument(format!("invalid targets {}: {}", targets, e)))?;
        let names = r.hostnames();
        let mut ids = Idset::new();
        for host in &hosts {
            match names.get_by_right(host) {
                Some(rank) => {
                    ids.set(*rank);
                }
                None => return Err(Error::InvalidArgument(format!("unknown host {}", host))),
            }
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::config_dto::ConfigResourceDto;
    use crate::domain::rset::local;

    fn config_r(hosts: &str) -> ResourceSet {
        let entry = ConfigResourceDto { hosts: hosts.to_string(), cores: Some("0-3".to_string()), gpus: None, properties: Vec::new() };
        local::from_config(&[entry]).unwrap()
    }

    #[test]
    fn test_put_once() {
        let mut inventory = Inventory::new(4);
        assert!(matches!(inventory.get(), Err(Error::NoData(_))));

        inventory.put(config_r("node[0-3]"), InventoryMethod::Configuration).unwrap();
        assert_eq!(inventory.method(), Some(InventoryMethod::Configuration));
        assert_eq!(inventory.get().unwrap().ranks().to_string(), "0-3");

        let again = inventory.put(config_r("node[0-3]"), InventoryMethod::DynamicDiscovery);
        assert!(matches!(again, Err(Error::AlreadyExists(_))));
        assert_eq!(inventory.method(), Some(InventoryMethod::Configuration));
    }

    #[test]
    fn test_put_rejects_ranks_beyond_size() {
        let mut inventory = Inventory::new(2);
        assert!(matches!(inventory.put(config_r("node[0-3]"), InventoryMethod::Kvs), Err(Error::InvalidArgument(_))));
        assert!(!inventory.is_defined());
    }

    #[test]
    fn test_targets_idset_and_hostlist() {
        let mut inventory = Inventory::new(4);
        assert_eq!(inventory.targets_to_ranks("1-2").unwrap().to_string(), "1-2");
        // Hostlists need R.
        assert!(matches!(inventory.targets_to_ranks("node1"), Err(Error::NoData(_))));

        inventory.put(config_r("node[0-3]"), InventoryMethod::Configuration).unwrap();
        assert_eq!(inventory.targets_to_ranks("node[1,3]").unwrap().to_string(), "1,3");
        assert!(matches!(inventory.targets_to_ranks("4-5"), Err(Error::InvalidArgument(_))));
        assert!(matches!(inventory.targets_to_ranks("other7"), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_targets_reject_empty_and_huge_expressions() {
        let mut inventory = Inventory::new(4);
        inventory.put(config_r("node[0-3]"), InventoryMethod::Configuration).unwrap();

        for targets in ["", "  "] {
            assert!(matches!(inventory.targets_to_ranks(targets), Err(Error::InvalidArgument(_))));
        }
        assert!(matches!(inventory.targets_to_ranks("0-4294967295"), Err(Error::InvalidArgument(_))));
        assert!(matches!(inventory.targets_to_ranks("node[0-4000000000]"), Err(Error::InvalidArgument(_))));
    }
}
