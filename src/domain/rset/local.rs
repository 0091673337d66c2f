//! Building R from local topology or inline configuration, and checking a
//! rank's probed hardware against the authoritative R.

use std::collections::BTreeMap;
use std::str::FromStr;

use crate::api::config_dto::ConfigResourceDto;
use crate::api::topology_dto::LocalTopologyDto;
use crate::domain::rset::{RankResources, ResourceSet};
use crate::domain::utils::{hostlist, id::Rank, idset::Idset};
use crate::error::{Error, Result};

/// Outcome of comparing a rank's probed resources with R.
#[derive(Debug, Clone, PartialEq)]
pub enum Verification {
    Match,
    /// Probed hardware exceeds R. Logged, not acted on.
    Extra(String),
    /// Probed hardware is missing something R promises. The rank should be
    /// drained with this reason.
    Mismatch(String),
}

/// Parses the probe's topology string into a single-rank R.
pub fn from_local_topology(rank: Rank, topology: &str) -> Result<ResourceSet> {
    let dto: LocalTopologyDto = serde_json::from_str(topology)
        .map_err(|e| Error::InvalidArgument(format!("rank {}: unable to parse local topology: {}", rank, e)))?;

    let mut children = BTreeMap::new();
    if dto.cores > 0 {
        children.insert("core".to_string(), Idset::range(dto.cores));
    }
    if dto.gpus > 0 {
        children.insert("gpu".to_string(), Idset::range(dto.gpus));
    }

    let mut ranks = BTreeMap::new();
    ranks.insert(rank, RankResources { hostname: Some(dto.hostname), children });
    Ok(ResourceSet::from_ranks(ranks))
}

/// Expands inline configuration entries into R. Ranks are assigned to
/// hosts in order of first appearance; repeated hosts accumulate resources.
pub fn from_config(entries: &[ConfigResourceDto]) -> Result<ResourceSet> {
    let mut order: Vec<String> = Vec::new();
    let mut by_host: BTreeMap<String, (BTreeMap<String, Idset>, Vec<String>)> = BTreeMap::new();

    for entry in entries {
        let hosts = hostlist::decode(&entry.hosts)?;
        if hosts.is_empty() {
            return Err(Error::InvalidArgument("resource config entry has no hosts".to_string()));
        }
        for host in hosts {
            let (children, properties) = by_host.entry(host.clone()).or_insert_with(|| {
                order.push(host.clone());
                (BTreeMap::new(), Vec::new())
            });
            for (kind, ids) in [("core", &entry.cores), ("gpu", &entry.gpus)] {
                if let Some(ids) = ids {
                    let ids = Idset::from_str(ids)?;
                    let merged = children.get(kind).map(|have: &Idset| have.union(&ids)).unwrap_or(ids);
                    children.insert(kind.to_string(), merged);
                }
            }
            properties.extend(entry.properties.iter().cloned());
        }
    }

    let mut ranks = BTreeMap::new();
    let mut properties: BTreeMap<String, Idset> = BTreeMap::new();
    for (rank, host) in order.iter().enumerate() {
        let rank = rank as Rank;
        let Some((children, props)) = by_host.remove(host) else { continue };
        for name in props {
            properties.entry(name).or_default().set(rank);
        }
        ranks.insert(rank, RankResources { hostname: Some(host.clone()), children });
    }

    let mut set = ResourceSet::from_ranks(ranks);
    for (name, ids) in &properties {
        set.set_property(name, ids);
    }
    Ok(set)
}

/// Compares `local` against the slice of `r` for `rank` at core granularity
/// only. Accelerators are not compared because detection is best effort.
pub fn verify(rank: Rank, local: &ResourceSet, r: &ResourceSet) -> Verification {
    let Some(expected) = r.rank(rank) else {
        return Verification::Mismatch(format!("rank {} not found in resource description", rank));
    };
    let probed = local.rank(rank).cloned().unwrap_or_default();

    if let (Some(want), Some(have)) = (&expected.hostname, &probed.hostname) {
        if want != have {
            return Verification::Mismatch(format!("rank {} hostname is {}, expected {}", rank, have, want));
        }
    }

    let want = expected.children.get("core").cloned().unwrap_or_default();
    let have = probed.children.get("core").cloned().unwrap_or_default();
    let missing = want.difference(&have);
    if !missing.is_empty() {
        return Verification::Mismatch(format!("rank {} missing core {} (have {}, expected {})", rank, missing, have.count(), want.count()));
    }
    let extra = have.difference(&want);
    if !extra.is_empty() {
        return Verification::Extra(format!("rank {} has extra core {}", rank, extra));
    }
    Verification::Match
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topo(host: &str, cores: u32, gpus: u32) -> String {
        serde_json::to_string(&LocalTopologyDto { hostname: host.to_string(), cores, gpus }).unwrap()
    }

    #[test]
    fn test_from_local_topology() {
        let r = from_local_topology(5, &topo("node5", 4, 1)).unwrap();
        assert_eq!(r.ranks().encode(), "5");
        assert_eq!(r.core_count(5), Some(4));
        assert_eq!(r.rank(5).unwrap().count("gpu"), 1);
        assert!(from_local_topology(0, "<topology/>").is_err());
    }

    #[test]
    fn test_from_config_assigns_ranks_in_host_order() {
        let entries = vec![
            ConfigResourceDto { hosts: "node[0-1]".into(), cores: Some("0-3".into()), gpus: None, properties: vec![] },
            ConfigResourceDto { hosts: "node1,big0".into(), cores: None, gpus: Some("0".into()), properties: vec!["gpu".into()] },
        ];
        let r = from_config(&entries).unwrap();
        assert_eq!(r.ranks().encode(), "0-2");
        assert_eq!(r.nodelist_for(&r.ranks()), "node[0-1],big0");
        assert_eq!(r.rank(1).unwrap().count("gpu"), 1);
        assert_eq!(r.core_count(2), Some(0));
        assert_eq!(r.properties().get("gpu").map(Idset::encode).as_deref(), Some("1-2"));
    }

    #[test]
    fn test_verify_core_granularity() {
        let entries = vec![ConfigResourceDto { hosts: "node[0-1]".into(), cores: Some("0-3".into()), gpus: Some("0".into()), properties: vec![] }];
        let r = from_config(&entries).unwrap();

        // Missing gpu is tolerated.
        let exact = from_local_topology(1, &topo("node1", 4, 0)).unwrap();
        assert_eq!(verify(1, &exact, &r), Verification::Match);

        let fewer = from_local_topology(1, &topo("node1", 2, 1)).unwrap();
        assert!(matches!(verify(1, &fewer, &r), Verification::Mismatch(reason) if reason.contains("missing core 2-3")));

        let more = from_local_topology(1, &topo("node1", 8, 1)).unwrap();
        assert!(matches!(verify(1, &more, &r), Verification::Extra(_)));

        let wrong_host = from_local_topology(1, &topo("node7", 4, 1)).unwrap();
        assert!(matches!(verify(1, &wrong_host, &r), Verification::Mismatch(_)));

        assert!(matches!(verify(9, &exact, &r), Verification::Mismatch(_)));
    }
}
