//! Resource description (R) model.
//!
//! A `ResourceSet` is kept in expanded per-rank form and converted to and
//! from the compact Rv1 wire form at the serde boundary, so every value of
//! this type has passed validation.

use bimap::BiMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::api::rv1_dto::{ExecutionDto, RLiteDto, Rv1Dto};
use crate::domain::utils::{
    hostlist,
    id::Rank,
    idset::{Idset, rank_noun},
};
use crate::error::{Error, Result};

pub mod local;

/// Resources of a single rank.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RankResources {
    pub hostname: Option<String>,
    /// Resource type (`core`, `gpu`, ...) to the ids present on the rank.
    pub children: BTreeMap<String, Idset>,
}

impl RankResources {
    pub fn count(&self, kind: &str) -> usize {
        self.children.get(kind).map(Idset::count).unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Rv1Dto", into = "Rv1Dto")]
pub struct ResourceSet {
    ranks: BTreeMap<Rank, RankResources>,
    properties: BTreeMap<String, Idset>,
    starttime: f64,
    expiration: f64,
    scheduling: Option<serde_json::Value>,
}

impl ResourceSet {
    pub fn empty() -> Self {
        Self { ranks: BTreeMap::new(), properties: BTreeMap::new(), starttime: 0.0, expiration: 0.0, scheduling: None }
    }

    pub fn from_ranks(ranks: BTreeMap<Rank, RankResources>) -> Self {
        Self { ranks, ..Self::empty() }
    }

    pub fn parse(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(Rv1Dto::from(self.clone())).unwrap_or(serde_json::Value::Null)
    }

    pub fn is_empty(&self) -> bool {
        self.ranks.is_empty()
    }

    pub fn ranks(&self) -> Idset {
        self.ranks.keys().copied().collect()
    }

    pub fn rank(&self, rank: Rank) -> Option<&RankResources> {
        self.ranks.get(&rank)
    }

    pub fn core_count(&self, rank: Rank) -> Option<usize> {
        self.ranks.get(&rank).map(|r| r.count("core"))
    }

    pub fn properties(&self) -> &BTreeMap<String, Idset> {
        &self.properties
    }

    pub fn scheduling(&self) -> Option<&serde_json::Value> {
        self.scheduling.as_ref()
    }

    /// Tags `ranks` (limited to ranks present in this set) with `name`.
    /// An empty intersection removes the property.
    pub fn set_property(&mut self, name: &str, ranks: &Idset) {
        let present = ranks.intersect(&self.ranks());
        if present.is_empty() {
            self.properties.remove(name);
        } else {
            self.properties.insert(name.to_string(), present);
        }
    }

    /// Copy restricted to `ranks`.
    pub fn copy_ranks(&self, ranks: &Idset) -> ResourceSet {
        let kept: BTreeMap<Rank, RankResources> =
            self.ranks.iter().filter(|(rank, _)| ranks.test(**rank)).map(|(rank, res)| (*rank, res.clone())).collect();
        let kept_ids: Idset = kept.keys().copied().collect();
        let properties = self
            .properties
            .iter()
            .map(|(name, ids)| (name.clone(), ids.intersect(&kept_ids)))
            .filter(|(_, ids)| !ids.is_empty())
            .collect();

        ResourceSet {
            ranks: kept,
            properties,
            starttime: self.starttime,
            expiration: self.expiration,
            scheduling: self.scheduling.clone(),
        }
    }

    /// Copy without `ranks`.
    pub fn remove_ranks(&self, ranks: &Idset) -> ResourceSet {
        self.copy_ranks(&self.ranks().difference(ranks))
    }

    /// Adds the ranks of `other`. Ranks present in both sets are rejected.
    pub fn merge(&mut self, other: &ResourceSet) -> Result<()> {
        let overlap = self.ranks().intersect(&other.ranks());
        if !overlap.is_empty() {
            return Err(Error::InvalidArgument(format!("cannot merge R: {} {} defined twice", rank_noun(&overlap), overlap)));
        }
        for (rank, res) in &other.ranks {
            self.ranks.insert(*rank, res.clone());
        }
        for (name, ids) in &other.properties {
            let merged = self.properties.get(name).map(|mine| mine.union(ids)).unwrap_or_else(|| ids.clone());
            self.properties.insert(name.clone(), merged);
        }
        if self.scheduling.is_none() {
            self.scheduling = other.scheduling.clone();
        }
        Ok(())
    }

    /// Rank <-> hostname mapping. Ranks without a hostname are omitted.
    pub fn hostnames(&self) -> BiMap<Rank, String> {
        self.ranks.iter().filter_map(|(rank, res)| res.hostname.clone().map(|host| (*rank, host))).collect()
    }

    /// Compressed hostlist of the hosts behind `ranks`.
    pub fn nodelist_for(&self, ranks: &Idset) -> String {
        let hosts: Vec<&str> = ranks.iter().filter_map(|rank| self.ranks.get(&rank)).filter_map(|res| res.hostname.as_deref()).collect();
        hostlist::encode(&hosts)
    }
}

impl TryFrom<Rv1Dto> for ResourceSet {
    type Error = Error;

    fn try_from(dto: Rv1Dto) -> Result<Self> {
        if dto.version != 1 {
            return Err(Error::InvalidArgument(format!("unsupported R version {}", dto.version)));
        }

        let mut ranks: BTreeMap<Rank, RankResources> = BTreeMap::new();
        for entry in &dto.execution.r_lite {
            let rank_ids = Idset::from_str(&entry.rank)?;
            let mut children = BTreeMap::new();
            for (kind, ids) in &entry.children {
                children.insert(kind.clone(), Idset::from_str(ids)?);
            }
            for rank in rank_ids.iter() {
                if ranks.insert(rank, RankResources { hostname: None, children: children.clone() }).is_some() {
                    return Err(Error::InvalidArgument(format!("R_lite defines rank {} more than once", rank)));
                }
            }
        }

        let mut hosts = Vec::new();
        for expr in &dto.execution.nodelist {
            hosts.extend(hostlist::decode(expr)?);
        }
        if !hosts.is_empty() {
            if hosts.len() != ranks.len() {
                return Err(Error::InvalidArgument(format!(
                    "nodelist has {} hosts but R_lite has {} ranks",
                    hosts.len(),
                    ranks.len()
                )));
            }
            for (res, host) in ranks.values_mut().zip(hosts) {
                res.hostname = Some(host);
            }
        }

        let mut properties = BTreeMap::new();
        for (name, ids) in &dto.execution.properties {
            properties.insert(name.clone(), Idset::from_str(ids)?);
        }

        Ok(ResourceSet {
            ranks,
            properties,
            starttime: dto.execution.starttime,
            expiration: dto.execution.expiration,
            scheduling: dto.scheduling,
        })
    }
}

impl From<ResourceSet> for Rv1Dto {
    fn from(set: ResourceSet) -> Self {
        // Ranks with identical children share one R_lite entry.
        let mut groups: BTreeMap<&BTreeMap<String, Idset>, Idset> = BTreeMap::new();
        for (rank, res) in &set.ranks {
            groups.entry(&res.children).or_default().set(*rank);
        }
        let mut r_lite: Vec<RLiteDto> = groups
            .into_iter()
            .map(|(children, ranks)| RLiteDto {
                rank: ranks.encode(),
                children: children.iter().map(|(kind, ids)| (kind.clone(), ids.encode())).collect(),
            })
            .collect();
        r_lite.sort_by_key(|entry| Idset::from_str(&entry.rank).ok().and_then(|ids| ids.first()));

        let nodelist = if !set.ranks.is_empty() && set.ranks.values().all(|res| res.hostname.is_some()) {
            let hosts: Vec<&str> = set.ranks.values().filter_map(|res| res.hostname.as_deref()).collect();
            vec![hostlist::encode(&hosts)]
        } else {
            Vec::new()
        };

        Rv1Dto {
            version: 1,
            execution: ExecutionDto {
                r_lite,
                starttime: set.starttime,
                expiration: set.expiration,
                nodelist,
                properties: set.properties.iter().map(|(name, ids)| (name.clone(), ids.encode())).collect(),
            },
            scheduling: set.scheduling,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> ResourceSet {
        ResourceSet::from_value(json!({
            "version": 1,
            "execution": {
                "R_lite": [
                    {"rank": "0-2", "children": {"core": "0-3"}},
                    {"rank": "3", "children": {"core": "0-7", "gpu": "0-1"}}
                ],
                "nodelist": ["node[0-3]"],
                "properties": {"debug": "2-3"},
                "starttime": 0,
                "expiration": 0
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_parse_assigns_hostnames_in_rank_order() {
        let r = sample();
        assert_eq!(r.ranks().encode(), "0-3");
        assert_eq!(r.hostnames().get_by_left(&3).map(String::as_str), Some("node3"));
        assert_eq!(r.core_count(3), Some(8));
        assert_eq!(r.rank(3).unwrap().count("gpu"), 2);
    }

    #[test]
    fn test_rejects_bad_documents() {
        let dup = json!({"version": 1, "execution": {"R_lite": [
            {"rank": "0-1", "children": {"core": "0"}},
            {"rank": "1", "children": {"core": "0"}}
        ]}});
        assert!(ResourceSet::from_value(dup).is_err());

        let short_nodelist = json!({"version": 1, "execution": {
            "R_lite": [{"rank": "0-1", "children": {"core": "0"}}],
            "nodelist": ["node0"]
        }});
        assert!(ResourceSet::from_value(short_nodelist).is_err());

        let version = json!({"version": 2, "execution": {"R_lite": []}});
        assert!(ResourceSet::from_value(version).is_err());
    }

    #[test]
    fn test_remove_ranks_trims_nodelist_and_properties() {
        let r = sample().remove_ranks(&Idset::from_str("1,3").unwrap());
        assert_eq!(r.ranks().encode(), "0,2");
        assert_eq!(r.nodelist_for(&r.ranks()), "node[0,2]");
        assert_eq!(r.properties().get("debug").map(Idset::encode).as_deref(), Some("2"));

        let value = r.to_value();
        assert_eq!(value["execution"]["nodelist"], json!(["node[0,2]"]));
        assert_eq!(value["execution"]["R_lite"], json!([{"rank": "0,2", "children": {"core": "0-3"}}]));
    }

    #[test]
    fn test_merge_rejects_overlap() {
        let mut a = sample().copy_ranks(&Idset::from_str("0-1").unwrap());
        let b = sample().copy_ranks(&Idset::from_str("2-3").unwrap());
        a.merge(&b).unwrap();
        assert_eq!(a, sample());
        assert!(a.merge(&b).is_err());
    }

    #[test]
    fn test_serialization_is_stable() {
        let r = sample();
        let again = ResourceSet::from_value(r.to_value()).unwrap();
        assert_eq!(again, r);
        assert_eq!(again.to_value(), r.to_value());
    }
}
