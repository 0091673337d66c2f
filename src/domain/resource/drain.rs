//! Per-rank drain state.
//!
//! Requests are validated against the table and turned into events; the
//! table itself only changes when a drain/undrain event completes, through
//! the same `apply` used to replay the persisted log. Live state and
//! replayed state therefore cannot diverge.

use std::collections::BTreeMap;
use std::str::FromStr;

use crate::domain::resource::eventlog::{EventlogEntry, ResourceEvent};
use crate::domain::rset::ResourceSet;
use crate::domain::utils::id::Rank;
use crate::domain::utils::idset::{Idset, rank_noun};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrainRecord {
    pub drained: bool,
    pub timestamp: f64,
    pub reason: Option<String>,
}

impl DrainRecord {
    fn has_reason(&self) -> bool {
        self.drained && self.reason.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DrainMode {
    /// Fail if any target is already drained with a reason.
    #[default]
    Default,
    /// Skip targets already drained with a reason.
    Update,
    /// Replace the reason, keep the timestamp.
    Overwrite,
    /// Replace the reason and the timestamp.
    ForceOverwrite,
}

impl DrainMode {
    /// The `overwrite` value recorded in the drain event.
    fn overwrite_level(&self, any_drained: bool) -> u8 {
        match self {
            DrainMode::ForceOverwrite => 2,
            DrainMode::Overwrite => 1,
            DrainMode::Default | DrainMode::Update => u8::from(any_drained),
        }
    }
}

impl FromStr for DrainMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "update" => Ok(DrainMode::Update),
            "overwrite" => Ok(DrainMode::Overwrite),
            "force-overwrite" => Ok(DrainMode::ForceOverwrite),
            _ => Err(Error::InvalidArgument(format!("invalid drain mode: {}", s))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UndrainMode {
    #[default]
    Default,
    /// Drop targets that are not drained instead of failing.
    Force,
}

impl FromStr for UndrainMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "force" => Ok(UndrainMode::Force),
            _ => Err(Error::InvalidArgument(format!("invalid undrain mode: {}", s))),
        }
    }
}

fn nodelist(r: &ResourceSet, ranks: &Idset) -> Option<String> {
    let list = r.nodelist_for(ranks);
    if list.is_empty() { None } else { Some(list) }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Drain {
    table: Vec<DrainRecord>,
}

impl Drain {
    /// All ranks start undrained.
    pub fn new(size: Rank) -> Self {
        Self { table: vec![DrainRecord::default(); size as usize] }
    }

    /// Rebuilds the table from a persisted log. Unparseable drain history
    /// is an error, never a silent "nothing drained".
    pub fn replay<'a>(size: Rank, entries: impl IntoIterator<Item = &'a EventlogEntry>) -> Result<Self> {
        let mut drain = Drain::new(size);
        let mut applied = 0;
        for entry in entries {
            if let Some(event) = ResourceEvent::from_entry(entry)? {
                if drain.apply(&event, entry.timestamp) {
                    applied += 1;
                }
            }
        }
        log::debug!("drain: replayed {} drain/undrain events", applied);
        Ok(drain)
    }

    /// Applies a completed drain/undrain event. Returns false for any other
    /// event. Ranks beyond the table are ignored.
    pub fn apply(&mut self, event: &ResourceEvent, timestamp: f64) -> bool {
        match event {
            ResourceEvent::Drain { idset, reason, overwrite, .. } => {
                for rank in idset.iter() {
                    let Some(record) = self.table.get_mut(rank as usize) else {
                        log::warn!("drain: ignoring out of range rank {}", rank);
                        continue;
                    };
                    if *overwrite == 2 || !record.drained {
                        record.timestamp = timestamp;
                    }
                    record.drained = true;
                    record.reason = reason.clone();
                }
                true
            }
            ResourceEvent::Undrain { idset, .. } => {
                for rank in idset.iter() {
                    let Some(record) = self.table.get_mut(rank as usize) else {
                        log::warn!("undrain: ignoring out of range rank {}", rank);
                        continue;
                    };
                    *record = DrainRecord { drained: false, timestamp, reason: None };
                }
                true
            }
            _ => false,
        }
    }

    pub fn record(&self, rank: Rank) -> Option<&DrainRecord> {
        self.table.get(rank as usize)
    }

    pub fn is_drained(&self, rank: Rank) -> bool {
        self.record(rank).is_some_and(|record| record.drained)
    }

    pub fn drained(&self) -> Idset {
        self.drained_where(|_| true)
    }

    fn drained_where(&self, pred: impl Fn(&DrainRecord) -> bool) -> Idset {
        self.table
            .iter()
            .enumerate()
            .filter(|(_, record)| record.drained && pred(record))
            .map(|(rank, _)| rank as Rank)
            .collect()
    }

    /// Validates a drain request. `Ok(None)` means there is nothing to do.
    pub fn prepare_drain(
        &self,
        targets: &Idset,
        reason: Option<String>,
        mode: DrainMode,
        excluded: &Idset,
        r: &ResourceSet,
    ) -> Result<Option<ResourceEvent>> {
        let excluded = targets.intersect(excluded);
        if !excluded.is_empty() {
            return Err(Error::InvalidArgument(format!("{} {} excluded", rank_noun(&excluded), excluded)));
        }
        let with_reason = targets.intersect(&self.drained_where(DrainRecord::has_reason));

        let affected = match mode {
            DrainMode::Default if !with_reason.is_empty() => {
                return Err(Error::AlreadyExists(format!("{} {} already drained", rank_noun(&with_reason), with_reason)));
            }
            DrainMode::Update => targets.difference(&with_reason),
            _ => targets.clone(),
        };
        if affected.is_empty() {
            return Ok(None);
        }

        let any_drained = affected.iter().any(|rank| self.is_drained(rank));
        Ok(Some(ResourceEvent::Drain {
            nodelist: nodelist(r, &affected),
            overwrite: mode.overwrite_level(any_drained),
            idset: affected,
            reason,
        }))
    }

    /// Validates an undrain request. `Ok(None)` means there is nothing to do.
    pub fn prepare_undrain(
        &self,
        targets: &Idset,
        reason: Option<String>,
        mode: UndrainMode,
        r: &ResourceSet,
    ) -> Result<Option<ResourceEvent>> {
        let not_drained = targets.difference(&self.drained());
        let affected = match mode {
            UndrainMode::Default if !not_drained.is_empty() => {
                return Err(Error::InvalidArgument(format!("{} {} not drained", rank_noun(&not_drained), not_drained)));
            }
            UndrainMode::Default => targets.clone(),
            UndrainMode::Force => targets.difference(&not_drained),
        };
        if affected.is_empty() {
            return Ok(None);
        }
        Ok(Some(ResourceEvent::Undrain { nodelist: nodelist(r, &affected), idset: affected, reason }))
    }

    /// Exclusion wins over drain: an undrain for every drained rank that is
    /// also excluded.
    pub fn reconcile_excluded(&self, excluded: &Idset, r: &ResourceSet) -> Option<ResourceEvent> {
        let both = self.drained().intersect(excluded);
        if both.is_empty() {
            return None;
        }
        log::info!("drain: undraining excluded {} {}", rank_noun(&both), both);
        Some(ResourceEvent::Undrain {
            nodelist: nodelist(r, &both),
            idset: both,
            reason: Some("rank excluded".to_string()),
        })
    }

    /// Drained ranks grouped by identical `(timestamp, reason)`.
    pub fn groups(&self) -> Vec<(Idset, f64, Option<String>)> {
        let mut groups: BTreeMap<(u64, Option<String>), Idset> = BTreeMap::new();
        for (rank, record) in self.table.iter().enumerate().filter(|(_, record)| record.drained) {
            groups.entry((record.timestamp.to_bits(), record.reason.clone())).or_default().set(rank as Rank);
        }
        groups.into_iter().map(|((bits, reason), ids)| (ids, f64::from_bits(bits), reason)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::config_dto::ConfigResourceDto;
    use crate::domain::rset::local;

    fn ids(s: &str) -> Idset {
        Idset::from_str(s).unwrap()
    }

    fn r() -> ResourceSet {
        let entry = ConfigResourceDto { hosts: "node[0-3]".to_string(), cores: Some("0-1".to_string()), gpus: None, properties: Vec::new() };
        local::from_config(&[entry]).unwrap()
    }

    /// Validates and applies in one go, the way a committed request ends up.
    fn drain(table: &mut Drain, targets: &str, reason: &str, mode: DrainMode, ts: f64) -> Result<()> {
        if let Some(event) = table.prepare_drain(&ids(targets), Some(reason.to_string()), mode, &Idset::new(), &r())? {
            table.apply(&event, ts);
        }
        Ok(())
    }

    #[test]
    fn test_drain_event_carries_nodelist() {
        let table = Drain::new(4);
        let event = table.prepare_drain(&ids("1-2"), Some("bad".into()), DrainMode::Default, &Idset::new(), &r()).unwrap();
        assert_eq!(
            event,
            Some(ResourceEvent::Drain { idset: ids("1-2"), nodelist: Some("node[1-2]".into()), reason: Some("bad".into()), overwrite: 0 })
        );
    }

    #[test]
    fn test_redrain_same_reason_rejected() {
        let mut table = Drain::new(4);
        drain(&mut table, "1", "bad", DrainMode::Default, 1.0).unwrap();
        let err = drain(&mut table, "1", "bad", DrainMode::Default, 2.0).unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));
        assert_eq!(table.record(1).unwrap().timestamp, 1.0);
    }

    #[test]
    fn test_excluded_target_rejected_before_conflict() {
        let mut table = Drain::new(4);
        drain(&mut table, "1", "bad", DrainMode::Default, 1.0).unwrap();
        let err = table.prepare_drain(&ids("1"), None, DrainMode::Default, &ids("1"), &r()).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_drain_modes() {
        let mut table = Drain::new(4);
        drain(&mut table, "0-1", "first", DrainMode::Default, 1.0).unwrap();

        // Update skips ranks drained with a reason.
        drain(&mut table, "1-2", "second", DrainMode::Update, 2.0).unwrap();
        assert_eq!(table.record(1).unwrap().reason.as_deref(), Some("first"));
        assert_eq!(table.record(2).unwrap().reason.as_deref(), Some("second"));

        // Overwrite replaces the reason and keeps the timestamp.
        drain(&mut table, "0", "third", DrainMode::Overwrite, 3.0).unwrap();
        assert_eq!(table.record(0).unwrap(), &DrainRecord { drained: true, timestamp: 1.0, reason: Some("third".into()) });

        // Force-overwrite always succeeds and moves the timestamp.
        drain(&mut table, "0", "third", DrainMode::ForceOverwrite, 4.0).unwrap();
        assert_eq!(table.record(0).unwrap().timestamp, 4.0);
    }

    #[test]
    fn test_overwrite_levels() {
        let mut table = Drain::new(4);
        let event = table.prepare_drain(&ids("0"), None, DrainMode::ForceOverwrite, &Idset::new(), &r()).unwrap().unwrap();
        assert!(matches!(event, ResourceEvent::Drain { overwrite: 2, .. }));

        drain(&mut table, "0", "x", DrainMode::Default, 1.0).unwrap();
        let event = table.prepare_drain(&ids("0-1"), None, DrainMode::Overwrite, &Idset::new(), &r()).unwrap().unwrap();
        assert!(matches!(event, ResourceEvent::Drain { overwrite: 1, .. }));
    }

    #[test]
    fn test_drained_without_reason_can_be_redrained() {
        let mut table = Drain::new(4);
        let event = table.prepare_drain(&ids("3"), None, DrainMode::Default, &Idset::new(), &r()).unwrap().unwrap();
        table.apply(&event, 1.0);
        drain(&mut table, "3", "now with reason", DrainMode::Default, 2.0).unwrap();
        assert_eq!(table.record(3).unwrap(), &DrainRecord { drained: true, timestamp: 1.0, reason: Some("now with reason".into()) });
    }

    #[test]
    fn test_undrain_requires_full_coverage() {
        let mut table = Drain::new(4);
        drain(&mut table, "0", "bad", DrainMode::Default, 1.0).unwrap();

        let err = table.prepare_undrain(&ids("0-1"), None, UndrainMode::Default, &r()).unwrap_err();
        match err {
            Error::InvalidArgument(msg) => assert!(msg.contains("rank 1 not drained"), "{}", msg),
            other => panic!("unexpected error {:?}", other),
        }

        let event = table.prepare_undrain(&ids("0-1"), None, UndrainMode::Force, &r()).unwrap().unwrap();
        assert!(matches!(&event, ResourceEvent::Undrain { idset, .. } if idset.to_string() == "0"));
        table.apply(&event, 2.0);
        assert!(table.drained().is_empty());

        assert_eq!(table.prepare_undrain(&ids("2-3"), None, UndrainMode::Force, &r()).unwrap(), None);
    }

    #[test]
    fn test_reconcile_excluded() {
        let mut table = Drain::new(4);
        drain(&mut table, "3", "bad", DrainMode::Default, 1.0).unwrap();
        assert_eq!(table.reconcile_excluded(&ids("0"), &r()), None);

        let event = table.reconcile_excluded(&ids("2-3"), &r()).unwrap();
        assert!(matches!(&event, ResourceEvent::Undrain { idset, .. } if idset.to_string() == "3"));
        table.apply(&event, 2.0);
        assert!(!table.is_drained(3));
    }

    #[test]
    fn test_replay_is_deterministic() {
        let events = vec![
            ResourceEvent::Drain { idset: ids("0-2"), nodelist: None, reason: Some("a".into()), overwrite: 0 }.to_entry(1.0),
            ResourceEvent::Online { idset: ids("0-3") }.to_entry(1.5),
            ResourceEvent::Undrain { idset: ids("1"), nodelist: None, reason: None }.to_entry(2.0),
            ResourceEvent::Drain { idset: ids("2"), nodelist: None, reason: Some("b".into()), overwrite: 2 }.to_entry(3.0),
        ];
        let first = Drain::replay(4, &events).unwrap();
        let second = Drain::replay(4, &events).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.drained().to_string(), "0,2");
        assert_eq!(first.record(2).unwrap().timestamp, 3.0);
    }

    #[test]
    fn test_replay_rejects_malformed_drain() {
        let bad = EventlogEntry::new(1.0, "drain", serde_json::Map::new());
        assert!(matches!(Drain::replay(4, &[bad]), Err(Error::Replay(_))));
    }

    #[test]
    fn test_groups() {
        let mut table = Drain::new(4);
        drain(&mut table, "0,2", "a", DrainMode::Default, 1.0).unwrap();
        drain(&mut table, "3", "b", DrainMode::Default, 1.0).unwrap();
        let groups = table.groups();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0], (ids("0,2"), 1.0, Some("a".to_string())));
        assert_eq!(groups[1], (ids("3"), 1.0, Some("b".to_string())));
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!(DrainMode::from_str("force-overwrite").unwrap(), DrainMode::ForceOverwrite);
        assert!(matches!(DrainMode::from_str("bogus"), Err(Error::InvalidArgument(_))));
        assert_eq!(UndrainMode::from_str("force").unwrap(), UndrainMode::Force);
    }
}
