//! Read-only views composed from inventory, monitor, exclude and drain.

use std::collections::BTreeMap;

use crate::api::response_dto::{DrainInfoDto, SchedStatusDto, StatusDto};
use crate::domain::resource::drain::Drain;
use crate::domain::rset::ResourceSet;
use crate::domain::utils::idset::Idset;

/// Property set on ranks that hold allocated resources.
pub const ALLOCATED_PROPERTY: &str = "allocated";

#[derive(Debug, Clone, Copy)]
pub struct StatusView<'a> {
    pub r: &'a ResourceSet,
    pub up: &'a Idset,
    pub excluded: &'a Idset,
    pub drain: &'a Drain,
}

impl StatusView<'_> {
    pub fn status(&self) -> StatusDto {
        let all = self.r.ranks();
        let drain = self
            .drain
            .groups()
            .into_iter()
            .map(|(ids, timestamp, reason)| (ids.to_string(), DrainInfoDto { timestamp, reason }))
            .collect::<BTreeMap<_, _>>();

        StatusDto {
            r: self.r.to_value(),
            online: self.up.intersect(&all),
            offline: all.difference(self.up),
            exclude: self.excluded.clone(),
            drain,
        }
    }

    /// Scheduler view: excluded ranks removed, down and drained ranks
    /// reported unavailable, allocated ranks tagged.
    pub fn sched_status(&self, allocated: Option<&ResourceSet>) -> SchedStatusDto {
        let valid = self.r.ranks().difference(self.excluded);
        let unavailable = valid.difference(self.up).union(&self.drain.drained().intersect(&valid));
        let allocated = allocated.map(|a| a.copy_ranks(&valid)).unwrap_or_else(ResourceSet::empty);

        let mut all = self.r.copy_ranks(&valid);
        all.set_property(ALLOCATED_PROPERTY, &allocated.ranks());

        SchedStatusDto { all: all.to_value(), down: self.r.copy_ranks(&unavailable).to_value(), allocated: allocated.to_value() }
    }
}
