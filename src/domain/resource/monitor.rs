use serde_json::json;

use crate::domain::resource::eventlog::ResourceEvent;
use crate::domain::resource::request::RequestHandle;
use crate::domain::utils::id::{ClientId, Rank};
use crate::domain::utils::idset::{self, Idset};
use crate::error::Error;

/// Tracks which ranks are online.
#[derive(Debug)]
pub struct Monitor {
    size: Rank,
    up: Idset,
    /// Callers waiting for the online count to reach a target.
    waiters: Vec<(usize, RequestHandle)>,
}

impl Monitor {
    /// With `force_up` every rank starts online.
    pub fn new(size: Rank, force_up: bool) -> Self {
        let up = if force_up { Idset::range(size) } else { Idset::new() };
        Self { size, up, waiters: Vec::new() }
    }

    pub fn up(&self) -> &Idset {
        &self.up
    }

    /// Ranks of `valid` that are not online.
    pub fn down(&self, valid: &Idset) -> Idset {
        valid.difference(&self.up)
    }

    /// Replaces the online set. Returns the online/offline events to post,
    /// joined ranks first.
    pub fn update(&mut self, up: Idset) -> Vec<ResourceEvent> {
        let up = match up.out_of_range(self.size) {
            Some(bad) => {
                log::warn!("monitor: ignoring out of range ranks {} (size={})", bad, self.size);
                up.difference(&bad)
            }
            None => up,
        };

        let (joined, left) = idset::diff(&self.up, &up);
        self.up = up;

        let mut events = Vec::new();
        if let Some(idset) = joined {
            log::info!("monitor: {} {} online", idset::rank_noun(&idset), idset);
            events.push(ResourceEvent::Online { idset });
        }
        if let Some(idset) = left {
            log::info!("monitor: {} {} offline", idset::rank_noun(&idset), idset);
            events.push(ResourceEvent::Offline { idset });
        }
        events
    }

    /// Answers once exactly `target` ranks are online.
    pub fn add_waiter(&mut self, target: usize, handle: RequestHandle) {
        if target > self.size as usize {
            handle.respond_error(Error::InvalidArgument(format!("cannot wait for {} ranks up (size={})", target, self.size)));
        } else if self.up.count() == target {
            handle.respond(json!({}));
        } else {
            self.waiters.push((target, handle));
        }
    }

    pub fn release_waiters(&mut self) {
        let count = self.up.count();
        self.waiters.retain(|(target, handle)| {
            if *target == count {
                handle.respond(json!({}));
                false
            } else {
                handle.is_connected()
            }
        });
    }

    pub fn disconnect(&mut self, client: &ClientId) {
        self.waiters.retain(|(_, handle)| !handle.is_from(client, None));
    }

    pub fn waiter_count(&self) -> usize {
        self.waiters.len()
    }
}
