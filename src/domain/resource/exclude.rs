use crate::domain::resource::eventlog::ResourceEvent;
use crate::domain::utils::idset::{self, Idset};

/// Ranks withheld from scheduling by configuration.
#[derive(Debug, Default)]
pub struct Exclude {
    set: Idset,
}

impl Exclude {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) -> &Idset {
        &self.set
    }

    /// Swaps in `new` and returns the exclude/unexclude events describing
    /// the change.
    pub fn update(&mut self, new: Idset) -> Vec<ResourceEvent> {
        let (added, removed) = idset::diff(&self.set, &new);
        self.set = new;

        let mut events = Vec::new();
        if let Some(idset) = added {
            log::info!("exclude: {} {}", idset::rank_noun(&idset), idset);
            events.push(ResourceEvent::Exclude { idset });
        }
        if let Some(idset) = removed {
            log::info!("unexclude: {} {}", idset::rank_noun(&idset), idset);
            events.push(ResourceEvent::Unexclude { idset });
        }
        events
    }
}
