//! The resource service of one rank.
//!
//! Every rank runs one `ResourceModule` actor. All followers take part in
//! the topology reduction and verify their local hardware; rank 0 (the
//! leader) additionally owns the eventlog and the monitor, exclude, drain
//! and acquire state. All state changes happen on the actor's context, so
//! none of it is shared or locked.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::api::request_dto::Command;
use crate::domain::collaborators::Collaborators;
use crate::domain::resource::acquire::Acquire;
use crate::domain::resource::config::ResourceConfig;
use crate::domain::resource::drain::Drain;
use crate::domain::resource::eventlog::{EventlogEntry, ResourceEvent};
use crate::domain::resource::exclude::Exclude;
use crate::domain::resource::inventory::Inventory;
use crate::domain::resource::monitor::Monitor;
use crate::domain::resource::request::RequestHandle;
use crate::domain::resource::reslog::Reslog;
use crate::domain::resource::topo::TopoReduce;
use crate::domain::rset::ResourceSet;
use crate::domain::utils::clock::Clock;
use crate::domain::utils::id::Rank;

mod actor;
mod bootstrap;
pub mod client;
mod events;
mod handler;
pub mod message;
pub mod tree;

/// What a rank knows about its place in the instance.
#[derive(Debug, Clone)]
pub struct ResourceContext {
    pub rank: Rank,
    pub size: Rank,
    /// Number of ranks below this one in the reduction tree.
    pub descendants: usize,
    pub clock: Arc<dyn Clock>,
    pub collaborators: Collaborators,
}

impl ResourceContext {
    pub fn is_leader(&self) -> bool {
        self.rank == 0
    }
}

/// Reactions to completed eventlog entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Watcher {
    Milestone,
    DrainTable,
    MonitorWaiters,
    Acquire,
}

/// Attached to a posted event; settled when the event completes.
#[derive(Debug)]
pub(crate) enum PostToken {
    /// A drain or undrain request, answered once its event commits.
    DrainRequest(RequestHandle),
    SelfDrain,
}

/// Subsystems that exist on the leader once R is defined.
#[derive(Debug)]
struct LeaderState {
    monitor: Monitor,
    exclude: Exclude,
    drain: Drain,
}

pub struct ResourceModule {
    context: ResourceContext,
    config: ResourceConfig,
    inventory: Inventory,
    topo: TopoReduce,

    /// This rank's probed resources.
    local: Option<ResourceSet>,
    verified: bool,
    /// Reduced R waiting for the leader to fall back to discovery.
    discovered: Option<ResourceSet>,
    awaiting_discovery: bool,
    /// Verification failed before the drain table existed.
    pending_self_drain: Option<String>,

    reslog: Option<Reslog<PostToken, Watcher>>,
    /// Persisted log as loaded, replayed into the drain table.
    replay_log: Vec<EventlogEntry>,
    /// Events posted while completions are being dispatched.
    outbox: VecDeque<(ResourceEvent, Option<PostToken>)>,
    driving: bool,

    leader: Option<LeaderState>,
    /// Drain and undrain requests waiting for the one being committed.
    drain_requests: VecDeque<(RequestHandle, Command)>,
    drain_in_flight: bool,
    acquire: Acquire,
    acquire_refresh_pending: bool,
    get_waiters: Vec<RequestHandle>,
}

impl ResourceModule {
    pub fn new(context: ResourceContext, config: ResourceConfig) -> Self {
        let size = context.size;
        let descendants = context.descendants;
        Self {
            context,
            config,
            inventory: Inventory::new(size),
            topo: TopoReduce::new(descendants),
            local: None,
            verified: false,
            discovered: None,
            awaiting_discovery: false,
            pending_self_drain: None,
            reslog: None,
            replay_log: Vec::new(),
            outbox: VecDeque::new(),
            driving: false,
            leader: None,
            drain_requests: VecDeque::new(),
            drain_in_flight: false,
            acquire: Acquire::new(),
            acquire_refresh_pending: false,
            get_waiters: Vec::new(),
        }
    }

    pub fn rank(&self) -> Rank {
        self.context.rank
    }
}
