//! Interfaces to the services this crate depends on but does not
//! implement: durable storage, group membership, the hardware probe, the
//! reduction-tree parent, an enclosing instance and the scheduler's
//! allocation view. Each comes with a small in-memory implementation.

use std::sync::Arc;

pub mod allocation;
pub mod kvs;
pub mod membership;
pub mod parent;
pub mod probe;
pub mod upstream;

use allocation::AllocationSource;
use kvs::KvsStore;
use membership::MembershipFeed;
use parent::ParentInstance;
use probe::TopologyProbe;
use upstream::TreeUpstream;

#[derive(Debug, Clone)]
pub struct Collaborators {
    pub kvs: Arc<dyn KvsStore>,
    pub membership: Arc<dyn MembershipFeed>,
    pub probe: Arc<dyn TopologyProbe>,
    /// Tree parent; `None` on the leader.
    pub upstream: Option<Arc<dyn TreeUpstream>>,
    /// Enclosing instance, for nested deployments.
    pub parent: Option<Arc<dyn ParentInstance>>,
    pub allocation: Option<Arc<dyn AllocationSource>>,
}
