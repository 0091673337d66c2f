use async_trait::async_trait;

use crate::api::request_dto::Command;
use crate::domain::resource_module::client::ResourceClient;
use crate::domain::rset::ResourceSet;
use crate::domain::utils::id::Rank;
use crate::error::Result;

/// Requests a follower sends to its parent in the reduction tree.
#[async_trait]
pub trait TreeUpstream: std::fmt::Debug + Send + Sync {
    /// R, once the parent has it.
    async fn get_resources(&self) -> Result<ResourceSet>;

    /// Forwards `count` contributions merged into `resources`.
    async fn topo_reduce(&self, count: usize, resources: ResourceSet) -> Result<()>;

    /// Relays a request toward the leader and returns its response.
    async fn forward(&self, command: Command) -> Result<serde_json::Value>;

    /// Asks the leader to drain `rank`, keeping an existing reason.
    async fn drain(&self, rank: Rank, reason: String) -> Result<()> {
        let command = Command::Drain { targets: rank.to_string(), reason: Some(reason), mode: Some("update".to_string()) };
        self.forward(command).await?;
        Ok(())
    }
}

/// Upstream reached through the parent's in-process client.
#[derive(Debug, Clone)]
pub struct ClientUpstream {
    parent: ResourceClient,
}

impl ClientUpstream {
    pub fn new(parent: ResourceClient) -> Self {
        Self { parent }
    }
}

#[async_trait]
impl TreeUpstream for ClientUpstream {
    async fn get_resources(&self) -> Result<ResourceSet> {
        let value = self.parent.rpc(Command::Get).await?;
        ResourceSet::from_value(value)
    }

    async fn topo_reduce(&self, count: usize, resources: ResourceSet) -> Result<()> {
        self.parent.rpc(Command::TopoReduce { count, resources: resources.into() }).await?;
        Ok(())
    }

    async fn forward(&self, command: Command) -> Result<serde_json::Value> {
        self.parent.rpc(command).await
    }
}

/// Parent of `rank` in a `k`-ary tree rooted at rank 0.
pub fn kary_parent(rank: Rank, k: Rank) -> Option<Rank> {
    if rank == 0 || k == 0 { None } else { Some((rank - 1) / k) }
}

/// Number of ranks below `rank` in a `k`-ary tree of `size` ranks.
pub fn kary_descendants(rank: Rank, size: Rank, k: Rank) -> usize {
    if k == 0 {
        return 0;
    }
    let mut count = 0;
    let mut first = rank;
    let mut last = rank;
    loop {
        // Children of [first, last] are [first*k + 1, last*k + k].
        let Some(next_first) = first.checked_mul(k).and_then(|v| v.checked_add(1)) else { break };
        if next_first >= size {
            break;
        }
        let next_last = last.checked_mul(k).and_then(|v| v.checked_add(k)).unwrap_or(Rank::MAX).min(size - 1);
        count += (next_last - next_first + 1) as usize;
        first = next_first;
        last = next_last;
    }
    count
}
