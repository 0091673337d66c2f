use async_trait::async_trait;

use crate::api::topology_dto::LocalTopologyDto;
use crate::error::Result;

/// Hardware topology of the calling rank, as an opaque string.
#[async_trait]
pub trait TopologyProbe: std::fmt::Debug + Send + Sync {
    /// With `restrict`, only resources in the caller's current binding.
    async fn local_topology(&self, restrict: bool) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct StaticTopology {
    topology: String,
}

impl StaticTopology {
    pub fn new(topology: impl Into<String>) -> Self {
        Self { topology: topology.into() }
    }

    pub fn describe(hostname: &str, cores: u32, gpus: u32) -> Self {
        let dto = LocalTopologyDto { hostname: hostname.to_string(), cores, gpus };
        Self::new(serde_json::to_string(&dto).unwrap_or_default())
    }
}

#[async_trait]
impl TopologyProbe for StaticTopology {
    async fn local_topology(&self, _restrict: bool) -> Result<String> {
        Ok(self.topology.clone())
    }
}
