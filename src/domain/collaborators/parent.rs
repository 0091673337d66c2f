use async_trait::async_trait;

use crate::domain::rset::ResourceSet;
use crate::error::Result;

/// The instance this one runs inside of, if any.
#[async_trait]
pub trait ParentInstance: std::fmt::Debug + Send + Sync {
    /// R assigned to this instance by its parent.
    async fn assigned_resources(&self) -> Result<Option<ResourceSet>>;

    /// The parent's view of the local topology, used instead of probing.
    async fn topology(&self) -> Result<Option<String>>;
}

#[derive(Debug, Clone, Default)]
pub struct StaticParent {
    pub resources: Option<ResourceSet>,
    pub topology: Option<String>,
}

#[async_trait]
impl ParentInstance for StaticParent {
    async fn assigned_resources(&self) -> Result<Option<ResourceSet>> {
        Ok(self.resources.clone())
    }

    async fn topology(&self) -> Result<Option<String>> {
        Ok(self.topology.clone())
    }
}
