use async_trait::async_trait;
use std::sync::{Arc, RwLock};

use crate::domain::rset::ResourceSet;
use crate::error::{Error, Result};

/// The scheduler's view of what is currently allocated.
#[async_trait]
pub trait AllocationSource: std::fmt::Debug + Send + Sync {
    async fn allocated(&self) -> Result<Option<ResourceSet>>;
}

#[derive(Debug, Clone, Default)]
pub struct StaticAllocation {
    allocated: Arc<RwLock<Option<ResourceSet>>>,
}

impl StaticAllocation {
    pub fn set(&self, allocated: Option<ResourceSet>) {
        if let Ok(mut guard) = self.allocated.write() {
            *guard = allocated;
        }
    }
}

#[async_trait]
impl AllocationSource for StaticAllocation {
    async fn allocated(&self) -> Result<Option<ResourceSet>> {
        let guard = self.allocated.read().map_err(|_| Error::RemoteIo("allocation lock poisoned".to_string()))?;
        Ok(guard.clone())
    }
}
