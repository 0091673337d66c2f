use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum KvsOp {
    Append { key: String, value: String },
    Put { key: String, value: String },
}

/// Operations committed atomically.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KvsTxn {
    pub ops: Vec<KvsOp>,
}

impl KvsTxn {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(mut self, key: &str, value: impl Into<String>) -> Self {
        self.ops.push(KvsOp::Append { key: key.to_string(), value: value.into() });
        self
    }

    pub fn put(mut self, key: &str, value: impl Into<String>) -> Self {
        self.ops.push(KvsOp::Put { key: key.to_string(), value: value.into() });
        self
    }
}

/// Durable key-value store.
#[async_trait]
pub trait KvsStore: std::fmt::Debug + Send + Sync {
    async fn commit(&self, txn: KvsTxn) -> Result<()>;
    async fn lookup(&self, key: &str) -> Result<Option<String>>;
}

#[derive(Debug, Default)]
struct MemoryKvsInner {
    data: HashMap<String, String>,
    fail_commits: bool,
    commits: usize,
}

/// Process-local store. Clones share the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryKvs {
    inner: Arc<RwLock<MemoryKvsInner>>,
}

impl MemoryKvs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.inner.read().ok().and_then(|guard| guard.data.get(key).cloned())
    }

    /// Makes every following commit fail with `RemoteIo`.
    pub fn set_fail_commits(&self, fail: bool) {
        if let Ok(mut guard) = self.inner.write() {
            guard.fail_commits = fail;
        }
    }

    pub fn commit_count(&self) -> usize {
        self.inner.read().map(|guard| guard.commits).unwrap_or(0)
    }
}

#[async_trait]
impl KvsStore for MemoryKvs {
    async fn commit(&self, txn: KvsTxn) -> Result<()> {
        let mut guard = self.inner.write().map_err(|_| Error::RemoteIo("kvs lock poisoned".to_string()))?;
        if guard.fail_commits {
            return Err(Error::RemoteIo("kvs commit failed".to_string()));
        }
        for op in txn.ops {
            match op {
                KvsOp::Append { key, value } => guard.data.entry(key).or_default().push_str(&value),
                KvsOp::Put { key, value } => {
                    guard.data.insert(key, value);
                }
            }
        }
        guard.commits += 1;
        Ok(())
    }

    async fn lookup(&self, key: &str) -> Result<Option<String>> {
        let guard = self.inner.read().map_err(|_| Error::RemoteIo("kvs lock poisoned".to_string()))?;
        Ok(guard.data.get(key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[actix_rt::test]
    async fn test_append_and_put() {
        let kvs = MemoryKvs::new();
        kvs.commit(KvsTxn::new().append("log", "a\n").append("log", "b\n")).await.unwrap();
        kvs.commit(KvsTxn::new().put("R", "{}")).await.unwrap();
        assert_eq!(kvs.lookup("log").await.unwrap().as_deref(), Some("a\nb\n"));
        assert_eq!(kvs.get("R").as_deref(), Some("{}"));
        assert_eq!(kvs.lookup("missing").await.unwrap(), None);
        assert_eq!(kvs.commit_count(), 2);
    }

    #[actix_rt::test]
    async fn test_failing_commit_leaves_data_untouched() {
        let kvs = MemoryKvs::new();
        kvs.set_fail_commits(true);
        assert!(matches!(kvs.commit(KvsTxn::new().put("R", "{}")).await, Err(Error::RemoteIo(_))));
        assert_eq!(kvs.get("R"), None);
    }
}
