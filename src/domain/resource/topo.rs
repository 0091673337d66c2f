//! Tree reduction of locally probed resources into a full R.

use std::future::Future;
use std::time::Duration;

use crate::domain::rset::ResourceSet;
use crate::error::{Error, Result};

/// Accumulated contribution of this rank and its subtree.
#[derive(Debug, Clone, PartialEq)]
pub struct Reduced {
    pub count: usize,
    pub resources: ResourceSet,
}

#[derive(Debug)]
pub struct TopoReduce {
    expected: usize,
    received: usize,
    acc: ResourceSet,
    done: bool,
}

impl TopoReduce {
    /// Expects one contribution from self plus one per descendant.
    pub fn new(descendants: usize) -> Self {
        Self { expected: descendants + 1, received: 0, acc: ResourceSet::empty(), done: false }
    }

    pub fn expected(&self) -> usize {
        self.expected
    }

    pub fn received(&self) -> usize {
        self.received
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Adds `count` contributions. Returns the reduced R when the last
    /// expected contribution arrives.
    pub fn contribute(&mut self, count: usize, resources: &ResourceSet) -> Result<Option<Reduced>> {
        if self.done {
            return Err(Error::TopoOverflow(format!("reduction already complete ({} contributions)", self.expected)));
        }
        if count == 0 {
            return Err(Error::InvalidArgument("topology contribution with count 0".to_string()));
        }
        if self.received + count > self.expected {
            return Err(Error::TopoOverflow(format!(
                "received {} contributions, expected {}",
                self.received + count,
                self.expected
            )));
        }
        self.acc.merge(resources)?;
        self.received += count;
        log::debug!("topology reduction: {}/{}", self.received, self.expected);

        if self.received < self.expected {
            return Ok(None);
        }
        self.done = true;
        let resources = std::mem::replace(&mut self.acc, ResourceSet::empty());
        Ok(Some(Reduced { count: self.received, resources }))
    }
}

/// Runs `op` until it succeeds, doubling the delay after each failure.
/// Gives up with `Timeout` after `attempts` tries.
pub async fn retry_with_backoff<F, Fut, T>(what: &str, attempts: u32, base: Duration, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut delay = base;
    let mut last = None;
    for attempt in 1..=attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                log::warn!("{} failed (attempt {}/{}): {}", what, attempt, attempts, e);
                last = Some(e);
            }
        }
        if attempt < attempts {
            tokio::time::sleep(delay).await;
            delay = delay.saturating_mul(2);
        }
    }
    Err(Error::Timeout(format!(
        "{} gave up after {} attempts: {}",
        what,
        attempts,
        last.map(|e| e.to_string()).unwrap_or_default()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::rset::local;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn rank_r(rank: u32) -> ResourceSet {
        let topology = format!(r#"{{"hostname":"node{}","cores":2}}"#, rank);
        local::from_local_topology(rank, &topology).unwrap()
    }

    #[test]
    fn test_reduction_completes_on_last_contribution() {
        let mut topo = TopoReduce::new(2);
        assert_eq!(topo.expected(), 3);
        assert_eq!(topo.contribute(1, &rank_r(0)).unwrap(), None);
        assert_eq!(topo.contribute(1, &rank_r(1)).unwrap(), None);

        let reduced = topo.contribute(1, &rank_r(2)).unwrap().unwrap();
        assert_eq!(reduced.count, 3);
        assert_eq!(reduced.resources.ranks().to_string(), "0-2");
        assert!(topo.is_done());

        assert!(matches!(topo.contribute(1, &rank_r(3)), Err(Error::TopoOverflow(_))));
    }

    #[test]
    fn test_overflowing_count_is_rejected() {
        let mut topo = TopoReduce::new(1);
        let mut subtree = rank_r(1);
        subtree.merge(&rank_r(2)).unwrap();
        assert!(matches!(topo.contribute(2, &subtree), Err(Error::TopoOverflow(_))));
        assert_eq!(topo.received(), 0);
    }

    #[test]
    fn test_duplicate_rank_is_rejected() {
        let mut topo = TopoReduce::new(3);
        topo.contribute(1, &rank_r(1)).unwrap();
        assert!(matches!(topo.contribute(1, &rank_r(1)), Err(Error::InvalidArgument(_))));
        assert_eq!(topo.received(), 1);
    }

    #[tokio::test]
    async fn test_retry_until_success() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff("probe", 5, Duration::from_millis(1), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move { if n < 2 { Err(Error::RemoteIo("down".into())) } else { Ok(n) } }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_retry_gives_up() {
        let result: Result<()> =
            retry_with_backoff("probe", 3, Duration::from_millis(1), || async { Err(Error::RemoteIo("down".into())) }).await;
        assert!(matches!(result, Err(Error::Timeout(_))));
    }
}
