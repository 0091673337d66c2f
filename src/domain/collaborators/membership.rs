use futures::StreamExt;
use futures::channel::mpsc::{UnboundedReceiver, UnboundedSender, unbounded};
use futures::stream::{self, BoxStream};
use std::sync::{Arc, Mutex};

use crate::domain::utils::idset::Idset;
use crate::error::Result;

/// Each item is the complete current set of online ranks.
pub type MembershipStream = BoxStream<'static, Result<Idset>>;

/// Live view of the "online" group.
pub trait MembershipFeed: std::fmt::Debug + Send + Sync {
    fn subscribe(&self) -> MembershipStream;
}

/// Reports a fixed online set once and then stays quiet.
#[derive(Debug, Clone)]
pub struct StaticMembership {
    up: Idset,
}

impl StaticMembership {
    pub fn new(up: Idset) -> Self {
        Self { up }
    }
}

impl MembershipFeed for StaticMembership {
    fn subscribe(&self) -> MembershipStream {
        stream::once(futures::future::ready(Ok(self.up.clone()))).chain(stream::pending()).boxed()
    }
}

/// Feed driven through a `MembershipPublisher`. Supports one subscriber.
#[derive(Debug, Clone)]
pub struct ChannelMembership {
    rx: Arc<Mutex<Option<UnboundedReceiver<Idset>>>>,
}

#[derive(Debug, Clone)]
pub struct MembershipPublisher {
    tx: UnboundedSender<Idset>,
}

impl ChannelMembership {
    pub fn new() -> (Self, MembershipPublisher) {
        let (tx, rx) = unbounded();
        (Self { rx: Arc::new(Mutex::new(Some(rx))) }, MembershipPublisher { tx })
    }
}

impl MembershipPublisher {
    /// Returns false if nobody listens anymore.
    pub fn publish(&self, up: Idset) -> bool {
        self.tx.unbounded_send(up).is_ok()
    }
}

impl MembershipFeed for ChannelMembership {
    fn subscribe(&self) -> MembershipStream {
        let rx = self.rx.lock().ok().and_then(|mut guard| guard.take());
        match rx {
            Some(rx) => rx.map(Ok).boxed(),
            None => {
                log::warn!("membership feed already has a subscriber");
                stream::pending().boxed()
            }
        }
    }
}
