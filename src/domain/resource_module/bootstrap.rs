//! Startup: eventlog load, topology probe and reduction, and resolving R.

use actix::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::domain::collaborators::kvs::{KvsStore, KvsTxn};
use crate::domain::collaborators::parent::ParentInstance;
use crate::domain::resource::drain::DrainMode;
use crate::domain::resource::eventlog::{self, EVENTLOG_KEY, EventlogEntry, R_KEY, ResourceEvent};
use crate::domain::resource::inventory::InventoryMethod;
use crate::domain::resource::reslog::Reslog;
use crate::domain::resource::topo::{Reduced, retry_with_backoff};
use crate::domain::resource_module::{PostToken, ResourceModule, Watcher};
use crate::domain::rset::local::{self, Verification};
use crate::domain::rset::{RankResources, ResourceSet};
use crate::domain::utils::idset::Idset;
use crate::error::{Error, Result};

const UPSTREAM_ATTEMPTS: u32 = 6;
const UPSTREAM_BACKOFF: Duration = Duration::from_millis(100);

/// Reads the persisted eventlog, rewriting it first if it still has the
/// legacy layout.
async fn load_persisted_eventlog(kvs: Arc<dyn KvsStore>) -> Result<Vec<EventlogEntry>> {
    let Some(raw) = kvs.lookup(EVENTLOG_KEY).await? else {
        return Ok(Vec::new());
    };
    let entries = eventlog::decode_eventlog(&raw)?;
    match eventlog::upgrade(&entries)? {
        None => Ok(entries),
        Some(upgraded) => {
            log::info!("upgrading resource eventlog: {} entries rewritten as {}", entries.len(), upgraded.len());
            kvs.commit(KvsTxn::new().put(EVENTLOG_KEY, eventlog::encode_eventlog(&upgraded))).await?;
            Ok(upgraded)
        }
    }
}

/// R from storage or from the enclosing instance, in that order.
async fn lookup_resources(
    kvs: Arc<dyn KvsStore>,
    parent: Option<Arc<dyn ParentInstance>>,
    rediscover: bool,
) -> Result<Option<(ResourceSet, InventoryMethod)>> {
    if rediscover {
        return Ok(None);
    }
    if let Some(raw) = kvs.lookup(R_KEY).await? {
        return Ok(Some((ResourceSet::parse(&raw)?, InventoryMethod::Kvs)));
    }
    if let Some(parent) = parent {
        if let Some(r) = parent.assigned_resources().await? {
            return Ok(Some((r, InventoryMethod::ParentInstance)));
        }
    }
    Ok(None)
}

fn new_reslog(entries: Vec<EventlogEntry>, journal_max: Option<usize>) -> Reslog<PostToken, Watcher> {
    let mut reslog = Reslog::new(entries, journal_max);
    reslog.add_watcher(Some("resource-defined"), Watcher::Milestone);
    for name in ["drain", "undrain"] {
        reslog.add_watcher(Some(name), Watcher::DrainTable);
    }
    for name in ["online", "offline"] {
        reslog.add_watcher(Some(name), Watcher::MonitorWaiters);
    }
    for name in ["online", "offline", "drain", "undrain", "exclude", "unexclude"] {
        reslog.add_watcher(Some(name), Watcher::Acquire);
    }
    reslog
}

impl ResourceModule {
    pub(super) fn load_eventlog(&mut self, ctx: &mut Context<Self>) {
        let kvs = self.context.collaborators.kvs.clone();
        ctx.wait(async move { load_persisted_eventlog(kvs).await }.into_actor(self).map(|result, act, ctx| match result {
            Ok(entries) => {
                log::info!("[rank 0] loaded {} eventlog entries", entries.len());
                act.reslog = Some(new_reslog(entries.clone(), act.config.journal_max()));
                act.replay_log = entries;
                act.bootstrap(ctx);
            }
            Err(e) => {
                log::error!("[rank 0] unable to load resource eventlog: {}", e);
                ctx.stop();
            }
        }));
    }

    pub(super) fn bootstrap(&mut self, ctx: &mut Context<Self>) {
        self.probe_local_topology(ctx);
        self.resolve_inventory(ctx);
    }

    //-------------------------
    // --- Topology
    //-------------------------

    fn probe_local_topology(&mut self, ctx: &mut Context<Self>) {
        let probe = self.context.collaborators.probe.clone();
        let parent = self.context.collaborators.parent.clone();
        let restrict = !self.config.norestrict();

        let fut = async move {
            if let Some(parent) = parent {
                if let Some(topology) = parent.topology().await? {
                    return Ok(topology);
                }
            }
            probe.local_topology(restrict).await
        };
        ctx.spawn(fut.into_actor(self).map(|result, act, ctx| act.on_local_topology(result, ctx)));
    }

    fn on_local_topology(&mut self, result: Result<String>, ctx: &mut Context<Self>) {
        let rank = self.context.rank;
        let local = match result.and_then(|topology| local::from_local_topology(rank, &topology)) {
            Ok(local) => local,
            Err(e) => {
                // An empty contribution keeps the reduction going; verification drains us.
                log::error!("[rank {}] local topology unavailable: {}", rank, e);
                ResourceSet::from_ranks(BTreeMap::from([(rank, RankResources::default())]))
            }
        };
        self.local = Some(local.clone());
        if let Err(e) = self.contribute_topology(1, local, ctx) {
            log::error!("[rank {}] local topology contribution rejected: {}", rank, e);
        }
        self.maybe_verify(ctx);
    }

    pub(super) fn contribute_topology(&mut self, count: usize, resources: ResourceSet, ctx: &mut Context<Self>) -> Result<()> {
        if let Some(reduced) = self.topo.contribute(count, &resources)? {
            self.on_reduction_complete(reduced, ctx);
        }
        Ok(())
    }

    fn on_reduction_complete(&mut self, reduced: Reduced, ctx: &mut Context<Self>) {
        let rank = self.context.rank;
        log::info!("[rank {}] topology reduction complete ({} ranks)", rank, reduced.count);

        if self.context.is_leader() {
            self.discovered = Some(reduced.resources);
            self.maybe_define_discovered(ctx);
            return;
        }
        let Some(upstream) = self.context.collaborators.upstream.clone() else {
            log::error!("[rank {}] no tree parent to forward the topology to", rank);
            return;
        };
        let Reduced { count, resources } = reduced;
        let fut = async move {
            retry_with_backoff("topology forward", UPSTREAM_ATTEMPTS, UPSTREAM_BACKOFF, || upstream.topo_reduce(count, resources.clone())).await
        };
        ctx.spawn(fut.into_actor(self).map(move |result, _act, _ctx| {
            if let Err(e) = result {
                log::error!("[rank {}] {}", rank, e);
            }
        }));
    }

    //-------------------------
    // --- Inventory
    //-------------------------

    fn resolve_inventory(&mut self, ctx: &mut Context<Self>) {
        if let Some(r) = self.config.configured_resources().cloned() {
            self.define_inventory(r, InventoryMethod::Configuration, ctx);
            return;
        }
        if !self.context.is_leader() {
            self.fetch_from_tree_parent(ctx);
            return;
        }

        let kvs = self.context.collaborators.kvs.clone();
        let parent = self.context.collaborators.parent.clone();
        let rediscover = self.config.rediscover();
        ctx.spawn(async move { lookup_resources(kvs, parent, rediscover).await }.into_actor(self).map(|result, act, ctx| {
            match result {
                Ok(Some((r, method))) => act.define_inventory(r, method, ctx),
                Ok(None) => act.await_discovery(ctx),
                Err(e) => {
                    log::error!("[rank 0] resource lookup failed, falling back to discovery: {}", e);
                    act.await_discovery(ctx);
                }
            }
        }));
    }

    fn fetch_from_tree_parent(&mut self, ctx: &mut Context<Self>) {
        let rank = self.context.rank;
        let Some(upstream) = self.context.collaborators.upstream.clone() else {
            log::error!("[rank {}] no tree parent to fetch resources from", rank);
            return;
        };
        let fut = async move { retry_with_backoff("resource fetch", UPSTREAM_ATTEMPTS, UPSTREAM_BACKOFF, || upstream.get_resources()).await };
        ctx.spawn(fut.into_actor(self).map(move |result, act, ctx| match result {
            Ok(r) => act.define_inventory(r, InventoryMethod::TreeParent, ctx),
            Err(e) => log::error!("[rank {}] unable to get resources from parent: {}", rank, e),
        }));
    }

    fn await_discovery(&mut self, ctx: &mut Context<Self>) {
        log::info!("[rank 0] no stored resources, waiting for dynamic discovery");
        self.awaiting_discovery = true;
        self.maybe_define_discovered(ctx);
    }

    fn maybe_define_discovered(&mut self, ctx: &mut Context<Self>) {
        if !self.awaiting_discovery || self.inventory.is_defined() {
            return;
        }
        if let Some(r) = self.discovered.take() {
            self.define_inventory(r, InventoryMethod::DynamicDiscovery, ctx);
        }
    }

    fn define_inventory(&mut self, r: ResourceSet, method: InventoryMethod, ctx: &mut Context<Self>) {
        let rank = self.context.rank;
        if let Err(e) = self.inventory.put(r, method) {
            match e {
                Error::AlreadyExists(_) if !self.context.is_leader() => log::debug!("[rank {}] ignoring R from {}: {}", rank, method, e),
                e => log::error!("[rank {}] unable to set R from {}: {}", rank, method, e),
            }
            return;
        }
        if let Ok(r) = self.inventory.get() {
            log::info!("[rank {}] resources defined by {} (ranks {})", rank, method, r.ranks());
        }

        if !self.context.is_leader() {
            self.on_resource_defined(ctx);
        } else if method.needs_commit() {
            self.commit_resources(method, ctx);
        } else {
            self.post_event(ResourceEvent::ResourceDefined { method: method.to_string() }, None, ctx);
        }
        self.maybe_verify(ctx);
    }

    /// Stores R, then posts the `resource-defined` milestone.
    fn commit_resources(&mut self, method: InventoryMethod, ctx: &mut Context<Self>) {
        let Ok(r) = self.inventory.get() else { return };
        let kvs = self.context.collaborators.kvs.clone();
        let txn = KvsTxn::new().put(R_KEY, r.to_value().to_string());
        ctx.spawn(async move { kvs.commit(txn).await }.into_actor(self).map(move |result, act, ctx| {
            if let Err(e) = result {
                log::error!("[rank 0] unable to store R: {}", e);
            }
            act.post_event(ResourceEvent::ResourceDefined { method: method.to_string() }, None, ctx);
        }));
    }

    //-------------------------
    // --- Verification
    //-------------------------

    fn maybe_verify(&mut self, ctx: &mut Context<Self>) {
        if self.verified || self.config.noverify() {
            return;
        }
        let rank = self.context.rank;
        let (Some(local), Ok(r)) = (self.local.as_ref(), self.inventory.get()) else {
            return;
        };
        let outcome = local::verify(rank, local, r);
        self.verified = true;

        match outcome {
            Verification::Match => log::debug!("[rank {}] local resources verified", rank),
            Verification::Extra(msg) => log::warn!("[rank {}] {}", rank, msg),
            Verification::Mismatch(reason) => {
                log::error!("[rank {}] {}", rank, reason);
                self.drain_self(reason, ctx);
            }
        }
    }

    fn drain_self(&mut self, reason: String, ctx: &mut Context<Self>) {
        let rank = self.context.rank;
        if !self.context.is_leader() {
            let Some(upstream) = self.context.collaborators.upstream.clone() else {
                log::error!("[rank {}] cannot drain self without a tree parent", rank);
                return;
            };
            // The leader answers NoData until its drain table exists.
            let fut = async move {
                retry_with_backoff("self drain", UPSTREAM_ATTEMPTS, UPSTREAM_BACKOFF, || upstream.drain(rank, reason.clone())).await
            };
            ctx.spawn(fut.into_actor(self).map(move |result, _act, _ctx| {
                if let Err(e) = result {
                    log::error!("[rank {}] unable to drain self: {}", rank, e);
                }
            }));
            return;
        }

        let Some(leader) = self.leader.as_ref() else {
            self.pending_self_drain = Some(reason);
            return;
        };
        let Ok(r) = self.inventory.get() else { return };
        let ranks: Idset = std::iter::once(rank).collect();
        match leader.drain.prepare_drain(&ranks, Some(reason), DrainMode::Update, leader.exclude.set(), r) {
            Ok(Some(event)) => self.post_event(event, Some(PostToken::SelfDrain), ctx),
            Ok(None) => log::debug!("[rank 0] already drained"),
            Err(e) => log::warn!("[rank 0] not draining self: {}", e),
        }
    }

    pub(super) fn take_pending_self_drain(&mut self, ctx: &mut Context<Self>) {
        if let Some(reason) = self.pending_self_drain.take() {
            self.drain_self(reason, ctx);
        }
    }
}
