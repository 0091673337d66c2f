//! Driving the eventlog and reacting to completed entries.

use actix::prelude::*;
use serde_json::json;

use crate::domain::collaborators::kvs::KvsTxn;
use crate::domain::resource::drain::Drain;
use crate::domain::resource::eventlog::{EVENTLOG_KEY, EventlogEntry, ResourceEvent};
use crate::domain::resource::exclude::Exclude;
use crate::domain::resource::monitor::Monitor;
use crate::domain::resource::reslog::{Completed, Progress};
use crate::domain::resource_module::message::RefreshAcquire;
use crate::domain::resource_module::{LeaderState, PostToken, ResourceModule, Watcher};
use crate::domain::utils::idset::Idset;
use crate::error::{Error, Result};

impl ResourceModule {
    /// Appends `event` to the eventlog. Events posted while completions
    /// are being dispatched wait until the dispatch is over, so entries
    /// always complete in the order they were posted.
    pub(super) fn post_event(&mut self, event: ResourceEvent, token: Option<PostToken>, ctx: &mut Context<Self>) {
        self.outbox.push_back((event, token));
        if !self.driving {
            self.flush_outbox(ctx);
        }
    }

    fn flush_outbox(&mut self, ctx: &mut Context<Self>) {
        while let Some((event, token)) = self.outbox.pop_front() {
            let timestamp = self.context.clock.now();
            let Some(reslog) = self.reslog.as_mut() else {
                log::error!("[rank {}] dropping {} event: no eventlog on this rank", self.context.rank, event.name());
                if let Some(token) = token {
                    self.settle(token, Err(Error::Protocol("no eventlog on this rank".to_string())), ctx);
                }
                continue;
            };
            let progress = reslog.post(event.to_entry(timestamp), event.is_live_only(), token);
            self.drive_reslog(progress, ctx);
        }
    }

    fn drive_reslog(&mut self, progress: Progress<PostToken>, ctx: &mut Context<Self>) {
        let was_driving = std::mem::replace(&mut self.driving, true);
        for completed in progress.completed {
            self.on_entry_completed(completed, ctx);
        }
        if let Some(entry) = progress.commit {
            self.start_commit(entry, ctx);
        }
        self.driving = was_driving;

        if !was_driving {
            self.flush_outbox(ctx);
        }
        if let Some(reslog) = self.reslog.as_mut() {
            reslog.release_sync_waiters();
        }
    }

    fn start_commit(&mut self, entry: EventlogEntry, ctx: &mut Context<Self>) {
        let kvs = self.context.collaborators.kvs.clone();
        let txn = KvsTxn::new().append(EVENTLOG_KEY, entry.encode());
        ctx.spawn(async move { kvs.commit(txn).await }.into_actor(self).map(|result, act, ctx| {
            let Some(reslog) = act.reslog.as_mut() else { return };
            let progress = reslog.commit_finished(result);
            act.drive_reslog(progress, ctx);
        }));
    }

    fn on_entry_completed(&mut self, completed: Completed<PostToken>, ctx: &mut Context<Self>) {
        let Completed { entry, result, token } = completed;
        if let Err(e) = result {
            if let Some(token) = token {
                self.settle(token, Err(e), ctx);
            }
            return;
        }

        let event = ResourceEvent::from_entry(&entry).unwrap_or_else(|e| {
            log::error!("[rank 0] {}", e);
            None
        });
        let watchers = self.reslog.as_ref().map(|reslog| reslog.watchers_for(&entry.name)).unwrap_or_default();
        for watcher in watchers {
            self.dispatch(watcher, event.as_ref(), &entry, ctx);
        }
        if let Some(reslog) = self.reslog.as_mut() {
            reslog.journal_fan_out(&entry);
        }
        if let Some(token) = token {
            self.settle(token, Ok(()), ctx);
        }
    }

    fn dispatch(&mut self, watcher: Watcher, event: Option<&ResourceEvent>, entry: &EventlogEntry, ctx: &mut Context<Self>) {
        match watcher {
            Watcher::Milestone => self.on_resource_defined(ctx),
            Watcher::DrainTable => {
                if let (Some(leader), Some(event)) = (self.leader.as_mut(), event) {
                    leader.drain.apply(event, entry.timestamp);
                }
            }
            Watcher::MonitorWaiters => {
                if let Some(leader) = self.leader.as_mut() {
                    leader.monitor.release_waiters();
                }
            }
            Watcher::Acquire => self.schedule_acquire_refresh(ctx),
        }
    }

    fn settle(&mut self, token: PostToken, result: Result<()>, ctx: &mut Context<Self>) {
        let rank = self.context.rank;
        match (token, result) {
            (PostToken::DrainRequest(handle), result) => {
                match result {
                    Ok(()) => handle.respond(json!({})),
                    Err(e) => handle.respond_error(e),
                };
                self.drain_in_flight = false;
                self.next_drain_request(ctx);
            }
            (PostToken::SelfDrain, Ok(())) => log::info!("[rank {}] drained self", rank),
            (PostToken::SelfDrain, Err(e)) => log::error!("[rank {}] unable to drain self: {}", rank, e),
        }
    }

    //-------------------------
    // --- Milestone
    //-------------------------

    pub(super) fn on_resource_defined(&mut self, ctx: &mut Context<Self>) {
        if self.context.is_leader() && self.leader.is_none() {
            if let Err(e) = self.create_leader_state(ctx) {
                log::error!("[rank 0] fatal: {}", e);
                ctx.stop();
                return;
            }
        }
        if let Ok(r) = self.inventory.get() {
            let value = r.to_value();
            for handle in self.get_waiters.drain(..) {
                handle.respond(value.clone());
            }
        }
        self.start_acquire();
    }

    fn create_leader_state(&mut self, ctx: &mut Context<Self>) -> Result<()> {
        let size = self.context.size;
        let drain = Drain::replay(size, &self.replay_log)?;
        self.replay_log = Vec::new();

        let excluded = self.resolve_exclude(self.config.exclude()).unwrap_or_else(|e| {
            log::error!("[rank 0] ignoring invalid exclude: {}", e);
            Idset::new()
        });
        let mut exclude = Exclude::new();
        let mut events = exclude.update(excluded);

        let force_up = self.config.monitor_force_up();
        let mut monitor = Monitor::new(size, false);
        if force_up {
            events.extend(monitor.update(Idset::range(size)));
        }

        log::info!("[rank 0] drained at startup: {}", drain.drained());
        self.leader = Some(LeaderState { monitor, exclude, drain });
        for event in events {
            self.post_event(event, None, ctx);
        }
        self.reconcile_drain(ctx);
        self.take_pending_self_drain(ctx);

        if !force_up {
            ctx.add_stream(self.context.collaborators.membership.subscribe());
        }
        Ok(())
    }

    /// Resolves an exclude expression against R. An absent or blank expression
    /// excludes nothing.
    pub(super) fn resolve_exclude(&self, expr: Option<&str>) -> Result<Idset> {
        match expr {
            Some(expr) if !expr.trim().is_empty() => self.inventory.targets_to_ranks(expr),
            _ => Ok(Idset::new()),
        }
    }

    pub(super) fn update_exclude(&mut self, excluded: Idset, ctx: &mut Context<Self>) {
        let Some(leader) = self.leader.as_mut() else { return };
        for event in leader.exclude.update(excluded) {
            self.post_event(event, None, ctx);
        }
        self.reconcile_drain(ctx);
    }

    /// Undrains ranks that are excluded.
    fn reconcile_drain(&mut self, ctx: &mut Context<Self>) {
        let event = match (self.leader.as_ref(), self.inventory.get()) {
            (Some(leader), Ok(r)) => leader.drain.reconcile_excluded(leader.exclude.set(), r),
            _ => None,
        };
        if let Some(event) = event {
            self.post_event(event, None, ctx);
        }
    }

    pub(super) fn on_membership(&mut self, up: Idset, ctx: &mut Context<Self>) {
        let Some(leader) = self.leader.as_mut() else { return };
        for event in leader.monitor.update(up) {
            self.post_event(event, None, ctx);
        }
    }

    //-------------------------
    // --- Acquire
    //-------------------------

    /// Ranks a scheduler may use: online, not excluded, not drained.
    pub(super) fn available(&self) -> Option<Idset> {
        let leader = self.leader.as_ref()?;
        let r = self.inventory.get().ok()?;
        let valid = r.ranks().difference(leader.exclude.set());
        Some(leader.monitor.up().intersect(&valid).difference(&leader.drain.drained()))
    }

    pub(super) fn start_acquire(&mut self) {
        if !self.acquire.is_parked() {
            return;
        }
        let (Some(up), Some(leader), Ok(r)) = (self.available(), self.leader.as_ref(), self.inventory.get()) else {
            return;
        };
        self.acquire.start(r, leader.exclude.set(), &up);
    }

    fn schedule_acquire_refresh(&mut self, ctx: &mut Context<Self>) {
        if !self.acquire_refresh_pending {
            self.acquire_refresh_pending = true;
            ctx.notify(RefreshAcquire);
        }
    }

    pub(super) fn refresh_acquire(&mut self) {
        self.acquire_refresh_pending = false;
        if let Some(up) = self.available() {
            self.acquire.refresh(&up);
        }
    }
}
