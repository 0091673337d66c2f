use actix::prelude::*;
use serde_json::{Value, json};
use std::str::FromStr;

use crate::api::config_dto::ResourceConfigDto;
use crate::api::request_dto::Command;
use crate::domain::resource::config::ResourceConfig;
use crate::domain::resource::drain::{DrainMode, UndrainMode};
use crate::domain::resource::eventlog::ResourceEvent;
use crate::domain::resource::request::RequestHandle;
use crate::domain::resource::reslog::JournalStep;
use crate::domain::resource::status::StatusView;
use crate::domain::resource_module::message::{JournalBacklog, RefreshAcquire, ResourceRequest, Unload};
use crate::domain::resource_module::{LeaderState, PostToken, ResourceModule};
use crate::domain::rset::ResourceSet;
use crate::domain::utils::id::ClientId;
use crate::domain::utils::idset::Idset;
use crate::error::{Error, Result};

fn reply(handle: RequestHandle, result: Result<Value>) {
    match result {
        Ok(value) => handle.respond(value),
        Err(e) => handle.respond_error(e),
    };
}

impl Handler<ResourceRequest> for ResourceModule {
    type Result = ();

    fn handle(&mut self, msg: ResourceRequest, ctx: &mut Self::Context) {
        let ResourceRequest { handle, command } = msg;
        log::debug!("[rank {}] {} from {}", self.context.rank, command.method(), handle.client());

        if !self.context.is_leader() && matches!(command, Command::Drain { .. } | Command::Undrain { .. }) {
            self.forward_upstream(handle, command, ctx);
            return;
        }

        match command {
            Command::Status => reply(handle, self.status()),
            Command::SchedStatus => self.sched_status(handle, ctx),
            command @ (Command::Drain { .. } | Command::Undrain { .. }) => {
                self.drain_requests.push_back((handle, command));
                self.next_drain_request(ctx);
            }
            Command::Acquire => self.acquire(handle),
            Command::AcquireCancel { matchtag } => {
                if self.acquire.cancel(handle.client(), matchtag) {
                    log::info!("[rank 0] acquire session canceled by {}", handle.client());
                }
            }
            Command::Journal => self.journal(handle, ctx),
            Command::JournalCancel { matchtag } => {
                if let Some(reslog) = self.reslog.as_mut() {
                    reslog.journal_cancel(handle.client(), matchtag);
                }
            }
            Command::ConfigReload { config } => {
                let result = self.config_reload(config, ctx).map(|()| json!({}));
                reply(handle, result);
            }
            Command::Disconnect => self.disconnect(handle.client()),
            Command::Get => match self.inventory.get() {
                // The leader answers after the milestone, once its subsystems exist.
                Ok(r) if !self.context.is_leader() || self.leader.is_some() => {
                    handle.respond(r.to_value());
                }
                _ => self.get_waiters.push(handle),
            },
            Command::MonitorWaitup { up } => match self.leader_state_mut() {
                Ok(leader) => leader.monitor.add_waiter(up, handle),
                Err(e) => {
                    handle.respond_error(e);
                }
            },
            Command::ReslogSync => {
                if self.reslog.is_none() {
                    handle.respond_error(self.leader_only("reslog-sync"));
                } else if let Some(reslog) = self.reslog.as_mut() {
                    reslog.add_sync_waiter(handle);
                }
            }
            Command::TopoReduce { count, resources } => {
                let result = ResourceSet::try_from(resources).and_then(|r| self.contribute_topology(count, r, ctx));
                reply(handle, result.map(|()| json!({})));
            }
        }
    }
}

impl Handler<RefreshAcquire> for ResourceModule {
    type Result = ();

    fn handle(&mut self, _msg: RefreshAcquire, _ctx: &mut Self::Context) {
        self.refresh_acquire();
    }
}

impl Handler<Unload> for ResourceModule {
    type Result = ();

    fn handle(&mut self, _msg: Unload, ctx: &mut Self::Context) {
        log::info!("[rank {}] unload requested", self.context.rank);
        ctx.stop();
    }
}

impl Handler<JournalBacklog> for ResourceModule {
    type Result = ();

    fn handle(&mut self, msg: JournalBacklog, ctx: &mut Self::Context) {
        let Some(reslog) = self.reslog.as_mut() else { return };
        if reslog.journal_step(msg.0) == JournalStep::More {
            ctx.notify(msg);
        }
    }
}

impl StreamHandler<Result<Idset>> for ResourceModule {
    fn handle(&mut self, item: Result<Idset>, ctx: &mut Self::Context) {
        match item {
            Ok(up) => self.on_membership(up, ctx),
            Err(e) => log::error!("[rank 0] membership update failed: {}", e),
        }
    }

    fn finished(&mut self, _ctx: &mut Self::Context) {
        log::warn!("[rank 0] membership feed ended, online set frozen");
    }
}

impl ResourceModule {
    fn leader_only(&self, method: &str) -> Error {
        Error::Protocol(format!("{} is only served on rank 0, not rank {}", method, self.context.rank))
    }

    fn leader_state(&self) -> Result<&LeaderState> {
        if !self.context.is_leader() {
            return Err(self.leader_only("request"));
        }
        self.leader.as_ref().ok_or_else(|| Error::NoData("resources are not yet defined".to_string()))
    }

    fn leader_state_mut(&mut self) -> Result<&mut LeaderState> {
        self.leader_state()?;
        self.leader.as_mut().ok_or_else(|| Error::NoData("resources are not yet defined".to_string()))
    }

    fn forward_upstream(&mut self, handle: RequestHandle, command: Command, ctx: &mut Context<Self>) {
        let Some(upstream) = self.context.collaborators.upstream.clone() else {
            handle.respond_error(self.leader_only(command.method()));
            return;
        };
        ctx.spawn(async move { upstream.forward(command).await }.into_actor(self).map(move |result, _act, _ctx| reply(handle, result)));
    }

    fn status(&self) -> Result<Value> {
        let leader = self.leader_state()?;
        let r = self.inventory.get()?;
        let view = StatusView { r, up: leader.monitor.up(), excluded: leader.exclude.set(), drain: &leader.drain };
        Ok(serde_json::to_value(view.status())?)
    }

    fn sched_status_value(&self, allocated: Option<&ResourceSet>) -> Result<Value> {
        let leader = self.leader_state()?;
        let r = self.inventory.get()?;
        let view = StatusView { r, up: leader.monitor.up(), excluded: leader.exclude.set(), drain: &leader.drain };
        Ok(serde_json::to_value(view.sched_status(allocated))?)
    }

    fn sched_status(&mut self, handle: RequestHandle, ctx: &mut Context<Self>) {
        if let Err(e) = self.leader_state() {
            handle.respond_error(e);
            return;
        }
        let Some(source) = self.context.collaborators.allocation.clone() else {
            reply(handle, self.sched_status_value(None));
            return;
        };
        // Recomputed when the allocation arrives, against the state at that time.
        ctx.spawn(async move { source.allocated().await }.into_actor(self).map(move |result, act, _ctx| {
            let result = result.and_then(|allocated| act.sched_status_value(allocated.as_ref()));
            reply(handle, result);
        }));
    }

    fn prepare_drain(&self, targets: &str, reason: Option<String>, mode: Option<&str>) -> Result<Option<ResourceEvent>> {
        let mode = mode.map(DrainMode::from_str).transpose()?.unwrap_or_default();
        let leader = self.leader_state()?;
        let r = self.inventory.get()?;
        let ranks = self.inventory.targets_to_ranks(targets)?;
        leader.drain.prepare_drain(&ranks, reason, mode, leader.exclude.set(), r)
    }

    fn prepare_undrain(&self, targets: &str, reason: Option<String>, mode: Option<&str>) -> Result<Option<ResourceEvent>> {
        let mode = mode.map(UndrainMode::from_str).transpose()?.unwrap_or_default();
        let leader = self.leader_state()?;
        let r = self.inventory.get()?;
        let ranks = self.inventory.targets_to_ranks(targets)?;
        leader.drain.prepare_undrain(&ranks, reason, mode, r)
    }

    /// Validates queued drain and undrain requests one at a time. A request
    /// that posts an event holds the queue until that event commits, so the
    /// next one is checked against the updated table.
    pub(super) fn next_drain_request(&mut self, ctx: &mut Context<Self>) {
        while !self.drain_in_flight {
            let Some((handle, command)) = self.drain_requests.pop_front() else { return };
            let prepared = match command {
                Command::Drain { targets, reason, mode } => self.prepare_drain(&targets, reason, mode.as_deref()),
                Command::Undrain { targets, mode, reason } => self.prepare_undrain(&targets, reason, mode.as_deref()),
                other => Err(Error::Protocol(format!("{} is not a drain request", other.method()))),
            };
            self.post_request(handle, prepared, ctx);
        }
    }

    /// Posts a validated request's event; the caller is answered once it
    /// is committed.
    fn post_request(&mut self, handle: RequestHandle, prepared: Result<Option<ResourceEvent>>, ctx: &mut Context<Self>) {
        match prepared {
            Ok(Some(event)) => {
                log::info!("[rank 0] {} requested by {}", event.name(), handle.client());
                self.drain_in_flight = true;
                self.post_event(event, Some(PostToken::DrainRequest(handle)), ctx);
            }
            Ok(None) => {
                handle.respond(json!({}));
            }
            Err(e) => {
                handle.respond_error(e);
            }
        }
    }

    fn acquire(&mut self, handle: RequestHandle) {
        if !self.context.is_leader() {
            handle.respond_error(self.leader_only("acquire"));
            return;
        }
        if self.acquire.request(handle) {
            self.start_acquire();
        }
    }

    fn journal(&mut self, handle: RequestHandle, ctx: &mut Context<Self>) {
        let rank = self.context.rank;
        let Some(reslog) = self.reslog.as_mut() else {
            handle.respond_error(Error::Protocol(format!("journal is only served on rank 0, not rank {}", rank)));
            return;
        };
        let key = reslog.journal_add(handle);
        ctx.notify(JournalBacklog(key));
    }

    fn config_reload(&mut self, dto: ResourceConfigDto, ctx: &mut Context<Self>) -> Result<()> {
        let config = ResourceConfig::from_dto(dto)?;
        if self.inventory.is_defined() && !self.config.same_source(&config) {
            return Err(Error::InvalidArgument("resource.path and resource.config cannot change once R is defined".to_string()));
        }
        let excluded = match self.leader {
            Some(_) => Some(self.resolve_exclude(config.exclude())?),
            None => None,
        };
        if config.journal_max() != self.config.journal_max() {
            log::warn!("[rank {}] resource.journalMax change takes effect on restart", self.context.rank);
        }

        log::info!("[rank {}] resource configuration reloaded", self.context.rank);
        self.config = config;
        if let Some(excluded) = excluded {
            self.update_exclude(excluded, ctx);
        }
        Ok(())
    }

    fn disconnect(&mut self, client: &ClientId) {
        self.acquire.disconnect(client);
        if let Some(reslog) = self.reslog.as_mut() {
            reslog.disconnect(client);
        }
        if let Some(leader) = self.leader.as_mut() {
            leader.monitor.disconnect(client);
        }
        self.get_waiters.retain(|handle| !handle.is_from(client, None));
        self.drain_requests.retain(|(handle, _)| !handle.is_from(client, None));
    }
}
