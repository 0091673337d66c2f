#![allow(dead_code)]

use serde_json::{Value, json};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use actix::prelude::*;
use rescore::api::request_dto::Command;
use rescore::domain::collaborators::Collaborators;
use rescore::domain::collaborators::allocation::StaticAllocation;
use rescore::domain::collaborators::kvs::MemoryKvs;
use rescore::domain::collaborators::membership::{ChannelMembership, MembershipPublisher, StaticMembership};
use rescore::domain::collaborators::probe::StaticTopology;
use rescore::domain::resource::config::ResourceConfig;
use rescore::domain::resource::request::Response;
use rescore::domain::resource_module::client::ResourceClient;
use rescore::domain::resource_module::{ResourceContext, ResourceModule};
use rescore::domain::utils::clock::MockClock;
use rescore::domain::utils::id::Rank;
use rescore::domain::utils::idset::Idset;

pub const START_TIME: f64 = 1000.0;

pub fn ids(s: &str) -> Idset {
    Idset::from_str(s).unwrap()
}

pub fn config(value: Value) -> ResourceConfig {
    ResourceConfig::from_dto(serde_json::from_value(value).unwrap()).unwrap()
}

/// `node[0-3]` with four cores each, plus whatever `extra` sets.
pub fn four_nodes_json(extra: Value) -> Value {
    let mut value = json!({"config": [{"hosts": "node[0-3]", "cores": "0-3"}]});
    if let (Some(base), Value::Object(extra)) = (value.as_object_mut(), extra) {
        base.extend(extra);
    }
    value
}

pub fn four_nodes(extra: Value) -> ResourceConfig {
    config(four_nodes_json(extra))
}

pub struct Leader {
    pub addr: Addr<ResourceModule>,
    pub client: ResourceClient,
    pub kvs: MemoryKvs,
    pub members: MembershipPublisher,
    pub clock: MockClock,
    pub allocation: StaticAllocation,
}

/// Starts rank 0 without waiting for R.
pub fn spawn_leader(size: Rank, descendants: usize, config: ResourceConfig, kvs: MemoryKvs, cores: u32) -> Leader {
    let clock = MockClock::new(START_TIME);
    let (membership, members) = ChannelMembership::new();
    let allocation = StaticAllocation::default();
    let context = ResourceContext {
        rank: 0,
        size,
        descendants,
        clock: Arc::new(clock.clone()),
        collaborators: Collaborators {
            kvs: Arc::new(kvs.clone()),
            membership: Arc::new(membership),
            probe: Arc::new(StaticTopology::describe("node0", cores, 0)),
            upstream: None,
            parent: None,
            allocation: Some(Arc::new(allocation.clone())),
        },
    };
    let addr = ResourceModule::new(context, config).start();
    let client = ResourceClient::new(addr.clone());
    Leader { addr, client, kvs, members, clock, allocation }
}

/// Starts rank 0 and waits until R is defined.
pub async fn start_leader(size: Rank, config: ResourceConfig, kvs: MemoryKvs) -> Leader {
    let leader = spawn_leader(size, 0, config, kvs, 4);
    leader.client.rpc(Command::Get).await.unwrap();
    leader
}

impl Leader {
    pub async fn all_up(&self, size: Rank) {
        self.members.publish(Idset::range(size));
        self.client.rpc(Command::MonitorWaitup { up: size as usize }).await.unwrap();
    }

    pub async fn status(&self) -> Value {
        self.client.rpc(Command::ReslogSync).await.unwrap();
        self.client.rpc(Command::Status).await.unwrap()
    }

    pub async fn drain(&self, targets: &str, reason: &str, mode: Option<&str>) -> Response {
        let command = Command::Drain { targets: targets.to_string(), reason: Some(reason.to_string()), mode: mode.map(str::to_string) };
        self.client.rpc(command).await
    }

    pub async fn undrain(&self, targets: &str, mode: Option<&str>) -> Response {
        let command = Command::Undrain { targets: targets.to_string(), mode: mode.map(str::to_string), reason: None };
        self.client.rpc(command).await
    }
}

/// Collaborators for a rank of an in-process tree; every rank reports
/// `node<rank>` with `cores` cores.
pub fn tree_collaborators(rank: Rank, kvs: &MemoryKvs, size: Rank, cores: u32) -> Collaborators {
    Collaborators {
        kvs: Arc::new(kvs.clone()),
        membership: Arc::new(StaticMembership::new(Idset::range(size))),
        probe: Arc::new(StaticTopology::describe(&format!("node{}", rank), cores, 0)),
        upstream: None,
        parent: None,
        allocation: None,
    }
}

/// Polls status until `pred` holds.
pub async fn eventually(client: &ResourceClient, pred: impl Fn(&Value) -> bool) -> Value {
    for _ in 0..200 {
        if let Ok(status) = client.rpc(Command::Status).await {
            if pred(&status) {
                return status;
            }
        }
        actix_rt::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

/// Journal backlog once every posted event has completed.
pub async fn journal_backlog(client: &ResourceClient) -> Vec<Value> {
    client.rpc(Command::ReslogSync).await.unwrap();
    let mut stream = client.stream(Command::Journal).unwrap();
    let mut entries = Vec::new();
    while let Some(response) = stream.next().await {
        let events = response.unwrap()["events"].as_array().cloned().unwrap_or_default();
        if events.is_empty() {
            break;
        }
        entries.extend(events);
    }
    client.notify(Command::JournalCancel { matchtag: Some(stream.matchtag()) }).unwrap();
    entries
}

pub fn names(entries: &[Value]) -> Vec<String> {
    entries.iter().filter_map(|e| e["name"].as_str().map(str::to_string)).collect()
}
