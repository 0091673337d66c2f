use actix::System;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use rescore::api::request_dto::Command;
use rescore::domain::collaborators::Collaborators;
use rescore::domain::collaborators::kvs::MemoryKvs;
use rescore::domain::collaborators::membership::StaticMembership;
use rescore::domain::collaborators::probe::StaticTopology;
use rescore::domain::resource::config::ResourceConfig;
use rescore::domain::resource_module::client::ResourceClient;
use rescore::domain::resource_module::message::Unload;
use rescore::domain::resource_module::tree::start_tree;
use rescore::domain::utils::clock::SystemClock;
use rescore::domain::utils::id::Rank;
use rescore::domain::utils::idset::Idset;
use rescore::logger;

/// Runs an in-process tree of resource services and prints the leader's
/// status once every rank is up.
#[derive(Parser, Debug)]
#[command(name = "rescored", version)]
struct Args {
    /// JSON file holding the `resource` configuration table.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of ranks.
    #[arg(short, long, default_value_t = 1)]
    size: Rank,

    /// Fanout of the reduction tree.
    #[arg(long, default_value_t = 2)]
    fanout: Rank,

    /// Hostnames are `<prefix><rank>`.
    #[arg(long, default_value = "node")]
    host_prefix: String,

    /// Cores reported by every rank's probe.
    #[arg(long, default_value_t = 4)]
    cores: u32,

    /// Drain these targets (idset or hostlist) before printing status.
    #[arg(long)]
    drain: Option<String>,

    /// Also write logs to `<dir>/rescore.log`.
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

#[actix_rt::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logger::init(args.log_dir.as_deref());

    let config = match &args.config {
        Some(path) => ResourceConfig::load(path)?,
        None => ResourceConfig::default(),
    };

    let kvs = MemoryKvs::new();
    let up = Idset::range(args.size);
    let addrs = start_tree(args.size, args.fanout, &config, Arc::new(SystemClock), |rank| Collaborators {
        kvs: Arc::new(kvs.clone()),
        membership: Arc::new(StaticMembership::new(up.clone())),
        probe: Arc::new(StaticTopology::describe(&format!("{}{}", args.host_prefix, rank), args.cores, 0)),
        upstream: None,
        parent: None,
        allocation: None,
    });
    let Some(leader) = addrs.first() else {
        anyhow::bail!("size must be at least 1");
    };
    let client = ResourceClient::new(leader.clone());

    client.rpc(Command::Get).await?;
    client.rpc(Command::MonitorWaitup { up: args.size as usize }).await?;
    if let Some(targets) = args.drain.clone() {
        client.rpc(Command::Drain { targets, reason: Some("drained from the command line".to_string()), mode: None }).await?;
    }
    client.rpc(Command::ReslogSync).await?;

    let status = client.rpc(Command::Status).await?;
    println!("{}", serde_json::to_string_pretty(&status)?);

    for addr in addrs.iter().rev() {
        addr.send(Unload).await?;
    }
    System::current().stop();
    Ok(())
}
