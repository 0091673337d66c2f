use actix::prelude::*;
use std::sync::Arc;

use crate::domain::collaborators::Collaborators;
use crate::domain::collaborators::upstream::{ClientUpstream, TreeUpstream, kary_descendants, kary_parent};
use crate::domain::resource::config::ResourceConfig;
use crate::domain::resource_module::client::ResourceClient;
use crate::domain::resource_module::{ResourceContext, ResourceModule};
use crate::domain::utils::clock::Clock;
use crate::domain::utils::id::Rank;

/// Starts one service per rank, wired into a `fanout`-ary tree rooted at
/// rank 0. `collaborators` is called once per rank; its `upstream` is
/// replaced by the rank's tree parent. Returns addresses in rank order.
pub fn start_tree(
    size: Rank,
    fanout: Rank,
    config: &ResourceConfig,
    clock: Arc<dyn Clock>,
    mut collaborators: impl FnMut(Rank) -> Collaborators,
) -> Vec<Addr<ResourceModule>> {
    let mut addrs: Vec<Addr<ResourceModule>> = Vec::with_capacity(size as usize);
    for rank in 0..size {
        let mut collab = collaborators(rank);
        collab.upstream = kary_parent(rank, fanout)
            .and_then(|parent| addrs.get(parent as usize))
            .map(|addr| Arc::new(ClientUpstream::new(ResourceClient::new(addr.clone()))) as Arc<dyn TreeUpstream>);

        let context = ResourceContext {
            rank,
            size,
            descendants: kary_descendants(rank, size, fanout),
            clock: clock.clone(),
            collaborators: collab,
        };
        addrs.push(ResourceModule::new(context, config.clone()).start());
    }
    log::debug!("started resource tree of {} ranks (fanout {})", size, fanout);
    addrs
}
