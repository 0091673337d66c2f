use actix::prelude::Message;

use crate::api::request_dto::Command;
use crate::domain::resource::request::RequestHandle;
use crate::domain::resource::reslog::JournalKey;

/// A request plus the handle its response(s) go to.
#[derive(Message)]
#[rtype(result = "()")]
pub struct ResourceRequest {
    pub handle: RequestHandle,
    pub command: Command,
}

/// Recompute the acquire delta. Posted at most once per tick.
#[derive(Message)]
#[rtype(result = "()")]
pub struct RefreshAcquire;

/// Send the next backlog entry to a journal subscriber.
#[derive(Message)]
#[rtype(result = "()")]
pub struct JournalBacklog(pub JournalKey);

/// Stops the service. Open acquire sessions and `get` waiters are answered
/// with `Canceled`.
#[derive(Message)]
#[rtype(result = "()")]
pub struct Unload;
