use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

use crate::domain::utils::id::ClientId;
use crate::error::{Error, Result};

/// One response on a request's reply channel.
pub type Response = Result<serde_json::Value>;

/// The original request of a caller: who sent it, its matchtag and the
/// channel its response(s) go to. Streaming requests keep the handle and
/// respond many times; the caller going away closes the channel.
#[derive(Debug)]
pub struct RequestHandle {
    client: ClientId,
    matchtag: u32,
    tx: UnboundedSender<Response>,
}

impl RequestHandle {
    pub fn new(client: ClientId, matchtag: u32, tx: UnboundedSender<Response>) -> Self {
        Self { client, matchtag, tx }
    }

    /// Handle plus the receiving end, for in-process callers and tests.
    pub fn channel(client: ClientId, matchtag: u32) -> (Self, UnboundedReceiver<Response>) {
        let (tx, rx) = unbounded_channel();
        (Self::new(client, matchtag, tx), rx)
    }

    pub fn client(&self) -> &ClientId {
        &self.client
    }

    pub fn matchtag(&self) -> u32 {
        self.matchtag
    }

    /// True if the handle belongs to `client` (and `matchtag`, if given).
    pub fn is_from(&self, client: &ClientId, matchtag: Option<u32>) -> bool {
        self.client == *client && matchtag.is_none_or(|tag| tag == self.matchtag)
    }

    pub fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Returns false if the requester is gone.
    pub fn respond(&self, value: serde_json::Value) -> bool {
        self.tx.send(Ok(value)).is_ok()
    }

    pub fn respond_error(&self, err: Error) -> bool {
        log::debug!("responding to {} matchtag {} with error: {}", self.client, self.matchtag, err);
        self.tx.send(Err(err)).is_ok()
    }
}
