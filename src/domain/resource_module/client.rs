use actix::prelude::Addr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::api::request_dto::Command;
use crate::domain::resource::request::{RequestHandle, Response};
use crate::domain::resource_module::ResourceModule;
use crate::domain::resource_module::message::ResourceRequest;
use crate::domain::utils::id::ClientId;
use crate::error::{Error, Result};

/// Responses to one streaming request.
#[derive(Debug)]
pub struct ResponseStream {
    matchtag: u32,
    rx: UnboundedReceiver<Response>,
}

impl ResponseStream {
    pub fn matchtag(&self) -> u32 {
        self.matchtag
    }

    /// Next response, `None` once the service dropped the request.
    pub async fn next(&mut self) -> Option<Response> {
        self.rx.recv().await
    }

    /// Next response without waiting.
    pub fn try_next(&mut self) -> Option<Response> {
        self.rx.try_recv().ok()
    }
}

/// A caller of one rank's resource service. Every request carries this
/// client's id and a fresh matchtag.
#[derive(Debug, Clone)]
pub struct ResourceClient {
    id: ClientId,
    addr: Addr<ResourceModule>,
    next_matchtag: Arc<AtomicU32>,
}

impl ResourceClient {
    pub fn new(addr: Addr<ResourceModule>) -> Self {
        Self { id: ClientId::generate(), addr, next_matchtag: Arc::new(AtomicU32::new(1)) }
    }

    pub fn id(&self) -> &ClientId {
        &self.id
    }

    fn send(&self, command: Command) -> Result<ResponseStream> {
        let matchtag = self.next_matchtag.fetch_add(1, Ordering::Relaxed);
        let (handle, rx) = RequestHandle::channel(self.id.clone(), matchtag);
        if !self.addr.connected() {
            return Err(Error::RemoteIo(format!("{}: resource service is gone", command.method())));
        }
        self.addr.do_send(ResourceRequest { handle, command });
        Ok(ResponseStream { matchtag, rx })
    }

    /// Sends a request and waits for its single response.
    pub async fn rpc(&self, command: Command) -> Response {
        let method = command.method();
        let mut stream = self.send(command)?;
        match stream.next().await {
            Some(response) => response,
            None => Err(Error::RemoteIo(format!("{}: no response", method))),
        }
    }

    /// Sends a streaming request.
    pub fn stream(&self, command: Command) -> Result<ResponseStream> {
        self.send(command)
    }

    /// Sends a request that has no response.
    pub fn notify(&self, command: Command) -> Result<()> {
        self.send(command).map(|_| ())
    }

    /// Releases everything this client holds on the service.
    pub fn disconnect(&self) -> Result<()> {
        self.notify(Command::Disconnect)
    }
}
