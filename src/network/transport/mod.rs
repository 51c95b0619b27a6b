// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Transport variants.
//!
//! A transport only knows how to open its socket and move envelopes over it.
//! The client and server pipelines drive any transport through these traits
//! and never look at which variant they hold.

use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use crate::message::Envelope;
use crate::{AppResult, Connection, Shutdown, TransportConfig};

pub use tcp::{TcpClientTransport, TcpServerTransport};
pub use udp::{UdpClientTransport, UdpServerTransport};

mod tcp;
mod udp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Udp,
    Tcp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Udp => write!(f, "UDP"),
            Protocol::Tcp => write!(f, "TCP"),
        }
    }
}

/// Everything a server-side reader needs.
///
/// Every clone holds the shutdown-complete sender; the server knows all readers
/// are gone once the matching receiver yields `None`.
#[derive(Debug, Clone)]
pub struct ReaderContext {
    inbound: async_channel::Sender<Envelope>,
    notify_shutdown: watch::Receiver<bool>,
    _shutdown_complete_tx: mpsc::Sender<()>,
    config: Arc<TransportConfig>,
}

impl ReaderContext {
    pub(crate) fn new(
        inbound: async_channel::Sender<Envelope>,
        notify_shutdown: watch::Receiver<bool>,
        shutdown_complete_tx: mpsc::Sender<()>,
        config: Arc<TransportConfig>,
    ) -> Self {
        ReaderContext {
            inbound,
            notify_shutdown,
            _shutdown_complete_tx: shutdown_complete_tx,
            config,
        }
    }

    pub fn shutdown(&self) -> Shutdown {
        Shutdown::new(self.notify_shutdown.clone())
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Pushes onto the inbound queue, waiting while it is full.
    ///
    /// Returns false if the queue is already closed.
    pub async fn dispatch(&self, envelope: impl Into<Envelope>) -> bool {
        self.inbound.send(envelope.into()).await.is_ok()
    }
}

/// Server half of a transport.
pub trait ServerTransport: Sized + Send + 'static {
    /// Label used in bootstrap and diagnostic events, e.g. `TCP Server`.
    const NAME: &'static str;

    fn bind(
        connection: &Connection,
        config: &TransportConfig,
    ) -> impl Future<Output = AppResult<Self>> + Send;

    fn local_addr(&self) -> AppResult<SocketAddr>;

    /// Runs the read loop(s), decoding envelopes into the context's queue until
    /// shutdown is requested. Every task spawned here must hold a clone of
    /// `context` until it stops pushing.
    fn serve(self, context: ReaderContext) -> impl Future<Output = ()> + Send;
}

/// Client half of a transport.
pub trait ClientTransport: Sized + Send + 'static {
    /// Label used in the bootstrap event, e.g. `UDP Client`.
    const NAME: &'static str;

    fn dial(
        local: &Connection,
        remote: &Connection,
        config: &TransportConfig,
    ) -> impl Future<Output = AppResult<Self>> + Send;

    fn local_addr(&self) -> AppResult<SocketAddr>;

    /// Writes one encoded envelope. An error ends the writer.
    fn send(&mut self, frame: &[u8]) -> impl Future<Output = AppResult<()>> + Send;

    fn flush(&mut self) -> impl Future<Output = AppResult<()>> + Send;

    fn close(self) -> impl Future<Output = AppResult<()>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_names() {
        assert_eq!(Protocol::Udp.to_string(), "UDP");
        assert_eq!(Protocol::Tcp.to_string(), "TCP");
    }
}
