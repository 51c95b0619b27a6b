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

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info};

use crate::message::{Envelope, Level, LogEnvelope};
use crate::network::{
    Connection, Protocol, ReaderContext, ServerTransport, TcpServerTransport, UdpServerTransport,
};
use crate::sink::Sink;
use crate::{AppError, AppResult, TransportConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Unbound,
    Listening,
    ShuttingDown,
    Closed,
}

/// A bound socket whose readers feed one sink.
///
/// Readers push decoded envelopes onto a bounded inbound queue that a single
/// sink task drains. `shutdown` returns once everything read before the call
/// has reached the sink.
#[derive(Debug)]
pub struct Server {
    name: &'static str,
    state: ServerState,
    local_addr: SocketAddr,
    inbound_tx: async_channel::Sender<Envelope>,
    notify_shutdown: watch::Sender<bool>,
    shutdown_complete_rx: mpsc::Receiver<()>,
    flushed_rx: Option<oneshot::Receiver<()>>,
}

impl Server {
    pub async fn bind<T, S>(
        connection: &Connection,
        sink: S,
        config: &TransportConfig,
    ) -> AppResult<Server>
    where
        T: ServerTransport,
        S: Sink,
    {
        let transport = T::bind(connection, config).await?;
        let local_addr = transport.local_addr()?;

        let (inbound_tx, inbound_rx) = async_channel::bounded(config.queue_capacity.max(1));
        let (notify_shutdown, _) = watch::channel(false);
        let (shutdown_complete_tx, shutdown_complete_rx) = mpsc::channel(1);
        let (flushed_tx, flushed_rx) = oneshot::channel();

        tokio::spawn(async move {
            sink.consume(inbound_rx).await;
            let _ = flushed_tx.send(());
        });

        let bootstrap =
            LogEnvelope::here(Level::Success, format!("{} listening at {}", T::NAME, local_addr));
        inbound_tx
            .send(bootstrap.into())
            .await
            .map_err(|e| AppError::ChannelSendError(e.to_string()))?;

        // the context owns the only completion sender
        let context = ReaderContext::new(
            inbound_tx.clone(),
            notify_shutdown.subscribe(),
            shutdown_complete_tx,
            Arc::new(config.clone()),
        );
        tokio::spawn(transport.serve(context));
        info!("{} listening at {}", T::NAME, local_addr);

        Ok(Server {
            name: T::NAME,
            state: ServerState::Listening,
            local_addr,
            inbound_tx,
            notify_shutdown,
            shutdown_complete_rx,
            flushed_rx: Some(flushed_rx),
        })
    }

    /// Like `bind`, with the transport chosen at runtime.
    pub async fn bind_with<S: Sink>(
        protocol: Protocol,
        connection: &Connection,
        sink: S,
        config: &TransportConfig,
    ) -> AppResult<Server> {
        match protocol {
            Protocol::Udp => Self::bind::<UdpServerTransport, S>(connection, sink, config).await,
            Protocol::Tcp => Self::bind::<TcpServerTransport, S>(connection, sink, config).await,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    /// Stops the readers and waits until the sink has flushed every envelope
    /// they queued. Calling it again is a no-op.
    ///
    /// Order matters here: readers are told to stop and drain, the inbound
    /// queue is closed only once the last of them is gone, then the sink task
    /// drains the queue and signals.
    pub async fn shutdown(&mut self) -> AppResult<()> {
        if self.state == ServerState::Closed {
            return Ok(());
        }
        self.state = ServerState::ShuttingDown;
        debug!("{} at {} shutting down", self.name, self.local_addr);

        self.notify_shutdown.send_replace(true);
        // resolves once every reader has dropped its completion sender
        let _ = self.shutdown_complete_rx.recv().await;
        self.inbound_tx.close();

        let flushed = match self.flushed_rx.take() {
            Some(flushed_rx) => flushed_rx.await.map_err(|_| {
                AppError::IllegalState(format!("{} sink task ended before flushing", self.name))
            }),
            None => Ok(()),
        };
        self.state = ServerState::Closed;
        flushed?;
        info!("{} at {} closed", self.name, self.local_addr);
        Ok(())
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if self.state != ServerState::Closed {
            // readers still stop, but nobody waits for the sink
            self.notify_shutdown.send_replace(true);
            self.inbound_tx.close();
        }
        debug!("{} at {} dropped", self.name, self.local_addr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct MemorySink {
        seen: Arc<Mutex<Vec<Envelope>>>,
    }

    impl Sink for MemorySink {
        fn name(&self) -> &'static str {
            "memory sink"
        }

        async fn write(&mut self, envelope: Envelope) -> AppResult<()> {
            self.seen.lock().unwrap().push(envelope);
            Ok(())
        }

        async fn close(&mut self) -> AppResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_bootstrap_then_closed() -> AppResult<()> {
        let sink = MemorySink::default();
        let mut server = Server::bind::<UdpServerTransport, _>(
            &Connection::localhost(0),
            sink.clone(),
            &TransportConfig::default(),
        )
        .await?;
        assert_eq!(server.state(), ServerState::Listening);
        assert_ne!(server.local_addr().port(), 0);

        server.shutdown().await?;
        assert_eq!(server.state(), ServerState::Closed);
        server.shutdown().await?;

        let seen = sink.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        match &seen[0] {
            Envelope::Log(log) => {
                assert_eq!(log.level, Level::Success);
                assert_eq!(
                    log.text,
                    format!("UDP Server listening at {}", server.local_addr())
                );
                assert!(log.caller.starts_with("server.rs:"));
            }
            other => panic!("unexpected {:?}", other),
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_bind_with_tcp() -> AppResult<()> {
        let sink = MemorySink::default();
        let mut server = Server::bind_with(
            Protocol::Tcp,
            &Connection::localhost(0),
            sink.clone(),
            &TransportConfig::default(),
        )
        .await?;
        assert_eq!(server.name(), "TCP Server");
        server.shutdown().await?;
        assert_eq!(sink.seen.lock().unwrap().len(), 1);
        Ok(())
    }
}
