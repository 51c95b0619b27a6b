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

use std::future::Future;
use std::net::SocketAddr;

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, error};

use crate::message::{CsvEnvelope, Envelope, Level, LogEnvelope};
use crate::network::{
    ClientTransport, Connection, EnvelopeCodec, Protocol, TcpClientTransport, UdpClientTransport,
};
use crate::{AppError, AppResult, TransportConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Unconnected,
    Connected,
    Disconnecting,
    Closed,
}

/// Producer side of the pipeline.
///
/// Emit operations only queue; one background writer encodes and writes in
/// queue order. A full queue suspends the emitting task.
#[derive(Debug)]
pub struct Client {
    name: &'static str,
    state: ClientState,
    local_addr: SocketAddr,
    outbound: async_channel::Sender<Envelope>,
    flushed_rx: Option<oneshot::Receiver<AppResult<u64>>>,
}

impl Client {
    pub async fn connect<T: ClientTransport>(
        local: &Connection,
        remote: &Connection,
        config: &TransportConfig,
    ) -> AppResult<Client> {
        let transport = T::dial(local, remote, config).await?;
        let local_addr = transport.local_addr()?;

        let (outbound, outbound_rx) = async_channel::bounded(config.queue_capacity.max(1));
        let (flushed_tx, flushed_rx) = oneshot::channel();
        let codec = EnvelopeCodec::new(config.max_envelope_size);
        tokio::spawn(async move {
            let result = write_loop(transport, outbound_rx, codec).await;
            let _ = flushed_tx.send(result);
        });

        let client = Client {
            name: T::NAME,
            state: ClientState::Connected,
            local_addr,
            outbound,
            flushed_rx: Some(flushed_rx),
        };
        let bootstrap =
            LogEnvelope::here(Level::Success, format!("Built {} at {}", T::NAME, local_addr));
        client.send(bootstrap.into()).await?;
        debug!("{} connected from {} to {}", T::NAME, local_addr, remote);
        Ok(client)
    }

    /// Like `connect`, with the transport chosen at runtime.
    pub async fn connect_with(
        protocol: Protocol,
        local: &Connection,
        remote: &Connection,
        config: &TransportConfig,
    ) -> AppResult<Client> {
        match protocol {
            Protocol::Udp => Self::connect::<UdpClientTransport>(local, remote, config).await,
            Protocol::Tcp => Self::connect::<TcpClientTransport>(local, remote, config).await,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    /// Queues one envelope, waiting while the queue is full.
    pub async fn send(&self, envelope: Envelope) -> AppResult<()> {
        if self.state != ClientState::Connected {
            return Err(AppError::IllegalState(format!(
                "{} is {:?}",
                self.name, self.state
            )));
        }
        self.outbound.send(envelope).await.map_err(|_| {
            AppError::IllegalState(format!("{} writer has stopped", self.name))
        })
    }

    #[track_caller]
    fn emit(&self, level: Level, text: String) -> impl Future<Output = AppResult<()>> + '_ {
        let envelope = LogEnvelope::here(level, text);
        self.send(envelope.into())
    }

    #[track_caller]
    pub fn log(&self, text: impl Into<String>) -> impl Future<Output = AppResult<()>> + '_ {
        self.emit(Level::Log, text.into())
    }

    #[track_caller]
    pub fn warn(&self, text: impl Into<String>) -> impl Future<Output = AppResult<()>> + '_ {
        self.emit(Level::Warn, text.into())
    }

    #[track_caller]
    pub fn debug(&self, text: impl Into<String>) -> impl Future<Output = AppResult<()>> + '_ {
        self.emit(Level::Debug, text.into())
    }

    #[track_caller]
    pub fn error(&self, text: impl Into<String>) -> impl Future<Output = AppResult<()>> + '_ {
        self.emit(Level::Error, text.into())
    }

    #[track_caller]
    pub fn success(&self, text: impl Into<String>) -> impl Future<Output = AppResult<()>> + '_ {
        self.emit(Level::Success, text.into())
    }

    /// Raw text with no caller attached.
    pub async fn print(&self, text: impl Into<String>) -> AppResult<()> {
        self.send(LogEnvelope::new(Level::Log, "", text).into())
            .await
    }

    /// Starts a logical CSV file with a header row.
    #[track_caller]
    pub fn new_file<I>(
        &self,
        filename: impl Into<String>,
        headers: I,
    ) -> impl Future<Output = AppResult<()>> + '_
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        self.append_row(filename, headers)
    }

    #[track_caller]
    pub fn append_row<I>(
        &self,
        filename: impl Into<String>,
        row: I,
    ) -> impl Future<Output = AppResult<()>> + '_
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        let envelope = CsvEnvelope::new(filename, row.into_iter().map(Into::into).collect());
        self.send(envelope.into())
    }

    /// Makes sure the logical file exists without writing a row.
    #[track_caller]
    pub fn touch(&self, filename: impl Into<String>) -> impl Future<Output = AppResult<()>> + '_ {
        let envelope = CsvEnvelope::new(filename, Vec::new());
        self.send(envelope.into())
    }

    /// Closes the queue and waits until the writer has written every queued
    /// envelope and closed the socket. Calling it again is a no-op.
    pub async fn disconnect(&mut self) -> AppResult<()> {
        if self.state == ClientState::Closed {
            return Ok(());
        }
        self.state = ClientState::Disconnecting;
        self.outbound.close();

        let flushed = match self.flushed_rx.take() {
            Some(flushed_rx) => flushed_rx.await.unwrap_or_else(|_| {
                Err(AppError::IllegalState(format!(
                    "{} writer ended without reporting",
                    self.name
                )))
            }),
            None => Ok(0),
        };
        self.state = ClientState::Closed;
        let written = flushed?;
        debug!("{} at {} flushed {} envelopes", self.name, self.local_addr, written);
        Ok(())
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if self.state == ClientState::Connected {
            // the writer still drains what is queued if the runtime lives on
            self.outbound.close();
        }
        debug!("{} at {} dropped", self.name, self.local_addr);
    }
}

async fn drain<T: ClientTransport>(
    transport: &mut T,
    outbound: &async_channel::Receiver<Envelope>,
    codec: &EnvelopeCodec,
) -> AppResult<u64> {
    let mut written = 0u64;
    while let Ok(envelope) = outbound.recv().await {
        let frame = match codec.encode_to_vec(&envelope) {
            Ok(frame) => frame,
            Err(e) => {
                error!("{} could not encode {:?}: {}", T::NAME, envelope.kind(), e);
                continue;
            }
        };
        transport.send(&frame).await?;
        written += 1;
        if outbound.is_empty() {
            transport.flush().await?;
        }
    }
    Ok(written)
}

async fn write_loop<T: ClientTransport>(
    mut transport: T,
    outbound: async_channel::Receiver<Envelope>,
    codec: EnvelopeCodec,
) -> AppResult<u64> {
    match drain(&mut transport, &outbound, &codec).await {
        Ok(written) => {
            transport.close().await?;
            Ok(written)
        }
        Err(e) => {
            outbound.close();
            error!(
                "{} writer stopped, discarding {} queued envelopes: {}",
                T::NAME,
                outbound.len(),
                e
            );
            Err(e)
        }
    }
}
