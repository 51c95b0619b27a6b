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

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::time::{self, Instant};
use tracing::{debug, error};

use crate::message::{Level, LogEnvelope};
use crate::network::{EnvelopeCodec, EnvelopeReader};
use crate::{AppError, AppResult, Connection, TransportConfig};

use super::{ClientTransport, ReaderContext, ServerTransport};

const ACCEPT_BACKOFF_START: Duration = Duration::from_millis(10);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Listening socket plus an accept loop that hands every peer its own reader.
#[derive(Debug)]
pub struct TcpServerTransport {
    listener: TcpListener,
}

impl ServerTransport for TcpServerTransport {
    const NAME: &'static str = "TCP Server";

    async fn bind(connection: &Connection, _config: &TransportConfig) -> AppResult<Self> {
        let addr = connection.resolve().await?;
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            AppError::Bind(format!("could not create {} at {}: {}", Self::NAME, connection, e))
        })?;
        Ok(TcpServerTransport { listener })
    }

    fn local_addr(&self) -> AppResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    async fn serve(self, context: ReaderContext) {
        let mut shutdown = context.shutdown();
        let mut backoff = ACCEPT_BACKOFF_START;

        loop {
            let accepted = tokio::select! {
                biased;
                _ = shutdown.recv() => None,
                res = self.listener.accept() => Some(res),
            };
            let Some(accepted) = accepted else {
                break;
            };

            match accepted {
                Ok((stream, peer)) => {
                    backoff = ACCEPT_BACKOFF_START;
                    debug!("accepted connection from {}", peer);
                    Self::spawn_handler(stream, peer, &context);
                }
                // one failed accept does not take the listener down
                Err(e) => {
                    report_accept_error(&context, &e).await;
                    tokio::select! {
                        _ = shutdown.recv() => break,
                        _ = time::sleep(backoff) => {}
                    }
                    backoff = (backoff * 2).min(ACCEPT_BACKOFF_MAX);
                }
            }
        }

        let late = self.drain_backlog(&context).await;
        debug!("tcp accept loop exited, {} peers accepted after shutdown", late);
    }
}

impl TcpServerTransport {
    /// Peers still in the accept backlog may already have written envelopes.
    /// Their handlers see shutdown right away and only drain.
    async fn drain_backlog(&self, context: &ReaderContext) -> usize {
        let grace = context.config().drain_grace();
        let deadline = Instant::now() + context.config().drain_limit();
        let mut late = 0;
        loop {
            let quiet_at = (Instant::now() + grace).min(deadline);
            match time::timeout_at(quiet_at, self.listener.accept()).await {
                Ok(Ok((stream, peer))) => {
                    late += 1;
                    Self::spawn_handler(stream, peer, context);
                    if Instant::now() >= deadline {
                        break;
                    }
                }
                Ok(Err(e)) => {
                    debug!("stop draining accept backlog: {}", e);
                    break;
                }
                Err(_) => break,
            }
        }
        late
    }

    /// The handler holds a context clone, so shutdown waits for it.
    fn spawn_handler(stream: TcpStream, peer: SocketAddr, context: &ReaderContext) {
        let handler = ConnectionHandler::new(stream, peer, context.clone());
        tokio::spawn(handler.run());
    }
}

/// Accept failures reach the sink as well as the diagnostics log.
async fn report_accept_error(context: &ReaderContext, e: &io::Error) {
    error!("Error accepting: {}", e);
    context
        .dispatch(LogEnvelope::here(
            Level::Error,
            format!("Error accepting: {}", e),
        ))
        .await;
}

/// Reader for one accepted peer.
struct ConnectionHandler {
    reader: EnvelopeReader<TcpStream>,
    peer: SocketAddr,
    context: ReaderContext,
}

impl ConnectionHandler {
    fn new(stream: TcpStream, peer: SocketAddr, context: ReaderContext) -> Self {
        let config = context.config();
        let reader = EnvelopeReader::new(
            stream,
            config.read_buffer_size,
            EnvelopeCodec::new(config.max_envelope_size),
        );
        ConnectionHandler {
            reader,
            peer,
            context,
        }
    }

    async fn run(mut self) {
        let mut shutdown = self.context.shutdown();
        loop {
            // read_envelope is cancel safe: bytes read so far stay buffered
            let read = tokio::select! {
                biased;
                _ = shutdown.recv() => None,
                res = self.reader.read_envelope() => Some(res),
            };
            let Some(read) = read else {
                self.drain_on_shutdown().await;
                break;
            };

            match read {
                Ok(Some(envelope)) => {
                    if !self.context.dispatch(envelope).await {
                        break;
                    }
                }
                Ok(None) => {
                    self.disconnected().await;
                    break;
                }
                Err(e) if e.is_disconnect() => {
                    debug!("connection from {} lost: {}", self.peer, e);
                    self.disconnected().await;
                    break;
                }
                Err(e) => {
                    self.context
                        .dispatch(LogEnvelope::here(
                            Level::Error,
                            format!("ERROR!! {}, unexpected error from {}", e, self.peer),
                        ))
                        .await;
                    break;
                }
            }
        }
        debug!("connection handler for {} exited", self.peer);
    }

    async fn disconnected(&self) {
        self.context
            .dispatch(LogEnvelope::here(
                Level::Debug,
                format!("Socket disconnected {}", self.peer),
            ))
            .await;
    }

    /// Pushes whatever already arrived before the shutdown request.
    async fn drain_on_shutdown(&mut self) {
        let config = self.context.config();
        let (pulled, closed) = self
            .reader
            .fill_pending(config.drain_grace(), config.drain_limit())
            .await;
        let mut drained = 0;
        loop {
            match self.reader.next_buffered() {
                Ok(Some(envelope)) => {
                    drained += 1;
                    if !self.context.dispatch(envelope).await {
                        break;
                    }
                }
                Ok(None) => {
                    // a trailing fragment from a closed peer is dropped
                    if closed {
                        self.disconnected().await;
                    }
                    break;
                }
                Err(e) => {
                    self.context
                        .dispatch(LogEnvelope::here(
                            Level::Error,
                            format!("ERROR!! {}, unexpected error from {}", e, self.peer),
                        ))
                        .await;
                    break;
                }
            }
        }
        debug!(
            "connection from {} drained {} envelopes ({} late bytes) on shutdown",
            self.peer, drained, pulled
        );
    }
}

/// Connected stream. Dialing fails fast and is never retried.
#[derive(Debug)]
pub struct TcpClientTransport {
    stream: BufWriter<TcpStream>,
}

impl TcpClientTransport {
    async fn connect(local: &Connection, remote: SocketAddr) -> io::Result<TcpStream> {
        if local.port() == 0 {
            return TcpStream::connect(remote).await;
        }
        let local_addr = local
            .resolve()
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;
        let socket = if local_addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.bind(local_addr)?;
        socket.connect(remote).await
    }
}

impl ClientTransport for TcpClientTransport {
    const NAME: &'static str = "TCP Client";

    async fn dial(
        local: &Connection,
        remote: &Connection,
        config: &TransportConfig,
    ) -> AppResult<Self> {
        let remote_addr = remote.resolve().await?;
        let stream = Self::connect(local, remote_addr).await.map_err(|e| {
            AppError::Dial(format!("could not connect {} to {}: {}", Self::NAME, remote, e))
        })?;
        stream.set_nodelay(true)?;
        // give the peer's accept loop a moment before the first write
        time::sleep(config.tcp_settle_delay()).await;
        Ok(TcpClientTransport {
            stream: BufWriter::new(stream),
        })
    }

    fn local_addr(&self) -> AppResult<SocketAddr> {
        Ok(self.stream.get_ref().local_addr()?)
    }

    async fn send(&mut self, frame: &[u8]) -> AppResult<()> {
        self.stream
            .write_all(frame)
            .await
            .map_err(|e| AppError::DetailedIoError(format!("write envelope error: {}", e)))
    }

    async fn flush(&mut self) -> AppResult<()> {
        self.stream
            .flush()
            .await
            .map_err(|e| AppError::DetailedIoError(format!("flush envelopes error: {}", e)))
    }

    async fn close(mut self) -> AppResult<()> {
        self.flush().await?;
        self.stream.shutdown().await?;
        Ok(())
    }
}
