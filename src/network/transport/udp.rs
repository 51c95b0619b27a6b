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

use std::io::ErrorKind;
use std::net::SocketAddr;

use tokio::net::UdpSocket;
use tokio::time::{self, Instant};
use tracing::{debug, warn};

use crate::message::{Level, LogEnvelope};
use crate::network::EnvelopeCodec;
use crate::{AppError, AppResult, Connection, TransportConfig};

use super::{ClientTransport, ReaderContext, ServerTransport};

/// One datagram socket, one reader.
#[derive(Debug)]
pub struct UdpServerTransport {
    socket: UdpSocket,
}

impl UdpServerTransport {
    /// Returns false once the inbound queue is closed.
    async fn dispatch_datagram(
        codec: &EnvelopeCodec,
        datagram: &[u8],
        peer: SocketAddr,
        context: &ReaderContext,
    ) -> bool {
        match codec.decode_datagram(datagram) {
            Ok(envelope) => context.dispatch(envelope).await,
            // datagrams are independent, a bad one does not poison the next
            Err(e) => {
                context
                    .dispatch(LogEnvelope::here(
                        Level::Error,
                        format!("ERROR!! dropped datagram from {}: {}", peer, e),
                    ))
                    .await
            }
        }
    }
}

impl ServerTransport for UdpServerTransport {
    const NAME: &'static str = "UDP Server";

    async fn bind(connection: &Connection, _config: &TransportConfig) -> AppResult<Self> {
        let addr = connection.resolve().await?;
        let socket = UdpSocket::bind(addr).await.map_err(|e| {
            AppError::Bind(format!("could not create {} at {}: {}", Self::NAME, connection, e))
        })?;
        Ok(UdpServerTransport { socket })
    }

    fn local_addr(&self) -> AppResult<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    async fn serve(self, context: ReaderContext) {
        let codec = EnvelopeCodec::new(context.config().max_envelope_size);
        let mut datagram = vec![0u8; context.config().datagram_size];
        let mut shutdown = context.shutdown();

        loop {
            let received = tokio::select! {
                biased;
                _ = shutdown.recv() => None,
                res = self.socket.recv_from(&mut datagram) => Some(res),
            };
            let Some(received) = received else {
                break;
            };

            match received {
                Ok((len, peer)) => {
                    if !Self::dispatch_datagram(&codec, &datagram[..len], peer, &context).await {
                        return;
                    }
                }
                // ICMP port unreachable for an earlier reply, nothing to do with us
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::ConnectionRefused | ErrorKind::ConnectionReset
                    ) =>
                {
                    debug!("ignoring udp receive error: {}", e);
                }
                Err(e) => {
                    context
                        .dispatch(LogEnvelope::here(
                            Level::Error,
                            format!("ERROR!! {} stopped reading: {}", Self::NAME, e),
                        ))
                        .await;
                    return;
                }
            }
        }

        // datagrams that already reached the socket before shutdown still count
        let grace = context.config().drain_grace();
        let deadline = Instant::now() + context.config().drain_limit();
        let mut drained = 0;
        loop {
            let quiet_at = (Instant::now() + grace).min(deadline);
            match time::timeout_at(quiet_at, self.socket.recv_from(&mut datagram)).await {
                Ok(Ok((len, peer))) => {
                    drained += 1;
                    if !Self::dispatch_datagram(&codec, &datagram[..len], peer, &context).await {
                        break;
                    }
                }
                Ok(Err(e))
                    if matches!(
                        e.kind(),
                        ErrorKind::ConnectionRefused | ErrorKind::ConnectionReset
                    ) => {}
                Ok(Err(e)) => {
                    debug!("stop draining udp socket: {}", e);
                    break;
                }
                Err(_) => break,
            }
            if Instant::now() >= deadline {
                break;
            }
        }
        debug!("udp reader exited after draining {} datagrams", drained);
    }
}

/// UDP is connectionless: "dialing" binds a local socket and remembers the
/// destination.
#[derive(Debug)]
pub struct UdpClientTransport {
    socket: UdpSocket,
    remote: SocketAddr,
}

impl ClientTransport for UdpClientTransport {
    const NAME: &'static str = "UDP Client";

    async fn dial(
        local: &Connection,
        remote: &Connection,
        _config: &TransportConfig,
    ) -> AppResult<Self> {
        let local_addr = local.resolve().await?;
        let remote = remote.resolve().await?;
        let socket = UdpSocket::bind(local_addr).await.map_err(|e| {
            AppError::Dial(format!("could not create {} at {}: {}", Self::NAME, local, e))
        })?;
        Ok(UdpClientTransport { socket, remote })
    }

    fn local_addr(&self) -> AppResult<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    async fn send(&mut self, frame: &[u8]) -> AppResult<()> {
        // best effort: nobody listening is not the producer's problem
        if let Err(e) = self.socket.send_to(frame, self.remote).await {
            warn!("udp send to {} failed: {}", self.remote, e);
        }
        Ok(())
    }

    async fn flush(&mut self) -> AppResult<()> {
        Ok(())
    }

    async fn close(self) -> AppResult<()> {
        debug!("udp client {} closed", self.remote);
        Ok(())
    }
}
