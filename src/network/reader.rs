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

use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::{self, Instant};
use tokio_util::codec::Decoder;
use tracing::debug;

use crate::message::Envelope;
use crate::AppResult;

use super::EnvelopeCodec;

/// Buffered envelope reader over one byte stream.
///
/// Bytes read from the stream stay in `buffer` until a whole envelope is
/// available, which makes [`EnvelopeReader::read_envelope`] cancel safe.
#[derive(Debug)]
pub struct EnvelopeReader<R> {
    reader: R,
    buffer: BytesMut,
    codec: EnvelopeCodec,
}

impl<R: AsyncRead + Unpin> EnvelopeReader<R> {
    pub fn new(reader: R, buffer_size: usize, codec: EnvelopeCodec) -> Self {
        EnvelopeReader {
            reader,
            buffer: BytesMut::with_capacity(buffer_size),
            codec,
        }
    }

    /// Reads the next envelope from the stream.
    ///
    /// Returns `None` once the peer has closed the stream, whether cleanly or
    /// in the middle of an envelope. A malformed envelope is an error and the
    /// stream should be dropped.
    pub async fn read_envelope(&mut self) -> AppResult<Option<Envelope>> {
        loop {
            if let Some(envelope) = self.codec.decode(&mut self.buffer)? {
                return Ok(Some(envelope));
            }
            if 0 == self.reader.read_buf(&mut self.buffer).await? {
                return self.codec.decode_eof(&mut self.buffer);
            }
        }
    }

    /// Decodes an envelope that is already buffered, without touching the stream.
    pub fn next_buffered(&mut self) -> AppResult<Option<Envelope>> {
        self.codec.decode(&mut self.buffer)
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Buffers whatever the peer already sent, without decoding it.
    ///
    /// Stops once the stream has been quiet for `grace`, once `limit` has
    /// passed, or at end of stream. Returns the bytes read and whether the
    /// peer has closed.
    pub async fn fill_pending(&mut self, grace: Duration, limit: Duration) -> (usize, bool) {
        let deadline = Instant::now() + limit;
        let mut total = 0;
        loop {
            self.buffer.reserve(4 * 1024);
            let quiet_at = (Instant::now() + grace).min(deadline);
            match time::timeout_at(quiet_at, self.reader.read_buf(&mut self.buffer)).await {
                Ok(Ok(0)) => return (total, true),
                Ok(Ok(n)) => {
                    total += n;
                    if Instant::now() >= deadline {
                        break;
                    }
                }
                Ok(Err(e)) => {
                    debug!("stop draining stream: {}", e);
                    return (total, true);
                }
                Err(_) => break,
            }
        }
        (total, false)
    }
}
