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

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::debug;

use crate::message::Envelope;
use crate::{AppError, AppResult};

const DEFAULT_MAX_ENVELOPE_SIZE: usize = 1024 * 1024;

/// JSON envelope codec.
///
/// Envelopes are self-delimiting JSON objects, so a stream carries them back
/// to back with no length prefix: the decoder finds the end of one value by
/// parsing it and leaves the remaining bytes in the buffer.
#[derive(Debug, Clone)]
pub struct EnvelopeCodec {
    max_envelope_size: usize,
}

impl Default for EnvelopeCodec {
    fn default() -> Self {
        EnvelopeCodec::new(DEFAULT_MAX_ENVELOPE_SIZE)
    }
}

impl EnvelopeCodec {
    pub fn new(max_envelope_size: usize) -> Self {
        EnvelopeCodec { max_envelope_size }
    }

    /// A datagram holds exactly one envelope.
    pub fn decode_datagram(&self, datagram: &[u8]) -> AppResult<Envelope> {
        serde_json::from_slice(datagram).map_err(|e| AppError::MalformedEnvelope(e.to_string()))
    }

    pub fn encode_to_vec(&self, envelope: &Envelope) -> AppResult<Vec<u8>> {
        Ok(serde_json::to_vec(envelope)?)
    }
}

impl Decoder for EnvelopeCodec {
    type Item = Envelope;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> AppResult<Option<Envelope>> {
        let leading = src
            .iter()
            .position(|b| !b.is_ascii_whitespace())
            .unwrap_or(src.len());
        src.advance(leading);
        if src.is_empty() {
            return Ok(None);
        }

        let (next, consumed) = {
            let mut stream = serde_json::Deserializer::from_slice(&src[..]).into_iter::<Envelope>();
            let next = stream.next();
            (next, stream.byte_offset())
        };

        match next {
            Some(Ok(envelope)) => {
                src.advance(consumed);
                Ok(Some(envelope))
            }
            Some(Err(e)) if e.is_eof() => {
                if src.len() > self.max_envelope_size {
                    return Err(AppError::EnvelopeTooLarge(format!(
                        "{} bytes without a complete envelope, limit is {}",
                        src.len(),
                        self.max_envelope_size
                    )));
                }
                Ok(None)
            }
            Some(Err(e)) => Err(AppError::MalformedEnvelope(e.to_string())),
            None => Ok(None),
        }
    }

    /// A fragment left over when the peer closes is not an error, the peer
    /// simply went away mid-envelope.
    fn decode_eof(&mut self, src: &mut BytesMut) -> AppResult<Option<Envelope>> {
        match self.decode(src)? {
            Some(envelope) => Ok(Some(envelope)),
            None => {
                if !src.is_empty() {
                    debug!("discarding {} bytes of a truncated envelope", src.len());
                    src.clear();
                }
                Ok(None)
            }
        }
    }
}

impl Encoder<&Envelope> for EnvelopeCodec {
    type Error = AppError;

    fn encode(&mut self, item: &Envelope, dst: &mut BytesMut) -> AppResult<()> {
        serde_json::to_writer(dst.writer(), item)?;
        Ok(())
    }
}
