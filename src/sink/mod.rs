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

//! Server-side consumers of decoded envelopes.

use std::future::Future;

use tracing::{debug, error};

use crate::message::Envelope;
use crate::AppResult;

pub use csv_sink::CsvSink;
pub use log_sink::LogSink;

mod csv_sink;
mod log_sink;

/// Renders or persists envelopes.
///
/// A sink is owned by exactly one task, so its state needs no locking.
pub trait Sink: Send + 'static {
    fn name(&self) -> &'static str;

    /// Handles one envelope. An error drops that envelope only.
    fn write(&mut self, envelope: Envelope) -> impl Future<Output = AppResult<()>> + Send;

    /// Flushes and releases whatever the sink holds open.
    fn close(&mut self) -> impl Future<Output = AppResult<()>> + Send;

    /// Drains `inbound` until it is closed and empty, then closes the sink.
    fn consume(
        mut self,
        inbound: async_channel::Receiver<Envelope>,
    ) -> impl Future<Output = ()> + Send
    where
        Self: Sized,
    {
        async move {
            let mut written = 0u64;
            while let Ok(envelope) = inbound.recv().await {
                match self.write(envelope).await {
                    Ok(()) => written += 1,
                    Err(e) => error!("{} dropped an envelope: {}", self.name(), e),
                }
            }
            if let Err(e) = self.close().await {
                error!("{} failed to close: {}", self.name(), e);
            }
            debug!("{} drained after {} envelopes", self.name(), written);
        }
    }
}
