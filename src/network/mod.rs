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

//! Network Module Implementation
//!
//! Everything between a socket and an envelope queue.
//!
//! # Components
//!
//! - `Connection`: address/port descriptor used to bind or dial
//! - `EnvelopeCodec`: self-delimiting JSON encoding of envelopes
//! - `EnvelopeReader`: buffered, cancel-safe envelope reads from a byte stream
//! - `transport`: the UDP and TCP variants behind the `ServerTransport` and
//!   `ClientTransport` traits

pub use codec::EnvelopeCodec;
pub use connection::Connection;
pub use reader::EnvelopeReader;
pub use transport::{
    ClientTransport, Protocol, ReaderContext, ServerTransport, TcpClientTransport,
    TcpServerTransport, UdpClientTransport, UdpServerTransport,
};

mod codec;
mod connection;
mod reader;
mod transport;
