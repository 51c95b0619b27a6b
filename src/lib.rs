mod message;
mod network;
mod pipeline;
mod service;
mod sink;

pub use message::{caller_of, CsvEnvelope, Envelope, EnvelopeKind, Level, LogEnvelope, EMBEDDED_CALLER};
pub use network::{
    ClientTransport, Connection, EnvelopeCodec, EnvelopeReader, Protocol, ReaderContext,
    ServerTransport, TcpClientTransport, TcpServerTransport, UdpClientTransport,
    UdpServerTransport,
};
pub use pipeline::{Client, ClientState, Server, ServerState};
pub use service::{
    setup_local_tracing, setup_tracing, verbosity_directive, AppError, AppResult,
    CollectorConfig, CsvOutputConfig, LogOutputConfig, NetworkConfig, Shutdown, TransportConfig,
};
pub use sink::{CsvSink, LogSink, Sink};
