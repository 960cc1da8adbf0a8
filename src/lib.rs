// CLASSIFICATION: COMMUNITY
// Filename: lib.rs v0.5
// Author: Lukas Bower
// Date Modified: 2029-04-02

//! gRPC model-driven telemetry dial-out receiver.
//!
//! Devices initiate ("dial out") a streaming gRPC connection and push
//! serialized telemetry envelopes. Each listener decodes the nested
//! key-value field trees into flat records, feeds them to one shared FIFO
//! queue, and a pull-based dispatcher fans drained records out to the
//! configured sinks (local file, Elasticsearch).

/// Primary outbound address detection.
pub mod addr;
/// Recursive field-tree flattening.
pub mod decode;
/// Inbound dial-out stream handling.
pub mod handler;
/// Generated gRPC bindings.
pub mod protocol;
/// Shared record queue.
pub mod queue;
/// Listener lifecycle management.
pub mod server;
/// Sink configuration and queue draining.
pub mod sink;

pub use decode::{flatten, FieldValue, FlattenedRecord};
pub use handler::{DialoutHandler, OutputMode};
pub use queue::{QueueRecord, RecordQueue, TelemetryMessage};
pub use server::{ServerError, StartOptions, TelemetryServer};
pub use sink::{DispatchEntry, OutputDispatcher, Sink, SinkError};
