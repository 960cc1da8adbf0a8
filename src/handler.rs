// CLASSIFICATION: COMMUNITY
// Filename: handler.rs v0.7
// Author: Lukas Bower
// Date Modified: 2029-04-02

//! Server side of the dial-out streaming RPC.
//!
//! Each accepted connection runs independently: the handler awaits chunks
//! on its own stream only, decodes the embedded telemetry envelope, and
//! appends records to the shared queue. The response stream carries nothing
//! and closes once the device stops sending; reconnection is entirely
//! device-driven.

use crate::decode::flatten;
use crate::protocol::{GRpcMdtDialout, MdtDialoutArgs, Telemetry};
use crate::queue::{QueueRecord, RecordQueue, TelemetryMessage};
use chrono::{SecondsFormat, TimeZone, Utc};
use log::{debug, info, warn};
use prost::Message;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status, Streaming};

/// How decoded chunks are queued.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputMode {
    /// One raw envelope dump per chunk, no structured decoding.
    Raw,
    /// One structured message per top-level telemetry group.
    #[default]
    Compact,
}

/// Handler servicing every dial-out stream on one listener.
pub struct DialoutHandler {
    queue: Arc<RecordQueue>,
    mode: OutputMode,
    decode_failures: Arc<AtomicU64>,
}

impl DialoutHandler {
    pub fn new(queue: Arc<RecordQueue>, mode: OutputMode) -> Self {
        Self {
            queue,
            mode,
            decode_failures: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn mode(&self) -> OutputMode {
        self.mode
    }

    /// Number of inbound chunks whose payload failed to decode and were
    /// skipped. Malformed chunks never terminate the stream.
    pub fn decode_failures(&self) -> u64 {
        self.decode_failures.load(Ordering::Relaxed)
    }
}

#[tonic::async_trait]
impl GRpcMdtDialout for DialoutHandler {
    type MdtDialoutStream = ReceiverStream<Result<MdtDialoutArgs, Status>>;

    async fn mdt_dialout(
        &self,
        request: Request<Streaming<MdtDialoutArgs>>,
    ) -> Result<Response<Self::MdtDialoutStream>, Status> {
        let peer = request
            .remote_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|| "unknown".into());
        info!("dial-out stream opened by {peer}");

        let mut inbound = request.into_inner();
        let queue = self.queue.clone();
        let mode = self.mode;
        let failures = self.decode_failures.clone();

        // The response stream stays open (and the call alive) until the
        // reader task finishes and drops `tx`.
        let (tx, rx) = mpsc::channel::<Result<MdtDialoutArgs, Status>>(1);
        tokio::spawn(async move {
            let _tx = tx;
            loop {
                match inbound.message().await {
                    Ok(Some(chunk)) => process_chunk(&chunk, mode, &queue, &failures, &peer),
                    Ok(None) => {
                        info!("dial-out stream from {peer} closed by device");
                        break;
                    }
                    Err(status) => {
                        debug!("dial-out stream from {peer} ended: {status}");
                        break;
                    }
                }
            }
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }
}

fn process_chunk(
    chunk: &MdtDialoutArgs,
    mode: OutputMode,
    queue: &RecordQueue,
    failures: &AtomicU64,
    peer: &str,
) {
    if !chunk.errors.is_empty() {
        warn!("device {peer} reported errors on req {}: {}", chunk.req_id, chunk.errors);
    }
    let telemetry = match Telemetry::decode(chunk.data.as_slice()) {
        Ok(telemetry) => telemetry,
        Err(err) => {
            failures.fetch_add(1, Ordering::Relaxed);
            warn!("skipping undecodable chunk from {peer}: {err}");
            return;
        }
    };
    match mode {
        OutputMode::Raw => queue.push(QueueRecord::Raw {
            raw: format!("{telemetry:#?}"),
        }),
        OutputMode::Compact => {
            for group in &telemetry.data_gpbkv {
                let mut fields = Vec::new();
                flatten(&group.fields, "", &mut fields);
                queue.push(QueueRecord::Message(TelemetryMessage {
                    timestamp: human_timestamp(group.timestamp),
                    subscription: telemetry.subscription_id_str.clone(),
                    node: telemetry.node_id_str.clone(),
                    subscribe_path: format!("/{}", telemetry.encoding_path),
                    fields,
                }));
            }
        }
    }
}

/// Render a device epoch-millis stamp as RFC 3339 UTC. An out-of-range
/// stamp falls back to the raw number rather than being dropped.
fn human_timestamp(epoch_ms: u64) -> String {
    Utc.timestamp_millis_opt(epoch_ms as i64)
        .single()
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_else(|| epoch_ms.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{telemetry_field, TelemetryField};

    fn sample_envelope() -> Telemetry {
        Telemetry {
            node_id_str: "router1".into(),
            subscription_id_str: "sub1".into(),
            encoding_path: "interfaces/interface/state".into(),
            data_gpbkv: vec![TelemetryField {
                timestamp: 1_700_000_000_000,
                fields: vec![TelemetryField {
                    name: "content".into(),
                    fields: vec![TelemetryField {
                        name: "admin-status".into(),
                        value_by_type: Some(telemetry_field::ValueByType::StringValue(
                            "up".into(),
                        )),
                        ..Default::default()
                    }],
                    ..Default::default()
                }],
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    fn chunk_for(envelope: &Telemetry) -> MdtDialoutArgs {
        MdtDialoutArgs {
            req_id: 1,
            data: envelope.encode_to_vec(),
            errors: String::new(),
        }
    }

    #[test]
    fn compact_chunk_becomes_structured_message() {
        let queue = RecordQueue::new();
        let failures = AtomicU64::new(0);
        process_chunk(
            &chunk_for(&sample_envelope()),
            OutputMode::Compact,
            &queue,
            &failures,
            "test",
        );
        let drained = queue.drain_all();
        assert_eq!(drained.len(), 1);
        match &drained[0] {
            QueueRecord::Message(msg) => {
                assert_eq!(msg.node, "router1");
                assert_eq!(msg.subscription, "sub1");
                assert_eq!(msg.subscribe_path, "/interfaces/interface/state");
                assert_eq!(msg.timestamp, "2023-11-14T22:13:20Z");
                assert_eq!(msg.fields.len(), 1);
                assert_eq!(msg.fields[0].child_path, "/");
                assert_eq!(msg.fields[0].name, "admin-status");
            }
            other => panic!("expected structured message, got {other:?}"),
        }
        assert_eq!(failures.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn raw_chunk_becomes_single_dump() {
        let queue = RecordQueue::new();
        let failures = AtomicU64::new(0);
        process_chunk(
            &chunk_for(&sample_envelope()),
            OutputMode::Raw,
            &queue,
            &failures,
            "test",
        );
        let drained = queue.drain_all();
        assert_eq!(drained.len(), 1);
        match &drained[0] {
            QueueRecord::Raw { raw } => assert!(raw.contains("router1")),
            other => panic!("expected raw dump, got {other:?}"),
        }
    }

    #[test]
    fn malformed_chunk_is_counted_and_skipped() {
        let queue = RecordQueue::new();
        let failures = AtomicU64::new(0);
        let bad = MdtDialoutArgs {
            req_id: 2,
            data: vec![0xff, 0xff, 0xff],
            errors: String::new(),
        };
        process_chunk(&bad, OutputMode::Compact, &queue, &failures, "test");
        assert!(queue.is_empty());
        assert_eq!(failures.load(Ordering::Relaxed), 1);
        // The stream survives: a following good chunk still lands.
        process_chunk(
            &chunk_for(&sample_envelope()),
            OutputMode::Compact,
            &queue,
            &failures,
            "test",
        );
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn multiple_groups_enqueue_one_message_each() {
        let mut envelope = sample_envelope();
        let mut second = envelope.data_gpbkv[0].clone();
        second.timestamp = 1_700_000_060_000;
        envelope.data_gpbkv.push(second);
        let queue = RecordQueue::new();
        let failures = AtomicU64::new(0);
        process_chunk(
            &chunk_for(&envelope),
            OutputMode::Compact,
            &queue,
            &failures,
            "test",
        );
        assert_eq!(queue.len(), 2);
    }
}
