// CLASSIFICATION: COMMUNITY
// Filename: sink.rs v0.8
// Author: Lukas Bower
// Date Modified: 2029-04-02

//! Pull-based output dispatch.
//!
//! A drain call pops everything currently queued and writes each record to
//! every configured sink. Sink failures are demoted to inline entries in
//! the returned batch so one bad destination never stalls the stream or
//! the other destinations. Nothing drains automatically; callers invoke
//! [`OutputDispatcher::drain`] explicitly and must not do so concurrently.

use crate::queue::{QueueRecord, RecordQueue};
use http::Uri;
use log::{debug, info};
use once_cell::sync::OnceCell;
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Index documents land under, one per drained record.
const ELASTIC_INDEX: &str = "telemetry";

/// Errors raised at sink configuration or write time.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("output directory {} does not exist", .0.display())]
    MissingParentDir(PathBuf),
    #[error("invalid output uri {uri}: {detail}")]
    InvalidUri { uri: String, detail: String },
    #[error("file write failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("record serialization failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("index request failed: {0}")]
    Http(String),
}

/// One record destination. The trait is the seam used to inject failing
/// sinks in tests and to add destinations beyond file and Elasticsearch.
pub trait Sink: Send + Sync {
    /// Short name used to tag inline failure entries.
    fn name(&self) -> &str;
    fn write(&self, record: &QueueRecord) -> Result<(), SinkError>;
}

/// Appends one JSON document per record. The file is a sequence of
/// newline-separated documents, not a single JSON array.
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    /// Fails loudly when the parent directory does not exist, rather than
    /// silently dropping every future record.
    pub fn new(path: &Path) -> Result<Self, SinkError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.is_dir() {
                return Err(SinkError::MissingParentDir(parent.to_path_buf()));
            }
        }
        Ok(Self { path: path.to_path_buf() })
    }
}

impl Sink for FileSink {
    fn name(&self) -> &str {
        "file"
    }

    fn write(&self, record: &QueueRecord) -> Result<(), SinkError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let doc = serde_json::to_string(record)?;
        writeln!(file, "{doc}")?;
        Ok(())
    }
}

/// Indexes each record as a document into a remote store.
pub struct ElasticSink {
    base: String,
    agent: OnceCell<ureq::Agent>,
}

impl ElasticSink {
    /// Validates that `uri` parses and carries a scheme; the connection
    /// itself is established lazily on first write.
    pub fn new(uri: &str) -> Result<Self, SinkError> {
        let parsed: Uri = uri.parse().map_err(|err| SinkError::InvalidUri {
            uri: uri.into(),
            detail: format!("{err}"),
        })?;
        if parsed.scheme_str().is_none() {
            return Err(SinkError::InvalidUri {
                uri: uri.into(),
                detail: "missing scheme".into(),
            });
        }
        Ok(Self {
            base: uri.trim_end_matches('/').to_string(),
            agent: OnceCell::new(),
        })
    }

    fn agent(&self) -> &ureq::Agent {
        self.agent.get_or_init(ureq::Agent::new_with_defaults)
    }
}

impl Sink for ElasticSink {
    fn name(&self) -> &str {
        "elasticsearch"
    }

    fn write(&self, record: &QueueRecord) -> Result<(), SinkError> {
        let url = format!("{}/{ELASTIC_INDEX}/_doc", self.base);
        self.agent()
            .post(&url)
            .send_json(record)
            .map_err(|err| SinkError::Http(err.to_string()))?;
        Ok(())
    }
}

/// One entry of a drained batch: the original record, or a per-sink
/// failure tagged with the sink that produced it.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum DispatchEntry {
    Record(QueueRecord),
    SinkFailure { sink: String, detail: String },
}

/// Drains the shared queue into the configured sinks on demand.
pub struct OutputDispatcher {
    queue: Arc<RecordQueue>,
    sinks: Vec<Box<dyn Sink>>,
}

impl OutputDispatcher {
    pub fn new(queue: Arc<RecordQueue>) -> Self {
        Self {
            queue,
            sinks: Vec::new(),
        }
    }

    /// Replace the sink set wholesale: either, both, or neither of a file
    /// path and an index URI. Validation failures are raised here, never
    /// deferred to drain time.
    pub fn set_output(&mut self, file: Option<&Path>, uri: Option<&str>) -> Result<(), SinkError> {
        let mut sinks: Vec<Box<dyn Sink>> = Vec::new();
        if let Some(path) = file {
            sinks.push(Box::new(FileSink::new(path)?));
            info!("file sink set to {}", path.display());
        }
        if let Some(uri) = uri {
            sinks.push(Box::new(ElasticSink::new(uri)?));
            info!("index sink set to {uri}");
        }
        self.sinks = sinks;
        Ok(())
    }

    /// Install an arbitrary sink set in place of the standard pair.
    pub fn replace_sinks(&mut self, sinks: Vec<Box<dyn Sink>>) {
        self.sinks = sinks;
    }

    /// Pop every queued record (oldest first) and write each one to every
    /// sink independently. The returned batch holds the records in
    /// processing order, interleaved with an inline failure entry directly
    /// after any record a sink rejected.
    pub fn drain(&self) -> Vec<DispatchEntry> {
        let records = self.queue.drain_all();
        debug!("draining {} queued records", records.len());
        let mut batch = Vec::with_capacity(records.len());
        for record in records {
            let mut failures = Vec::new();
            for sink in &self.sinks {
                if let Err(err) = sink.write(&record) {
                    failures.push(DispatchEntry::SinkFailure {
                        sink: sink.name().into(),
                        detail: err.to_string(),
                    });
                }
            }
            batch.push(DispatchEntry::Record(record));
            batch.extend(failures);
        }
        batch
    }
}
