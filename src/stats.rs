// Per-call ingestion statistics and the structured error list

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize, Serializer};

use crate::error::Result;
use crate::properties::{join_path, Properties};

/// Ordered `(path, message)` pairs. Empty means success.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorList {
    entries: Vec<(String, String)>,
}

impl ErrorList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.entries.push((path.into(), message.into()));
    }

    pub fn extend(&mut self, other: ErrorList) {
        self.entries.extend(other.entries);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// First message recorded under `path`.
    pub fn get(&self, path: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(p, _)| p == path)
            .map(|(_, m)| m.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.entries.iter().map(|(p, m)| (p.as_str(), m.as_str()))
    }
}

impl fmt::Display for ErrorList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (path, message)) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{path}: {message}")?;
        }
        Ok(())
    }
}

fn as_micros<S: Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_micros() as u64)
}

/// Path prefix of worker `index` in stats and error paths.
pub fn worker_path(index: usize) -> String {
    format!("threads/thread_{index}")
}

/// What one ingestion worker did.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerStats {
    pub start_offset: usize,
    pub bytes_processed: usize,
    /// Rows stored in the worker's table.
    pub rows_produced: u64,
    /// Rows tokenized, including filtered ones.
    pub source_rows: u64,
    #[serde(serialize_with = "as_micros")]
    pub time_block_read: Duration,
    #[serde(serialize_with = "as_micros")]
    pub time_block_merge: Duration,
    pub cells_dropped: u64,
    pub errors: Vec<String>,
}

/// Record of one ingestion call.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionStats {
    /// Workers actually run.
    pub thread_count: usize,
    pub requested_threads: usize,
    #[serde(serialize_with = "as_micros")]
    pub time_total: Duration,
    #[serde(serialize_with = "as_micros")]
    pub time_split: Duration,
    pub bytes_total: usize,
    pub rows_total: u64,
    /// Input kind: `memory`, `file` or `decoded`.
    pub stream: &'static str,
    /// How worker tables were combined: `single` or `block-merge`.
    pub appender: &'static str,
    /// Peak heap use in bytes; zero without the `memory_tracking` feature.
    pub peak_allocated: usize,
    pub workers: Vec<WorkerStats>,
}

impl IngestionStats {
    /// Every worker error, keyed `threads/thread_<i>/errorMsg`.
    pub fn errors(&self) -> ErrorList {
        let mut errors = ErrorList::new();
        for (i, worker) in self.workers.iter().enumerate() {
            let path = join_path(&worker_path(i), "errorMsg");
            for message in &worker.errors {
                errors.push(path.clone(), message.clone());
            }
        }
        errors
    }

    pub fn to_properties(&self) -> Properties {
        let mut props = Properties::new();
        props.set("threadCount", self.thread_count.to_string());
        props.set("requestedThreads", self.requested_threads.to_string());
        props.set("timeTotal", micros(self.time_total));
        props.set("timeSplit", micros(self.time_split));
        props.set("bytesTotal", self.bytes_total.to_string());
        props.set("rowsTotal", self.rows_total.to_string());
        props.set("stream", self.stream);
        props.set("appender", self.appender);
        props.set("peakAllocated", self.peak_allocated.to_string());

        for (i, worker) in self.workers.iter().enumerate() {
            let base = worker_path(i);
            let key = |name: &str| join_path(&base, name);
            props.set(key("startOffset"), worker.start_offset.to_string());
            props.set(key("bytesProcessed"), worker.bytes_processed.to_string());
            props.set(key("rowsProduced"), worker.rows_produced.to_string());
            props.set(key("sourceRows"), worker.source_rows.to_string());
            props.set(key("timeBlockRead"), micros(worker.time_block_read));
            props.set(key("timeBlockMerge"), micros(worker.time_block_merge));
            props.set(key("cellsDropped"), worker.cells_dropped.to_string());
            if !worker.errors.is_empty() {
                props.set(key("errorMsg"), worker.errors.join("; "));
            }
        }
        props
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

fn micros(d: Duration) -> String {
    d.as_micros().to_string()
}
