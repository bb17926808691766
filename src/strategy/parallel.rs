// Parallel ingestion using Rayon
//
// Strategy:
// 1. Setup: strip the BOM, decode wide encodings, pick the worker count
// 2. Single-threaded: snap evenly spaced split points to row starts
//    (quote-aware, records the source row index of every split)
// 3. Parallel: each range gets its own tokenizer, filter sink, table and
//    handler clone on a dedicated pool
// 4. Sequential: fold the worker tables in range order, shifting each by the
//    rows materialized before it
//
// Only setup can fail. A handler failure stops its own worker; the rows that
// worker stored before failing are kept and the message is recorded under
// `threads/thread_<i>/errorMsg`.

use std::ops::Range;
use std::time::Instant;

use bytes::Bytes;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::core::encoding::decode_to_utf8;
use crate::core::scanner::{split_rows, split_targets};
use crate::core::tokenizer::{CellHandler, NoopHandler, Tokenizer};
use crate::dialect::{peek_dialect, Dialect, SAMPLE_SIZE};
use crate::error::{Error, Result};
use crate::filter::FilterPredicate;
use crate::source::ByteSource;
use crate::stats::{ErrorList, IngestionStats, WorkerStats};
use crate::storage::arena::DEFAULT_ARENA_BLOCK_SIZE;
use crate::storage::block_map::DEFAULT_BLOCK_SIZE;
use crate::storage::table::SparseTable;
use crate::strategy::sink::TableSink;
use crate::{Index, MAX_INDEX};

/// Smallest range worth a worker of its own.
pub const DEFAULT_MIN_BLOCK_SIZE: usize = 1024 * 1024;

/// Worker count based on the machine, capped at 8.
pub fn recommended_threads() -> usize {
    std::thread::available_parallelism()
        .map(|p| p.get().min(8))
        .unwrap_or(4)
}

/// Settings of one ingestion call.
#[derive(Debug, Clone)]
pub struct ReadOptions {
    pub threads: usize,
    pub min_block_size: usize,
    pub arena_block_size: usize,
    pub index_block_size: usize,
    /// Report cells larger than an arena block as worker errors, in addition
    /// to dropping them.
    pub allow_block_size_exceptions: bool,
    pub filter: FilterPredicate,
    pub max_row_index: Index,
    pub max_column_index: Index,
}

impl Default for ReadOptions {
    fn default() -> Self {
        ReadOptions {
            threads: recommended_threads(),
            min_block_size: DEFAULT_MIN_BLOCK_SIZE,
            arena_block_size: DEFAULT_ARENA_BLOCK_SIZE,
            index_block_size: DEFAULT_BLOCK_SIZE,
            allow_block_size_exceptions: false,
            filter: FilterPredicate::default(),
            max_row_index: MAX_INDEX,
            max_column_index: MAX_INDEX,
        }
    }
}

impl ReadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    pub fn with_min_block_size(mut self, size: usize) -> Self {
        self.min_block_size = size.max(1);
        self
    }

    pub fn with_arena_block_size(mut self, size: usize) -> Self {
        self.arena_block_size = size.max(1);
        self
    }

    pub fn with_index_block_size(mut self, size: usize) -> Self {
        self.index_block_size = size.max(1);
        self
    }

    pub fn with_block_size_exceptions(mut self, allow: bool) -> Self {
        self.allow_block_size_exceptions = allow;
        self
    }

    pub fn with_filter(mut self, filter: FilterPredicate) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_max_indices(mut self, max_row: Index, max_column: Index) -> Self {
        self.max_row_index = max_row.min(MAX_INDEX);
        self.max_column_index = max_column.min(MAX_INDEX);
        self
    }

    fn new_table(&self, source: Bytes) -> SparseTable {
        SparseTable::new()
            .with_source(source)
            .with_arena_block_size(self.arena_block_size)
            .with_index_block_size(self.index_block_size)
            .with_max_indices(self.max_row_index, self.max_column_index)
            .with_block_size_exceptions(self.allow_block_size_exceptions)
    }
}

/// Result of an ingestion call.
#[derive(Debug)]
pub struct Ingestion {
    pub table: SparseTable,
    pub dialect: Dialect,
    pub stats: IngestionStats,
}

impl Ingestion {
    /// Worker failures, empty on success.
    pub fn errors(&self) -> ErrorList {
        self.stats.errors()
    }

    /// Turn recorded worker failures into an error.
    pub fn into_result(self) -> Result<Ingestion> {
        let errors = self.errors();
        if errors.is_empty() {
            Ok(self)
        } else {
            Err(Error::WorkerFailures(errors))
        }
    }
}

/// Input ready for tokenizing: BOM removed, wide encodings decoded to UTF-8.
fn prepare_input(input: Bytes, dialect: &Dialect) -> (Bytes, &'static str) {
    let bom_len = dialect
        .encoding
        .bom()
        .filter(|bom| input.starts_with(bom))
        .map_or(0, <[u8]>::len);
    let body = input.slice(bom_len..);

    if dialect.encoding.is_wide() {
        let decoded = decode_to_utf8(&body, dialect.encoding).into_owned();
        (Bytes::from(decoded), "decoded")
    } else {
        (body, "memory")
    }
}

/// Ingest an in-memory buffer without a cell handler.
pub fn ingest_bytes(
    input: impl Into<Bytes>,
    dialect: &Dialect,
    options: &ReadOptions,
) -> Result<Ingestion> {
    ingest(input.into(), dialect, options, NoopHandler)
}

/// Read `source`, guessing the dialect from its first bytes when none is given.
pub fn read_source<H>(
    source: &ByteSource,
    dialect: Option<&Dialect>,
    options: &ReadOptions,
    handler: H,
) -> Result<Ingestion>
where
    H: CellHandler + Clone + Send,
{
    let input = source.load()?;
    let dialect = match dialect {
        Some(d) => d.clone(),
        None => peek_dialect(&input[..input.len().min(SAMPLE_SIZE)]),
    };
    let mut ingestion = ingest(input, &dialect, options, handler)?;
    if ingestion.stats.stream != "decoded" {
        ingestion.stats.stream = source.kind();
    }
    Ok(ingestion)
}

/// Tokenize `input` with `dialect` into a table, in parallel when possible.
///
/// `handler` is cloned once per worker and sees every stored cell, keyed by
/// its source row and column.
pub fn ingest<H>(input: Bytes, dialect: &Dialect, options: &ReadOptions, handler: H) -> Result<Ingestion>
where
    H: CellHandler + Clone + Send,
{
    let started = Instant::now();
    let (source, stream) = prepare_input(input, dialect);
    if source.len() > u32::MAX as usize {
        return Err(Error::InputTooLarge { len: source.len() });
    }

    let requested = options.threads.max(1);
    let by_size = source.len() / options.min_block_size.max(1);
    let mut usable = requested.min(by_size).clamp(1, requested);
    if usable > 1 && !dialect.encoding.is_byte_splittable() {
        debug!(encoding = dialect.encoding.name(), "encoding not splittable, using one worker");
        usable = 1;
    }
    if usable > 1 && !H::CONCURRENCY_SAFE {
        debug!("handler is not concurrency safe, using one worker");
        usable = 1;
    }

    // Split
    let split_started = Instant::now();
    let splits = if usable > 1 {
        split_rows(&source, dialect, &split_targets(source.len(), usable))
    } else {
        Vec::new()
    };
    let mut ranges: Vec<(Range<usize>, u64)> = Vec::with_capacity(splits.len() + 1);
    let mut start = (0, 0);
    for split in &splits {
        ranges.push((start.0..split.offset, start.1));
        start = (split.offset, split.row);
    }
    ranges.push((start.0..source.len(), start.1));
    let time_split = split_started.elapsed();
    debug!(
        requested,
        usable,
        ranges = ranges.len(),
        bytes = source.len(),
        "split input"
    );

    // Parse
    let results: Vec<(SparseTable, WorkerStats)> = if ranges.len() == 1 {
        let (range, first_row) = ranges.remove(0);
        vec![run_worker(0, &source, range, first_row, dialect, options, handler)]
    } else {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(ranges.len())
            .thread_name(|i| format!("sparsecsv-worker-{i}"))
            .build()
            .map_err(|e| Error::ThreadPool(e.to_string()))?;
        let handlers: Vec<H> = (0..ranges.len()).map(|_| handler.clone()).collect();
        let jobs: Vec<_> = ranges.into_iter().zip(handlers).enumerate().collect();
        pool.install(|| {
            jobs.into_par_iter()
                .map(|(i, ((range, first_row), handler))| {
                    run_worker(i, &source, range, first_row, dialect, options, handler)
                })
                .collect()
        })
    };

    // Merge
    let thread_count = results.len();
    let mut workers = Vec::with_capacity(thread_count);
    let mut results = results.into_iter();
    let Some((mut table, first_stats)) = results.next() else {
        return Err(Error::ThreadPool("no worker results".to_string()));
    };
    workers.push(first_stats);
    let mut row_offset = table.row_count();
    for (worker_table, mut stats) in results {
        let merge_started = Instant::now();
        let rows = worker_table.row_count();
        table.append_rows(worker_table, row_offset)?;
        row_offset += rows;
        stats.time_block_merge = merge_started.elapsed();
        workers.push(stats);
    }

    let stats = IngestionStats {
        thread_count,
        requested_threads: requested,
        time_total: started.elapsed(),
        time_split,
        bytes_total: source.len(),
        rows_total: table.row_count(),
        stream,
        appender: if thread_count == 1 { "single" } else { "block-merge" },
        peak_allocated: crate::memory_peak(),
        workers,
    };
    info!(
        threads = stats.thread_count,
        rows = stats.rows_total,
        bytes = stats.bytes_total,
        elapsed_us = stats.time_total.as_micros() as u64,
        "ingestion finished"
    );

    Ok(Ingestion {
        table,
        dialect: dialect.clone(),
        stats,
    })
}

fn run_worker<H: CellHandler>(
    index: usize,
    source: &Bytes,
    range: Range<usize>,
    first_row: u64,
    dialect: &Dialect,
    options: &ReadOptions,
    handler: H,
) -> (SparseTable, WorkerStats) {
    let started = Instant::now();
    let table = options.new_table(source.clone());
    let mut sink = TableSink::new(table, handler, &options.filter);
    let outcome = Tokenizer::new(dialect)
        .with_first_row(first_row)
        .tokenize_range(source, range.clone(), &mut sink);
    let (table, report) = sink.finish();

    let mut stats = WorkerStats {
        start_offset: range.start,
        bytes_processed: range.len(),
        rows_produced: report.rows_produced,
        cells_dropped: report.cells_dropped,
        errors: report.errors,
        ..WorkerStats::default()
    };
    match outcome {
        Ok(summary) => {
            stats.bytes_processed = summary.bytes;
            stats.source_rows = summary.rows;
        }
        Err(e) => {
            warn!(worker = index, error = %e, "worker stopped by handler failure");
            stats.errors.push(e.message().to_string());
        }
    }
    stats.time_block_read = started.elapsed();
    debug!(
        worker = index,
        start = range.start,
        rows = stats.rows_produced,
        "worker finished"
    );
    (table, stats)
}
