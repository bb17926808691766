// sparsecsv - CSV ingestion into a sparse, block-indexed table
//
// Layers:
// core:     dialect-driven tokenizer, quote-aware row splitter, encodings
// storage:  BlockIndexMap, cell arena, SparseTable and its sort
// strategy: block-parallel ingestion with filtering, and the writer
//
// Dialect detection, properties persistence and per-call statistics sit
// beside them at the crate root.

pub mod core;
pub mod dialect;
pub mod error;
pub mod filter;
pub mod properties;
pub mod source;
pub mod stats;
pub mod storage;
pub mod strategy;

/// Row and column index. Every index must stay at or below [`MAX_INDEX`].
pub type Index = u32;

/// Largest valid row or column index.
pub const MAX_INDEX: Index = u32::MAX - 1;

pub use crate::core::{CellData, CellHandler, Control, Encoding, Eol, NoopHandler, Tokenizer};
pub use dialect::{peek_dialect, Dialect};
pub use error::{Error, HandlerError, Result};
pub use filter::{FilterPredicate, IntervalSet};
pub use properties::Properties;
pub use source::ByteSource;
pub use stats::{ErrorList, IngestionStats, WorkerStats};
pub use storage::{BlockIndexMap, SparseTable};
pub use strategy::{
    ingest, ingest_bytes, read_source, recommended_threads, table_to_bytes, write_table,
    Ingestion, ReadOptions,
};

// ============================================================================
// Allocator Configuration
// ============================================================================

// When memory_tracking is enabled, wrap the allocator to track usage
#[cfg(feature = "memory_tracking")]
mod tracking {
    use std::alloc::{GlobalAlloc, Layout};
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub static ALLOCATED: AtomicUsize = AtomicUsize::new(0);
    pub static PEAK_ALLOCATED: AtomicUsize = AtomicUsize::new(0);

    pub struct TrackingAllocator;

    #[cfg(feature = "mimalloc")]
    static UNDERLYING: mimalloc::MiMalloc = mimalloc::MiMalloc;

    #[cfg(not(feature = "mimalloc"))]
    static UNDERLYING: std::alloc::System = std::alloc::System;

    fn raise_peak(current: usize) {
        let mut peak = PEAK_ALLOCATED.load(Ordering::Relaxed);
        while current > peak {
            match PEAK_ALLOCATED.compare_exchange_weak(
                peak,
                current,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(p) => peak = p,
            }
        }
    }

    unsafe impl GlobalAlloc for TrackingAllocator {
        unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
            let ptr = UNDERLYING.alloc(layout);
            if !ptr.is_null() {
                raise_peak(ALLOCATED.fetch_add(layout.size(), Ordering::Relaxed) + layout.size());
            }
            ptr
        }

        unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
            ALLOCATED.fetch_sub(layout.size(), Ordering::Relaxed);
            UNDERLYING.dealloc(ptr, layout)
        }
    }
}

#[cfg(feature = "memory_tracking")]
#[global_allocator]
static GLOBAL: tracking::TrackingAllocator = tracking::TrackingAllocator;

// When memory_tracking is disabled, use mimalloc directly (no overhead)
#[cfg(all(feature = "mimalloc", not(feature = "memory_tracking")))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

// ============================================================================
// Memory tracking (real numbers only with the memory_tracking feature)
// ============================================================================

#[cfg(feature = "memory_tracking")]
use std::sync::atomic::Ordering;

/// Current heap allocation in bytes.
#[cfg(feature = "memory_tracking")]
pub fn memory_current() -> usize {
    tracking::ALLOCATED.load(Ordering::SeqCst)
}

/// Peak heap allocation since the last reset.
#[cfg(feature = "memory_tracking")]
pub fn memory_peak() -> usize {
    tracking::PEAK_ALLOCATED.load(Ordering::SeqCst)
}

/// Reset the peak to the current allocation, returning `(current, old_peak)`.
#[cfg(feature = "memory_tracking")]
pub fn reset_memory_stats() -> (usize, usize) {
    let current = tracking::ALLOCATED.load(Ordering::SeqCst);
    let peak = tracking::PEAK_ALLOCATED.swap(current, Ordering::SeqCst);
    (current, peak)
}

/// Stub: returns 0 when memory_tracking is disabled
#[cfg(not(feature = "memory_tracking"))]
pub fn memory_current() -> usize {
    0
}

/// Stub: returns 0 when memory_tracking is disabled
#[cfg(not(feature = "memory_tracking"))]
pub fn memory_peak() -> usize {
    0
}

/// Stub: returns (0, 0) when memory_tracking is disabled
#[cfg(not(feature = "memory_tracking"))]
pub fn reset_memory_stats() -> (usize, usize) {
    (0, 0)
}
