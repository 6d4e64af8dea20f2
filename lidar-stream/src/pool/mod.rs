//! Memory pool manager
//!
//! Fixed-capacity free-list pools for the three entity kinds the pipeline
//! moves around:
//!
//! | Kind | Used in | Exhaustion |
//! |------|---------|------------|
//! | Work unit | both modes | warning, `None` (caller drops the unit of work) |
//! | Processed return | `ProcessedData` | `Error::PoolExhausted` (fatal sizing defect) |
//! | Raw capture unit | `RawData` | `Error::PoolExhausted` (fatal sizing defect) |
//!
//! The output mode picks which of the two payload pools is populated; the
//! other is created empty. All entities are built during construction and
//! recycled afterwards, so no allocation happens on the steady-state path.
//!
//! Free-list mutation for all three pools is serialized by one lock shared
//! by the adapter thread and the streamer thread.

mod arena;

pub use arena::Handle;

use crate::config::PipelineConfig;
use crate::core::types::{
    ChunkHandle, ChunkPayload, EntityKind, OutputMode, ProcessedReturn, RawCaptureUnit, RawHandle,
    ReturnHandle, WorkUnit,
};
use crate::error::{Error, Result};
use arena::{Arena, FreeList};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Log every Nth work-unit exhaustion after the first
const EXHAUSTION_LOG_INTERVAL: u64 = 100;

/// Pool sizes fixed at construction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolCapacities {
    pub chunks: usize,
    pub returns: usize,
    pub raw_units: usize,
    /// Byte size of each raw capture unit
    pub raw_unit_size: usize,
}

impl PoolCapacities {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            chunks: config.chunk_pool,
            returns: config.return_pool,
            raw_units: config.raw_pool,
            raw_unit_size: config.raw_unit_size,
        }
    }
}

struct FreeLists {
    chunks: FreeList,
    returns: FreeList,
    raw: FreeList,
}

/// Fixed-capacity pools for one pipeline instance
pub struct MemoryPool {
    mode: OutputMode,
    chunks: Arena<WorkUnit>,
    returns: Arena<ProcessedReturn>,
    raw: Arena<RawCaptureUnit>,
    raw_unit_size: usize,
    free: Mutex<FreeLists>,
    chunk_exhaustions: AtomicU64,
}

impl MemoryPool {
    /// Warm up the pools for `mode`
    pub fn new(mode: OutputMode, capacities: PoolCapacities) -> Self {
        let (return_count, raw_count) = match mode {
            OutputMode::ProcessedData => (capacities.returns, 0),
            OutputMode::RawData => (0, capacities.raw_units),
        };

        let (chunks, chunk_free) = Arena::new(EntityKind::Chunk, capacities.chunks, WorkUnit::new);
        let (returns, return_free) =
            Arena::new(EntityKind::ProcessedReturn, return_count, ProcessedReturn::new);
        let (raw, raw_free) = Arena::new(EntityKind::RawCapture, raw_count, || {
            RawCaptureUnit::with_capacity(capacities.raw_unit_size)
        });

        log::info!(
            "Memory pool ready ({} mode): {} work units, {} returns, {} raw units",
            mode,
            capacities.chunks,
            return_count,
            raw_count
        );

        Self {
            mode,
            chunks,
            returns,
            raw,
            raw_unit_size: capacities.raw_unit_size,
            free: Mutex::new(FreeLists {
                chunks: chunk_free,
                returns: return_free,
                raw: raw_free,
            }),
            chunk_exhaustions: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn output_mode(&self) -> OutputMode {
        self.mode
    }

    /// Largest capture a raw unit can hold
    #[inline]
    pub fn raw_unit_size(&self) -> usize {
        self.raw_unit_size
    }

    // ========================================================================
    // Allocation
    // ========================================================================

    /// Allocate a work unit
    ///
    /// Exhaustion is recoverable: a warning is logged and `None` returned so
    /// the caller can drop one unit of work.
    pub fn get_return_chunk(&self) -> Option<ChunkHandle> {
        let handle = {
            let mut free = self.free.lock();
            self.chunks.claim(&mut free.chunks)
        };

        if handle.is_none() {
            let count = self.chunk_exhaustions.fetch_add(1, Ordering::Relaxed);
            if count % EXHAUSTION_LOG_INTERVAL == 0 {
                log::warn!(
                    "Work unit pool exhausted ({} slots), dropping work ({} drops so far)",
                    self.chunks.capacity(),
                    count + 1
                );
            }
        }
        handle
    }

    /// Allocate a processed return
    ///
    /// Exhaustion means the pool was sized below the worst case in flight.
    pub fn get_processed_return(&self) -> Result<ReturnHandle> {
        let handle = {
            let mut free = self.free.lock();
            self.returns.claim(&mut free.returns)
        };
        handle.ok_or_else(|| {
            log::error!(
                "Processed return pool exhausted ({} slots); pool is undersized",
                self.returns.capacity()
            );
            Error::PoolExhausted(EntityKind::ProcessedReturn)
        })
    }

    /// Allocate a raw capture unit
    pub fn get_raw_capture_unit(&self) -> Result<RawHandle> {
        let handle = {
            let mut free = self.free.lock();
            self.raw.claim(&mut free.raw)
        };
        handle.ok_or_else(|| {
            log::error!(
                "Raw capture pool exhausted ({} slots); pool is undersized",
                self.raw.capacity()
            );
            Error::PoolExhausted(EntityKind::RawCapture)
        })
    }

    // ========================================================================
    // Disposal
    // ========================================================================

    /// Dispose a work unit and everything it references
    ///
    /// Referenced returns or the raw unit are reset and returned first, then
    /// the work unit itself. A stale reference is logged and skipped so the
    /// remaining entities still make it back; the first error is returned.
    pub fn dispose_chunk(&self, chunk: ChunkHandle) -> Result<()> {
        let mut free = self.free.lock();
        let payload = self.chunks.with(chunk, |unit| *unit.payload())?;
        let mut first_error = None;

        match payload {
            ChunkPayload::Empty => {}
            ChunkPayload::Returns { handles, used } => {
                for &handle in &handles[..used] {
                    if let Err(e) = self.release_return(&mut free, handle) {
                        log::error!("Dispose of {:?} failed: {}", handle, e);
                        first_error.get_or_insert(e);
                    }
                }
            }
            ChunkPayload::Raw(handle) => {
                if let Err(e) = self.release_raw(&mut free, handle) {
                    log::error!("Dispose of {:?} failed: {}", handle, e);
                    first_error.get_or_insert(e);
                }
            }
        }

        self.chunks.with(chunk, WorkUnit::reset)?;
        self.chunks.release(&mut free.chunks, chunk)?;

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Dispose a processed return that never made it into a work unit
    pub fn dispose_return(&self, handle: ReturnHandle) -> Result<()> {
        let mut free = self.free.lock();
        self.release_return(&mut free, handle)
    }

    /// Dispose a raw capture unit that never made it into a work unit
    pub fn dispose_raw(&self, handle: RawHandle) -> Result<()> {
        let mut free = self.free.lock();
        self.release_raw(&mut free, handle)
    }

    fn release_return(&self, free: &mut FreeLists, handle: ReturnHandle) -> Result<()> {
        self.returns.with(handle, ProcessedReturn::reset)?;
        self.returns.release(&mut free.returns, handle)
    }

    fn release_raw(&self, free: &mut FreeLists, handle: RawHandle) -> Result<()> {
        self.raw.with(handle, RawCaptureUnit::reset)?;
        self.raw.release(&mut free.raw, handle)
    }

    // ========================================================================
    // Entity access
    // ========================================================================

    pub fn with_chunk<R>(&self, handle: ChunkHandle, f: impl FnOnce(&mut WorkUnit) -> R) -> Result<R> {
        self.chunks.with(handle, f)
    }

    pub fn with_return<R>(
        &self,
        handle: ReturnHandle,
        f: impl FnOnce(&mut ProcessedReturn) -> R,
    ) -> Result<R> {
        self.returns.with(handle, f)
    }

    pub fn with_raw<R>(&self, handle: RawHandle, f: impl FnOnce(&mut RawCaptureUnit) -> R) -> Result<R> {
        self.raw.with(handle, f)
    }

    // ========================================================================
    // Statistics
    // ========================================================================

    /// Free entities of a kind
    pub fn available(&self, kind: EntityKind) -> usize {
        let free = self.free.lock();
        match kind {
            EntityKind::Chunk => free.chunks.len(),
            EntityKind::ProcessedReturn => free.returns.len(),
            EntityKind::RawCapture => free.raw.len(),
        }
    }

    /// Total entities of a kind
    pub fn capacity(&self, kind: EntityKind) -> usize {
        match kind {
            EntityKind::Chunk => self.chunks.capacity(),
            EntityKind::ProcessedReturn => self.returns.capacity(),
            EntityKind::RawCapture => self.raw.capacity(),
        }
    }

    /// Entities of a kind currently live (allocated and not yet disposed)
    pub fn in_flight(&self, kind: EntityKind) -> usize {
        self.capacity(kind) - self.available(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(chunks: usize, returns: usize, raw: usize) -> PoolCapacities {
        PoolCapacities {
            chunks,
            returns,
            raw_units: raw,
            raw_unit_size: 32,
        }
    }

    #[test]
    fn test_mode_selects_payload_pool() {
        let pool = MemoryPool::new(OutputMode::ProcessedData, caps(4, 8, 8));
        assert_eq!(pool.capacity(EntityKind::ProcessedReturn), 8);
        assert_eq!(pool.capacity(EntityKind::RawCapture), 0);

        let pool = MemoryPool::new(OutputMode::RawData, caps(4, 8, 8));
        assert_eq!(pool.capacity(EntityKind::ProcessedReturn), 0);
        assert_eq!(pool.capacity(EntityKind::RawCapture), 8);
        assert!(pool.get_processed_return().is_err());
    }

    #[test]
    fn test_chunk_exhaustion_returns_none() {
        let pool = MemoryPool::new(OutputMode::ProcessedData, caps(2, 1, 0));
        let a = pool.get_return_chunk();
        let b = pool.get_return_chunk();
        assert!(a.is_some() && b.is_some());
        assert!(pool.get_return_chunk().is_none());

        pool.dispose_chunk(a.unwrap()).unwrap();
        assert!(pool.get_return_chunk().is_some());
    }

    #[test]
    fn test_return_exhaustion_is_fatal() {
        let pool = MemoryPool::new(OutputMode::ProcessedData, caps(1, 2, 0));
        let _a = pool.get_processed_return().unwrap();
        let _b = pool.get_processed_return().unwrap();

        let err = pool.get_processed_return().unwrap_err();
        assert!(matches!(err, Error::PoolExhausted(EntityKind::ProcessedReturn)));
        assert!(err.is_fatal());
        assert_eq!(pool.in_flight(EntityKind::ProcessedReturn), 2);
    }

    #[test]
    fn test_dispose_chunk_releases_returns() {
        let pool = MemoryPool::new(OutputMode::ProcessedData, caps(2, 4, 0));
        let chunk = pool.get_return_chunk().unwrap();

        for i in 0..3 {
            let ret = pool.get_processed_return().unwrap();
            pool.with_return(ret, |r| r.channels[0].range = 100 + i).unwrap();
            assert!(pool.with_chunk(chunk, |c| c.push_return(ret)).unwrap());
        }
        assert_eq!(pool.in_flight(EntityKind::ProcessedReturn), 3);

        pool.dispose_chunk(chunk).unwrap();
        assert_eq!(pool.available(EntityKind::ProcessedReturn), 4);
        assert_eq!(pool.available(EntityKind::Chunk), 2);

        // Recycled entities come back reset
        let ret = pool.get_processed_return().unwrap();
        assert_eq!(pool.with_return(ret, |r| r.channels[0].range).unwrap(), 0);
        let chunk = pool.get_return_chunk().unwrap();
        assert!(pool.with_chunk(chunk, |c| c.is_empty()).unwrap());
    }

    #[test]
    fn test_double_dispose_detected() {
        let pool = MemoryPool::new(OutputMode::RawData, caps(1, 0, 1));
        let chunk = pool.get_return_chunk().unwrap();
        let raw = pool.get_raw_capture_unit().unwrap();
        pool.with_chunk(chunk, |c| c.set_raw(raw)).unwrap();

        pool.dispose_chunk(chunk).unwrap();
        assert!(matches!(
            pool.dispose_chunk(chunk),
            Err(Error::StaleHandle(EntityKind::Chunk))
        ));
        assert!(pool.dispose_raw(raw).is_err());
        assert_eq!(pool.available(EntityKind::RawCapture), 1);
    }

    #[test]
    fn test_capacity_bound_under_concurrency() {
        use std::sync::Arc;
        use std::thread;

        let pool = Arc::new(MemoryPool::new(OutputMode::ProcessedData, caps(1, 16, 0)));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let pool = Arc::clone(&pool);
                thread::spawn(move || {
                    let mut held = Vec::new();
                    while let Ok(h) = pool.get_processed_return() {
                        held.push(h);
                    }
                    held
                })
            })
            .collect();

        let total: usize = handles.into_iter().map(|h| h.join().unwrap().len()).sum();
        assert_eq!(total, 16);
        assert_eq!(pool.available(EntityKind::ProcessedReturn), 0);
    }
}
