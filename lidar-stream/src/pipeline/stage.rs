//! Pipeline stage: one worker thread fed by a bounded chunk ring
//!
//! The producer side never blocks. A ring that would become full is a sizing
//! error and is reported as [`Error::BufferOverflow`] instead of throttling
//! the real-time source.
//!
//! The worker dequeues in strict FIFO order, runs the stage's
//! [`ChunkHandler`], then either hands the chunk to the downstream stage or
//! returns it to the pool.

use super::ring::{ChunkRing, DEFAULT_BUFFER_SIZE};
use crate::core::types::ChunkHandle;
use crate::core::PipelineContext;
use crate::error::{Error, Result};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Per-chunk processing hook run on the stage's worker thread
pub trait ChunkHandler: Send + 'static {
    /// Process one chunk
    ///
    /// The chunk stays owned by the stage; it is forwarded or disposed after
    /// this returns, whatever the result.
    fn handle_chunk(&mut self, chunk: ChunkHandle, ctx: &PipelineContext) -> Result<()>;

    /// Called once on the worker thread after the ring has been drained
    fn on_stop(&mut self, _ctx: &PipelineContext) {}
}

/// Anything that accepts chunks from an upstream producer
pub trait ChunkSink: Send + Sync {
    fn hand_chunk_in(&self, chunk: ChunkHandle) -> Result<()>;
}

struct QueueState {
    ring: ChunkRing,
    shutdown: bool,
}

struct Shared {
    queue: Mutex<QueueState>,
    available: Condvar,
}

/// Single-consumer stage with a dedicated worker thread
pub struct PipelineStage {
    name: String,
    ctx: PipelineContext,
    shared: Arc<Shared>,
    downstream: Option<Arc<dyn ChunkSink>>,
    worker: Option<JoinHandle<()>>,
}

impl PipelineStage {
    pub fn new(name: impl Into<String>, ctx: PipelineContext) -> Result<Self> {
        Ok(Self {
            name: name.into(),
            ctx,
            shared: Arc::new(Shared {
                queue: Mutex::new(QueueState {
                    ring: ChunkRing::new(DEFAULT_BUFFER_SIZE)?,
                    shutdown: false,
                }),
                available: Condvar::new(),
            }),
            downstream: None,
            worker: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Set the ring capacity (only before `start`)
    pub fn set_buffer_size(&mut self, size: usize) -> Result<()> {
        if self.is_running() {
            return Err(Error::AlreadyRunning);
        }
        self.shared.queue.lock().ring.resize(size)
    }

    pub fn buffer_size(&self) -> usize {
        self.shared.queue.lock().ring.capacity()
    }

    /// Chain a downstream stage (only before `start`)
    ///
    /// Processed chunks are handed on instead of being returned to the pool.
    pub fn set_downstream(&mut self, next: Arc<dyn ChunkSink>) -> Result<()> {
        if self.is_running() {
            return Err(Error::AlreadyRunning);
        }
        self.downstream = Some(next);
        Ok(())
    }

    /// Chunks waiting in the ring
    pub fn queued(&self) -> usize {
        self.shared.queue.lock().ring.len()
    }

    /// Spawn the worker thread
    pub fn start<H: ChunkHandler>(&mut self, mut handler: H) -> Result<()> {
        if self.is_running() {
            return Err(Error::AlreadyRunning);
        }
        self.shared.queue.lock().shutdown = false;

        let shared = Arc::clone(&self.shared);
        let ctx = self.ctx.clone();
        let downstream = self.downstream.clone();
        let name = self.name.clone();

        let worker = thread::Builder::new()
            .name(format!("stage-{}", self.name))
            .spawn(move || {
                log::info!("Stage {} worker started", name);
                let processed = Self::worker_loop(&shared, &ctx, downstream.as_deref(), &mut handler);
                handler.on_stop(&ctx);
                log::info!("Stage {} worker exiting ({} chunks)", name, processed);
            })?;

        self.worker = Some(worker);
        Ok(())
    }

    fn worker_loop<H: ChunkHandler>(
        shared: &Shared,
        ctx: &PipelineContext,
        downstream: Option<&dyn ChunkSink>,
        handler: &mut H,
    ) -> u64 {
        let mut processed = 0u64;

        loop {
            let chunk = {
                let mut queue = shared.queue.lock();
                loop {
                    // Drain before honoring shutdown
                    if let Some(chunk) = queue.ring.pop() {
                        break Some(chunk);
                    }
                    if queue.shutdown {
                        break None;
                    }
                    shared.available.wait(&mut queue);
                }
            };
            let Some(chunk) = chunk else {
                return processed;
            };

            if let Err(e) = handler.handle_chunk(chunk, ctx) {
                log::error!("Chunk handler failed on {:?}: {}", chunk, e);
            }
            processed += 1;

            match downstream {
                Some(next) => {
                    if let Err(e) = next.hand_chunk_in(chunk) {
                        log::error!("Downstream hand-off failed: {}", e);
                        if let Err(e) = ctx.pool().dispose_chunk(chunk) {
                            log::error!("Dispose of {:?} failed: {}", chunk, e);
                        }
                    }
                }
                None => {
                    if let Err(e) = ctx.pool().dispose_chunk(chunk) {
                        log::error!("Dispose of {:?} failed: {}", chunk, e);
                    }
                }
            }
        }
    }

    /// Drain the ring, then stop and join the worker
    pub fn stop(&mut self) -> Result<()> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        {
            let mut queue = self.shared.queue.lock();
            queue.shutdown = true;
        }
        self.shared.available.notify_one();
        worker.join().map_err(|_| Error::ThreadPanic)
    }
}

impl ChunkSink for PipelineStage {
    /// Enqueue a chunk without blocking
    ///
    /// On overflow the chunk is not queued and stays with the caller.
    fn hand_chunk_in(&self, chunk: ChunkHandle) -> Result<()> {
        {
            let mut queue = self.shared.queue.lock();
            if queue.shutdown {
                return Err(Error::Other(format!("stage {} is stopped", self.name)));
            }
            if let Err(e) = queue.ring.push(chunk) {
                log::error!("Stage {}: {}", self.name, e);
                return Err(e);
            }
        }
        self.shared.available.notify_one();
        Ok(())
    }
}

impl Drop for PipelineStage {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::error!("Stage {} stop failed: {}", self.name, e);
        }
    }
}
