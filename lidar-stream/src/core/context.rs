//! Explicit per-pipeline context
//!
//! Every stage, streamer and adapter receives a [`PipelineContext`] instead of
//! reaching for process-wide state, so several independent pipelines can live
//! in one process (and in one test binary).

use crate::config::AppConfig;
use crate::core::types::OutputMode;
use crate::error::Result;
use crate::pool::{MemoryPool, PoolCapacities};
use std::sync::Arc;

/// Shared handles for one pipeline instance
#[derive(Clone)]
pub struct PipelineContext {
    pool: Arc<MemoryPool>,
    device_version: u32,
}

impl PipelineContext {
    pub fn new(pool: Arc<MemoryPool>, device_version: u32) -> Self {
        Self {
            pool,
            device_version,
        }
    }

    /// Build the pool described by the configuration and wrap it
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let mode = config.output_mode()?;
        let capacities = PoolCapacities::from_config(&config.pipeline);
        let pool = MemoryPool::new(mode, capacities);
        Ok(Self::new(Arc::new(pool), config.device.device_version))
    }

    #[inline]
    pub fn pool(&self) -> &Arc<MemoryPool> {
        &self.pool
    }

    #[inline]
    pub fn output_mode(&self) -> OutputMode {
        self.pool.output_mode()
    }

    #[inline]
    pub fn device_version(&self) -> u32 {
        self.device_version
    }
}
