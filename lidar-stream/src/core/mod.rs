//! Core abstractions for the streaming pipeline

pub mod context;
pub mod types;

pub use context::PipelineContext;
