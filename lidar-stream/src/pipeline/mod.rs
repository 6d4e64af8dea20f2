//! Pipeline stages: a bounded ring per stage and one worker thread each

pub mod ring;
pub mod stage;

pub use ring::{ChunkRing, MAX_BUFFER_SIZE};
pub use stage::{ChunkHandler, ChunkSink, PipelineStage};
