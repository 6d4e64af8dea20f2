//! Adapters between the upstream processing pipeline and the streamer
//!
//! | Mode | Adapter | Input | Work unit payload |
//! |------|---------|-------|-------------------|
//! | processed | [`ProcessedDataAdapter`] | [`FovResult`] per field of view | up to 16 returns |
//! | raw | [`RawDataAdapter`] | capture bytes with a [`RawCaptureHeader`] | one raw unit |

pub mod processed;
pub mod raw;
pub mod upstream;

pub use processed::{AdapterStats, ProcessedDataAdapter};
pub use raw::{GateState, RawDataAdapter, RawOutcome};
pub use upstream::{FovResult, RawCaptureHeader};
