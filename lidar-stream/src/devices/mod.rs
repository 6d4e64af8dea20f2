//! Upstream data sources feeding the adapters
//!
//! Only the synthetic source ships with this crate; a sensor integration
//! implements [`crate::adapters::FovResult`] and calls the adapters directly.

pub mod mock;

pub use mock::{SyntheticFov, SyntheticSource};
