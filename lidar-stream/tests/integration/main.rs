//! End-to-end tests over loopback sockets
//!
//! Each test builds its own pipeline context, binds ephemeral ports and
//! drives the adapters directly from the synthetic source, so tests run in
//! parallel without sharing state.
//!
//! ```bash
//! cargo test --test integration -- --nocapture
//! ```

mod harness;
mod processed;
mod raw;
