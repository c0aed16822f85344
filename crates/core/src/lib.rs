//! Domain types shared across the bimbridge workspace.
//!
//! - [`job`]: the job record and its lifecycle state machine.
//! - [`formats`]: file formats and the pure backend dispatch table.
//! - [`protocol`]: the real-time channel's wire messages.
//! - [`sanitize`]: scrubbing of messages and file names leaving the process.
//! - [`error`]: the shared [`CoreError`](error::CoreError) taxonomy.

pub mod error;
pub mod formats;
pub mod job;
pub mod protocol;
pub mod sanitize;
pub mod types;
