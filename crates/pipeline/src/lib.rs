//! Conversion job pipeline.
//!
//! - [`registry`]: the authoritative job store and its update entry point.
//! - [`orchestrator`]: validation, backend dispatch, adapter supervision.
//! - [`adapter`]: the contract every conversion backend implements.
//! - [`poll`]: bounded backoff polling used by remote adapters.
//! - [`sweeper`]: grace-delay and TTL eviction.
//! - [`storage`]: per-job staging directories.
//! - [`service`]: the service object tying all of the above together.

pub mod adapter;
pub mod orchestrator;
pub mod poll;
pub mod registry;
pub mod service;
pub mod storage;
pub mod sweeper;

pub use adapter::{AdapterError, ConversionAdapter, ConversionContext, JobHandle};
pub use orchestrator::{SubmitReceipt, SubmitRequest};
pub use service::{ConversionService, PipelineConfig};
