//! Ingestion pipeline
//!
//! Request handlers submit batches through [`IngestService`] into the bounded
//! [`IngestionQueue`]; the [`WriterPool`] drains it into the store. The
//! [`LifecycleCoordinator`] starts and stops the whole chain.

pub mod ingest;
pub mod lifecycle;
pub mod memstats;
pub mod queue;
pub mod stats;
pub mod writer;

pub use ingest::{IngestService, SubmitReceipt};
pub use lifecycle::{LifecycleCoordinator, LifecycleState};
pub use queue::{EnqueueOutcome, IngestionQueue, RejectReason};
pub use stats::{PipelineGauges, PipelineStats, StatsSnapshot};
pub use writer::{DrainReport, WriterPool, WriterSettings};
