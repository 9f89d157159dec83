//! campaignindex-evm: JSON-RPC chain client, chunked scanner, repair job and
//! per-chain scheduler.

pub mod builder;
pub mod client;
pub mod pipeline;
pub mod repair;
pub mod retry;
pub mod rpc;
pub mod scanner;
pub mod scheduler;

pub use builder::PipelineBuilder;
pub use client::{ChainClient, HttpChainClient};
pub use pipeline::{ChainPipeline, CycleReport};
pub use repair::{repair_window, RepairJob};
pub use retry::RetryPolicy;
pub use scanner::{ChunkWindow, ChunkedScanner, ScanReport};
pub use scheduler::{Scheduler, SchedulerHandle};
