//! # vaultsync-sync
//!
//! The sync pipeline: change detection, rate-limited concurrent fetching,
//! conversion, atomic conflict-resolving writes and run reporting.
//!
//! [`SyncOrchestrator`] ties the pieces together; supply a [`Fetcher`] for
//! the remote source and a [`Converter`] (usually
//! [`vaultsync_render::MarkdownConverter`]).

pub mod change_cache;
pub mod conflict;
pub mod error;
pub mod executor;
pub mod integrity;
pub mod orchestrator;
pub mod pipeline;
pub mod rate_limit;
pub mod report;
pub mod result;
pub mod retry;
pub mod source;
pub mod writer;

pub use async_trait::async_trait;
pub use change_cache::{ChangeCache, ChangeSet};
pub use error::{ConvertError, SyncError, UpstreamError};
pub use executor::{ConcurrentExecutor, ProcessingResult};
pub use orchestrator::{
    CleanupReport, ConnectionReport, SyncOrchestrator, SyncPreview, SyncStatistics,
    ValidationReport,
};
pub use pipeline::{SyncOptions, SyncScope};
pub use rate_limit::RateLimiter;
pub use result::{InterruptionReport, SyncResult, SyncState};
pub use retry::RetryPolicy;
pub use source::{Converter, Fetcher, ItemPage, ListQuery};
pub use writer::{AtomicFileWriter, WriteReport};
