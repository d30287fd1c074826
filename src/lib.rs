//! relint: an editor-resident coordination layer that turns file-edit events
//! into an up-to-date, de-duplicated set of static-analysis findings while
//! minimizing calls into a slow external analysis engine.
//!
//! The core pieces: fingerprint-validated caching, dual-backend dispatch
//! with silent fallback, debounced scheduling, severity/suppression
//! filtering, and the aggregate quality metrics behind the dashboard view.

pub mod aggregate;
pub mod backend;
pub mod cache;
pub mod config;
pub mod coordinator;
pub mod fingerprint;
pub mod output;
pub mod registry;
pub mod schedule;
pub mod tracker;
pub mod violation;
pub mod watch;

pub use aggregate::{summarize, Summary};
pub use backend::{
    AnalysisBackend, AnalysisRequest, BackendError, BackendSelection, Dispatcher, OutputFormat,
    Scope,
};
pub use cache::{CacheKey, CacheOptions, CacheStore};
pub use config::Config;
pub use coordinator::{BeginOutcome, Coordinator, CoordinatorOptions, PublishSink, ResourceState};
pub use fingerprint::Fingerprint;
pub use registry::FilterRegistry;
pub use schedule::Debouncer;
pub use tracker::ChangeTracker;
pub use violation::{Severity, Violation};
