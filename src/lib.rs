// Callback Relay Library - correlates out-of-band workflow webhooks with polling clients
// This exposes the core components for testing and integration

pub mod config;
pub mod correlation;
pub mod error;
pub mod ingest;
pub mod integration;
pub mod observability;
pub mod poll;
pub mod server;
pub mod shutdown;
pub mod sweeper;
pub mod telemetry;

// Re-export key types for easy access
pub use crate::config::{ConfigError, IntegrationConfig, RelayConfig};
pub use correlation::{CorrelationStore, Entry, EntryKind, FinalResult, Lookup, StatusUpdate};
pub use error::{ApiError, IngestError, PollError};
pub use integration::{CallbackIntegration, JsonIntegration};
pub use observability::{RelayMetrics, RelayStats};
pub use server::{build_relay, serve, IntegrationState, RelayBuilder};
pub use shutdown::ShutdownCoordinator;
pub use sweeper::ExpirySweeper;
pub use telemetry::{init_telemetry, shutdown_telemetry};
