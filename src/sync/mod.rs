//! Background reconciliation of local records with the backend.

pub mod backoff;
pub mod connectivity;
pub mod worker;

pub use backoff::{SyncBackoff, SyncBackoffConfig, SyncBackoffStatus};
pub use connectivity::{backend_address, is_reachable, Connectivity, ConnectivityFlag};
pub use worker::{BatchOutcome, SkipReason, SyncState, SyncWorker, SyncWorkerConfig, TickReport};
