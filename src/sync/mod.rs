//! Sync & Replication Module
//!
//! Whole-file replication of the local state file against one remote:
//! fingerprinting, conflict decisions, persisted bookkeeping, the engine
//! running single attempts and the scheduler driving it periodically.

pub mod conflict;
pub mod engine;
pub mod error;
pub mod hash;
pub mod scheduler;
pub mod state;

pub use conflict::{decide, ConflictPolicy, SyncAction};
pub use engine::{SyncEngine, SyncEvent, SyncOutcome, SyncReport};
pub use error::SyncError;
pub use hash::{hash_bytes, Fingerprint};
pub use scheduler::Scheduler;
pub use state::{AttemptResult, StateStore, SyncState};
