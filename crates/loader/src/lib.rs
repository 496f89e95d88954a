//! Compliance Loader Library
//!
//! Turns harvested compliance records into repository entities:
//! - `record`: the harvested row and its validation
//! - `status`: compliance status to repository copy status table
//! - `resolver`: natural key lookups and cache-aware writes
//! - `reconciler`: the per-record reconciliation steps
//! - `batch`: bounded, retrying batch execution

pub mod batch;
pub mod reconciler;
pub mod record;
pub mod resolver;
pub mod status;

pub use batch::{BatchRunner, BatchSummary, RecordFailure};
pub use reconciler::{Change, EntityChange, ReconcileOutcome, Reconciler};
pub use record::HarvestedRecord;
pub use resolver::EntityResolver;
pub use status::{CopyDecision, StatusMapping};
