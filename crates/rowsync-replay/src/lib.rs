//! # rowsync replay
//!
//! Applies a changeset or patchset to a target engine, raising a conflict
//! for every operation that cannot be applied as recorded.
//!
//! ## Key Types
//!
//! - [`apply`] - Replay a buffer inside one savepoint
//! - [`ApplyOptions`] - Conflict resolver and table filter
//! - [`ApplyReport`] - What happened to each operation
//! - [`table_digest`] - Blake3 digest of a table for convergence checks
//!
//! ## Atomicity
//!
//! A replay either completes, or is rolled back entirely: an ABORT
//! resolution, a resolver error, an invalid resolution, or an engine
//! failure all leave the target as it was.

pub mod apply;
pub mod convergence;
pub mod error;
pub mod options;
pub mod report;

pub use apply::{apply, APPLY_SAVEPOINT, TARGET_SCHEMA};
pub use convergence::{table_digest, verify_convergence, ConvergenceResult, TableDigest};
pub use error::{ReplayError, Result};
pub use options::{ApplyOptions, ConflictResolver, ResolverError, TableFilter};
pub use report::ApplyReport;
