//! One-shot conversion of legacy plaintext-password user documents into
//! identity-provider accounts.

mod classify;
mod job;

pub use classify::{classify, RecordClass, SkipReason};
pub use job::{
    FailureStage, MigrationError, MigrationJob, MigrationOptions, MigrationReport,
    MigrationSummary, RecordFailure, EXIT_FAILURES, EXIT_FATAL, EXIT_SUCCESS, USERS_COLLECTION,
};
