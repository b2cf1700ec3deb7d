use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use super::classify::{classify, RecordClass};
use crate::gateway::{
    Document, DocumentRef, FieldWrite, FieldWrites, Gateway, GatewayError, PersistenceGateway,
};
use crate::telemetry::{EventSink, ServiceEvent};

pub const USERS_COLLECTION: &str = "users";

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FATAL: i32 = 1;
pub const EXIT_FAILURES: i32 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationOptions {
    pub collection: String,
    pub page_size: u32,
    /// Classify records without creating identities or updating documents.
    pub dry_run: bool,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            collection: USERS_COLLECTION.to_string(),
            page_size: 300,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    Identity,
    Update,
}

impl FailureStage {
    pub fn label(self) -> &'static str {
        match self {
            FailureStage::Identity => "identity",
            FailureStage::Update => "update",
        }
    }
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFailure {
    pub id: String,
    pub stage: FailureStage,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationSummary {
    pub created: u64,
    pub skipped: u64,
    pub failed: u64,
}

impl MigrationSummary {
    /// Process exit code for a job that ran to completion.
    pub fn exit_code(&self) -> i32 {
        if self.failed > 0 {
            EXIT_FAILURES
        } else {
            EXIT_SUCCESS
        }
    }
}

impl fmt::Display for MigrationSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "created: {}, skipped: {}, failed: {}",
            self.created, self.skipped, self.failed
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub summary: MigrationSummary,
    pub failures: Vec<RecordFailure>,
    /// Records that were (or, on a dry run, would have been) handed to the identity provider.
    pub eligible: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error("no credentials configured; the migration needs a document store")]
    GatewayUnavailable,
    #[error("unable to list collection {collection}: {source}")]
    Listing {
        collection: String,
        source: GatewayError,
    },
}

/// Sequential migration over one collection.
///
/// Records are processed one at a time, identity first and then a single atomic
/// document update. A failing record is reported and the job moves on; only a
/// failed page listing stops the run.
pub struct MigrationJob {
    gateway: Arc<dyn PersistenceGateway>,
    events: Arc<dyn EventSink>,
    options: MigrationOptions,
}

impl MigrationJob {
    pub fn new(
        gateway: Arc<dyn PersistenceGateway>,
        events: Arc<dyn EventSink>,
        options: MigrationOptions,
    ) -> Self {
        Self {
            gateway,
            events,
            options,
        }
    }

    /// Build a job from the optional startup capability. A missing store is fatal here.
    pub fn from_gateway(
        gateway: Gateway,
        events: Arc<dyn EventSink>,
        options: MigrationOptions,
    ) -> Result<Self, MigrationError> {
        let gateway = gateway.ok_or(MigrationError::GatewayUnavailable)?;
        Ok(Self::new(gateway, events, options))
    }

    pub async fn run(&self) -> Result<MigrationReport, MigrationError> {
        self.events.emit(ServiceEvent::MigrationStarted {
            collection: self.options.collection.clone(),
            dry_run: self.options.dry_run,
        });

        let mut report = MigrationReport::default();
        let mut page_token: Option<String> = None;

        loop {
            let page = self
                .gateway
                .list_documents(
                    &self.options.collection,
                    self.options.page_size,
                    page_token.as_deref(),
                )
                .await
                .map_err(|source| MigrationError::Listing {
                    collection: self.options.collection.clone(),
                    source,
                })?;

            self.events.emit(ServiceEvent::MigrationPageLoaded {
                documents: page.documents.len(),
            });

            for document in page.documents {
                self.process(document, &mut report).await;
            }

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        self.events.emit(ServiceEvent::MigrationFinished {
            created: report.summary.created,
            skipped: report.summary.skipped,
            failed: report.summary.failed,
        });
        Ok(report)
    }

    async fn process(&self, document: Document, report: &mut MigrationReport) {
        let (email, password) = match classify(&document.fields) {
            RecordClass::Skip(reason) => {
                report.summary.skipped += 1;
                self.events.emit(ServiceEvent::RecordSkipped {
                    id: document.id,
                    reason: reason.label(),
                });
                return;
            }
            RecordClass::Invalid(reason) => {
                let err = GatewayError::InvalidCredentialShape(reason.to_string());
                return self.fail(report, document.id, FailureStage::Identity, err);
            }
            RecordClass::Eligible { email, password } => (email, password),
        };

        report.eligible += 1;
        self.events.emit(ServiceEvent::RecordEligible {
            id: document.id.clone(),
        });
        if self.options.dry_run {
            return;
        }

        let identity = match self.gateway.create_identity(&email, &password).await {
            Ok(identity) => identity,
            Err(err) => return self.fail(report, document.id, FailureStage::Identity, err),
        };

        let target = DocumentRef::new(self.options.collection.as_str(), document.id.as_str());
        let writes = migrated_writes(&identity.auth_uid);
        if let Err(err) = self.gateway.update_document_atomic(&target, writes).await {
            return self.fail(report, document.id, FailureStage::Update, err);
        }

        report.summary.created += 1;
        self.events.emit(ServiceEvent::RecordMigrated {
            id: document.id,
            auth_uid: identity.auth_uid,
        });
    }

    fn fail(
        &self,
        report: &mut MigrationReport,
        id: String,
        stage: FailureStage,
        err: GatewayError,
    ) {
        let reason = err.to_string();
        self.events.emit(ServiceEvent::RecordFailed {
            id: id.clone(),
            stage: stage.label(),
            error: reason.clone(),
        });
        report.summary.failed += 1;
        report.failures.push(RecordFailure { id, stage, reason });
    }
}

/// The four mutations that mark a document migrated, applied together.
fn migrated_writes(auth_uid: &str) -> FieldWrites {
    FieldWrites::from([
        (
            "authUid".to_string(),
            FieldWrite::Set(Value::String(auth_uid.to_string())),
        ),
        ("migrated".to_string(), FieldWrite::Set(Value::Bool(true))),
        ("migratedAt".to_string(), FieldWrite::ServerTimestamp),
        ("password".to_string(), FieldWrite::Delete),
    ])
}
