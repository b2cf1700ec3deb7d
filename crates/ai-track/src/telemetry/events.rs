//! Structured events emitted by the router service and the migration job.
//!
//! Components receive an [`EventSink`] instead of writing to a global logger, so
//! tests can assert on what happened with a [`RecordingSink`].

use std::sync::Mutex;

use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum ServiceEvent {
    GatewayConnected {
        credentials: String,
    },
    GatewayUnavailable {
        reason: String,
    },
    ModelLoaded {
        path: String,
        weights: usize,
    },
    ScoreComputed {
        features: usize,
        score: f64,
    },
    TokenRejected {
        operation: &'static str,
        reason: String,
    },
    TransitPersisted {
        id: String,
    },
    /// Registration accepted while no document store is configured.
    TransitNotPersisted {
        id: String,
    },
    RoutesQueried {
        vehicle: String,
        route_type: String,
        matches: usize,
    },
    RoutesUnavailable {
        vehicle: String,
        route_type: String,
    },
    OperationFailed {
        operation: &'static str,
        error: String,
    },
    MigrationStarted {
        collection: String,
        dry_run: bool,
    },
    MigrationPageLoaded {
        documents: usize,
    },
    RecordSkipped {
        id: String,
        reason: &'static str,
    },
    RecordEligible {
        id: String,
    },
    RecordMigrated {
        id: String,
        auth_uid: String,
    },
    RecordFailed {
        id: String,
        stage: &'static str,
        error: String,
    },
    MigrationFinished {
        created: u64,
        skipped: u64,
        failed: u64,
    },
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: ServiceEvent);
}

/// Forwards events to the process-wide `tracing` subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: ServiceEvent) {
        match event {
            ServiceEvent::GatewayConnected { credentials } => {
                info!(%credentials, "firebase gateway initialized");
            }
            ServiceEvent::GatewayUnavailable { reason } => {
                warn!(%reason, "running without document store; registrations are not persisted");
            }
            ServiceEvent::ModelLoaded { path, weights } => {
                info!(%path, weights, "weight model loaded");
            }
            ServiceEvent::ScoreComputed { features, score } => {
                debug!(features, score, "scored feature vector");
            }
            ServiceEvent::TokenRejected { operation, reason } => {
                warn!(operation, %reason, "rejected auth token");
            }
            ServiceEvent::TransitPersisted { id } => {
                info!(%id, "transit registration stored");
            }
            ServiceEvent::TransitNotPersisted { id } => {
                warn!(%id, "transit registration accepted without persistence");
            }
            ServiceEvent::RoutesQueried {
                vehicle,
                route_type,
                matches,
            } => {
                debug!(%vehicle, %route_type, matches, "routes fetched");
            }
            ServiceEvent::RoutesUnavailable {
                vehicle,
                route_type,
            } => {
                warn!(%vehicle, %route_type, "routes requested without document store");
            }
            ServiceEvent::OperationFailed { operation, error } => {
                error!(operation, %error, "request failed");
            }
            ServiceEvent::MigrationStarted {
                collection,
                dry_run,
            } => {
                info!(%collection, dry_run, "starting user migration");
            }
            ServiceEvent::MigrationPageLoaded { documents } => {
                info!(documents, "inspecting user documents");
            }
            ServiceEvent::RecordSkipped { id, reason } => {
                info!(%id, reason, "skipping user document");
            }
            ServiceEvent::RecordEligible { id } => {
                info!(%id, "user document eligible for migration");
            }
            ServiceEvent::RecordMigrated { id, auth_uid } => {
                info!(%id, %auth_uid, "migrated user document");
            }
            ServiceEvent::RecordFailed { id, stage, error } => {
                error!(%id, stage, %error, "failed to migrate user document");
            }
            ServiceEvent::MigrationFinished {
                created,
                skipped,
                failed,
            } => {
                info!(created, skipped, failed, "migration complete");
            }
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ServiceEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<ServiceEvent> {
        self.events.lock().expect("event mutex poisoned").clone()
    }

    pub fn count(&self, predicate: impl Fn(&ServiceEvent) -> bool) -> usize {
        self.events
            .lock()
            .expect("event mutex poisoned")
            .iter()
            .filter(|event| predicate(event))
            .count()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: ServiceEvent) {
        self.events
            .lock()
            .expect("event mutex poisoned")
            .push(event);
    }
}
