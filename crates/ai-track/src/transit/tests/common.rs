use std::sync::Arc;

use async_trait::async_trait;
use axum::response::Response;
use serde_json::Value;

use crate::gateway::{
    CreatedIdentity, Document, DocumentPage, DocumentRef, EqualityFilter, FieldWrites, Gateway,
    GatewayError, Identity, MemoryGateway, PersistenceGateway,
};
use crate::scoring::WeightModel;
use crate::telemetry::RecordingSink;
use crate::transit::{transit_router, TransitService};

pub(super) const OPERATOR_TOKEN: &str = "token-operator-7";
pub(super) const OPERATOR_UID: &str = "op-7";

pub(super) fn model() -> Arc<WeightModel> {
    Arc::new(WeightModel::new(vec![0.5, -0.25, 1.0], 0.1).expect("finite weights"))
}

pub(super) fn seeded_gateway() -> MemoryGateway {
    MemoryGateway::default()
        .with_token(OPERATOR_TOKEN, OPERATOR_UID)
        .with_document(
            "routes",
            "r1",
            serde_json::json!({ "vehicle": "bus", "type": "express", "name": "Harbor Line" }),
        )
        .with_document(
            "routes",
            "r2",
            serde_json::json!({ "vehicle": "bus", "type": "local", "name": "Old Town Loop" }),
        )
        .with_document(
            "routes",
            "r3",
            serde_json::json!({ "vehicle": "tram", "type": "express", "name": "Riverside" }),
        )
}

pub(super) fn build_service(gateway: Gateway) -> (TransitService, Arc<RecordingSink>) {
    let events = Arc::new(RecordingSink::default());
    let service = TransitService::new(model(), gateway, events.clone());
    (service, events)
}

pub(super) fn memory_service() -> (TransitService, Arc<MemoryGateway>, Arc<RecordingSink>) {
    let gateway = Arc::new(seeded_gateway());
    let shared: Arc<dyn PersistenceGateway> = gateway.clone();
    let (service, events) = build_service(Some(shared));
    (service, gateway, events)
}

pub(super) fn router_with_service(service: TransitService) -> axum::Router {
    transit_router(Arc::new(service))
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}

/// Accepts every token but fails every store call.
pub(super) struct UnavailableGateway;

fn offline() -> GatewayError {
    GatewayError::Transport("connection refused by 10.0.0.4".to_string())
}

#[async_trait]
impl PersistenceGateway for UnavailableGateway {
    async fn verify_token(&self, token: &str) -> Result<Identity, GatewayError> {
        Ok(Identity {
            uid: format!("uid-for-{token}"),
        })
    }

    async fn create_document(
        &self,
        _collection: &str,
        _fields: FieldWrites,
    ) -> Result<String, GatewayError> {
        Err(offline())
    }

    async fn query_documents(
        &self,
        _collection: &str,
        _filters: &[EqualityFilter],
    ) -> Result<Vec<Document>, GatewayError> {
        Err(offline())
    }

    async fn list_documents(
        &self,
        _collection: &str,
        _page_size: u32,
        _page_token: Option<&str>,
    ) -> Result<DocumentPage, GatewayError> {
        Err(offline())
    }

    async fn create_identity(
        &self,
        _email: &str,
        _password: &str,
    ) -> Result<CreatedIdentity, GatewayError> {
        Err(offline())
    }

    async fn update_document_atomic(
        &self,
        _document: &DocumentRef,
        _writes: FieldWrites,
    ) -> Result<(), GatewayError> {
        Err(offline())
    }
}
