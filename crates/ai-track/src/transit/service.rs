use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;

use super::domain::{
    non_empty, PredictRequest, RegistrationResponse, RoutesQuery, TransitRegistration,
    TransitRegistrationRequest,
};
use crate::gateway::{EqualityFilter, Gateway, GatewayError, Identity};
use crate::scoring::{features_from_value, ScoringError, WeightModel};
use crate::telemetry::{EventSink, ServiceEvent};

pub const TRANSIT_COLLECTION: &str = "transit";
pub const ROUTES_COLLECTION: &str = "routes";

/// Request handling behind the HTTP routes: scoring, registration and route lookup.
///
/// Holds no per-request state; the weight model is read-only and the gateway
/// client is shared as-is between concurrent requests.
pub struct TransitService {
    model: Arc<WeightModel>,
    gateway: Gateway,
    events: Arc<dyn EventSink>,
}

impl TransitService {
    pub fn new(model: Arc<WeightModel>, gateway: Gateway, events: Arc<dyn EventSink>) -> Self {
        Self {
            model,
            gateway,
            events,
        }
    }

    pub fn is_persistent(&self) -> bool {
        self.gateway.is_some()
    }

    /// Verify `token` when both a token and a gateway are present.
    async fn authenticate(
        &self,
        operation: &'static str,
        token: Option<&str>,
    ) -> Result<Option<Identity>, TransitError> {
        let (Some(token), Some(gateway)) = (token, self.gateway.as_ref()) else {
            return Ok(None);
        };

        match gateway.verify_token(token).await {
            Ok(identity) => Ok(Some(identity)),
            Err(err) => {
                self.events.emit(ServiceEvent::TokenRejected {
                    operation,
                    reason: err.to_string(),
                });
                Err(TransitError::Unauthorized)
            }
        }
    }

    fn failed(&self, operation: &'static str, err: GatewayError) -> TransitError {
        self.events.emit(ServiceEvent::OperationFailed {
            operation,
            error: err.to_string(),
        });
        TransitError::Gateway(err)
    }

    pub async fn predict(&self, request: PredictRequest) -> Result<f64, TransitError> {
        let features = request
            .features
            .as_ref()
            .ok_or(ScoringError::NotASequence)
            .and_then(features_from_value)?;

        let token = non_empty(request.token);
        self.authenticate("predict", token.as_deref()).await?;

        let score = self.model.score(&features);
        self.events.emit(ServiceEvent::ScoreComputed {
            features: features.len(),
            score,
        });
        Ok(score)
    }

    pub async fn register(
        &self,
        request: TransitRegistrationRequest,
    ) -> Result<RegistrationResponse, TransitError> {
        let (mut registration, token) =
            TransitRegistration::from_request(request).map_err(TransitError::MissingFields)?;

        let identity = self.authenticate("transit.register", token.as_deref()).await?;
        if registration.operator_uid.is_none() {
            registration.operator_uid = identity.map(|identity| identity.uid);
        }

        let Some(gateway) = self.gateway.as_ref() else {
            let id = format!("transit-{}", Utc::now().timestamp_millis());
            self.events
                .emit(ServiceEvent::TransitNotPersisted { id: id.clone() });
            return Ok(RegistrationResponse {
                success: true,
                id,
                persisted: false,
            });
        };

        let id = gateway
            .create_document(TRANSIT_COLLECTION, registration.into_writes())
            .await
            .map_err(|err| self.failed("transit.register", err))?;
        self.events
            .emit(ServiceEvent::TransitPersisted { id: id.clone() });

        Ok(RegistrationResponse {
            success: true,
            id,
            persisted: true,
        })
    }

    pub async fn routes(&self, query: RoutesQuery) -> Result<Vec<Value>, TransitError> {
        let (Some(vehicle), Some(route_type)) =
            (non_empty(query.vehicle), non_empty(query.route_type))
        else {
            return Err(TransitError::MissingRouteQuery);
        };

        let Some(gateway) = self.gateway.as_ref() else {
            self.events.emit(ServiceEvent::RoutesUnavailable {
                vehicle,
                route_type,
            });
            return Ok(Vec::new());
        };

        let filters = [
            EqualityFilter::new("vehicle", vehicle.as_str()),
            EqualityFilter::new("type", route_type.as_str()),
        ];
        let documents = gateway
            .query_documents(ROUTES_COLLECTION, &filters)
            .await
            .map_err(|err| self.failed("routes", err))?;

        self.events.emit(ServiceEvent::RoutesQueried {
            vehicle,
            route_type,
            matches: documents.len(),
        });

        Ok(documents.into_iter().map(|document| document.into_payload()).collect())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransitError {
    #[error(transparent)]
    InvalidFeatures(#[from] ScoringError),
    #[error("missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<&'static str>),
    #[error("vehicle and type query params required")]
    MissingRouteQuery,
    #[error("invalid auth token")]
    Unauthorized,
    #[error(transparent)]
    Gateway(GatewayError),
}
