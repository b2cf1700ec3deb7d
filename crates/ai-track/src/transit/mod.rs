//! HTTP surface of the mobile backend: risk scoring, vehicle registration and
//! route lookup, backed by an optional document store.

pub mod domain;
pub mod router;
pub mod service;

#[cfg(test)]
mod tests;

pub use domain::{
    PredictRequest, PredictResponse, RegistrationResponse, RoutesQuery, TransitRegistration,
    TransitRegistrationRequest,
};
pub use router::transit_router;
pub use service::{TransitError, TransitService, ROUTES_COLLECTION, TRANSIT_COLLECTION};
