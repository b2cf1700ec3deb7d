use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::gateway::{FieldWrite, FieldWrites};

/// Body of `POST /predict`. `features` stays untyped so shape errors map to 400.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PredictRequest {
    #[serde(default)]
    pub features: Option<Value>,
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictResponse {
    pub success: bool,
    pub score: f64,
}

/// Body of `POST /transit/register` as submitted by the mobile client.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitRegistrationRequest {
    #[serde(default)]
    pub transit_name: Option<String>,
    #[serde(default)]
    pub transit_type: Option<String>,
    #[serde(default)]
    pub license_id: Option<String>,
    #[serde(default)]
    pub plate_number: Option<String>,
    #[serde(default)]
    pub operator_uid: Option<String>,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
    #[serde(default)]
    pub token: Option<String>,
}

/// A registration whose required fields are all present and non-empty.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitRegistration {
    pub transit_name: String,
    pub transit_type: String,
    pub license_id: String,
    pub plate_number: String,
    pub operator_uid: Option<String>,
    pub metadata: Map<String, Value>,
}

impl TransitRegistration {
    /// Validate the request, returning the registration and the bearer token if any.
    pub fn from_request(
        request: TransitRegistrationRequest,
    ) -> Result<(Self, Option<String>), Vec<&'static str>> {
        let TransitRegistrationRequest {
            transit_name,
            transit_type,
            license_id,
            plate_number,
            operator_uid,
            metadata,
            token,
        } = request;

        let mut missing = Vec::new();
        let mut require = |value: Option<String>, field: &'static str| {
            let value = non_empty(value);
            if value.is_none() {
                missing.push(field);
            }
            value.unwrap_or_default()
        };

        let registration = Self {
            transit_name: require(transit_name, "transitName"),
            transit_type: require(transit_type, "transitType"),
            license_id: require(license_id, "licenseId"),
            plate_number: require(plate_number, "plateNumber"),
            operator_uid: non_empty(operator_uid),
            metadata: metadata.unwrap_or_default(),
        };

        if missing.is_empty() {
            Ok((registration, non_empty(token)))
        } else {
            Err(missing)
        }
    }

    /// Document fields for the store; `createdAt` is assigned by the server.
    pub fn into_writes(self) -> FieldWrites {
        let operator_uid = self.operator_uid.map(Value::String).unwrap_or(Value::Null);
        FieldWrites::from([
            ("transitName".to_string(), FieldWrite::Set(self.transit_name.into())),
            ("transitType".to_string(), FieldWrite::Set(self.transit_type.into())),
            ("licenseId".to_string(), FieldWrite::Set(self.license_id.into())),
            ("plateNumber".to_string(), FieldWrite::Set(self.plate_number.into())),
            ("operatorUid".to_string(), FieldWrite::Set(operator_uid)),
            ("metadata".to_string(), FieldWrite::Set(Value::Object(self.metadata))),
            ("createdAt".to_string(), FieldWrite::ServerTimestamp),
        ])
    }
}

/// Response of `POST /transit/register`.
///
/// `persisted` is false when no document store is configured and the id was
/// synthesized locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistrationResponse {
    pub success: bool,
    pub id: String,
    pub persisted: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RoutesQuery {
    #[serde(default)]
    pub vehicle: Option<String>,
    #[serde(default, rename = "type")]
    pub route_type: Option<String>,
}

pub(crate) fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|text| !text.is_empty())
}
