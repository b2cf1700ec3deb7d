//! Capability over the external document store and identity provider.
//!
//! The gateway is optional: the API runs without one (degraded mode) while the
//! migration job refuses to start. Every consumer receives a [`Gateway`] and
//! branches on it explicitly.

pub mod firebase;
mod memory;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::config::GatewayConfig;

pub use firebase::{FirebaseEndpoints, FirebaseGateway, ServiceAccountKey};
pub use memory::{JournalEntry, MemoryGateway};

/// Optional gateway handle passed into the router service and the migration job.
pub type Gateway = Option<Arc<dyn PersistenceGateway>>;

pub type Fields = Map<String, Value>;

/// Field-level writes; a single call applies all of them or none.
pub type FieldWrites = BTreeMap<String, FieldWrite>;

#[derive(Debug, Clone, PartialEq)]
pub enum FieldWrite {
    Set(Value),
    /// Resolved by the store at commit time.
    ServerTimestamp,
    Delete,
}

/// Caller identity recovered from a verified ID token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub uid: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedIdentity {
    pub auth_uid: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub fields: Fields,
}

impl Document {
    /// JSON object with the document id merged into its fields. A stored `id`
    /// field takes precedence over the document id.
    pub fn into_payload(self) -> Value {
        let mut payload = Map::with_capacity(self.fields.len() + 1);
        payload.insert("id".to_string(), Value::String(self.id));
        payload.extend(self.fields);
        Value::Object(payload)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DocumentRef {
    pub collection: String,
    pub id: String,
}

impl DocumentRef {
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for DocumentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EqualityFilter {
    pub field: String,
    pub value: Value,
}

impl EqualityFilter {
    pub fn new(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }
}

/// One page of a collection listing, ordered by document id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentPage {
    pub documents: Vec<Document>,
    pub next_page_token: Option<String>,
}

#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    async fn verify_token(&self, token: &str) -> Result<Identity, GatewayError>;

    /// Store a new document under a store-assigned id and return that id.
    async fn create_document(
        &self,
        collection: &str,
        fields: FieldWrites,
    ) -> Result<String, GatewayError>;

    async fn query_documents(
        &self,
        collection: &str,
        filters: &[EqualityFilter],
    ) -> Result<Vec<Document>, GatewayError>;

    async fn list_documents(
        &self,
        collection: &str,
        page_size: u32,
        page_token: Option<&str>,
    ) -> Result<DocumentPage, GatewayError>;

    async fn create_identity(
        &self,
        email: &str,
        password: &str,
    ) -> Result<CreatedIdentity, GatewayError>;

    /// Apply every write to an existing document as one indivisible update.
    async fn update_document_atomic(
        &self,
        document: &DocumentRef,
        writes: FieldWrites,
    ) -> Result<(), GatewayError>;
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("invalid auth token: {0}")]
    InvalidToken(String),
    #[error("an identity already exists for {0}")]
    IdentityExists(String),
    #[error("credential rejected by identity provider: {0}")]
    InvalidCredentialShape(String),
    #[error("document not found: {0}")]
    NotFound(String),
    #[error("invalid write: {0}")]
    InvalidWrite(String),
    #[error("service account credentials unusable: {0}")]
    Credentials(String),
    #[error("unexpected response from store: {0}")]
    Decode(String),
    #[error("gateway request failed: {0}")]
    Transport(String),
    #[error("gateway returned {status}: {message}")]
    Backend { status: u16, message: String },
}

impl From<reqwest::Error> for GatewayError {
    fn from(value: reqwest::Error) -> Self {
        Self::Transport(value.to_string())
    }
}

/// Build the Firebase gateway when credentials are configured.
///
/// `Ok(None)` means no credentials were provided; an error means they were
/// provided but could not be used. Callers decide whether either is fatal.
pub async fn connect(config: &GatewayConfig) -> Result<Gateway, GatewayError> {
    let Some(path) = config.credentials.as_deref() else {
        return Ok(None);
    };

    let gateway = FirebaseGateway::from_key_file(path, config.request_timeout).await?;
    Ok(Some(Arc::new(gateway)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn payload_merges_id_with_fields() {
        let mut fields = Fields::new();
        fields.insert("vehicle".to_string(), json!("bus"));
        let document = Document {
            id: "r1".to_string(),
            fields,
        };
        assert_eq!(
            document.into_payload(),
            json!({ "id": "r1", "vehicle": "bus" })
        );
    }

    #[test]
    fn stored_id_field_wins_over_document_id() {
        let mut fields = Fields::new();
        fields.insert("id".to_string(), json!("legacy"));
        let document = Document {
            id: "r1".to_string(),
            fields,
        };
        assert_eq!(document.into_payload(), json!({ "id": "legacy" }));
    }

    #[tokio::test]
    async fn connect_without_credentials_is_unconfigured() {
        let config = GatewayConfig {
            credentials: None,
            request_timeout: Duration::from_secs(1),
        };
        let gateway = connect(&config).await.expect("no credentials is not an error");
        assert!(gateway.is_none());
    }

    #[tokio::test]
    async fn connect_with_missing_key_file_fails() {
        let config = GatewayConfig {
            credentials: Some("/nonexistent/serviceAccountKey.json".into()),
            request_timeout: Duration::from_secs(1),
        };
        assert!(matches!(
            connect(&config).await,
            Err(GatewayError::Credentials(_))
        ));
    }
}
