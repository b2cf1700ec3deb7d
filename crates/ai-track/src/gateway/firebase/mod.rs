//! REST client for Cloud Firestore and the Firebase Identity Toolkit.

mod auth;
mod firestore;

use std::fmt;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use self::auth::{AccessTokenProvider, IdTokenVerifier};
use self::firestore::{ListDocumentsResponse, RawDocument, RunQueryItem};
use super::{
    CreatedIdentity, Document, DocumentPage, DocumentRef, EqualityFilter, FieldWrites,
    GatewayError, Identity, PersistenceGateway,
};

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Base URLs, overridable to point at emulators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirebaseEndpoints {
    pub firestore: String,
    pub identity_toolkit: String,
    pub jwks: String,
}

impl Default for FirebaseEndpoints {
    fn default() -> Self {
        Self {
            firestore: "https://firestore.googleapis.com/v1".to_string(),
            identity_toolkit: "https://identitytoolkit.googleapis.com/v1".to_string(),
            jwks: "https://www.googleapis.com/service_accounts/v1/jwk/securetoken@system.gserviceaccount.com"
                .to_string(),
        }
    }
}

/// The subset of a Google service-account key file the gateway needs.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub project_id: String,
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub private_key_id: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("project_id", &self.project_id)
            .field("client_email", &self.client_email)
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

impl ServiceAccountKey {
    pub async fn from_file(path: &Path) -> Result<Self, GatewayError> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|err| GatewayError::Credentials(format!("{}: {err}", path.display())))?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, GatewayError> {
        let key: ServiceAccountKey = serde_json::from_str(raw)
            .map_err(|err| GatewayError::Credentials(format!("malformed key file: {err}")))?;
        if key.project_id.trim().is_empty() {
            return Err(GatewayError::Credentials(
                "key file has an empty project_id".to_string(),
            ));
        }
        Ok(key)
    }
}

#[derive(Debug, Deserialize)]
struct GoogleErrorEnvelope {
    error: GoogleErrorBody,
}

#[derive(Debug, Deserialize)]
struct GoogleErrorBody {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignUpResponse {
    local_id: String,
}

pub struct FirebaseGateway {
    http: reqwest::Client,
    project_id: String,
    endpoints: FirebaseEndpoints,
    tokens: AccessTokenProvider,
    verifier: IdTokenVerifier,
}

impl fmt::Debug for FirebaseGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FirebaseGateway")
            .field("project_id", &self.project_id)
            .field("endpoints", &self.endpoints)
            .finish_non_exhaustive()
    }
}

impl FirebaseGateway {
    pub async fn from_key_file(path: &Path, timeout: Duration) -> Result<Self, GatewayError> {
        let key = ServiceAccountKey::from_file(path).await?;
        Self::new(&key, timeout, FirebaseEndpoints::default())
    }

    pub fn new(
        key: &ServiceAccountKey,
        timeout: Duration,
        endpoints: FirebaseEndpoints,
    ) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| GatewayError::Transport(err.to_string()))?;
        let tokens = AccessTokenProvider::new(key)?;
        let verifier = IdTokenVerifier::new(key.project_id.clone(), endpoints.jwks.clone());

        Ok(Self {
            http,
            project_id: key.project_id.clone(),
            endpoints,
            tokens,
            verifier,
        })
    }

    fn database_path(&self) -> String {
        format!("projects/{}/databases/(default)/documents", self.project_id)
    }

    fn document_name(&self, collection: &str, id: &str) -> String {
        format!("{}/{collection}/{id}", self.database_path())
    }

    fn documents_url(&self, suffix: &str) -> String {
        format!("{}/{}{suffix}", self.endpoints.firestore, self.database_path())
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, GatewayError> {
        let token = self.tokens.access_token(&self.http).await?;
        let response = request.bearer_auth(token).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<GoogleErrorEnvelope>(&body)
            .map(|envelope| envelope.error.message)
            .unwrap_or(body);
        Err(GatewayError::Backend {
            status: status.as_u16(),
            message,
        })
    }

    async fn commit(&self, write: Value) -> Result<(), GatewayError> {
        let request = self
            .http
            .post(self.documents_url(":commit"))
            .json(&json!({ "writes": [write] }));
        self.send::<Value>(request).await.map(|_| ())
    }
}

/// Map Identity Toolkit error codes such as `WEAK_PASSWORD : Password should be...`.
pub(crate) fn identity_error(email: &str, status: u16, message: &str) -> GatewayError {
    let code = message
        .split(|c: char| c == ':' || c.is_whitespace())
        .next()
        .unwrap_or_default();
    match code {
        "EMAIL_EXISTS" | "DUPLICATE_EMAIL" => GatewayError::IdentityExists(email.to_string()),
        "INVALID_EMAIL" | "WEAK_PASSWORD" | "MISSING_PASSWORD" | "INVALID_PASSWORD"
        | "MISSING_EMAIL" => GatewayError::InvalidCredentialShape(message.to_string()),
        _ => GatewayError::Backend {
            status,
            message: message.to_string(),
        },
    }
}

#[async_trait]
impl PersistenceGateway for FirebaseGateway {
    async fn verify_token(&self, token: &str) -> Result<Identity, GatewayError> {
        self.verifier.verify(&self.http, token).await
    }

    async fn create_document(
        &self,
        collection: &str,
        fields: FieldWrites,
    ) -> Result<String, GatewayError> {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let write = firestore::create_write(&self.document_name(collection, &id), &fields)?;
        self.commit(write).await?;
        Ok(id)
    }

    async fn query_documents(
        &self,
        collection: &str,
        filters: &[EqualityFilter],
    ) -> Result<Vec<Document>, GatewayError> {
        let request = self
            .http
            .post(self.documents_url(":runQuery"))
            .json(&firestore::structured_query(collection, filters));
        let items: Vec<RunQueryItem> = self.send(request).await?;

        items
            .into_iter()
            .filter_map(|item| item.document)
            .map(RawDocument::into_document)
            .collect()
    }

    async fn list_documents(
        &self,
        collection: &str,
        page_size: u32,
        page_token: Option<&str>,
    ) -> Result<DocumentPage, GatewayError> {
        let mut request = self
            .http
            .get(self.documents_url(&format!("/{collection}")))
            .query(&[("pageSize", page_size.to_string())]);
        if let Some(token) = page_token {
            request = request.query(&[("pageToken", token)]);
        }

        let listing: ListDocumentsResponse = self.send(request).await?;
        let documents = listing
            .documents
            .into_iter()
            .map(RawDocument::into_document)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(DocumentPage {
            documents,
            next_page_token: listing.next_page_token.filter(|token| !token.is_empty()),
        })
    }

    async fn create_identity(
        &self,
        email: &str,
        password: &str,
    ) -> Result<CreatedIdentity, GatewayError> {
        let url = format!(
            "{}/projects/{}/accounts",
            self.endpoints.identity_toolkit, self.project_id
        );
        let request = self.http.post(url).json(&json!({
            "email": email,
            "password": password,
            "emailVerified": false,
            "disabled": false,
        }));

        match self.send::<SignUpResponse>(request).await {
            Ok(created) => Ok(CreatedIdentity {
                auth_uid: created.local_id,
            }),
            Err(GatewayError::Backend { status, message }) => {
                Err(identity_error(email, status, &message))
            }
            Err(other) => Err(other),
        }
    }

    async fn update_document_atomic(
        &self,
        document: &DocumentRef,
        writes: FieldWrites,
    ) -> Result<(), GatewayError> {
        let name = self.document_name(&document.collection, &document.id);
        let write = firestore::update_write(&name, &writes)?;
        match self.commit(write).await {
            Err(GatewayError::Backend { status: 404, .. }) => {
                Err(GatewayError::NotFound(document.to_string()))
            }
            other => other,
        }
    }
}
