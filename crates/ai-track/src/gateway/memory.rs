use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde_json::Value;

use super::{
    CreatedIdentity, Document, DocumentPage, DocumentRef, EqualityFilter, FieldWrite, FieldWrites,
    Fields, GatewayError, Identity, PersistenceGateway,
};

/// Document state right after a committed write.
#[derive(Debug, Clone, PartialEq)]
pub struct JournalEntry {
    pub document: DocumentRef,
    pub fields: Fields,
}

#[derive(Default)]
struct MemoryState {
    collections: BTreeMap<String, BTreeMap<String, Fields>>,
    tokens: HashMap<String, Identity>,
    identities: BTreeMap<String, String>,
    failing_emails: HashSet<String>,
    failing_updates: HashSet<DocumentRef>,
    journal: Vec<JournalEntry>,
    list_calls: usize,
    sequence: u64,
}

impl MemoryState {
    fn next(&mut self, prefix: &str) -> String {
        self.sequence += 1;
        format!("{prefix}-{:06}", self.sequence)
    }
}

/// In-process document store and identity provider.
///
/// Every write is applied under one lock and journaled, so readers never see a
/// partially applied update.
#[derive(Default)]
pub struct MemoryGateway {
    state: Mutex<MemoryState>,
}

impl MemoryGateway {
    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().expect("memory gateway mutex poisoned")
    }

    pub fn with_token(self, token: &str, uid: &str) -> Self {
        self.lock().tokens.insert(
            token.to_string(),
            Identity {
                uid: uid.to_string(),
            },
        );
        self
    }

    /// Seed a document. Anything but a JSON object seeds an empty document.
    pub fn with_document(self, collection: &str, id: &str, fields: Value) -> Self {
        let fields = match fields {
            Value::Object(fields) => fields,
            _ => Fields::new(),
        };
        self.lock()
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), fields);
        self
    }

    /// Make `create_identity` fail with a backend error for this email.
    pub fn failing_identity_for(self, email: &str) -> Self {
        self.lock().failing_emails.insert(email.to_string());
        self
    }

    /// Make `update_document_atomic` fail for this document.
    pub fn failing_update_for(self, collection: &str, id: &str) -> Self {
        self.lock()
            .failing_updates
            .insert(DocumentRef::new(collection, id));
        self
    }

    pub fn document(&self, collection: &str, id: &str) -> Option<Fields> {
        self.lock()
            .collections
            .get(collection)
            .and_then(|documents| documents.get(id))
            .cloned()
    }

    pub fn documents(&self, collection: &str) -> Vec<Document> {
        self.lock()
            .collections
            .get(collection)
            .map(|documents| {
                documents
                    .iter()
                    .map(|(id, fields)| Document {
                        id: id.clone(),
                        fields: fields.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Created identities as `(email, uid)` pairs.
    pub fn identities(&self) -> Vec<(String, String)> {
        self.lock()
            .identities
            .iter()
            .map(|(email, uid)| (email.clone(), uid.clone()))
            .collect()
    }

    pub fn journal(&self) -> Vec<JournalEntry> {
        self.lock().journal.clone()
    }

    pub fn list_calls(&self) -> usize {
        self.lock().list_calls
    }
}

fn server_timestamp() -> Value {
    Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true))
}

#[async_trait]
impl PersistenceGateway for MemoryGateway {
    async fn verify_token(&self, token: &str) -> Result<Identity, GatewayError> {
        self.lock()
            .tokens
            .get(token)
            .cloned()
            .ok_or_else(|| GatewayError::InvalidToken("unknown token".to_string()))
    }

    async fn create_document(
        &self,
        collection: &str,
        fields: FieldWrites,
    ) -> Result<String, GatewayError> {
        let mut stored = Fields::new();
        for (name, write) in fields {
            match write {
                FieldWrite::Set(value) => {
                    stored.insert(name, value);
                }
                FieldWrite::ServerTimestamp => {
                    stored.insert(name, server_timestamp());
                }
                FieldWrite::Delete => {
                    return Err(GatewayError::InvalidWrite(
                        "field deletion is not allowed when creating a document".to_string(),
                    ))
                }
            }
        }

        let mut state = self.lock();
        let id = state.next("doc");
        state
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.clone(), stored.clone());
        state.journal.push(JournalEntry {
            document: DocumentRef::new(collection, id.clone()),
            fields: stored,
        });
        Ok(id)
    }

    async fn query_documents(
        &self,
        collection: &str,
        filters: &[EqualityFilter],
    ) -> Result<Vec<Document>, GatewayError> {
        Ok(self
            .documents(collection)
            .into_iter()
            .filter(|document| {
                filters
                    .iter()
                    .all(|filter| document.fields.get(&filter.field) == Some(&filter.value))
            })
            .collect())
    }

    async fn list_documents(
        &self,
        collection: &str,
        page_size: u32,
        page_token: Option<&str>,
    ) -> Result<DocumentPage, GatewayError> {
        let mut state = self.lock();
        state.list_calls += 1;

        let Some(documents) = state.collections.get(collection) else {
            return Ok(DocumentPage::default());
        };

        let remaining: Vec<Document> = documents
            .iter()
            .filter(|(id, _)| page_token.map_or(true, |after| id.as_str() > after))
            .map(|(id, fields)| Document {
                id: id.clone(),
                fields: fields.clone(),
            })
            .collect();

        let page_size = page_size.max(1) as usize;
        let has_more = remaining.len() > page_size;
        let documents: Vec<Document> = remaining.into_iter().take(page_size).collect();
        let next_page_token = if has_more {
            documents.last().map(|document| document.id.clone())
        } else {
            None
        };

        Ok(DocumentPage {
            documents,
            next_page_token,
        })
    }

    async fn create_identity(
        &self,
        email: &str,
        password: &str,
    ) -> Result<CreatedIdentity, GatewayError> {
        let mut state = self.lock();
        if state.failing_emails.contains(email) {
            return Err(GatewayError::Backend {
                status: 503,
                message: "identity provider unavailable".to_string(),
            });
        }
        if !email.contains('@') {
            return Err(GatewayError::InvalidCredentialShape(
                "INVALID_EMAIL".to_string(),
            ));
        }
        if password.is_empty() {
            return Err(GatewayError::InvalidCredentialShape(
                "MISSING_PASSWORD".to_string(),
            ));
        }
        if state.identities.contains_key(email) {
            return Err(GatewayError::IdentityExists(email.to_string()));
        }

        let auth_uid = state.next("uid");
        state
            .identities
            .insert(email.to_string(), auth_uid.clone());
        Ok(CreatedIdentity { auth_uid })
    }

    async fn update_document_atomic(
        &self,
        document: &DocumentRef,
        writes: FieldWrites,
    ) -> Result<(), GatewayError> {
        let mut state = self.lock();
        if state.failing_updates.contains(document) {
            return Err(GatewayError::Backend {
                status: 503,
                message: "document store unavailable".to_string(),
            });
        }

        let stored = state
            .collections
            .get_mut(&document.collection)
            .and_then(|documents| documents.get_mut(&document.id))
            .ok_or_else(|| GatewayError::NotFound(document.to_string()))?;

        let mut updated = stored.clone();
        for (name, write) in writes {
            match write {
                FieldWrite::Set(value) => {
                    updated.insert(name, value);
                }
                FieldWrite::ServerTimestamp => {
                    updated.insert(name, server_timestamp());
                }
                FieldWrite::Delete => {
                    updated.remove(&name);
                }
            }
        }
        *stored = updated.clone();

        state.journal.push(JournalEntry {
            document: document.clone(),
            fields: updated,
        });
        Ok(())
    }
}
