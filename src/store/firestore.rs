use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::{RequestBuilder, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{key_records, SlotStore};
use crate::config::StoreConfig;
use crate::error::{ConfigError, StoreError};
use crate::slot::{
    parse_date, Booking, DateRange, Period, Slot, SlotKey, SlotMap, StoredSlot, DATE_FORMAT,
};

pub const DEFAULT_BASE_URL: &str = "https://firestore.googleapis.com/v1";

/// Slot collection in a hosted Firestore database, over the REST API.
///
/// Documents are addressed by storage id, so `write` is a full-document
/// PATCH (create or replace) and `clear` is a DELETE that succeeds on absent
/// documents.
pub struct FirestoreStore {
    client: reqwest::Client,
    documents_url: String,
    collection: String,
    api_key: Option<String>,
    auth_token: Option<String>,
}

impl FirestoreStore {
    pub fn new(
        base_url: &str,
        project_id: &str,
        database: &str,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            documents_url: format!(
                "{}/projects/{}/databases/{}/documents",
                base_url.trim_end_matches('/'),
                project_id,
                database
            ),
            collection: collection.into(),
            api_key: None,
            auth_token: None,
        }
    }

    pub fn from_config(config: &StoreConfig) -> Result<Self, ConfigError> {
        let project_id = config.project_id.as_deref().ok_or(ConfigError::MissingField {
            backend: "firestore",
            field: "project_id",
        })?;
        let base_url = config.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
        let mut store = Self::new(
            base_url,
            project_id,
            &config.database,
            config.collection.clone(),
        );
        store.api_key = config.api_key.clone();
        store.auth_token = config.auth_token.clone();
        Ok(store)
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        let req = match &self.auth_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        };
        match &self.api_key {
            Some(key) => req.query(&[("key", key)]),
            None => req,
        }
    }

    fn document_url(&self, id: &str) -> Result<Url, StoreError> {
        let mut url = Url::parse(&self.documents_url)
            .map_err(|e| StoreError::Decode(format!("bad documents url: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| StoreError::Decode("documents url cannot be a base".to_string()))?
            .push(&self.collection)
            .push(id);
        Ok(url)
    }
}

#[async_trait]
impl SlotStore for FirestoreStore {
    fn name(&self) -> &str {
        "firestore"
    }

    async fn fetch_range(&self, range: &DateRange) -> Result<SlotMap, StoreError> {
        let url = format!("{}:runQuery", self.documents_url);
        let body = range_query(&self.collection, range);

        debug!(start = %range.start, end = %range.end, "firestore range query");

        let resp = self.authorize(self.client.post(&url)).json(&body).send().await?;
        let items: Vec<RunQueryItem> = check(resp).await?.json().await?;

        let records = items
            .into_iter()
            .filter_map(|item| item.document)
            .filter_map(|doc| match decode_document(doc) {
                Ok(stored) => Some(stored),
                Err(e) => {
                    warn!(error = %e, "skipping unreadable slot document");
                    None
                }
            });
        Ok(key_records(records, range))
    }

    async fn write(&self, slot: &Slot) -> Result<StoredSlot, StoreError> {
        let id = slot.key().storage_id();
        let url = self.document_url(&id)?;

        debug!(%id, "firestore write");

        let resp = self
            .authorize(self.client.patch(url))
            .json(&encode_slot(slot))
            .send()
            .await?;
        let doc: Document = check(resp).await?.json().await?;
        decode_document(doc)
    }

    async fn clear(&self, key: &SlotKey) -> Result<(), StoreError> {
        let id = key.storage_id();
        let url = self.document_url(&id)?;

        debug!(%id, "firestore delete");

        let resp = self.authorize(self.client.delete(url)).send().await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        check(resp).await?;
        Ok(())
    }
}

async fn check(resp: reqwest::Response) -> Result<reqwest::Response, StoreError> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status().as_u16();
    let message = resp.text().await.unwrap_or_default();
    warn!(status, body = %message, "firestore API error");
    Err(StoreError::Api { status, message })
}

// --- wire types ---

#[derive(Debug, Serialize, Deserialize)]
struct Document {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default)]
    fields: HashMap<String, Value>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Value {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    string_value: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RunQueryItem {
    #[serde(default)]
    document: Option<Document>,
}

fn string_value(s: impl Into<String>) -> Value {
    Value {
        string_value: Some(s.into()),
    }
}

fn encode_slot(slot: &Slot) -> Document {
    let mut fields = HashMap::new();
    fields.insert("date".to_string(), string_value(slot.date.format(DATE_FORMAT).to_string()));
    fields.insert("period".to_string(), string_value(slot.period.as_str()));
    fields.insert("employee".to_string(), string_value(slot.employee.clone()));
    fields.insert("value".to_string(), string_value(slot.value.as_str()));
    Document { name: None, fields }
}

fn decode_document(doc: Document) -> Result<StoredSlot, StoreError> {
    let Document { name, fields } = doc;
    let name = name.ok_or_else(|| StoreError::Decode("document has no name".to_string()))?;
    let id = name.rsplit('/').next().unwrap_or(&name).to_string();

    let date = parse_date(field(&fields, &id, "date")?)
        .map_err(|e| StoreError::Decode(format!("{id}: {e}")))?;
    let period = field(&fields, &id, "period")?
        .parse::<Period>()
        .map_err(|e| StoreError::Decode(format!("{id}: {e}")))?;
    let employee = field(&fields, &id, "employee")?.to_string();
    let value = Booking::new(field(&fields, &id, "value")?)
        .ok_or_else(|| StoreError::Decode(format!("{id}: blank value")))?;

    Ok(StoredSlot {
        id,
        slot: Slot {
            date,
            period,
            employee,
            value,
        },
    })
}

fn field<'a>(
    fields: &'a HashMap<String, Value>,
    id: &str,
    name: &str,
) -> Result<&'a str, StoreError> {
    fields
        .get(name)
        .and_then(|v| v.string_value.as_deref())
        .ok_or_else(|| StoreError::Decode(format!("{id}: missing string field `{name}`")))
}

fn range_query(collection: &str, range: &DateRange) -> serde_json::Value {
    let bound = |op: &str, date: chrono::NaiveDate| {
        serde_json::json!({
            "fieldFilter": {
                "field": { "fieldPath": "date" },
                "op": op,
                "value": { "stringValue": date.format(DATE_FORMAT).to_string() },
            }
        })
    };

    serde_json::json!({
        "structuredQuery": {
            "from": [{ "collectionId": collection }],
            "where": {
                "compositeFilter": {
                    "op": "AND",
                    "filters": [
                        bound("GREATER_THAN_OR_EQUAL", range.start),
                        bound("LESS_THAN_OR_EQUAL", range.end),
                    ],
                }
            },
        }
    })
}
