use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT};
use serde_json::{Map, Value};
use tracing::debug;

use crate::domain::{Identity, Record};
use crate::error::ScanError;

/// One lookup against the item database. Implementations classify failures
/// through [`ScanError::is_transient`].
pub trait RecordFetcher: Send + Sync {
    fn fetch(&self, id: &Identity) -> Result<Record, ScanError>;
}

#[derive(Clone)]
pub struct ItemApiClient {
    client: Client,
    base_url: String,
    locale: String,
}

impl ItemApiClient {
    pub fn new(base_url: &str, locale: &str, timeout: Duration) -> Result<Self, ScanError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("spt-scan/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| ScanError::ApiHttp(err.to_string()))?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| ScanError::ApiHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.to_string(),
            locale: locale.to_string(),
        })
    }

    fn handle_status(
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, ScanError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "item API request failed".to_string());
        Err(ScanError::ApiStatus { status, message })
    }
}

impl RecordFetcher for ItemApiClient {
    fn fetch(&self, id: &Identity) -> Result<Record, ScanError> {
        debug!(id = %id, url = %self.base_url, "item API request");
        let response = self
            .client
            .get(&self.base_url)
            .query(&[("id", id.as_str()), ("locale", self.locale.as_str())])
            .send()
            .map_err(|err| ScanError::ApiHttp(err.to_string()))?;
        let response = Self::handle_status(response)?;
        // A body that fails mid-transfer is a network fault, not a bad payload.
        let bytes = response
            .bytes()
            .map_err(|err| ScanError::ApiHttp(err.to_string()))?;
        let payload: Value =
            serde_json::from_slice(&bytes).map_err(|err| ScanError::ApiDecode(err.to_string()))?;
        record_from_payload(id, &payload, Utc::now())
    }
}

/// Normalizes an API payload of the form
/// `{"item": {"_name", "_parent", "_type", "_props"}, "locale": {...}, "handbook": {...}}`.
pub fn record_from_payload(
    id: &Identity,
    payload: &Value,
    fetched_at: DateTime<Utc>,
) -> Result<Record, ScanError> {
    let (Some(item), Some(locale)) = (payload.get("item"), payload.get("locale")) else {
        return Err(ScanError::IncompleteRecord(id.to_string()));
    };
    let item = item
        .as_object()
        .ok_or_else(|| ScanError::ApiDecode(format!("item section of {id} is not an object")))?;
    let localized_fields = locale
        .as_object()
        .cloned()
        .ok_or_else(|| ScanError::ApiDecode(format!("locale section of {id} is not an object")))?;

    let mut record = Record::new(id.clone(), fetched_at);
    record.display_name = string_field(item, "_name");
    record.parent_identity = string_field(item, "_parent");
    record.kind = string_field(item, "_type");
    record.properties = item
        .get("_props")
        .and_then(|value| value.as_object())
        .cloned()
        .unwrap_or_default();
    record.localized_fields = localized_fields;
    record.handbook = payload
        .get("handbook")
        .and_then(|value| value.as_object())
        .cloned()
        .unwrap_or_default();
    Ok(record)
}

fn string_field(map: &Map<String, Value>, key: &str) -> String {
    map.get(key)
        .and_then(|value| value.as_str())
        .unwrap_or_default()
        .to_string()
}
