//! Send mapped leads to the downstream marketing API.
use lead_common::outbound::OutboundPayload;
use reqwest::Url;
use serde_json::Value;
use tracing::{info, warn};

use crate::config::DeliverySettings;
use crate::error::DeliveryError;

/// Query parameters that are always set on the request URL, replacing any value already present
/// in the configured base URL.
const CONTACT_TYPE: (&str, &str) = ("type", "contact");
const ADD_SYNC_ACTIVITY: (&str, &str) = ("activity", "addsync");
const API_KEY_PARAM: &str = "apikey";

/// Error code the downstream API uses for a contact it already has.
const DUPLICATE_ERROR_CODE: f64 = 302.0;

/// A successful send. A duplicate report is a success: the lead is already there.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    Delivered(Value),
    DuplicateIgnored(Value),
}

impl DeliveryOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            DeliveryOutcome::Delivered(_) => "delivered",
            DeliveryOutcome::DuplicateIgnored(_) => "duplicate",
        }
    }

    pub fn body(&self) -> &Value {
        match self {
            DeliveryOutcome::Delivered(body) | DeliveryOutcome::DuplicateIgnored(body) => body,
        }
    }
}

/// Whether an error response body reports an already existing contact.
pub fn is_duplicate(body: &Value) -> bool {
    // Compared as a float so `302` and `302.0` both match.
    if body.get("error_code").and_then(Value::as_f64) == Some(DUPLICATE_ERROR_CODE) {
        return true;
    }

    body.get("details")
        .and_then(Value::as_str)
        .is_some_and(|details| details.to_lowercase().contains("duplicate"))
}

/// Build the request URL: the base URL with `type`, `activity` and `apikey` forced. Other query
/// parameters of the base URL are kept.
pub fn request_url(base_url: &str, api_key: &str) -> Result<Url, DeliveryError> {
    let mut url = Url::parse(base_url).map_err(DeliveryError::InvalidBaseUrl)?;

    let forced = [CONTACT_TYPE.0, ADD_SYNC_ACTIVITY.0, API_KEY_PARAM];
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(name, _)| !forced.contains(&name.as_ref()))
        .map(|(name, value)| (name.into_owned(), value.into_owned()))
        .collect();

    url.query_pairs_mut()
        .clear()
        .extend_pairs(kept)
        .append_pair(CONTACT_TYPE.0, CONTACT_TYPE.1)
        .append_pair(ADD_SYNC_ACTIVITY.0, ADD_SYNC_ACTIVITY.1)
        .append_pair(API_KEY_PARAM, api_key);

    Ok(url)
}

/// Responses are JSON in practice, anything else is kept as text.
fn parse_body(text: String) -> Value {
    serde_json::from_str(&text).unwrap_or(Value::String(text))
}

#[derive(Clone)]
pub struct DeliveryClient {
    client: reqwest::Client,
    settings: DeliverySettings,
}

impl DeliveryClient {
    pub fn new(settings: DeliverySettings) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder()
            .user_agent("Lead Sync Worker")
            .timeout(settings.request_timeout)
            .build()
            .map_err(DeliveryError::Request)?;

        Ok(Self { client, settings })
    }

    /// Send one lead. The debug copy of the transformed record is dropped before anything is
    /// serialized. Fails before any network call when the base URL or API key is not configured,
    /// or when the base URL does not parse.
    pub async fn send(&self, payload: OutboundPayload) -> Result<DeliveryOutcome, DeliveryError> {
        let base_url = self
            .settings
            .base_url
            .as_deref()
            .ok_or(DeliveryError::ConfigurationMissing("NETCORE_BASE_URL"))?;
        let api_key = self
            .settings
            .api_key
            .as_deref()
            .ok_or(DeliveryError::ConfigurationMissing("NETCORE_API_KEY"))?;

        let url = request_url(base_url, api_key)?;
        let payload = payload.without_original();
        let data = serde_json::to_string(&payload).map_err(DeliveryError::Serialize)?;

        let mut form = vec![("data", data)];
        if let Some(list_id) = &self.settings.list_id {
            form.push(("listid", list_id.clone()));
        }

        let response = self
            .client
            .post(url)
            .form(&form)
            .send()
            .await
            .map_err(DeliveryError::Request)?;

        let status = response.status();
        let body = parse_body(response.text().await.map_err(DeliveryError::Request)?);

        let outcome = if status.is_success() {
            info!(status = status.as_u16(), "lead delivered");
            DeliveryOutcome::Delivered(body)
        } else if is_duplicate(&body) {
            warn!(
                status = status.as_u16(),
                response = %body,
                "downstream API reported a duplicate lead, treating as success"
            );
            DeliveryOutcome::DuplicateIgnored(body)
        } else {
            metrics::counter!("lead_deliveries_total", "outcome" => "rejected").increment(1);
            return Err(DeliveryError::Rejected { status, body });
        };

        metrics::counter!("lead_deliveries_total", "outcome" => outcome.label()).increment(1);
        Ok(outcome)
    }
}
