// --------------------------------------------------
// Backend API: the marketplace backend owns appointments,
// availability and discount configuration.
//
// The core only talks to it through BackendApi;
// HttpBackend is the reqwest implementation.
// --------------------------------------------------

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use reqwest::{Client, RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ConflictRange;
use crate::models::{Appointment, AppointmentStatus, DayAvailability, DiscountConfig, Service, TimeBlock};
use crate::session::{AppointmentScope, SessionContext};

#[derive(Error, Debug)]
pub enum ApiError {
    /// HTTP 409 on appointment creation
    #[error("scheduling conflict with {} appointment(s)", .conflicts.len())]
    Conflict { conflicts: Vec<ConflictRange> },

    #[error("backend returned {status}{}", message_suffix(.message))]
    Status { status: u16, message: Option<String> },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid response body: {0}")]
    Decode(#[from] serde_json::Error),
}

fn message_suffix(message: &Option<String>) -> String {
    message.as_deref().map(|m| format!(": {m}")).unwrap_or_default()
}

impl ApiError {
    // Message the backend put in its error payload, if any
    pub fn server_message(&self) -> Option<&str> {
        match self {
            ApiError::Status { message, .. } => message.as_deref(),
            _ => None,
        }
    }
}

// One block as sent to POST /providers/{id}/availability/
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockPayload {
    pub id: String,
    pub start: String,
    pub end: String,
}

impl From<&TimeBlock> for BlockPayload {
    fn from(block: &TimeBlock) -> Self {
        BlockPayload {
            id: block.id.clone(),
            start: block.start.with_timezone(&Utc).to_rfc3339_opts(SecondsFormat::Millis, true),
            end: block.end.with_timezone(&Utc).to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

pub type AvailabilityPayload = BTreeMap<String, Vec<BlockPayload>>;

// Body of POST /appointments/
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewAppointment {
    pub service: i64,
    pub start_time: String,
    pub end_time: String,
    pub status: AppointmentStatus,
    pub notes: String,
    pub client_email: String,
    pub client_phone: String,
    pub address_line1: String,
    pub address_line2: String,
    pub city: String,
    pub state: String,
    pub zip_code: String,
    pub country: String,
    pub address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discount_amount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discount_percentage: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discount_reason: Option<String>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BackendApi: Send + Sync {
    async fn provider_availability(&self, provider_id: i64) -> Result<DayAvailability, ApiError>;

    /// Replaces the provider's whole availability; returns the saved form.
    async fn save_provider_availability(
        &self,
        provider_id: i64,
        payload: &AvailabilityPayload,
    ) -> Result<DayAvailability, ApiError>;

    /// Open slots pre-annotated with original/discounted prices.
    async fn service_availability_with_discount(&self, service_id: i64) -> Result<DayAvailability, ApiError>;

    async fn service(&self, service_id: i64) -> Result<Service, ApiError>;

    async fn appointments(&self, scope: AppointmentScope) -> Result<Vec<Appointment>, ApiError>;

    async fn create_appointment(&self, request: &NewAppointment) -> Result<Appointment, ApiError>;

    async fn update_appointment_status(
        &self,
        appointment_id: i64,
        status: AppointmentStatus,
    ) -> Result<(), ApiError>;

    async fn discount_config(&self) -> Result<DiscountConfig, ApiError>;

    async fn update_discount_config(&self, config: &DiscountConfig) -> Result<DiscountConfig, ApiError>;
}

#[derive(Debug, Deserialize)]
struct ConflictBody {
    #[serde(default)]
    conflict_appointments: Vec<ConflictRange>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    detail: Option<String>,
}

#[derive(Debug, Serialize)]
struct StatusBody {
    status: AppointmentStatus,
}

// Days whose value is not a list are read as empty
fn normalize_days(raw: BTreeMap<String, Option<Vec<TimeBlock>>>) -> DayAvailability {
    raw.into_iter()
        .map(|(day, blocks)| {
            let mut blocks = blocks.unwrap_or_default();
            blocks.sort_by_key(|b| b.start);
            (day, blocks)
        })
        .collect()
}

/// reqwest-backed [`BackendApi`].
pub struct HttpBackend {
    client: Client,
    base_url: String,
    session: SessionContext,
    fallback_token: Option<SecretString>,
}

impl HttpBackend {
    pub fn new(base_url: &str, timeout: Duration, session: SessionContext) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(HttpBackend {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            session,
            fallback_token: None,
        })
    }

    // Token used when nobody has signed in through the session
    pub fn with_token(mut self, token: Option<SecretString>) -> Self {
        self.fallback_token = token;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        if let Some(token) = self.session.token() {
            return req.header("Authorization", format!("Token {}", token.expose_secret()));
        }
        match &self.fallback_token {
            Some(token) => req.header("Authorization", format!("Token {}", token.expose_secret())),
            None => req,
        }
    }

    // Raw body of a successful response, errors mapped to ApiError
    async fn execute(&self, req: RequestBuilder) -> Result<Vec<u8>, ApiError> {
        let resp = self.authorize(req).send().await?;
        let status = resp.status();
        let body = resp.bytes().await?;

        if status == StatusCode::CONFLICT {
            let conflicts = serde_json::from_slice::<ConflictBody>(&body)
                .map(|b| b.conflict_appointments)
                .unwrap_or_default();
            return Err(ApiError::Conflict { conflicts });
        }

        if !status.is_success() {
            let message = serde_json::from_slice::<ErrorBody>(&body)
                .ok()
                .and_then(|b| b.error.or(b.detail));
            tracing::debug!(status = status.as_u16(), ?message, "backend error response");
            return Err(ApiError::Status {
                status: status.as_u16(),
                message,
            });
        }

        Ok(body.to_vec())
    }

    async fn json<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, ApiError> {
        let body = self.execute(req).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn days(&self, path: &str) -> Result<DayAvailability, ApiError> {
        let raw: BTreeMap<String, Option<Vec<TimeBlock>>> = self.json(self.client.get(self.url(path))).await?;
        Ok(normalize_days(raw))
    }
}

#[async_trait]
impl BackendApi for HttpBackend {
    async fn provider_availability(&self, provider_id: i64) -> Result<DayAvailability, ApiError> {
        tracing::debug!(provider_id, "fetching provider availability");
        self.days(&format!("/providers/{provider_id}/availability/")).await
    }

    async fn save_provider_availability(
        &self,
        provider_id: i64,
        payload: &AvailabilityPayload,
    ) -> Result<DayAvailability, ApiError> {
        tracing::debug!(provider_id, days = payload.len(), "saving provider availability");
        let req = self
            .client
            .post(self.url(&format!("/providers/{provider_id}/availability/")))
            .json(payload);
        let raw: BTreeMap<String, Option<Vec<TimeBlock>>> = self.json(req).await?;
        Ok(normalize_days(raw))
    }

    async fn service_availability_with_discount(&self, service_id: i64) -> Result<DayAvailability, ApiError> {
        self.days(&format!("/services/{service_id}/availability-with-discount/"))
            .await
    }

    async fn service(&self, service_id: i64) -> Result<Service, ApiError> {
        self.json(self.client.get(self.url(&format!("/services/{service_id}/"))))
            .await
    }

    async fn appointments(&self, scope: AppointmentScope) -> Result<Vec<Appointment>, ApiError> {
        let path = match scope {
            AppointmentScope::Provider(id) => format!("/appointments/provider/{id}/"),
            AppointmentScope::Consumer(id) => format!("/appointments/consumer/{id}/"),
            AppointmentScope::All => "/appointments/".to_string(),
        };
        self.json(self.client.get(self.url(&path))).await
    }

    async fn create_appointment(&self, request: &NewAppointment) -> Result<Appointment, ApiError> {
        let req = self.client.post(self.url("/appointments/")).json(request);
        self.json(req).await
    }

    async fn update_appointment_status(
        &self,
        appointment_id: i64,
        status: AppointmentStatus,
    ) -> Result<(), ApiError> {
        let req = self
            .client
            .patch(self.url(&format!("/appointments/{appointment_id}/status/")))
            .json(&StatusBody { status });
        self.execute(req).await.map(|_| ())
    }

    async fn discount_config(&self) -> Result<DiscountConfig, ApiError> {
        self.json(self.client.get(self.url("/provider/discount-config/")))
            .await
    }

    async fn update_discount_config(&self, config: &DiscountConfig) -> Result<DiscountConfig, ApiError> {
        let req = self
            .client
            .put(self.url("/provider/discount-config/"))
            .json(config);
        self.json(req).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, TimeZone};

    #[test]
    fn block_payload_uses_utc_iso_strings() {
        let est = FixedOffset::west_opt(5 * 3600).unwrap();
        let block = TimeBlock::new(
            "b1",
            est.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap(),
            est.with_ymd_and_hms(2026, 3, 2, 10, 30, 0).unwrap(),
        );
        let payload = BlockPayload::from(&block);
        assert_eq!(payload.start, "2026-03-02T14:00:00.000Z");
        assert_eq!(payload.end, "2026-03-02T15:30:00.000Z");
    }

    #[test]
    fn non_list_days_become_empty() {
        let raw: BTreeMap<String, Option<Vec<TimeBlock>>> = serde_json::from_str(
            r#"{"2026-03-02": null,
                "2026-03-03": [
                    {"id": 2, "start": "2026-03-03T13:00:00Z", "end": "2026-03-03T14:00:00Z"},
                    {"id": 1, "start": "2026-03-03T09:00:00Z", "end": "2026-03-03T10:00:00Z"}]}"#,
        )
        .unwrap();
        let days = normalize_days(raw);
        assert!(days["2026-03-02"].is_empty());
        assert_eq!(days["2026-03-03"][0].id, "1");
    }

    #[test]
    fn status_error_shows_server_message() {
        let err = ApiError::Status {
            status: 400,
            message: Some("Service is inactive".into()),
        };
        assert_eq!(err.to_string(), "backend returned 400: Service is inactive");
        assert_eq!(err.server_message(), Some("Service is inactive"));
    }
}
