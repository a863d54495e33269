//! YClients REST client.
//!
//! Every call carries the partner bearer token, the acting user token when
//! one is known, the v2 `Accept` header and the `partner_id` query parameter.

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{Method, RequestBuilder};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use tracing::{debug, error};

use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::provider::AvailabilityClient;
use crate::provider::types::{
    ApiEnvelope, ProviderAppointment, ProviderReservation, RecordsQuery, ReservationRequest,
    ServiceOffering, StaffMember, TimeSlot,
};

const ACCEPT_V2: &str = "application/vnd.yclients.v2+json";

/// HTTP client for the YClients API.
pub struct YclientsClient {
    client: reqwest::Client,
    base_url: String,
    partner_token: SecretString,
    user_token: Option<SecretString>,
    partner_id: i64,
    company_id: i64,
}

impl YclientsClient {
    pub fn new(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ProviderError::Transport(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            partner_token: config.partner_token.clone(),
            user_token: config.user_token.clone(),
            partner_id: config.partner_id,
            company_id: config.company_id,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// `Bearer <partner>` or `Bearer <partner>, User <user>`.
    ///
    /// Falls back to the configured user token when the call has none.
    fn auth_header(&self, user_token: Option<&str>) -> String {
        let partner = self.partner_token.expose_secret();
        let user = user_token.or_else(|| self.user_token.as_ref().map(|t| t.expose_secret()));
        match user {
            Some(user) => format!("Bearer {partner}, User {user}"),
            None => format!("Bearer {partner}"),
        }
    }

    fn request(&self, method: Method, path: &str, user_token: Option<&str>) -> RequestBuilder {
        self.client
            .request(method, self.url(path))
            .header(ACCEPT, ACCEPT_V2)
            .header(AUTHORIZATION, self.auth_header(user_token))
            .query(&[("partner_id", self.partner_id)])
    }

    /// Send a request and return the raw body of a 2xx response.
    async fn execute(
        &self,
        builder: RequestBuilder,
        method: &Method,
        path: &str,
    ) -> Result<(u16, String), ProviderError> {
        debug!("→ {method} {path}");

        let resp = builder.send().await.map_err(|e| {
            error!(%method, path, error = %e, "✗ provider request failed");
            ProviderError::Transport(e.to_string())
        })?;

        let status = resp.status().as_u16();
        let body = resp
            .text()
            .await
            .map_err(|e| ProviderError::Transport(format!("Failed to read body: {e}")))?;

        if !(200..300).contains(&status) {
            error!(%method, path, status, body = %body, "✗ provider call failed");
            return Err(ProviderError::Http { status, body });
        }

        debug!("← {status} {path}");
        Ok((status, body))
    }

    /// Send a request and unwrap the `data` field of the envelope.
    async fn fetch<T: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
        method: Method,
        path: &str,
    ) -> Result<Option<T>, ProviderError> {
        let (status, body) = self.execute(builder, &method, path).await?;
        decode_envelope(status, path, &body)
    }

    async fn fetch_list<T: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
        path: &str,
    ) -> Result<Vec<T>, ProviderError> {
        Ok(self
            .fetch::<Vec<T>>(builder, Method::GET, path)
            .await?
            .unwrap_or_default())
    }
}

fn decode_envelope<T: DeserializeOwned>(
    status: u16,
    path: &str,
    body: &str,
) -> Result<Option<T>, ProviderError> {
    let envelope: ApiEnvelope<T> = serde_json::from_str(body)
        .map_err(|e| ProviderError::InvalidResponse(format!("{path}: {e}")))?;

    if !envelope.success {
        error!(path, status, body, "✗ provider reported success=false");
        return Err(ProviderError::Http {
            status,
            body: body.to_string(),
        });
    }
    Ok(envelope.data)
}

#[async_trait]
impl AvailabilityClient for YclientsClient {
    async fn list_services(
        &self,
        company_id: i64,
        category_id: Option<i64>,
    ) -> Result<Vec<ServiceOffering>, ProviderError> {
        let path = format!("/api/v1/company/{company_id}/services");
        let mut builder = self.request(Method::GET, &path, None);
        if let Some(category_id) = category_id {
            builder = builder.query(&[("category_id", category_id)]);
        }
        self.fetch_list(builder, &path).await
    }

    async fn list_staff(
        &self,
        company_id: i64,
        service_ids: &[i64],
    ) -> Result<Vec<StaffMember>, ProviderError> {
        let path = format!("/api/v1/company/{company_id}/staff");
        let mut builder = self.request(Method::GET, &path, None);
        if !service_ids.is_empty() {
            builder = builder.query(&[("service_ids", join_ids(service_ids))]);
        }
        self.fetch_list(builder, &path).await
    }

    async fn list_open_slots(
        &self,
        staff_id: i64,
        date: NaiveDate,
        service_ids: &[i64],
    ) -> Result<Vec<TimeSlot>, ProviderError> {
        let path = format!(
            "/api/v1/book_times/{}/{staff_id}/{}",
            self.company_id,
            date.format("%Y-%m-%d")
        );
        let indexed: Vec<(String, String)> = service_ids
            .iter()
            .enumerate()
            .map(|(i, id)| (format!("service_ids[{i}]"), id.to_string()))
            .collect();
        let builder = self.request(Method::GET, &path, None).query(&indexed);
        self.fetch_list(builder, &path).await
    }

    async fn create_reservation(
        &self,
        request: &ReservationRequest,
        user_token: Option<&str>,
    ) -> Result<Vec<ProviderReservation>, ProviderError> {
        let path = format!("/api/v1/book_record/{}", self.company_id);
        let builder = self.request(Method::POST, &path, user_token).json(request);
        Ok(self
            .fetch::<Vec<ProviderReservation>>(builder, Method::POST, &path)
            .await?
            .unwrap_or_default())
    }

    async fn cancel_reservation(
        &self,
        record_id: i64,
        user_token: Option<&str>,
    ) -> Result<(), ProviderError> {
        let path = format!("/api/v1/records/{record_id}");
        let builder = self.request(Method::DELETE, &path, user_token);
        let (status, body) = self.execute(builder, &Method::DELETE, &path).await?;
        // 204 carries no envelope
        if !body.trim().is_empty() {
            decode_envelope::<serde_json::Value>(status, &path, &body)?;
        }
        Ok(())
    }

    async fn reschedule_reservation(
        &self,
        record_id: i64,
        datetime: &str,
        user_token: Option<&str>,
    ) -> Result<ProviderAppointment, ProviderError> {
        let path = format!("/api/v1/records/{record_id}");
        let builder = self
            .request(Method::PUT, &path, user_token)
            .json(&serde_json::json!({ "datetime": datetime }));
        self.fetch(builder, Method::PUT, &path)
            .await?
            .ok_or_else(|| ProviderError::InvalidResponse(format!("{path}: missing data")))
    }

    async fn list_user_reservations(
        &self,
        query: &RecordsQuery,
        user_token: Option<&str>,
    ) -> Result<Vec<ProviderAppointment>, ProviderError> {
        let path = "/api/v1/user/records";
        let builder = self.request(Method::GET, path, user_token).query(query);
        self.fetch_list(builder, path).await
    }
}

fn join_ids(ids: &[i64]) -> String {
    ids.iter()
        .map(i64::to_string)
        .collect::<Vec<_>>()
        .join(",")
}
