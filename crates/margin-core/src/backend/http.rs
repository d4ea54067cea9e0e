//! REST client implementing the backend seam.

use std::time::Duration;

use reqwest::{RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::{Backend, BackendResult, CreateRecord};
use crate::error::{BackendError, Error, Result};
use crate::models::{Note, NoteFields, NoteFilter, NoteId};
use crate::util::{compact_text, is_http_url, normalize_text_option};

const REQUEST_TIMEOUT_SECS: u64 = 15;

/// HTTP backend speaking the notes REST API.
#[derive(Clone)]
pub struct HttpBackend {
    base_url: Url,
    access_token: Option<String>,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpBackend {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpBackend")
            .field("base_url", &self.base_url.as_str())
            .field("access_token", &self.access_token.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

impl HttpBackend {
    /// Build a client for an API base URL such as `https://api.example.com`.
    pub fn new(base_url: impl Into<String>, access_token: Option<String>) -> Result<Self> {
        let base_url = normalize_base_url(base_url.into())?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|error| Error::Config(format!("Failed to construct HTTP client: {error}")))?;
        Ok(Self {
            base_url,
            access_token: normalize_text_option(access_token),
            client,
        })
    }

    /// Returns the base URL this client was configured with.
    pub fn base_url(&self) -> &str {
        self.base_url.as_str().trim_end_matches('/')
    }

    /// Health endpoint suitable for [`crate::network::ConnectivityProbe`].
    pub fn health_url(&self) -> String {
        format!("{}/v1/health", self.base_url())
    }

    fn url(&self, segments: &[&str]) -> BackendResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| BackendError::Rejected("base URL cannot be a base".to_string()))?
            .pop_if_empty()
            .push("v1")
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request.header("Accept", "application/json");
        match &self.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> BackendResult<Response> {
        let response = self.authorize(request).send().await?;
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(classify_failure(status, &body))
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> BackendResult<T> {
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|error| {
            BackendError::InvalidPayload(format!("{error}: {}", compact_text(&body)))
        })
    }
}

impl Backend for HttpBackend {
    async fn create_record(&self, request: &CreateRecord) -> BackendResult<Note> {
        let url = self.url(&["notes"])?;
        let response = self.send(self.client.post(url).json(request)).await?;
        Self::decode(response).await
    }

    async fn update_record(&self, id: &NoteId, fields: &NoteFields) -> BackendResult<Note> {
        let url = self.url(&["notes", id.as_str()])?;
        let response = self.send(self.client.patch(url).json(fields)).await?;
        Self::decode(response).await
    }

    async fn delete_record(&self, id: &NoteId) -> BackendResult<()> {
        let url = self.url(&["notes", id.as_str()])?;
        let response = self.authorize(self.client.delete(url)).send().await?;
        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify_failure(status, &body))
    }

    async fn list_records(&self, owner_id: &str, filter: &NoteFilter) -> BackendResult<Vec<Note>> {
        let url = self.url(&["notes"])?;
        let mut query = vec![("owner_id", owner_id)];
        if let Some(tag) = filter.tag.as_deref() {
            query.push(("tag", tag));
        }
        if let Some(category) = filter.category.as_deref() {
            query.push(("category", category));
        }
        let response = self.send(self.client.get(url).query(&query)).await?;
        Self::decode(response).await
    }

    async fn get_record(&self, id: &NoteId) -> BackendResult<Option<Note>> {
        let url = self.url(&["notes", id.as_str()])?;
        let response = self.authorize(self.client.get(url)).send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_failure(status, &body));
        }
        Self::decode(response).await.map(Some)
    }

    async fn list_tags(&self, owner_id: &str) -> BackendResult<Vec<String>> {
        let url = self.url(&["tags"])?;
        let response = self
            .send(self.client.get(url).query(&[("owner_id", owner_id)]))
            .await?;
        Self::decode(response).await
    }

    async fn list_categories(&self, owner_id: &str) -> BackendResult<Vec<String>> {
        let url = self.url(&["categories"])?;
        let response = self
            .send(self.client.get(url).query(&[("owner_id", owner_id)]))
            .await?;
        Self::decode(response).await
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

/// Map a non-success HTTP status to the retry taxonomy.
fn classify_failure(status: StatusCode, body: &str) -> BackendError {
    let message = parse_api_error(status, body);
    if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        BackendError::Transient(message)
    } else {
        BackendError::Rejected(message)
    }
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

fn normalize_base_url(raw: String) -> Result<Url> {
    let base_url = normalize_text_option(Some(raw))
        .ok_or_else(|| Error::Config("API base URL must not be empty".to_string()))?;
    if !is_http_url(&base_url) {
        return Err(Error::Config(
            "API base URL must include http:// or https://".to_string(),
        ));
    }
    Url::parse(base_url.trim_end_matches('/'))
        .map_err(|error| Error::Config(format!("invalid API base URL: {error}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn normalize_base_url_rejects_invalid_values() {
        assert!(normalize_base_url(String::new()).is_err());
        assert!(normalize_base_url("api.example.com".to_string()).is_err());
        assert_eq!(
            normalize_base_url(" https://api.example.com/ ".to_string())
                .unwrap()
                .as_str(),
            "https://api.example.com/"
        );
    }

    #[test]
    fn urls_are_built_under_v1_with_escaped_ids() {
        let backend = HttpBackend::new("https://api.example.com/base/", None).unwrap();
        assert_eq!(
            backend.url(&["notes", "a/b c"]).unwrap().as_str(),
            "https://api.example.com/base/v1/notes/a%2Fb%20c"
        );
        assert_eq!(backend.health_url(), "https://api.example.com/base/v1/health");
    }

    #[test]
    fn status_codes_map_to_retry_taxonomy() {
        for status in [
            StatusCode::INTERNAL_SERVER_ERROR,
            StatusCode::BAD_GATEWAY,
            StatusCode::REQUEST_TIMEOUT,
            StatusCode::TOO_MANY_REQUESTS,
        ] {
            assert!(classify_failure(status, "").is_transient(), "{status}");
        }
        for status in [
            StatusCode::BAD_REQUEST,
            StatusCode::UNAUTHORIZED,
            StatusCode::CONFLICT,
            StatusCode::UNPROCESSABLE_ENTITY,
        ] {
            assert!(!classify_failure(status, "").is_transient(), "{status}");
        }
    }

    #[test]
    fn api_error_messages_prefer_json_message() {
        assert_eq!(
            parse_api_error(StatusCode::BAD_REQUEST, r#"{"message":" title too long "}"#),
            "title too long (400)"
        );
        assert_eq!(parse_api_error(StatusCode::BAD_GATEWAY, ""), "HTTP 502");
        assert_eq!(
            parse_api_error(StatusCode::CONFLICT, "plain text"),
            "plain text (409)"
        );
    }

    #[test]
    fn debug_redacts_token() {
        let backend =
            HttpBackend::new("https://api.example.com", Some("secret".to_string())).unwrap();
        let debug = format!("{backend:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn create_body_flattens_fields() {
        let request = CreateRecord {
            client_id: crate::models::TempId::from_raw("offline_1_abc"),
            fields: NoteFields::new("u1", "Trip Plan"),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["client_id"], "offline_1_abc");
        assert_eq!(json["title"], "Trip Plan");
        assert_eq!(json["owner_id"], "u1");
    }
}
