//! JSON-over-HTTP client for the remote authority.

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value};

use super::{authoritative, RemoteApi, RemoteError, RemoteResult};
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::models::Record;
use crate::util::{compact_text, is_http_url};

/// Remote authority reached over a conventional REST surface:
///
/// | call          | request                                    |
/// |---------------|--------------------------------------------|
/// | list          | `GET {base}/{records}`                     |
/// | create        | `POST {base}/{records}`                    |
/// | update        | `PUT {base}/{records}/{id}`                |
/// | delete        | `DELETE {base}/{records}/{id}`             |
/// | set archived  | `PATCH {base}/{records}/{id}/archive`      |
/// | ping          | `GET {base}/{health}`                      |
#[derive(Clone, Debug)]
pub struct HttpRemote {
    base_url: String,
    records_path: String,
    health_path: String,
    client: Client,
}

impl HttpRemote {
    /// Create a client for the given base URL with default paths
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let base_url: String = base_url.into();
        let base_url = base_url.trim();
        if base_url.is_empty() {
            return Err(Error::Config("API base URL must not be empty".to_string()));
        }
        if !is_http_url(base_url) {
            return Err(Error::Config(
                "API base URL must include http:// or https://".to_string(),
            ));
        }

        let defaults = ClientConfig::default();
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            records_path: defaults.records_path,
            health_path: defaults.health_path,
            client: Client::builder()
                .build()
                .map_err(|error| Error::Config(error.to_string()))?,
        })
    }

    /// Create a client from a validated configuration
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        Ok(Self::new(config.require_api_base_url()?)?
            .with_records_path(&config.records_path)
            .with_health_path(&config.health_path))
    }

    #[must_use]
    pub fn with_records_path(mut self, path: &str) -> Self {
        self.records_path = path.trim_matches('/').to_string();
        self
    }

    #[must_use]
    pub fn with_health_path(mut self, path: &str) -> Self {
        self.health_path = path.trim_matches('/').to_string();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn collection_url(&self) -> String {
        format!("{}/{}", self.base_url, self.records_path)
    }

    fn record_url(&self, id: u64) -> String {
        format!("{}/{}/{id}", self.base_url, self.records_path)
    }

    async fn send(&self, request: RequestBuilder) -> RemoteResult<Response> {
        let response = request
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(RemoteError::NotFound);
        }

        let body = response.text().await.unwrap_or_default();
        Err(RemoteError::Rejected {
            status: status.as_u16(),
            message: parse_api_error(status, &body),
        })
    }

    async fn read_record(response: Response) -> RemoteResult<Record> {
        let record = response
            .json::<Record>()
            .await
            .map_err(|error| RemoteError::InvalidPayload(error.to_string()))?;
        authoritative(record)
    }
}

impl RemoteApi for HttpRemote {
    async fn list_records(&self) -> RemoteResult<Vec<Record>> {
        let response = self.send(self.client.get(self.collection_url())).await?;
        let payload = response
            .json::<ListResponse>()
            .await
            .map_err(|error| RemoteError::InvalidPayload(error.to_string()))?;

        payload
            .into_records()
            .into_iter()
            .map(authoritative)
            .collect()
    }

    async fn create_record(&self, payload: Map<String, Value>) -> RemoteResult<Record> {
        let response = self
            .send(self.client.post(self.collection_url()).json(&payload))
            .await?;
        Self::read_record(response).await
    }

    async fn update_record(&self, id: u64, payload: Map<String, Value>) -> RemoteResult<Record> {
        let mut payload = payload;
        payload.insert("id".to_string(), Value::from(id));
        let response = self
            .send(self.client.put(self.record_url(id)).json(&payload))
            .await?;
        Self::read_record(response).await
    }

    async fn delete_record(&self, id: u64) -> RemoteResult<()> {
        self.send(self.client.delete(self.record_url(id))).await?;
        Ok(())
    }

    async fn set_archived(&self, id: u64, archived: bool) -> RemoteResult<Record> {
        let response = self
            .send(
                self.client
                    .patch(format!("{}/archive", self.record_url(id)))
                    .json(&serde_json::json!({ "archived": archived })),
            )
            .await?;
        Self::read_record(response).await
    }

    async fn ping(&self) -> RemoteResult<()> {
        let url = format!("{}/{}", self.base_url, self.health_path);
        self.send(self.client.get(url)).await?;
        Ok(())
    }
}

/// Collections come back either bare or wrapped in a `data` envelope
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ListResponse {
    Bare(Vec<Record>),
    Wrapped { data: Vec<Record> },
}

impl ListResponse {
    fn into_records(self) -> Vec<Record> {
        match self {
            Self::Bare(records) | Self::Wrapped { data: records } => records,
        }
    }
}

/// Longest error message carried into a `RemoteError`
const ERROR_MESSAGE_LIMIT: usize = 180;

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return compact_text(&message, ERROR_MESSAGE_LIMIT);
        }
    }

    let trimmed = compact_text(body, ERROR_MESSAGE_LIMIT);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        trimmed
    }
}

fn transport_error(error: reqwest::Error) -> RemoteError {
    if error.is_timeout() {
        RemoteError::Timeout
    } else if error.is_decode() {
        RemoteError::InvalidPayload(error.to_string())
    } else {
        RemoteError::Unreachable(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Path;
    use axum::http::StatusCode as AxumStatus;
    use axum::routing::{get, patch, put};
    use axum::{Json, Router};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use crate::models::RecordId;

    async fn list() -> Json<Value> {
        Json(json!([
            {"id": 1, "address": "1 Oak St", "archived": false},
            {"id": 2, "address": "2 Elm Rd", "archived": true}
        ]))
    }

    async fn create(Json(mut body): Json<Map<String, Value>>) -> (AxumStatus, Json<Value>) {
        if body.contains_key("id") || body.contains_key("isOfflineCreated") {
            return (
                AxumStatus::BAD_REQUEST,
                Json(json!({"message": "local fields must not be sent"})),
            );
        }
        body.insert("id".to_string(), json!(77));
        (AxumStatus::CREATED, Json(Value::Object(body)))
    }

    async fn update(
        Path(id): Path<u64>,
        Json(body): Json<Map<String, Value>>,
    ) -> (AxumStatus, Json<Value>) {
        if id == 422 {
            return (
                AxumStatus::UNPROCESSABLE_ENTITY,
                Json(json!({"message": "purchase price must be positive"})),
            );
        }
        (AxumStatus::OK, Json(Value::Object(body)))
    }

    async fn remove(Path(id): Path<u64>) -> AxumStatus {
        if id == 404 {
            AxumStatus::NOT_FOUND
        } else {
            AxumStatus::NO_CONTENT
        }
    }

    async fn archive(Path(id): Path<u64>, Json(body): Json<Value>) -> Json<Value> {
        Json(json!({"id": id, "address": "archived", "archived": body["archived"]}))
    }

    async fn spawn_server() -> String {
        let app = Router::new()
            .route("/properties", get(list).post(create))
            .route("/properties/{id}", put(update).delete(remove))
            .route("/properties/{id}/archive", patch(archive))
            .route("/health", get(|| async { "ok" }));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[test]
    fn new_rejects_invalid_base_urls() {
        assert!(HttpRemote::new("  ").is_err());
        assert!(HttpRemote::new("api.example.com").is_err());

        let remote = HttpRemote::new("https://api.example.com/v1/").unwrap();
        assert_eq!(remote.base_url(), "https://api.example.com/v1");
        assert_eq!(
            remote.record_url(5),
            "https://api.example.com/v1/properties/5"
        );
    }

    #[test]
    fn parse_api_error_prefers_message_field() {
        assert_eq!(
            parse_api_error(StatusCode::BAD_REQUEST, r#"{"message":"nope"}"#),
            "nope"
        );
        assert_eq!(
            parse_api_error(StatusCode::BAD_GATEWAY, "  "),
            "HTTP 502"
        );
        assert_eq!(
            parse_api_error(StatusCode::BAD_GATEWAY, "upstream down"),
            "upstream down"
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn list_and_create_against_server() {
        let remote = HttpRemote::new(spawn_server().await).unwrap();

        let records = remote.list_records().await.unwrap();
        assert_eq!(records.len(), 2);
        assert!(records[1].archived);

        let local = Record::new_local(Map::new()).with("address", "9 Cedar Way");
        let created = remote.create_record(local.remote_payload()).await.unwrap();
        assert_eq!(created.id, RecordId::Persistent(77));
        assert_eq!(created.get("address"), Some(&json!("9 Cedar Way")));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn status_codes_map_to_remote_errors() {
        let remote = HttpRemote::new(spawn_server().await).unwrap();

        assert_eq!(remote.delete_record(404).await, Err(RemoteError::NotFound));
        assert_eq!(remote.delete_record(5).await, Ok(()));

        let rejected = remote.update_record(422, Map::new()).await.unwrap_err();
        assert_eq!(
            rejected,
            RemoteError::Rejected {
                status: 422,
                message: "purchase price must be positive".to_string()
            }
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn update_sends_id_and_archive_toggles() {
        let remote = HttpRemote::new(spawn_server().await).unwrap();

        let updated = remote
            .update_record(8, json!({"address": "8 Fir St"}).as_object().cloned().unwrap())
            .await
            .unwrap();
        assert_eq!(updated.id, RecordId::Persistent(8));

        let archived = remote.set_archived(8, true).await.unwrap();
        assert!(archived.archived);
        assert!(remote.ping().await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unreachable_server_is_transient() {
        let remote = HttpRemote::new("http://127.0.0.1:1").unwrap();
        let error = remote.ping().await.unwrap_err();
        assert!(error.is_transient(), "unexpected error {error:?}");
    }
}
