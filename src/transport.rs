//! Request layer for the analysis backend.
//!
//! [`Backend`] is the seam every component talks through; [`HttpBackend`] is
//! the production implementation over `reqwest`. Tests substitute scripted
//! doubles.
//!
//! # Endpoints
//!
//! | Method | Path | Operation |
//! |--------|------|-----------|
//! | `GET`  | `/` | [`Backend::health`] |
//! | `POST` | `/upload` | [`Backend::upload`] (multipart `file`) |
//! | `POST` | `/analyze` | [`Backend::create_job`] |
//! | `GET`  | `/status/{id}` | [`Backend::job_status`] |
//! | `GET`  | `/books` | [`Backend::list_books`] |
//! | `GET`  | `/book/{id}` | [`Backend::book_graph`] |
//! | `POST` | `/query` | [`Backend::query`] |
//!
//! Every response is decoded into an explicit schema and converted into a
//! domain type before it is returned. Non-success statuses become
//! [`ClientError::Transport`] with the backend's message verbatim.

use async_trait::async_trait;
use reqwest::{Response, Url};
use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::config::BackendConfig;
use crate::credential::Credential;
use crate::error::{ClientError, ClientResult};
use crate::models::{
    AnalyzeRequest, AnalyzeResponse, Answer, Book, BookCatalog, GraphDataset, HealthResponse,
    JobSnapshot, QueryRequest, QueryResponse, StatusResponse, UploadResponse,
};

#[async_trait]
pub trait Backend: Send + Sync {
    /// Liveness message from the service root.
    async fn health(&self) -> ClientResult<String>;

    async fn upload(&self, filename: &str, bytes: Vec<u8>) -> ClientResult<UploadResponse>;

    /// Start an analysis job for a previously uploaded file. Returns the job id.
    async fn create_job(&self, filename: &str, credential: &Credential) -> ClientResult<String>;

    async fn job_status(&self, job_id: &str) -> ClientResult<JobSnapshot>;

    /// Known books, in the order the backend lists them.
    async fn list_books(&self) -> ClientResult<Vec<Book>>;

    async fn book_graph(&self, book_id: &str) -> ClientResult<GraphDataset>;

    async fn query(
        &self,
        book_id: &str,
        query: &str,
        credential: &Credential,
    ) -> ClientResult<Answer>;
}

/// [`Backend`] over HTTP/JSON.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    http: reqwest::Client,
    base_url: Url,
}

impl HttpBackend {
    pub fn new(base_url: &str, timeout: Duration) -> ClientResult<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| ClientError::validation(format!("invalid backend url '{}': {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(ClientError::validation(format!(
                "backend url '{}' cannot be used as a base",
                base_url
            )));
        }
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClientError::transport(e.to_string()))?;
        Ok(Self { http, base_url })
    }

    pub fn from_config(config: &BackendConfig) -> ClientResult<Self> {
        Self::new(&config.url, Duration::from_secs(config.timeout_secs))
    }

    /// Join path segments onto the base url, percent-encoding each one.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty();
            for segment in segments {
                path.push(segment);
            }
        }
        url
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn health(&self) -> ClientResult<String> {
        let resp = self.http.get(self.endpoint(&[])).send().await?;
        let body: HealthResponse = read_json(resp).await?;
        Ok(body.message)
    }

    async fn upload(&self, filename: &str, bytes: Vec<u8>) -> ClientResult<UploadResponse> {
        let part = reqwest::multipart::Part::bytes(bytes).file_name(filename.to_string());
        let form = reqwest::multipart::Form::new().part("file", part);
        let resp = self
            .http
            .post(self.endpoint(&["upload"]))
            .multipart(form)
            .send()
            .await?;
        read_json(resp).await
    }

    async fn create_job(&self, filename: &str, credential: &Credential) -> ClientResult<String> {
        let body = AnalyzeRequest {
            filename,
            api_key: credential.expose(),
        };
        let resp = self
            .http
            .post(self.endpoint(&["analyze"]))
            .json(&body)
            .send()
            .await?;
        let created: AnalyzeResponse = read_json(resp).await?;
        if created.task_id.trim().is_empty() {
            return Err(ClientError::malformed("analyze response has an empty task_id"));
        }
        Ok(created.task_id)
    }

    async fn job_status(&self, job_id: &str) -> ClientResult<JobSnapshot> {
        let resp = self
            .http
            .get(self.endpoint(&["status", job_id]))
            .send()
            .await?;
        let raw: StatusResponse = read_json(resp).await?;
        JobSnapshot::try_from(raw)
    }

    async fn list_books(&self) -> ClientResult<Vec<Book>> {
        let resp = self.http.get(self.endpoint(&["books"])).send().await?;
        let catalog: BookCatalog = read_json(resp).await?;
        Ok(catalog.into_books())
    }

    async fn book_graph(&self, book_id: &str) -> ClientResult<GraphDataset> {
        let resp = self
            .http
            .get(self.endpoint(&["book", book_id]))
            .send()
            .await?;
        read_json(resp).await
    }

    async fn query(
        &self,
        book_id: &str,
        query: &str,
        credential: &Credential,
    ) -> ClientResult<Answer> {
        let body = QueryRequest {
            book_id,
            query,
            api_key: credential.expose(),
        };
        let resp = self
            .http
            .post(self.endpoint(&["query"]))
            .json(&body)
            .send()
            .await?;
        let raw: QueryResponse = read_json(resp).await?;
        Ok(Answer::from(raw))
    }
}

/// Check the status, then decode the body against `T`.
async fn read_json<T: DeserializeOwned>(resp: Response) -> ClientResult<T> {
    let status = resp.status();
    let body = resp.text().await?;
    if !status.is_success() {
        return Err(ClientError::Transport {
            status: Some(status.as_u16()),
            message: error_message(status.as_u16(), &body),
        });
    }
    serde_json::from_str(&body).map_err(ClientError::from)
}

/// Human-readable message for a failed response. FastAPI-style
/// `{"detail": "..."}` bodies are unwrapped; anything else is passed through.
pub(crate) fn error_message(status: u16, body: &str) -> String {
    let body = body.trim();
    if body.is_empty() {
        return format!("request failed with status {}", status);
    }
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(serde_json::Value::Object(map)) => match map.get("detail") {
            Some(serde_json::Value::String(detail)) => detail.clone(),
            Some(other) => other.to_string(),
            None => body.to_string(),
        },
        _ => body.to_string(),
    }
}

/// CLI entry point for `bka health`.
pub async fn run_health(config: &crate::config::Config) -> anyhow::Result<()> {
    let backend = HttpBackend::from_config(&config.backend)?;
    let message = backend.health().await?;
    println!("{} is up: {}", config.backend.url, message);
    Ok(())
}
