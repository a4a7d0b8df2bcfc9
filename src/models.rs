//! Data models exchanged with the analysis backend.
//!
//! Two layers live here:
//!
//! - **Wire schemas** (`*Response`, `*Request`) mirror the JSON the backend
//!   serves, with snake_case field names.
//! - **Domain types** ([`Document`], [`JobSnapshot`], [`Book`],
//!   [`GraphDataset`], [`Answer`]) are what the components consume. Wire
//!   payloads are converted with `TryFrom`, so a malformed response fails at
//!   the transport boundary with [`ClientError::Malformed`] instead of
//!   reaching a state machine half-filled.

use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ClientError, ClientResult};

/// Weight assumed for a graph node that carries no `val`.
pub const DEFAULT_NODE_WEIGHT: f64 = 1.0;

/// Message used when the backend marks a job failed without saying why.
pub const DEFAULT_FAILURE_MESSAGE: &str = "Analysis failed";

// ============ Upload ============

#[derive(Debug, Clone, Deserialize)]
pub struct UploadResponse {
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    pub text_length: u64,
    pub estimated_tokens: u64,
}

/// An uploaded file and the backend's size estimate for it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Document {
    pub name: String,
    pub byte_size: u64,
    pub text_length: u64,
    pub estimated_tokens: u64,
}

impl Document {
    /// Projected processing cost in the configured currency unit.
    ///
    /// Presentation only; never sent back to the backend.
    pub fn estimated_cost(&self, unit_price_per_million: f64) -> f64 {
        self.estimated_tokens as f64 / 1_000_000.0 * unit_price_per_million
    }
}

// ============ Jobs ============

#[derive(Debug, Clone, Serialize)]
pub struct AnalyzeRequest<'a> {
    pub filename: &'a str,
    pub api_key: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalyzeResponse {
    #[serde(alias = "job_id")]
    pub task_id: String,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobResultPayload {
    #[serde(default)]
    pub book_id: Option<String>,
}

/// Raw `GET /status/{id}` body.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    pub progress: i64,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub result: Option<JobResultPayload>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Lifecycle phase of a job, carrying the data each phase guarantees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobPhase {
    Queued,
    Processing,
    Completed { book_id: String },
    Failed { error: String },
}

/// One validated poll response. Progress and phase always come from the same
/// response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSnapshot {
    pub phase: JobPhase,
    pub progress: u8,
    pub message: Option<String>,
}

impl JobSnapshot {
    pub fn status(&self) -> JobStatus {
        match self.phase {
            JobPhase::Queued => JobStatus::Queued,
            JobPhase::Processing => JobStatus::Processing,
            JobPhase::Completed { .. } => JobStatus::Completed,
            JobPhase::Failed { .. } => JobStatus::Failed,
        }
    }
}

impl TryFrom<StatusResponse> for JobSnapshot {
    type Error = ClientError;

    fn try_from(raw: StatusResponse) -> ClientResult<Self> {
        if !(0..=100).contains(&raw.progress) {
            return Err(ClientError::malformed(format!(
                "progress {} out of range 0..=100",
                raw.progress
            )));
        }
        let phase = match raw.status.as_str() {
            "queued" => JobPhase::Queued,
            "processing" => JobPhase::Processing,
            "completed" => {
                let book_id = raw
                    .result
                    .and_then(|r| r.book_id)
                    .filter(|id| !id.trim().is_empty())
                    .ok_or_else(|| {
                        ClientError::malformed("completed job is missing result.book_id")
                    })?;
                JobPhase::Completed { book_id }
            }
            "failed" => JobPhase::Failed {
                error: raw
                    .error
                    .filter(|e| !e.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_FAILURE_MESSAGE.to_string()),
            },
            other => {
                return Err(ClientError::malformed(format!(
                    "unknown job status '{}'",
                    other
                )))
            }
        };
        Ok(JobSnapshot {
            phase,
            progress: raw.progress as u8,
            message: raw.message,
        })
    }
}

// ============ Books ============

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Book {
    #[serde(default)]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub graph_file: Option<String>,
    /// Seconds since the Unix epoch. The backend writes file mtimes, which
    /// may be fractional.
    #[serde(default)]
    pub timestamp: f64,
}

impl Book {
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        if !self.timestamp.is_finite() || self.timestamp <= 0.0 {
            return None;
        }
        DateTime::from_timestamp(self.timestamp.trunc() as i64, 0)
    }
}

/// `GET /books` body: an object keyed by book id, kept in served order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BookCatalog(pub Vec<Book>);

impl BookCatalog {
    pub fn into_books(self) -> Vec<Book> {
        self.0
    }
}

impl<'de> Deserialize<'de> for BookCatalog {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct CatalogVisitor;

        impl<'de> Visitor<'de> for CatalogVisitor {
            type Value = BookCatalog;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an object mapping book ids to book metadata")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut books = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((key, mut book)) = map.next_entry::<String, Book>()? {
                    if book.id.is_empty() {
                        book.id = key;
                    }
                    books.push(book);
                }
                Ok(BookCatalog(books))
            }
        }

        deserializer.deserialize_map(CatalogVisitor)
    }
}

// ============ Graph ============

/// Node category. The backend writes integers; labels are accepted too.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NodeGroup {
    Number(i64),
    Label(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<NodeGroup>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub val: Option<f64>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl GraphNode {
    pub fn weight(&self) -> f64 {
        self.val.unwrap_or(DEFAULT_NODE_WEIGHT)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphLink {
    #[serde(deserialize_with = "string_or_number")]
    pub source: String,
    #[serde(deserialize_with = "string_or_number")]
    pub target: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
}

/// Nodes and links for one book, in served order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphDataset {
    #[serde(default)]
    pub nodes: Vec<GraphNode>,
    #[serde(default, alias = "edges")]
    pub links: Vec<GraphLink>,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(de::Error::custom(format!(
            "expected a string or number id, got {}",
            other
        ))),
    }
}

// ============ Query ============

#[derive(Debug, Clone, Serialize)]
pub struct QueryRequest<'a> {
    pub book_id: &'a str,
    pub query: &'a str,
    pub api_key: &'a str,
}

/// The `answer` field of `POST /query`. The backend replies with a plain
/// string when the book has no retrieval index yet.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AnswerPayload {
    Grounded {
        answer: String,
        #[serde(default)]
        sources: Vec<String>,
    },
    Plain(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryResponse {
    pub answer: AnswerPayload,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<String>,
}

impl From<QueryResponse> for Answer {
    fn from(raw: QueryResponse) -> Self {
        match raw.answer {
            AnswerPayload::Grounded { answer, sources } => Answer {
                text: answer,
                sources,
            },
            AnswerPayload::Plain(text) => Answer {
                text,
                sources: Vec::new(),
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HealthResponse {
    pub message: String,
}
