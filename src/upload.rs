//! File upload and cost estimation.
//!
//! [`UploadEstimator`] checks that a file has one of the extensions the
//! backend accepts, uploads it, and keeps the returned size estimate as the
//! pending [`Document`]. Content is never inspected client-side; backend
//! rejections are surfaced verbatim.

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;

use crate::config::Config;
use crate::error::{ClientError, ClientResult};
use crate::models::Document;
use crate::progress::format_number;
use crate::transport::{Backend, HttpBackend};

/// Extensions the backend accepts, lowercase, without the dot.
pub const ACCEPTED_EXTENSIONS: [&str; 2] = ["pdf", "txt"];

pub struct UploadEstimator {
    backend: Arc<dyn Backend>,
    pending: Option<Document>,
}

impl UploadEstimator {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            pending: None,
        }
    }

    /// Reject names without an accepted extension before any network call.
    pub fn validate_file_name(name: &str) -> ClientResult<()> {
        if name.trim().is_empty() {
            return Err(ClientError::validation("no file selected"));
        }
        let ext = Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext {
            Some(ext) if ACCEPTED_EXTENSIONS.contains(&ext.as_str()) => Ok(()),
            _ => Err(ClientError::validation(format!(
                "unsupported file '{}': only .pdf and .txt files can be analyzed",
                name
            ))),
        }
    }

    /// Upload `bytes` as `name` and keep the estimate as the pending document.
    ///
    /// The previous estimate is dropped as soon as a new file is submitted,
    /// whether or not the upload succeeds.
    pub async fn submit(&mut self, name: &str, bytes: Vec<u8>) -> ClientResult<Document> {
        Self::validate_file_name(name)?;
        self.pending = None;

        let byte_size = bytes.len() as u64;
        let resp = self.backend.upload(name, bytes).await?;
        let document = Document {
            name: resp.filename.unwrap_or_else(|| name.to_string()),
            byte_size,
            text_length: resp.text_length,
            estimated_tokens: resp.estimated_tokens,
        };
        tracing::debug!(
            file = %document.name,
            tokens = document.estimated_tokens,
            "upload estimate received"
        );
        self.pending = Some(document.clone());
        Ok(document)
    }

    /// Read a file from disk and [`submit`](Self::submit) it under its base name.
    pub async fn submit_path(&mut self, path: &Path) -> ClientResult<Document> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ClientError::validation(format!("invalid file path: {}", path.display())))?
            .to_string();
        Self::validate_file_name(&name)?;
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            ClientError::validation(format!("cannot read {}: {}", path.display(), e))
        })?;
        self.submit(&name, bytes).await
    }

    pub fn pending(&self) -> Option<&Document> {
        self.pending.as_ref()
    }

    /// Forget the pending estimate (a different file was selected).
    pub fn clear(&mut self) {
        self.pending = None;
    }

    /// Filename to hand to the job tracker once the user accepts the estimate.
    pub fn confirm(&self) -> ClientResult<String> {
        self.pending
            .as_ref()
            .map(|d| d.name.clone())
            .ok_or_else(|| ClientError::validation("no estimate to confirm; upload a file first"))
    }
}

/// Format a projected cost the way the estimate screen shows it.
pub fn format_cost(cost: f64) -> String {
    format!("${:.4}", cost)
}

/// Print a document's estimate block.
pub fn print_estimate(document: &Document, unit_price_per_million: f64) {
    println!("--- Estimate ---");
    println!("file:             {}", document.name);
    println!("size:             {} bytes", format_number(document.byte_size));
    println!(
        "text length:      {} characters",
        format_number(document.text_length)
    );
    println!(
        "estimated tokens: {}",
        format_number(document.estimated_tokens)
    );
    println!(
        "estimated cost:   {}",
        format_cost(document.estimated_cost(unit_price_per_million))
    );
}

/// CLI entry point for `bka estimate`.
pub async fn run_estimate(config: &Config, path: &Path) -> Result<()> {
    let backend = Arc::new(HttpBackend::from_config(&config.backend)?);
    let mut estimator = UploadEstimator::new(backend);
    let document = estimator.submit_path(path).await?;
    print_estimate(&document, config.pricing.unit_price_per_million);
    Ok(())
}
