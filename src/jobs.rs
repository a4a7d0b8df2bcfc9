//! Analysis job tracking.
//!
//! [`JobTracker`] turns the backend's fire-and-forget analysis job into an
//! observable state machine:
//!
//! ```text
//! Idle ──submit──▶ Submitted ──▶ Polling ──┬──▶ Completed { book_id }
//!  ▲                   │            │  ▲    └──▶ Failed { error }
//!  └──── error ────────┘            └──┘ tick
//! ```
//!
//! Entering `Polling` spawns exactly one task that owns the poll loop. Polls
//! are strictly sequential: the next request is not issued until the previous
//! one has resolved, so responses are applied in request order. Each response
//! replaces progress, status and message together.
//!
//! Transport failures and request timeouts while polling are logged and
//! retried on the next tick. A terminal status ends the loop, and the
//! outcome is delivered through a one-shot channel, so it can be observed at
//! most once.
//!
//! [`JobTracker::cancel`] aborts the poll task and waits for it to finish;
//! once it returns, the transport is not called again for that job. Dropping
//! the tracker aborts the task as well.

use anyhow::{bail, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::Config;
use crate::credential::Credential;
use crate::error::{ClientError, ClientResult};
use crate::models::{JobPhase, JobSnapshot, JobStatus};
use crate::progress::{JobProgressEvent, ProgressMode};
use crate::transport::{Backend, HttpBackend};
use crate::upload::{print_estimate, UploadEstimator};

/// Observable state of a [`JobTracker`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerState {
    /// No job. `last_error` holds the most recent submission failure.
    Idle { last_error: Option<String> },
    /// The create-job request is in flight.
    Submitted { filename: String },
    Polling {
        job_id: String,
        status: JobStatus,
        progress: u8,
        message: Option<String>,
    },
    Completed { job_id: String, book_id: String },
    Failed { job_id: String, error: String },
}

impl TrackerState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TrackerState::Completed { .. } | TrackerState::Failed { .. }
        )
    }

    pub fn job_id(&self) -> Option<&str> {
        match self {
            TrackerState::Polling { job_id, .. }
            | TrackerState::Completed { job_id, .. }
            | TrackerState::Failed { job_id, .. } => Some(job_id),
            _ => None,
        }
    }

    /// Progress to display, if a job exists.
    pub fn progress(&self) -> Option<u8> {
        match self {
            TrackerState::Polling { progress, .. } => Some(*progress),
            TrackerState::Completed { .. } => Some(100),
            _ => None,
        }
    }
}

/// Terminal result of a tracked job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed { book_id: String },
    Failed { error: String },
}

pub struct JobTracker {
    backend: Arc<dyn Backend>,
    poll_interval: Duration,
    request_timeout: Duration,
    state: Arc<watch::Sender<TrackerState>>,
    poller: Option<JoinHandle<()>>,
    outcome: Option<oneshot::Receiver<JobOutcome>>,
}

impl JobTracker {
    pub fn new(backend: Arc<dyn Backend>, poll_interval: Duration, request_timeout: Duration) -> Self {
        let (state, _rx) = watch::channel(TrackerState::Idle { last_error: None });
        Self {
            backend,
            poll_interval,
            request_timeout,
            state: Arc::new(state),
            poller: None,
            outcome: None,
        }
    }

    pub fn from_config(backend: Arc<dyn Backend>, config: &Config) -> Self {
        Self::new(
            backend,
            config.jobs.poll_interval(),
            config.jobs.request_timeout(),
        )
    }

    pub fn state(&self) -> TrackerState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<TrackerState> {
        self.state.subscribe()
    }

    /// Whether a poll loop is currently running.
    pub fn is_polling(&self) -> bool {
        self.poller.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Create an analysis job for `filename` and start polling it.
    ///
    /// Only valid from `Idle`. On a validation or submission error the
    /// tracker stays `Idle` with the message in `last_error`.
    pub async fn submit(
        &mut self,
        filename: &str,
        credential: Option<&Credential>,
    ) -> ClientResult<String> {
        match &*self.state.borrow() {
            TrackerState::Idle { .. } => {}
            TrackerState::Submitted { .. } | TrackerState::Polling { .. } => {
                return Err(ClientError::validation("a job is already being tracked"));
            }
            TrackerState::Completed { .. } | TrackerState::Failed { .. } => {
                return Err(ClientError::validation(
                    "the previous job has finished; reset the tracker first",
                ));
            }
        }

        let filename = filename.trim();
        if filename.is_empty() {
            return Err(self.reject(ClientError::validation("no file selected")));
        }
        let Some(credential) = credential else {
            return Err(self.reject(ClientError::validation(
                "an API key is required to start analysis",
            )));
        };

        self.state.send_replace(TrackerState::Submitted {
            filename: filename.to_string(),
        });

        let job_id = match self.backend.create_job(filename, credential).await {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(file = filename, error = %e, "failed to start analysis");
                return Err(self.reject(e));
            }
        };
        tracing::info!(job_id = %job_id, file = filename, "analysis job created");

        self.state.send_replace(TrackerState::Polling {
            job_id: job_id.clone(),
            status: JobStatus::Queued,
            progress: 0,
            message: None,
        });

        let (outcome_tx, outcome_rx) = oneshot::channel();
        let handle = tokio::spawn(poll_job(
            self.backend.clone(),
            job_id.clone(),
            self.poll_interval,
            self.request_timeout,
            self.state.clone(),
            outcome_tx,
        ));
        self.poller = Some(handle);
        self.outcome = Some(outcome_rx);

        Ok(job_id)
    }

    /// Wait for the tracked job to reach a terminal state.
    ///
    /// The outcome is handed out once; later calls return a validation error.
    pub async fn wait_for_outcome(&mut self) -> ClientResult<JobOutcome> {
        let rx = self
            .outcome
            .take()
            .ok_or_else(|| ClientError::validation("no job outcome is pending"))?;
        let outcome = rx
            .await
            .map_err(|_| ClientError::validation("job tracking was cancelled"))?;
        if let Some(handle) = self.poller.take() {
            let _ = handle.await;
        }
        Ok(outcome)
    }

    /// Stop polling and return to `Idle`.
    ///
    /// When this returns the poll task has terminated: no further status
    /// request is issued and no further state change is published by it.
    /// Returns whether a poll loop was running.
    pub async fn cancel(&mut self) -> bool {
        let was_running = match self.poller.take() {
            Some(handle) => {
                let running = !handle.is_finished();
                handle.abort();
                let _ = handle.await;
                running
            }
            None => false,
        };
        self.outcome = None;
        if was_running {
            tracing::info!("job polling cancelled");
        }
        self.state
            .send_replace(TrackerState::Idle { last_error: None });
        was_running
    }

    /// Return a finished or errored tracker to `Idle` so it can track
    /// another job. Rejected while a job is in flight; use
    /// [`cancel`](Self::cancel) for that.
    pub fn reset(&mut self) -> ClientResult<()> {
        if self.is_polling() || matches!(*self.state.borrow(), TrackerState::Submitted { .. }) {
            return Err(ClientError::validation(
                "a job is still being tracked; cancel it first",
            ));
        }
        self.poller = None;
        self.outcome = None;
        self.state
            .send_replace(TrackerState::Idle { last_error: None });
        Ok(())
    }

    fn reject(&self, err: ClientError) -> ClientError {
        self.state.send_replace(TrackerState::Idle {
            last_error: Some(err.to_string()),
        });
        err
    }
}

impl Drop for JobTracker {
    fn drop(&mut self) {
        if let Some(handle) = self.poller.take() {
            handle.abort();
        }
    }
}

/// The poll loop for one job. Runs until a terminal state or until aborted.
async fn poll_job(
    backend: Arc<dyn Backend>,
    job_id: String,
    interval: Duration,
    request_timeout: Duration,
    state: Arc<watch::Sender<TrackerState>>,
    outcome: oneshot::Sender<JobOutcome>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_progress = 0u8;

    loop {
        ticker.tick().await;

        let snapshot = match tokio::time::timeout(request_timeout, backend.job_status(&job_id)).await
        {
            Ok(Ok(snapshot)) => snapshot,
            Ok(Err(e)) if e.is_transient() => {
                tracing::warn!(job_id = %job_id, error = %e, "status poll failed, retrying");
                continue;
            }
            Ok(Err(e)) => {
                tracing::error!(job_id = %job_id, code = e.code(), error = %e, "unusable status response");
                finish(
                    &state,
                    outcome,
                    &job_id,
                    JobOutcome::Failed {
                        error: e.to_string(),
                    },
                );
                return;
            }
            Err(_) => {
                tracing::warn!(
                    job_id = %job_id,
                    timeout_secs = request_timeout.as_secs(),
                    "status poll timed out, retrying"
                );
                continue;
            }
        };

        let status = snapshot.status();
        let JobSnapshot {
            phase,
            progress,
            message,
        } = snapshot;

        match phase {
            JobPhase::Completed { book_id } => {
                finish(&state, outcome, &job_id, JobOutcome::Completed { book_id });
                return;
            }
            JobPhase::Failed { error } => {
                finish(&state, outcome, &job_id, JobOutcome::Failed { error });
                return;
            }
            JobPhase::Queued | JobPhase::Processing => {
                if progress < last_progress {
                    tracing::debug!(
                        job_id = %job_id,
                        from = last_progress,
                        to = progress,
                        "backend reported lower progress"
                    );
                }
                last_progress = progress;
                state.send_replace(TrackerState::Polling {
                    job_id: job_id.clone(),
                    status,
                    progress,
                    message,
                });
            }
        }
    }
}

fn finish(
    state: &watch::Sender<TrackerState>,
    outcome_tx: oneshot::Sender<JobOutcome>,
    job_id: &str,
    outcome: JobOutcome,
) {
    let next = match &outcome {
        JobOutcome::Completed { book_id } => {
            tracing::info!(job_id, book_id = %book_id, "analysis completed");
            TrackerState::Completed {
                job_id: job_id.to_string(),
                book_id: book_id.clone(),
            }
        }
        JobOutcome::Failed { error } => {
            tracing::warn!(job_id, error = %error, "analysis failed");
            TrackerState::Failed {
                job_id: job_id.to_string(),
                error: error.clone(),
            }
        }
    };
    state.send_replace(next);
    // The receiver is gone if nobody is waiting; the state change above
    // still records the outcome.
    let _ = outcome_tx.send(outcome);
}

/// CLI entry point for `bka analyze`: upload, estimate, confirm, track.
pub async fn run_analyze(
    config: &Config,
    path: &Path,
    assume_yes: bool,
    progress: ProgressMode,
) -> Result<()> {
    let Some(credential) = config.credential.resolve() else {
        bail!(
            "no API key configured: set credential.api_key or the {} environment variable",
            config.credential.env
        );
    };

    let backend: Arc<dyn Backend> = Arc::new(HttpBackend::from_config(&config.backend)?);
    let mut estimator = UploadEstimator::new(backend.clone());
    let document = estimator.submit_path(path).await?;
    print_estimate(&document, config.pricing.unit_price_per_million);

    if !assume_yes && !confirm_prompt("Start analysis?").await? {
        println!("Analysis not started.");
        return Ok(());
    }

    let filename = estimator.confirm()?;
    let mut tracker = JobTracker::from_config(backend, config);
    let reporter = progress.reporter();
    reporter.report(JobProgressEvent::Submitted {
        filename: filename.clone(),
    });

    let job_id = tracker.submit(&filename, Some(&credential)).await?;
    println!("Job started: {}", job_id);

    let mut updates = tracker.subscribe();
    let mut last_seen = tracker.state();
    if let Some(event) = JobProgressEvent::from_state(&last_seen) {
        reporter.report(event);
    }

    while !last_seen.is_terminal() {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = updates.borrow_and_update().clone();
                if current != last_seen {
                    if let Some(event) = JobProgressEvent::from_state(&current) {
                        reporter.report(event);
                    }
                    last_seen = current;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracker.cancel().await;
                eprintln!("Cancelled. The backend job {} may still be running.", job_id);
                return Ok(());
            }
        }
    }

    match tracker.wait_for_outcome().await? {
        JobOutcome::Completed { book_id } => {
            println!("Analysis complete. Book id: {}", book_id);
            println!("  explore: bka graph {}", book_id);
            println!("  chat:    bka chat --book {}", book_id);
            Ok(())
        }
        JobOutcome::Failed { error } => Err(ClientError::Backend(error).into()),
    }
}

async fn confirm_prompt(question: &str) -> Result<bool> {
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    let mut stdout = tokio::io::stdout();
    stdout
        .write_all(format!("{} [y/N] ", question).as_bytes())
        .await?;
    stdout.flush().await?;

    let mut line = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await?;
    Ok(matches!(
        line.trim().to_ascii_lowercase().as_str(),
        "y" | "yes"
    ))
}
