//! # Book Analyzer
//!
//! Client-side orchestration for a remote book-analysis service.
//!
//! The service turns an uploaded PDF or text file into a knowledge graph and
//! a retrieval index. This crate drives it: upload with a cost estimate,
//! launch and track the analysis job, explore the resulting graph, and ask
//! grounded questions about the book.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────┐  ┌────────────┐  ┌─────────────────┐  ┌─────────────┐
//! │ UploadEstimator│─▶│ JobTracker │─▶│ GraphController │  │ ChatSession │
//! └───────┬────────┘  └─────┬──────┘  └────────┬────────┘  └──────┬──────┘
//!         │                 │                  │                  │
//!         └─────────────────┴───────┬──────────┴──────────────────┘
//!                                   ▼
//!                        ┌─────────────────────┐
//!                        │ transport::Backend  │── HTTP ──▶ analysis service
//!                        └─────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! bka estimate moby-dick.pdf        # upload and show the projected cost
//! bka analyze moby-dick.pdf         # confirm, then track the job
//! bka books                         # list analyzed books
//! bka graph <book-id> --top 10      # main characters by weight
//! bka chat --book <book-id>         # ask questions about the book
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`credential`] | API key value and change channel |
//! | [`error`] | Client error taxonomy |
//! | [`models`] | Wire schemas and domain types |
//! | [`transport`] | Backend trait and HTTP implementation |
//! | [`upload`] | File validation, upload, cost estimate |
//! | [`jobs`] | Analysis job state machine and polling |
//! | [`progress`] | Job progress reporting on stderr |
//! | [`library`] | Book listing |
//! | [`graph`] | Knowledge-graph filtering, ranking and rendering |
//! | [`chat`] | Grounded question answering |
//! | [`logging`] | `tracing` subscriber setup |

pub mod chat;
pub mod config;
pub mod credential;
pub mod error;
pub mod graph;
pub mod jobs;
pub mod library;
pub mod logging;
pub mod models;
pub mod progress;
pub mod transport;
pub mod upload;
