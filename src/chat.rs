//! Grounded question answering over an analyzed book.
//!
//! A [`ChatSession`] holds the selected book, an append-only conversation and
//! at most one outstanding query. Sending is split in two so a front end can
//! draw the user's turn before the answer arrives:
//!
//! 1. [`ChatSession::begin_send`] appends the user turn, marks the session
//!    awaiting and captures the selected book in a [`PendingQuery`];
//! 2. [`ChatSession::complete_send`] takes that [`PendingQuery`] back,
//!    appends the assistant turn (or a generic error notice) and clears the
//!    awaiting flag. A result for a query that is no longer outstanding is
//!    ignored.
//!
//! [`ChatSession::send`] does both. Switching books keeps the history; each
//! query goes to the book that was selected when it was sent.

use anyhow::Result;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;

use crate::config::Config;
use crate::credential::{Credential, CredentialHandle};
use crate::error::{ClientError, ClientResult};
use crate::library;
use crate::models::{Answer, Book};
use crate::transport::{Backend, HttpBackend};

/// Assistant text shown when a query fails for any reason.
pub const QUERY_FAILED_NOTICE: &str = "Error: Could not get answer.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationTurn {
    pub role: Role,
    pub text: String,
    /// Source excerpts backing an assistant answer, in backend order.
    pub sources: Vec<String>,
}

impl ConversationTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            sources: Vec::new(),
        }
    }

    pub fn assistant(answer: Answer) -> Self {
        Self {
            role: Role::Assistant,
            text: answer.text,
            sources: answer.sources,
        }
    }
}

/// A query captured by [`ChatSession::begin_send`]. Handed back to
/// [`ChatSession::complete_send`] to apply its outcome exactly once.
#[derive(Debug)]
pub struct PendingQuery {
    pub book_id: String,
    pub question: String,
    credential: Credential,
    seq: u64,
}

impl PendingQuery {
    pub async fn execute(&self, backend: &dyn Backend) -> ClientResult<Answer> {
        backend
            .query(&self.book_id, &self.question, &self.credential)
            .await
    }
}

pub struct ChatSession {
    backend: Arc<dyn Backend>,
    credential: watch::Receiver<Option<Credential>>,
    books: Vec<Book>,
    selected: Option<String>,
    turns: Vec<ConversationTurn>,
    /// Sequence number of the outstanding query, if any.
    outstanding: Option<u64>,
    next_seq: u64,
}

impl ChatSession {
    pub fn new(backend: Arc<dyn Backend>, credential: watch::Receiver<Option<Credential>>) -> Self {
        Self {
            backend,
            credential,
            books: Vec::new(),
            selected: None,
            turns: Vec::new(),
            outstanding: None,
            next_seq: 0,
        }
    }

    /// Book to select first: the navigation-provided id when it is a known
    /// book, otherwise the first book, otherwise none.
    pub fn initial_selection(requested: Option<&str>, books: &[Book]) -> Option<String> {
        requested
            .and_then(|id| library::find_book(books, id))
            .or_else(|| books.first())
            .map(|b| b.id.clone())
    }

    /// Replace the known books and apply the initial selection rule.
    pub fn set_books(&mut self, books: Vec<Book>, requested: Option<&str>) {
        self.selected = Self::initial_selection(requested, &books);
        self.books = books;
    }

    /// Fetch the book list from the backend, then [`set_books`](Self::set_books).
    pub async fn load_books(&mut self, requested: Option<&str>) -> ClientResult<()> {
        let books = library::list_books(self.backend.as_ref()).await?;
        self.set_books(books, requested);
        Ok(())
    }

    pub fn books(&self) -> &[Book] {
        &self.books
    }

    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn select_book(&mut self, id: &str) -> ClientResult<()> {
        if library::find_book(&self.books, id).is_none() {
            return Err(ClientError::validation(format!("unknown book: {}", id)));
        }
        self.selected = Some(id.to_string());
        Ok(())
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn is_awaiting(&self) -> bool {
        self.outstanding.is_some()
    }

    /// Start a query. Returns `None`, changing nothing, when the text is
    /// blank, no book is selected, no credential is present, or a query is
    /// already outstanding. Otherwise the text is stored and sent as typed.
    pub fn begin_send(&mut self, text: &str) -> Option<PendingQuery> {
        if text.trim().is_empty() || self.outstanding.is_some() {
            return None;
        }
        let book_id = self.selected.clone()?;
        let credential = self.credential.borrow().clone()?;

        let seq = self.next_seq;
        self.next_seq += 1;
        self.turns.push(ConversationTurn::user(text));
        self.outstanding = Some(seq);
        Some(PendingQuery {
            book_id,
            question: text.to_string(),
            credential,
            seq,
        })
    }

    /// Record the outcome of `pending`. Returns `false`, changing nothing,
    /// when `pending` is not the outstanding query.
    pub fn complete_send(&mut self, pending: PendingQuery, result: ClientResult<Answer>) -> bool {
        if self.outstanding != Some(pending.seq) {
            tracing::debug!(
                book_id = %pending.book_id,
                "ignoring result of a query that is not outstanding"
            );
            return false;
        }
        let turn = match result {
            Ok(answer) => ConversationTurn::assistant(answer),
            Err(e) => {
                tracing::warn!(error = %e, "query failed");
                ConversationTurn {
                    role: Role::Assistant,
                    text: QUERY_FAILED_NOTICE.to_string(),
                    sources: Vec::new(),
                }
            }
        };
        self.turns.push(turn);
        self.outstanding = None;
        true
    }

    /// Send a question and wait for the answer. Returns `false` when the
    /// send was a no-op.
    pub async fn send(&mut self, text: &str) -> bool {
        let Some(pending) = self.begin_send(text) else {
            return false;
        };
        let backend = Arc::clone(&self.backend);
        let result = pending.execute(backend.as_ref()).await;
        self.complete_send(pending, result)
    }
}

/// Shorten an excerpt for display, appending `...` only when text was cut.
pub fn truncate_excerpt(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

fn print_turn(turn: &ConversationTurn, preview_chars: usize) {
    match turn.role {
        Role::User => println!("you> {}", turn.text),
        Role::Assistant => {
            println!("{}", turn.text);
            for (i, source) in turn.sources.iter().enumerate() {
                println!("  [{}] {}", i + 1, truncate_excerpt(source, preview_chars));
            }
        }
    }
}

fn session_from_config(config: &Config) -> Result<(ChatSession, CredentialHandle)> {
    let backend: Arc<dyn Backend> = Arc::new(HttpBackend::from_config(&config.backend)?);
    let handle = CredentialHandle::new(config.credential.resolve());
    let session = ChatSession::new(backend, handle.subscribe());
    Ok((session, handle))
}

/// CLI entry point for `bka ask`: one question, one answer.
pub async fn run_ask(config: &Config, question: &str, book: Option<&str>) -> Result<()> {
    let (mut session, handle) = session_from_config(config)?;
    if !handle.is_available() {
        anyhow::bail!(
            "no API key configured; set credential.api_key or ${}",
            config.credential.env
        );
    }
    session.load_books(book).await?;
    if let Some(requested) = book {
        session.select_book(requested)?;
    }
    if session.selected().is_none() {
        anyhow::bail!("no books available; run `bka analyze <file>` first");
    }
    if !session.send(question).await {
        anyhow::bail!("question is empty");
    }
    if let Some(turn) = session.turns().last() {
        print_turn(turn, config.chat.source_preview_chars);
    }
    Ok(())
}

/// CLI entry point for `bka chat`: an interactive session on stdin.
pub async fn run_chat(config: &Config, book: Option<&str>) -> Result<()> {
    let (mut session, handle) = session_from_config(config)?;
    session.load_books(book).await?;
    let preview = config.chat.source_preview_chars;

    match session.selected() {
        Some(id) => println!("Chatting about book {}.", id),
        None => println!("No books available; run `bka analyze <file>` first."),
    }
    if !handle.is_available() {
        println!(
            "No API key configured; set credential.api_key or ${} to ask questions.",
            config.credential.env
        );
    }
    println!("Commands: /books, /book <id>, /quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(cmd) = line.strip_prefix('/') {
            let (cmd, arg) = cmd.split_once(' ').unwrap_or((cmd, ""));
            match cmd {
                "quit" | "exit" => break,
                "books" => {
                    for b in session.books() {
                        let marker = if session.selected() == Some(b.id.as_str()) { "*" } else { " " };
                        println!("{} {}  {}  {}", marker, library::format_created(b), b.id, b.title);
                    }
                }
                "book" => match session.select_book(arg.trim()) {
                    Ok(()) => println!("Now asking about book {}.", arg.trim()),
                    Err(e) => println!("{}", e),
                },
                other => println!("unknown command: /{}", other),
            }
            continue;
        }
        if session.send(line).await {
            if let Some(turn) = session.turns().last() {
                print_turn(turn, preview);
            }
        } else {
            println!("(not sent: select a book and configure an API key)");
        }
    }
    Ok(())
}
