//! End-to-end tests of the library components over HTTP against the mock
//! backend in `common`.

mod common;

use book_analyzer::chat::{ChatSession, Role, QUERY_FAILED_NOTICE};
use book_analyzer::config::load_config;
use book_analyzer::credential::{Credential, CredentialHandle};
use book_analyzer::error::ClientError;
use book_analyzer::graph::GraphController;
use book_analyzer::jobs::{JobOutcome, JobTracker, TrackerState};
use book_analyzer::library;
use book_analyzer::transport::{Backend, HttpBackend};
use book_analyzer::upload::UploadEstimator;
use common::{start_mock_backend, write_config, JOB_ID, LONG_SOURCE_CHARS};
use std::sync::Arc;
use std::time::Duration;

fn http(url: &str) -> Arc<HttpBackend> {
    Arc::new(HttpBackend::new(url, Duration::from_secs(5)).unwrap())
}

#[tokio::test]
async fn health_reports_service_message() {
    let mock = start_mock_backend().await;
    let message = http(&mock.url()).health().await.unwrap();
    assert_eq!(message, "Book Analysis API is running");
}

#[tokio::test]
async fn upload_returns_estimate_and_surfaces_backend_detail() {
    let mock = start_mock_backend().await;
    let mut estimator = UploadEstimator::new(http(&mock.url()));

    let doc = estimator
        .submit("moby dick.txt", vec![b'w'; 4_000])
        .await
        .unwrap();
    assert_eq!(doc.name, "moby dick.txt");
    assert_eq!(doc.text_length, 4_000);
    assert_eq!(doc.estimated_tokens, 1_000);
    assert!((doc.estimated_cost(0.15) - 0.00015).abs() < 1e-12);
    assert_eq!(
        mock.state.uploads.lock().unwrap().clone(),
        vec![("moby dick.txt".to_string(), 4_000)]
    );

    let err = estimator.submit("scan.pdf", Vec::new()).await.unwrap_err();
    assert_eq!(
        err,
        ClientError::Transport {
            status: Some(400),
            message: "Failed to extract text from file.".into()
        }
    );
    assert!(estimator.pending().is_none());
}

#[tokio::test]
async fn analysis_job_runs_to_completion() {
    let mock = start_mock_backend().await;
    let backend = http(&mock.url());
    let credential = Credential::new("sk-test").unwrap();

    let mut tracker = JobTracker::new(
        backend,
        Duration::from_millis(20),
        Duration::from_secs(5),
    );
    let job_id = tracker
        .submit("moby.txt", Some(&credential))
        .await
        .unwrap();
    assert_eq!(job_id, JOB_ID);

    let outcome = tracker.wait_for_outcome().await.unwrap();
    assert_eq!(
        outcome,
        JobOutcome::Completed {
            book_id: "b1".into()
        }
    );
    assert_eq!(
        tracker.state(),
        TrackerState::Completed {
            job_id: JOB_ID.into(),
            book_id: "b1".into()
        }
    );
    assert_eq!(mock.state.polls(), 2);

    let bodies = mock.state.analyze_bodies.lock().unwrap().clone();
    assert_eq!(bodies[0]["filename"], "moby.txt");
    assert_eq!(bodies[0]["api_key"], "sk-test");
}

#[tokio::test]
async fn books_keep_served_order() {
    let mock = start_mock_backend().await;
    let books = library::list_books(http(&mock.url()).as_ref()).await.unwrap();
    let ids: Vec<&str> = books.iter().map(|b| b.id.as_str()).collect();
    assert_eq!(ids, vec!["b2", "b1"]);
    assert_eq!(books[1].title, "Moby Dick");
    assert_eq!(library::format_created(&books[1]), "2023-11-14");
}

#[tokio::test]
async fn graph_loads_filters_and_ranks() {
    let mock = start_mock_backend().await;
    let backend = http(&mock.url());
    let mut graph = GraphController::load(backend.as_ref(), "b1").await.unwrap();

    assert_eq!(graph.book_id(), Some("b1"));
    assert_eq!(graph.dataset().links.len(), 3);
    assert_eq!(graph.dangling_links(), 1);
    assert_eq!(graph.renderable_links().len(), 2);

    let top: Vec<&str> = graph.top_k(2).iter().map(|n| n.id.as_str()).collect();
    assert_eq!(top, vec!["Ahab", "Ishmael"]);

    graph.set_threshold(4.0).unwrap();
    let visible: Vec<&str> = graph.visible_nodes().iter().map(|n| n.id.as_str()).collect();
    assert_eq!(visible, vec!["Ahab", "Ishmael"]);
    assert!(graph.renderable_links().is_empty());

    let detail = graph.node_detail("Ahab").unwrap();
    assert_eq!(detail.node.kind.as_deref(), Some("PERSON"));
    let neighbors: Vec<&str> = detail.neighbors.iter().map(|n| n.id.as_str()).collect();
    assert_eq!(neighbors, vec!["Pequod"]);
}

#[tokio::test]
async fn missing_book_graph_is_a_transport_error() {
    let mock = start_mock_backend().await;
    let err = GraphController::load(http(&mock.url()).as_ref(), "nope")
        .await
        .unwrap_err();
    assert_eq!(
        err,
        ClientError::Transport {
            status: Some(404),
            message: "Book not found".into()
        }
    );
}

#[tokio::test]
async fn chat_answers_with_sources_and_plain_strings() {
    let mock = start_mock_backend().await;
    let handle = CredentialHandle::new(Credential::new("sk-test"));
    let mut session = ChatSession::new(http(&mock.url()), handle.subscribe());
    session.load_books(Some("b1")).await.unwrap();
    assert_eq!(session.selected(), Some("b1"));

    assert!(session.send("Who is Ahab?").await);
    let answer = &session.turns()[1];
    assert_eq!(answer.role, Role::Assistant);
    assert_eq!(answer.text, "Ahab is the captain of the Pequod.");
    assert_eq!(answer.sources.len(), 2);
    assert_eq!(answer.sources[0].len(), LONG_SOURCE_CHARS);

    session.select_book("b2").unwrap();
    assert!(session.send("Who is Tommo?").await);
    let plain = session.turns().last().unwrap();
    assert_eq!(plain.text, "Error: Book has not been indexed yet.");
    assert!(plain.sources.is_empty());
    assert_eq!(session.turns().len(), 4);

    let queries = mock.state.queries.lock().unwrap().clone();
    assert_eq!(queries[0]["book_id"], "b1");
    assert_eq!(queries[0]["query"], "Who is Ahab?");
    assert_eq!(queries[0]["api_key"], "sk-test");
    assert_eq!(queries[1]["book_id"], "b2");
}

#[tokio::test]
async fn unreachable_backend_yields_failure_notice() {
    let url = format!("http://127.0.0.1:{}", common::find_free_port());
    let handle = CredentialHandle::new(Credential::new("sk-test"));
    let backend = http(&url);
    let mut session = ChatSession::new(backend, handle.subscribe());
    session.set_books(
        vec![book_analyzer::models::Book {
            id: "b1".into(),
            title: "Moby Dick".into(),
            graph_file: None,
            timestamp: 0.0,
        }],
        None,
    );

    assert!(session.send("Anyone there?").await);
    assert_eq!(session.turns().last().unwrap().text, QUERY_FAILED_NOTICE);
    assert!(!session.is_awaiting());
}

#[tokio::test]
async fn config_file_drives_backend_and_tracker() {
    let mock = start_mock_backend().await;
    let (_tmp, path) = write_config(&mock.url(), Some("sk-from-config"));
    let cfg = load_config(&path).unwrap();

    assert_eq!(cfg.jobs.poll_interval(), Duration::from_millis(20));
    let credential = cfg.credential.resolve().unwrap();
    assert_eq!(credential.expose(), "sk-from-config");

    let backend: Arc<dyn Backend> = Arc::new(HttpBackend::from_config(&cfg.backend).unwrap());
    let mut tracker = JobTracker::from_config(backend, &cfg);
    tracker.submit("typee.txt", Some(&credential)).await.unwrap();
    assert!(matches!(
        tracker.wait_for_outcome().await.unwrap(),
        JobOutcome::Completed { .. }
    ));
}

/// Read one HTTP request (headers plus a Content-Length body) and return its
/// request line.
async fn read_request(stream: &mut tokio::net::TcpStream) -> String {
    use tokio::io::AsyncReadExt;

    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    let header_end = loop {
        let n = stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "client closed before sending a request");
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };
    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let content_length = head
        .lines()
        .find_map(|l| {
            let (name, value) = l.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())
                .flatten()
        })
        .unwrap_or(0);
    while buf.len() < header_end + content_length {
        let n = stream.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    head.lines().next().unwrap_or_default().to_string()
}

/// Serves `/analyze`, then answers the first `/status` poll with a body cut
/// short by a closed connection and every later poll with completion.
async fn start_flaky_status_server() -> (String, tokio::task::JoinHandle<()>) {
    use tokio::io::AsyncWriteExt;

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    let handle = tokio::spawn(async move {
        let mut status_polls = 0;
        loop {
            let (mut stream, _) = listener.accept().await.unwrap();
            let request_line = read_request(&mut stream).await;
            let response = if request_line.starts_with("POST /analyze") {
                let body = format!(r#"{{"task_id":"{}","status":"processing"}}"#, JOB_ID);
                format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                )
            } else if status_polls == 0 {
                status_polls += 1;
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 200\r\nConnection: close\r\n\r\n{\"sta".to_string()
            } else {
                status_polls += 1;
                let body = r#"{"status":"completed","progress":100,"result":{"book_id":"b1"}}"#;
                format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                )
            };
            let _ = stream.write_all(response.as_bytes()).await;
            let _ = stream.shutdown().await;
        }
    });
    (url, handle)
}

#[tokio::test]
async fn truncated_status_body_is_retried() {
    let (url, server) = start_flaky_status_server().await;
    let credential = Credential::new("sk-test").unwrap();
    let mut tracker = JobTracker::new(http(&url), Duration::from_millis(20), Duration::from_secs(5));

    tracker.submit("moby.txt", Some(&credential)).await.unwrap();
    let outcome = tokio::time::timeout(Duration::from_secs(10), tracker.wait_for_outcome())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        outcome,
        JobOutcome::Completed {
            book_id: "b1".into()
        }
    );
    server.abort();
}
