//! In-process HTTP receiver built on axum.
//!
//! `POST /upload-final` records every multipart part and replies with the
//! configured status. `GET /watermark.png` serves the configured body, which
//! lets watermark downloads run against the same server.

use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// One multipart part of a recorded upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedPart {
    /// Form field name.
    pub name: String,
    /// File name, for file parts.
    pub file_name: Option<String>,
    /// Declared content type.
    pub content_type: Option<String>,
    /// Raw part bytes.
    pub data: Vec<u8>,
}

/// One upload seen by a [`TestReceiver`].
#[derive(Debug, Clone, Default)]
pub struct ReceivedRequest {
    /// Parts in the order they arrived.
    pub parts: Vec<ReceivedPart>,
}

impl ReceivedRequest {
    /// Returns the first part named `name`.
    pub fn part(&self, name: &str) -> Option<&ReceivedPart> {
        self.parts.iter().find(|part| part.name == name)
    }

    /// Returns a text field as a string.
    pub fn text(&self, name: &str) -> Option<String> {
        self.part(name)
            .map(|part| String::from_utf8_lossy(&part.data).into_owned())
    }
}

#[derive(Debug)]
struct Shared {
    status: Mutex<StatusCode>,
    body: Vec<u8>,
    requests: Mutex<Vec<ReceivedRequest>>,
}

/// A local upload receiver answering every request the same way.
#[derive(Debug)]
pub struct TestReceiver {
    addr: SocketAddr,
    shared: Arc<Shared>,
    task: JoinHandle<()>,
}

impl TestReceiver {
    /// Starts a receiver replying with `status` and an empty body.
    pub async fn start(status: u16) -> Self {
        Self::start_with_body(status, Vec::new()).await
    }

    /// Starts a receiver replying with `status` and `body`.
    pub async fn start_with_body(status: u16, body: Vec<u8>) -> Self {
        let shared = Arc::new(Shared {
            status: Mutex::new(StatusCode::from_u16(status).expect("valid status code")),
            body,
            requests: Mutex::new(Vec::new()),
        });
        let app = Router::new()
            .route("/upload-final", post(receive_upload))
            .route("/watermark.png", get(serve_body))
            .with_state(shared.clone());

        // Bind to an ephemeral port.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().expect("receiver address");
        let task = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, shared, task }
    }

    /// Returns `http://127.0.0.1:<port><path>`.
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Changes the status used for subsequent replies.
    pub fn set_status(&self, status: u16) {
        *self.shared.status.lock() = StatusCode::from_u16(status).expect("valid status code");
    }

    /// Returns every upload received so far.
    pub fn requests(&self) -> Vec<ReceivedRequest> {
        self.shared.requests.lock().clone()
    }
}

impl Drop for TestReceiver {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn receive_upload(
    State(shared): State<Arc<Shared>>,
    mut multipart: Multipart,
) -> (StatusCode, Vec<u8>) {
    let mut request = ReceivedRequest::default();
    while let Some(field) = multipart.next_field().await.expect("readable multipart body") {
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(str::to_string);
        let data = field.bytes().await.expect("readable part").to_vec();
        request.parts.push(ReceivedPart {
            name,
            file_name,
            content_type,
            data,
        });
    }
    shared.requests.lock().push(request);

    let status = *shared.status.lock();
    (status, shared.body.clone())
}

async fn serve_body(State(shared): State<Arc<Shared>>) -> (StatusCode, Vec<u8>) {
    let status = *shared.status.lock();
    (status, shared.body.clone())
}

/// Returns an upload URL on a local port with nothing listening.
pub async fn unused_local_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("listener address");
    drop(listener);
    format!("http://{addr}/upload-final")
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::multipart::{Form, Part};

    #[tokio::test]
    async fn test_receiver_records_parts() {
        let receiver = TestReceiver::start_with_body(200, b"stored".to_vec()).await;
        let form = Form::new()
            .part(
                "file",
                Part::bytes(b"jpeg bytes".to_vec())
                    .file_name("watermarked_cat.png.jpg")
                    .mime_str("image/jpeg")
                    .unwrap(),
            )
            .text("worker_name", "worker-1");

        let response = reqwest::Client::new()
            .post(receiver.url("/upload-final"))
            .multipart(form)
            .send()
            .await
            .unwrap();

        assert_eq!(response.status().as_u16(), 200);
        assert_eq!(response.bytes().await.unwrap().as_ref(), b"stored");

        let requests = receiver.requests();
        assert_eq!(requests.len(), 1);
        let file = requests[0].part("file").unwrap();
        assert_eq!(file.file_name.as_deref(), Some("watermarked_cat.png.jpg"));
        assert_eq!(file.content_type.as_deref(), Some("image/jpeg"));
        assert_eq!(file.data, b"jpeg bytes");
        assert_eq!(requests[0].text("worker_name").as_deref(), Some("worker-1"));
    }

    #[tokio::test]
    async fn test_receiver_status_can_change() {
        let receiver = TestReceiver::start(503).await;
        let client = reqwest::Client::new();

        let first = client.get(receiver.url("/watermark.png")).send().await.unwrap();
        assert_eq!(first.status().as_u16(), 503);

        receiver.set_status(200);
        let second = client.get(receiver.url("/watermark.png")).send().await.unwrap();
        assert_eq!(second.status().as_u16(), 200);
        assert!(receiver.requests().is_empty());
    }
}
