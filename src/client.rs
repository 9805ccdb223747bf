use std::path::Path;

use reqwest::{multipart, Client, Response};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{ClientError, Result};
use crate::stream::{self, ReplySink, StreamOptions, STREAM_FAILED_MESSAGE};

const PDF_MIME: &str = "application/pdf";

#[derive(Serialize)]
struct ChatRequest<'a> {
    message: &'a str,
}

#[derive(Deserialize, Default)]
struct MessageResponse {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: String,
}

/// HTTP client for the resume indexing and chat backend.
#[derive(Debug, Clone)]
pub struct ResumeClient {
    client: Client,
    base_url: String,
}

impl ResumeClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Probe the backend root. Returns its status message.
    pub async fn ping(&self) -> Result<String> {
        let response = self.client.get(self.url("/")).send().await?;
        let response = check_status(response).await?;
        let body: MessageResponse = response.json().await.unwrap_or_default();
        Ok(body.message.unwrap_or_default())
    }

    /// Upload a PDF for indexing. Returns the backend's greeting, if it sent one.
    pub async fn upload(&self, path: &Path, max_bytes: u64) -> Result<Option<String>> {
        if !is_pdf(path) {
            return Err(ClientError::NotPdf(path.to_path_buf()));
        }

        let size = tokio::fs::metadata(path).await?.len();
        if size > max_bytes {
            return Err(ClientError::FileTooLarge { size, limit: max_bytes });
        }

        let data = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "resume.pdf".to_string());

        info!(file = %file_name, bytes = size, "uploading resume");

        let part = multipart::Part::bytes(data)
            .file_name(file_name)
            .mime_str(PDF_MIME)?;
        let form = multipart::Form::new().part("file", part);

        let response = self
            .client
            .post(self.url("/upload"))
            .multipart(form)
            .send()
            .await?;
        let response = check_status(response).await?;

        // The body is optional; an empty or non-JSON success still counts.
        let text = response.text().await?;
        let body: MessageResponse = serde_json::from_str(&text).unwrap_or_default();
        Ok(body.message)
    }

    /// Send a question and stream the reply into `sink`.
    ///
    /// Any failure, whether before the body starts or during it, ends with
    /// the sink receiving [`STREAM_FAILED_MESSAGE`].
    pub async fn chat(
        &self,
        message: &str,
        options: StreamOptions,
        sink: &mut impl ReplySink,
    ) -> Result<String> {
        debug!(chars = message.chars().count(), "sending chat message");

        let response = match self.send_chat(message).await {
            Ok(response) => response,
            Err(err) => {
                warn!(error = %err, "chat request failed");
                sink.failed(STREAM_FAILED_MESSAGE);
                return Err(err);
            }
        };

        stream::reassemble(response.bytes_stream(), options, sink).await
    }

    async fn send_chat(&self, message: &str) -> Result<Response> {
        let response = self
            .client
            .post(self.url("/chat"))
            .json(&ChatRequest { message })
            .send()
            .await?;
        check_status(response).await
    }
}

async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorResponse>(&text)
        .map(|e| e.error)
        .unwrap_or(text);
    Err(ClientError::Api {
        status: status.as_u16(),
        message,
    })
}

/// Extension check standing in for the browser file picker's accept filter.
pub fn is_pdf(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        extract::Multipart,
        http::StatusCode,
        response::IntoResponse,
        routing::{get, post},
        Json, Router,
    };
    use futures_util::stream;
    use serde_json::{json, Value};
    use std::convert::Infallible;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[derive(Default)]
    struct Recorder {
        snapshots: Vec<String>,
        failure: Option<String>,
    }

    impl ReplySink for Recorder {
        fn snapshot(&mut self, text: &str) {
            self.snapshots.push(text.to_string());
        }

        fn failed(&mut self, message: &str) {
            self.failure = Some(message.to_string());
        }
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    async fn accept_pdf(mut multipart: Multipart) -> impl IntoResponse {
        while let Some(field) = multipart.next_field().await.unwrap() {
            if field.name() == Some("file") && field.content_type() == Some(PDF_MIME) {
                let name = field.file_name().unwrap_or_default().to_string();
                let bytes = field.bytes().await.unwrap();
                if bytes.starts_with(b"%PDF") {
                    return (
                        StatusCode::OK,
                        Json(json!({ "message": format!("Indexed {}", name) })),
                    );
                }
            }
        }
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "no pdf in request" })),
        )
    }

    async fn stream_reply(Json(body): Json<Value>) -> impl IntoResponse {
        let question = body["message"].as_str().unwrap_or_default().to_string();
        if question.is_empty() {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "Question is required." })),
            )
                .into_response();
        }
        let frames = vec![
            Ok::<_, Infallible>("data: You ".to_string()),
            Ok("asked\n\ndata:  about".to_string()),
            Ok(format!(" {}\n\n", question)),
            Ok("data: !\n\n".to_string()),
        ];
        (
            [("content-type", "text/event-stream")],
            Body::from_stream(stream::iter(frames)),
        )
            .into_response()
    }

    fn pdf_file(name_suffix: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(name_suffix)
            .tempfile()
            .unwrap();
        file.write_all(b"%PDF-1.4 fake resume").unwrap();
        file
    }

    fn router() -> Router {
        Router::new()
            .route("/", get(|| async { Json(json!({ "message": "Resume Chat API is running!" })) }))
            .route("/upload", post(accept_pdf))
            .route("/chat", post(stream_reply))
    }

    #[tokio::test]
    async fn test_ping() {
        let client = ResumeClient::new(&serve(router()).await);
        assert_eq!(client.ping().await.unwrap(), "Resume Chat API is running!");
    }

    #[tokio::test]
    async fn test_ping_unreachable_backend() {
        let client = ResumeClient::new("http://127.0.0.1:9");
        assert!(matches!(client.ping().await, Err(ClientError::Http(_))));
    }

    #[tokio::test]
    async fn test_upload_returns_server_greeting() {
        let client = ResumeClient::new(&serve(router()).await);
        let file = pdf_file(".pdf");
        let greeting = client.upload(file.path(), 1024).await.unwrap();
        let name = file.path().file_name().unwrap().to_string_lossy().into_owned();
        assert_eq!(greeting, Some(format!("Indexed {}", name)));
    }

    #[tokio::test]
    async fn test_upload_without_body_has_no_greeting() {
        let base = serve(Router::new().route("/upload", post(|| async { StatusCode::OK }))).await;
        let client = ResumeClient::new(&base);
        let file = pdf_file(".PDF");
        assert_eq!(client.upload(file.path(), 1024).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_upload_server_error() {
        let base = serve(Router::new().route(
            "/upload",
            post(|| async {
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "PdfReadError" })),
                )
            }),
        ))
        .await;
        let client = ResumeClient::new(&base);
        let file = pdf_file(".pdf");

        match client.upload(file.path(), 1024).await {
            Err(ClientError::Api { status, message }) => {
                assert_eq!(status, 500);
                assert_eq!(message, "PdfReadError");
            }
            other => panic!("expected api error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_upload_rejects_non_pdf_and_oversized() {
        let client = ResumeClient::new("http://127.0.0.1:9");
        let text = tempfile::Builder::new().suffix(".txt").tempfile().unwrap();
        assert!(matches!(
            client.upload(text.path(), 1024).await,
            Err(ClientError::NotPdf(_))
        ));

        let file = pdf_file(".pdf");
        assert!(matches!(
            client.upload(file.path(), 4).await,
            Err(ClientError::FileTooLarge { limit: 4, .. })
        ));
    }

    #[tokio::test]
    async fn test_chat_streams_reply() {
        let client = ResumeClient::new(&serve(router()).await);
        let mut sink = Recorder::default();
        let reply = client
            .chat("Rust", StreamOptions::default(), &mut sink)
            .await
            .unwrap();

        assert_eq!(reply, "You asked about Rust!");
        assert_eq!(sink.snapshots.last().map(String::as_str), Some("You asked about Rust!"));
        assert!(sink.failure.is_none());
    }

    #[tokio::test]
    async fn test_chat_error_status_fails_sink() {
        let client = ResumeClient::new(&serve(router()).await);
        let mut sink = Recorder::default();
        let err = client
            .chat("", StreamOptions::default(), &mut sink)
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::Api { status: 400, .. }));
        assert!(sink.snapshots.is_empty());
        assert_eq!(sink.failure.as_deref(), Some(STREAM_FAILED_MESSAGE));
    }

    #[test]
    fn test_is_pdf() {
        assert!(is_pdf(Path::new("cv.pdf")));
        assert!(is_pdf(Path::new("/tmp/My CV.PDF")));
        assert!(!is_pdf(Path::new("cv.docx")));
        assert!(!is_pdf(Path::new("pdf")));
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let client = ResumeClient::new("http://localhost:8000/");
        assert_eq!(client.url("/chat"), "http://localhost:8000/chat");
    }
}
