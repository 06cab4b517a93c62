//! Session service client
//!
//! Two multipart endpoints: `start_session` issues the session id and
//! `upload_video` receives both artifacts, the metadata and the activity log.

use crate::config::ServerConfig;
use crate::recorder::metadata::{ArtifactKind, FormData, SessionMetadata};
use crate::utils::error::{AppError, AppResult};
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, Response};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

const VIDEO_CONTENT_TYPE: &str = "video/mp4";
const LOGS_PART_NAME: &str = "extension_logs.json";

#[derive(Debug, Deserialize)]
struct StartSessionResponse {
    id: String,
}

/// One artifact to attach to an upload
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub kind: ArtifactKind,
    pub file_name: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub session_id: String,
    pub files: Vec<UploadFile>,
    pub metadata: SessionMetadata,
    /// Pretty-printed activity log; omitted when empty
    pub logs: Option<String>,
}

#[derive(Clone)]
pub struct SessionApi {
    client: Client,
    base_url: String,
}

impl SessionApi {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Config(format!("http client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// `None` when no server is configured
    pub fn from_config(config: &ServerConfig) -> AppResult<Option<Self>> {
        config
            .base_url
            .as_deref()
            .map(|url| Self::new(url, Duration::from_secs(config.timeout_secs)))
            .transpose()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint)
    }

    /// Register a new session and return the server-issued id
    pub async fn start_session(&self, form: &FormData) -> AppResult<String> {
        let body = Form::new()
            .text("group", form.group.clone())
            .text("name", form.name.clone())
            .text("surname", form.surname.clone())
            .text("patronymic", form.patronymic.clone())
            .text("link", form.link.clone());

        let response = self
            .client
            .post(self.url("start_session"))
            .multipart(body)
            .send()
            .await?;
        let response = ensure_success(response, "start_session").await?;

        let parsed: StartSessionResponse = response.json().await?;
        tracing::info!("Session {} registered with server", parsed.id);
        Ok(parsed.id)
    }

    /// Send both artifacts. File bodies are streamed from disk.
    pub async fn upload_video(&self, request: UploadRequest) -> AppResult<serde_json::Value> {
        let mut body = Form::new();

        for file in &request.files {
            let handle = tokio::fs::File::open(&file.path).await?;
            let length = handle.metadata().await?.len();
            let part = Part::stream_with_length(Body::from(handle), length)
                .file_name(file.file_name.clone())
                .mime_str(VIDEO_CONTENT_TYPE)?;
            let field = match file.kind {
                ArtifactKind::Screen => "screen_video",
                ArtifactKind::Camera => "camera_video",
            };
            body = body.part(field, part);
        }

        body = body
            .text("id", request.session_id.clone())
            .text("metadata", serde_json::to_string(&request.metadata)?);

        if let Some(logs) = request.logs {
            let part = Part::text(logs)
                .file_name(LOGS_PART_NAME)
                .mime_str("application/json")?;
            body = body.part("logs", part);
        }

        tracing::info!(
            "Uploading {} file(s) for session {}",
            request.files.len(),
            request.session_id
        );
        let response = self
            .client
            .post(self.url("upload_video"))
            .multipart(body)
            .send()
            .await?;
        let response = ensure_success(response, "upload_video").await?;

        // The reply body is informational only
        Ok(response.json().await.unwrap_or(serde_json::Value::Null))
    }
}

async fn ensure_success(response: Response, endpoint: &str) -> AppResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    Err(AppError::Transport(format!(
        "{} returned {}: {}",
        endpoint,
        status.as_u16(),
        text.chars().take(200).collect::<String>()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_start_session_returns_server_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/start_session"))
            .and(body_string_contains("Ivanov"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "id": "abc123" })))
            .expect(1)
            .mount(&server)
            .await;

        let api = SessionApi::new(server.uri(), Duration::from_secs(5)).unwrap();
        let form = FormData {
            surname: "Ivanov".into(),
            ..Default::default()
        };

        assert_eq!(api.start_session(&form).await.unwrap(), "abc123");
    }

    #[tokio::test]
    async fn test_upload_sends_all_parts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/upload_video"))
            .and(body_string_contains("name=\"screen_video\""))
            .and(body_string_contains("name=\"camera_video\""))
            .and(body_string_contains("session_client_mime"))
            .and(body_string_contains("extension_logs.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "status": "ok" })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let screen = dir.path().join("proctoring_screen_x.mp4");
        let camera = dir.path().join("proctoring_camera_x.mp4");
        std::fs::write(&screen, b"screen-bytes").unwrap();
        std::fs::write(&camera, b"camera-bytes").unwrap();

        let api = SessionApi::new(format!("{}/", server.uri()), Duration::from_secs(5)).unwrap();
        let reply = api
            .upload_video(UploadRequest {
                session_id: "abc123".into(),
                files: vec![
                    UploadFile {
                        kind: ArtifactKind::Screen,
                        file_name: "proctoring_screen_x.mp4".into(),
                        path: screen,
                    },
                    UploadFile {
                        kind: ArtifactKind::Camera,
                        file_name: "proctoring_camera_x.mp4".into(),
                        path: camera,
                    },
                ],
                metadata: SessionMetadata::default(),
                logs: Some("[]".into()),
            })
            .await
            .unwrap();

        assert_eq!(reply["status"], "ok");
    }

    #[tokio::test]
    async fn test_server_error_is_transport_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/start_session"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let api = SessionApi::new(server.uri(), Duration::from_secs(5)).unwrap();
        let err = api.start_session(&FormData::default()).await.unwrap_err();
        assert!(matches!(err, AppError::Transport(msg) if msg.contains("500")));
    }

    #[test]
    fn test_from_config_without_url() {
        assert!(SessionApi::from_config(&ServerConfig::default()).unwrap().is_none());
    }
}
