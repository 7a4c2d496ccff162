use std::collections::HashMap;

use reqwest::StatusCode;
use reqwest::header::{CONTENT_LENGTH, LOCATION};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::TransferError;

/// An open resumable upload session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSession {
    /// URL every chunk of the upload is sent to.
    pub location: String,
}

/// Opens a resumable upload session.
///
/// Sends a zero-length `POST` to `upload_url` carrying the headers the build
/// service handed out with the file. The session exists once the endpoint
/// answers `201 Created` with a `Location`; any other outcome is an error.
pub async fn bootstrap_session(
    http: &reqwest::Client,
    upload_url: &str,
    headers: &HashMap<String, String>,
    cancel: &CancellationToken,
) -> Result<UploadSession, TransferError> {
    // An empty body alone does not put the length on the wire.
    let mut request = http
        .post(upload_url)
        .header(CONTENT_LENGTH, 0)
        .body(Vec::<u8>::new());
    for (name, value) in headers {
        request = request.header(name.as_str(), value.as_str());
    }

    let resp = tokio::select! {
        _ = cancel.cancelled() => return Err(TransferError::Cancelled),
        resp = request.send() => resp?,
    };

    let status = resp.status();
    if status != StatusCode::CREATED {
        let body = resp.text().await.unwrap_or_default();
        return Err(TransferError::UnexpectedStatus {
            status: status.as_u16(),
            body,
        });
    }

    let location = resp
        .headers()
        .get(LOCATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(TransferError::MissingLocation)?;

    // Relative locations resolve against the upload URL.
    let base =
        reqwest::Url::parse(upload_url).map_err(|e| TransferError::InvalidUrl(e.to_string()))?;
    let location = base
        .join(location)
        .map_err(|e| TransferError::InvalidUrl(e.to_string()))?;

    debug!(%location, "upload session opened");
    Ok(UploadSession {
        location: location.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Answers one request with a fixed raw response; returns the request.
    async fn mock_server(
        response: &'static str,
    ) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let url = format!("http://127.0.0.1:{port}/upload");

        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 8192];
            let n = stream.read(&mut buf).await.unwrap();
            stream.write_all(response.as_bytes()).await.unwrap();
            let _ = stream.shutdown().await;
            String::from_utf8_lossy(&buf[..n]).into_owned()
        });

        (url, handle)
    }

    fn upload_headers() -> HashMap<String, String> {
        HashMap::from([("X-Goog-Resumable".to_string(), "start".to_string())])
    }

    #[tokio::test]
    async fn created_with_location_opens_session() {
        let (url, handle) = mock_server(
            "HTTP/1.1 201 Created\r\nLocation: /session/abc\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;

        let http = reqwest::Client::new();
        let session = bootstrap_session(&http, &url, &upload_headers(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(session.location.ends_with("/session/abc"));
        assert!(session.location.starts_with("http://127.0.0.1:"));

        let request = handle.await.unwrap().to_lowercase();
        assert!(request.starts_with("post /upload"));
        assert!(request.contains("x-goog-resumable: start"));
        assert!(request.contains("content-length: 0"));
    }

    #[tokio::test]
    async fn non_created_status_fails() {
        let (url, handle) = mock_server(
            "HTTP/1.1 200 OK\r\nLocation: /session/abc\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;

        let http = reqwest::Client::new();
        let err = bootstrap_session(&http, &url, &upload_headers(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::UnexpectedStatus { status: 200, .. }));
        handle.abort();
    }

    #[tokio::test]
    async fn missing_location_fails() {
        let (url, handle) = mock_server(
            "HTTP/1.1 201 Created\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;

        let http = reqwest::Client::new();
        let err = bootstrap_session(&http, &url, &upload_headers(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::MissingLocation));
        handle.abort();
    }

    #[tokio::test]
    async fn cancelled_before_response() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/upload", listener.local_addr().unwrap());

        let cancel = CancellationToken::new();
        cancel.cancel();
        let http = reqwest::Client::new();
        let err = bootstrap_session(&http, &url, &HashMap::new(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Cancelled));
    }
}
