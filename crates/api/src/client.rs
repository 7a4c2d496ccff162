//! Build service API client.
//!
//! Async HTTP client using `reqwest` with Bearer token authentication.

use buildpush_protocol::constants::DEFAULT_API_BASE_URL;
use buildpush_protocol::messages::{
    CreateBuildFileRequest, CreateBuildRequest, CreateBuildResponse, CredentialsInfoResponse,
    ErrorsResponse, FinalizeBuildFileRequest, ListBuildFilesResponse, NewBuildFileResponse,
};
use buildpush_protocol::{Build, BuildFile, BuildFileKind, BuildFileSubType, UploadType};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

/// Errors from the build service client.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid API key")]
    InvalidKey,
}

/// Build service API client.
#[derive(Debug, Clone)]
pub struct Client {
    http: reqwest::Client,
    base_url: String,
}

impl Client {
    /// Creates a new client with the given API key.
    pub fn new(api_key: &str) -> Result<Self, Error> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {api_key}")).map_err(|_| Error::InvalidKey)?,
        );

        let http = reqwest::Client::builder()
            .user_agent(concat!("buildpush/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .build()?;

        Ok(Self {
            http,
            base_url: DEFAULT_API_BASE_URL.to_string(),
        })
    }

    /// Points the client at another API server.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Checks the API key and returns what it grants.
    pub async fn credentials_info(&self) -> Result<CredentialsInfoResponse, Error> {
        self.get("/credentials/info").await
    }

    /// Registers a new build on `target:channel`.
    pub async fn create_build(
        &self,
        target: &str,
        channel: &str,
        user_version: &str,
    ) -> Result<Build, Error> {
        let req = CreateBuildRequest {
            target: target.to_string(),
            channel: channel.to_string(),
            user_version: user_version.to_string(),
        };
        let resp: CreateBuildResponse = self.post("/wharf/builds", &req).await?;
        Ok(resp.build)
    }

    pub async fn list_build_files(&self, build_id: i64) -> Result<Vec<BuildFile>, Error> {
        let resp: ListBuildFilesResponse = self
            .get(&format!("/wharf/builds/{build_id}/files"))
            .await?;
        Ok(resp.files)
    }

    /// Registers a new file on a build and returns where to upload it.
    pub async fn create_build_file(
        &self,
        build_id: i64,
        kind: BuildFileKind,
        sub_type: BuildFileSubType,
        upload_type: UploadType,
    ) -> Result<BuildFile, Error> {
        let req = CreateBuildFileRequest {
            kind,
            sub_type,
            upload_type,
        };
        let resp: NewBuildFileResponse = self
            .post(&format!("/wharf/builds/{build_id}/files"), &req)
            .await?;
        Ok(resp.file)
    }

    /// Declares a file fully uploaded with its final size.
    pub async fn finalize_build_file(
        &self,
        build_id: i64,
        file_id: i64,
        size: i64,
    ) -> Result<(), Error> {
        let _: ErrorsResponse = self
            .post(
                &format!("/wharf/builds/{build_id}/files/{file_id}"),
                &FinalizeBuildFileRequest { size },
            )
            .await?;
        Ok(())
    }

    /// Downloads a file's content.
    pub async fn download_build_file(&self, build_id: i64, file_id: i64) -> Result<Vec<u8>, Error> {
        let url = self.url(&format!("/wharf/builds/{build_id}/files/{file_id}/download"));
        debug!(%url, "downloading build file");

        let resp = self.http.get(&url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(api_error(status.as_u16(), body));
        }
        Ok(resp.bytes().await?.to_vec())
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }

    async fn get<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T, Error> {
        let url = self.url(endpoint);
        debug!(%url, "GET");
        let resp = self.http.get(&url).send().await?;
        read_response(resp).await
    }

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &B,
    ) -> Result<T, Error> {
        let url = self.url(endpoint);
        debug!(%url, "POST");
        let resp = self.http.post(&url).json(body).send().await?;
        read_response(resp).await
    }
}

/// Decodes a JSON response, turning error statuses and `errors` arrays
/// into [`Error::Api`].
async fn read_response<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, Error> {
    let status = resp.status();
    let body = resp.bytes().await?;

    if !status.is_success() {
        return Err(api_error(
            status.as_u16(),
            String::from_utf8_lossy(&body).into_owned(),
        ));
    }

    if let Ok(errors) = serde_json::from_slice::<ErrorsResponse>(&body) {
        if !errors.errors.is_empty() {
            return Err(Error::Api {
                status: status.as_u16(),
                body: errors.errors.join("; "),
            });
        }
    }

    Ok(serde_json::from_slice(&body)?)
}

/// Prefers the service's `errors` list over the raw body.
fn api_error(status: u16, body: String) -> Error {
    let body = match serde_json::from_str::<ErrorsResponse>(&body) {
        Ok(errors) if !errors.errors.is_empty() => errors.errors.join("; "),
        _ => body,
    };
    Error::Api { status, body }
}
