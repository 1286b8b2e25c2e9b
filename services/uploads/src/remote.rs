//! Clients for the remote compression strategies.
//!
//! Both remote endpoints compress *and* store the blob server-side, returning
//! only the stored path. The pipeline still performs the entity insert.

use crate::compression::UploadFile;
use crate::config::{RemoteConfig, UploadsConfig};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument};

#[derive(Debug, Error)]
pub enum RemotePlacementError {
    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("Request to remote compressor failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Remote compressor returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Remote compressor rejected the file: {0}")]
    Rejected(String),

    #[error("Remote compressor response has no path")]
    MissingPath,
}

/// A remote endpoint that compresses a file and stores it, returning its path
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemotePlacement: Send + Sync {
    async fn place(&self, file: &UploadFile, owner_id: &str) -> Result<String, RemotePlacementError>;
}

/// Response body shared by both remote endpoints
#[derive(Debug, Deserialize)]
struct PlacementResponse {
    path: Option<String>,
    error: Option<String>,
}

impl PlacementResponse {
    fn into_path(self) -> Result<String, RemotePlacementError> {
        if let Some(error) = self.error {
            return Err(RemotePlacementError::Rejected(error));
        }
        match self.path {
            Some(path) if !path.is_empty() => Ok(path),
            _ => Err(RemotePlacementError::MissingPath),
        }
    }
}

async fn read_placement(response: reqwest::Response) -> Result<String, RemotePlacementError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(RemotePlacementError::Status {
            status: status.as_u16(),
            body,
        });
    }

    response.json::<PlacementResponse>().await?.into_path()
}

fn build_http_client(config: &RemoteConfig) -> Result<reqwest::Client, RemotePlacementError> {
    reqwest::Client::builder()
        .timeout(config.timeout())
        .build()
        .map_err(RemotePlacementError::Client)
}

/// Stateless compression function reached with a multipart form
pub struct RemoteFunctionClient {
    http: reqwest::Client,
    endpoint: String,
    directory: String,
}

impl RemoteFunctionClient {
    pub fn new(remote: &RemoteConfig, uploads: &UploadsConfig) -> Result<Self, RemotePlacementError> {
        Ok(Self {
            http: build_http_client(remote)?,
            endpoint: remote.function_url.clone(),
            directory: uploads.remote_directory.clone(),
        })
    }
}

#[async_trait]
impl RemotePlacement for RemoteFunctionClient {
    #[instrument(skip(self, file), fields(filename = %file.filename, endpoint = %self.endpoint))]
    async fn place(&self, file: &UploadFile, owner_id: &str) -> Result<String, RemotePlacementError> {
        let mut part = Part::bytes(file.bytes.clone()).file_name(file.filename.clone());
        if let Some(ref content_type) = file.content_type {
            part = part.mime_str(content_type)?;
        }

        let form = Form::new()
            .part("file", part)
            .text("directory", self.directory.clone());

        let response = self
            .http
            .post(&self.endpoint)
            .header("x-user-id", owner_id)
            .multipart(form)
            .send()
            .await?;

        let path = read_placement(response).await?;
        debug!(path = %path, "Remote function stored blob");
        Ok(path)
    }
}

/// JSON body of an edge procedure invocation
#[derive(Debug, Serialize)]
struct EdgeInvocation<'a> {
    filename: &'a str,
    owner_id: &'a str,
    directory: &'a str,
    content_type: Option<&'a str>,
    /// Base64 file contents
    data: String,
}

/// Named procedure on the edge function runtime
pub struct EdgeFunctionClient {
    http: reqwest::Client,
    url: String,
    api_key: Option<String>,
    directory: String,
}

impl EdgeFunctionClient {
    pub fn new(remote: &RemoteConfig, uploads: &UploadsConfig) -> Result<Self, RemotePlacementError> {
        let url = format!(
            "{}/{}",
            remote.edge_functions_url.trim_end_matches('/'),
            remote.edge_function_name
        );

        Ok(Self {
            http: build_http_client(remote)?,
            url,
            api_key: remote.edge_api_key.clone(),
            directory: uploads.remote_directory.clone(),
        })
    }
}

#[async_trait]
impl RemotePlacement for EdgeFunctionClient {
    #[instrument(skip(self, file), fields(filename = %file.filename, url = %self.url))]
    async fn place(&self, file: &UploadFile, owner_id: &str) -> Result<String, RemotePlacementError> {
        let body = EdgeInvocation {
            filename: &file.filename,
            owner_id,
            directory: &self.directory,
            content_type: file.content_type.as_deref(),
            data: STANDARD.encode(&file.bytes),
        };

        let mut request = self.http.post(&self.url).json(&body);
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let path = read_placement(request.send().await?).await?;
        debug!(path = %path, "Edge function stored blob");
        Ok(path)
    }
}
