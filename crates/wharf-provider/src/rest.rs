//! REST adapter for the Provider API.
//!
//! Wire envelopes are private to this module; the engine only ever sees the
//! domain types from [`crate::model`]. Short API calls get an overall
//! timeout here — download traffic goes through the engine's own client
//! with different transport rules.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::client::ProviderClient;
use crate::error::{ProviderError, ProviderResult};
use crate::model::{AccountInfo, FileKind, RemoteFile, Transfer};

/// Overall timeout applied to Provider API calls.
const API_TIMEOUT: Duration = Duration::from_secs(30);
/// Connect timeout applied to Provider API calls.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
/// Maximum response body bytes echoed into error details.
const DETAIL_LIMIT: usize = 256;

/// Production [`ProviderClient`] backed by the Provider's REST API.
#[derive(Debug)]
pub struct RestProvider {
    http: Client,
    base: Url,
    token: String,
}

#[derive(Debug, Deserialize)]
struct TransfersEnvelope {
    transfers: Vec<Transfer>,
}

#[derive(Debug, Deserialize)]
struct TransferEnvelope {
    transfer: Transfer,
}

#[derive(Debug, Deserialize)]
struct FilesEnvelope {
    files: Vec<RemoteFile>,
}

#[derive(Debug, Deserialize)]
struct FileEnvelope {
    file: RemoteFile,
}

#[derive(Debug, Deserialize)]
struct UrlEnvelope {
    url: String,
}

impl RestProvider {
    /// Construct a client for the given API base URL and bearer token.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL does not parse or the HTTP client
    /// cannot be constructed.
    pub fn new(api_base: &str, token: &str) -> ProviderResult<Self> {
        let base = Url::parse(api_base).map_err(|_| ProviderError::InvalidBaseUrl {
            value: api_base.to_string(),
        })?;
        let http = Client::builder()
            .timeout(API_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|source| ProviderError::network("client.build", source))?;
        Ok(Self {
            http,
            base,
            token: token.to_string(),
        })
    }

    fn endpoint(&self, operation: &'static str, path: &str) -> ProviderResult<Url> {
        self.base
            .join(path)
            .map_err(|_| ProviderError::InvalidResponse {
                operation,
                reason: "endpoint_join",
            })
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.http
            .request(method, url)
            .bearer_auth(&self.token)
            .header(reqwest::header::ACCEPT, "application/json")
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        builder: RequestBuilder,
    ) -> ProviderResult<T> {
        let body = self.execute_raw(operation, builder).await?;
        serde_json::from_str(&body).map_err(|source| ProviderError::decode(operation, source))
    }

    async fn execute_raw(
        &self,
        operation: &'static str,
        builder: RequestBuilder,
    ) -> ProviderResult<String> {
        let response = builder
            .send()
            .await
            .map_err(|source| ProviderError::network(operation, source))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|source| ProviderError::network(operation, source))?;

        if status.is_success() {
            return Ok(body);
        }

        debug!(operation, status = status.as_u16(), "provider rejected call");
        Err(Self::rejection(operation, status, &body))
    }

    fn rejection(operation: &'static str, status: StatusCode, body: &str) -> ProviderError {
        let detail = body
            .chars()
            .take(DETAIL_LIMIT)
            .collect::<String>()
            .trim()
            .to_string();
        ProviderError::Http {
            operation,
            status: status.as_u16(),
            detail: (!detail.is_empty()).then_some(detail),
        }
    }
}

#[async_trait]
impl ProviderClient for RestProvider {
    async fn account_info(&self) -> ProviderResult<AccountInfo> {
        let url = self.endpoint("account_info", "api/account")?;
        self.execute("account_info", self.request(Method::GET, url))
            .await
    }

    async fn list_transfers(&self) -> ProviderResult<Vec<Transfer>> {
        let url = self.endpoint("list_transfers", "api/transfers")?;
        let envelope: TransfersEnvelope = self
            .execute("list_transfers", self.request(Method::GET, url))
            .await?;
        Ok(envelope.transfers)
    }

    async fn add_transfer(&self, source: &str, folder_id: u64) -> ProviderResult<Transfer> {
        let url = self.endpoint("add_transfer", "api/transfers")?;
        let envelope: TransferEnvelope = self
            .execute(
                "add_transfer",
                self.request(Method::POST, url).json(&serde_json::json!({
                    "url": source,
                    "save_parent_id": folder_id,
                })),
            )
            .await?;
        Ok(envelope.transfer)
    }

    async fn upload_torrent(
        &self,
        bytes: Vec<u8>,
        filename: &str,
        folder_id: u64,
    ) -> ProviderResult<Transfer> {
        let url = self.endpoint("upload_torrent", "api/files/upload")?;
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(filename.to_string())
            .mime_str("application/x-bittorrent")
            .map_err(|source| ProviderError::network("upload_torrent", source))?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("save_parent_id", folder_id.to_string());
        let envelope: TransferEnvelope = self
            .execute(
                "upload_torrent",
                self.request(Method::POST, url).multipart(form),
            )
            .await?;
        Ok(envelope.transfer)
    }

    async fn retry_transfer(&self, id: u64) -> ProviderResult<Transfer> {
        let url = self.endpoint("retry_transfer", &format!("api/transfers/{id}/retry"))?;
        let envelope: TransferEnvelope = self
            .execute("retry_transfer", self.request(Method::POST, url))
            .await?;
        Ok(envelope.transfer)
    }

    async fn delete_transfer(&self, id: u64) -> ProviderResult<()> {
        let url = self.endpoint("delete_transfer", &format!("api/transfers/{id}"))?;
        self.execute_raw("delete_transfer", self.request(Method::DELETE, url))
            .await?;
        Ok(())
    }

    async fn list_files(&self, folder_id: u64) -> ProviderResult<Vec<RemoteFile>> {
        let mut url = self.endpoint("list_files", "api/files")?;
        url.query_pairs_mut()
            .append_pair("parent_id", &folder_id.to_string());
        let envelope: FilesEnvelope = self
            .execute("list_files", self.request(Method::GET, url))
            .await?;
        Ok(envelope.files)
    }

    async fn get_file(&self, id: u64) -> ProviderResult<RemoteFile> {
        let url = self.endpoint("get_file", &format!("api/files/{id}"))?;
        let envelope: FileEnvelope = match self
            .execute("get_file", self.request(Method::GET, url))
            .await
        {
            Err(err) if err.is_not_found() => {
                return Err(ProviderError::NotFound {
                    operation: "get_file",
                    id,
                });
            }
            other => other?,
        };
        Ok(envelope.file)
    }

    async fn download_url(&self, file_id: u64) -> ProviderResult<String> {
        let url = self.endpoint("download_url", &format!("api/files/{file_id}/url"))?;
        let envelope: UrlEnvelope = match self
            .execute("download_url", self.request(Method::GET, url))
            .await
        {
            Err(err) if err.is_not_found() => {
                return Err(ProviderError::NotFound {
                    operation: "download_url",
                    id: file_id,
                });
            }
            other => other?,
        };
        if envelope.url.trim().is_empty() {
            return Err(ProviderError::InvalidResponse {
                operation: "download_url",
                reason: "empty_url",
            });
        }
        Ok(envelope.url)
    }

    async fn delete_file(&self, file_id: u64) -> ProviderResult<()> {
        let url = self.endpoint("delete_file", &format!("api/files/{file_id}"))?;
        self.execute_raw("delete_file", self.request(Method::DELETE, url))
            .await?;
        Ok(())
    }

    async fn ensure_folder(&self, name: &str) -> ProviderResult<u64> {
        let existing = self.list_files(0).await?;
        if let Some(folder) = existing
            .iter()
            .find(|file| file.kind == FileKind::Folder && file.name == name)
        {
            return Ok(folder.id);
        }

        let url = self.endpoint("ensure_folder", "api/folders")?;
        let envelope: FileEnvelope = self
            .execute(
                "ensure_folder",
                self.request(Method::POST, url).json(&serde_json::json!({
                    "name": name,
                    "parent_id": 0,
                })),
            )
            .await?;
        Ok(envelope.file.id)
    }
}
