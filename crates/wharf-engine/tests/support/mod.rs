//! Shared fixtures for engine integration tests: an in-memory Provider
//! double and a ranged HTTP file server.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::extract::{Path as AxumPath, State};
use axum::http::{HeaderMap, header};
use axum::response::Response;
use axum::routing::get;
use wharf_events::{Event, EventStream};
use wharf_provider::{
    AccountInfo, DiskUsage, FileKind, ProviderClient, ProviderError, ProviderResult, RemoteFile,
    Transfer, TransferStatus,
};

/// Default wait budget for event-driven assertions.
pub const WAIT_BUDGET: Duration = Duration::from_secs(15);

/// Build a Provider-side transfer snapshot.
#[must_use]
pub fn transfer(
    id: u64,
    name: &str,
    hash: &str,
    folder_id: u64,
    status: TransferStatus,
    file_id: Option<u64>,
) -> Transfer {
    serde_json::from_value(serde_json::json!({
        "id": id,
        "name": name,
        "hash": hash,
        "save_parent_id": folder_id,
        "status": status.as_str(),
        "percent_done": 100,
        "file_id": file_id,
    }))
    .expect("build transfer")
}

/// Build a folder node.
#[must_use]
pub fn folder(id: u64, parent_id: u64, name: &str) -> RemoteFile {
    RemoteFile {
        id,
        parent_id,
        name: name.to_string(),
        size: 0,
        kind: FileKind::Folder,
    }
}

/// Build a file node.
#[must_use]
pub fn file(id: u64, parent_id: u64, name: &str, size: u64) -> RemoteFile {
    RemoteFile {
        id,
        parent_id,
        name: name.to_string(),
        size,
        kind: FileKind::File,
    }
}

#[derive(Default)]
struct MockState {
    transfers: Vec<Transfer>,
    nodes: HashMap<u64, RemoteFile>,
    children: HashMap<u64, Vec<u64>>,
    urls: HashMap<u64, String>,
    url_requests: Vec<u64>,
    deleted_transfers: Vec<u64>,
    deleted_files: Vec<u64>,
    retried: Vec<u64>,
    next_id: u64,
}

/// In-memory Provider double recording every mutation.
#[derive(Default)]
pub struct MockProvider {
    state: Mutex<MockState>,
}

impl MockProvider {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().expect("mock provider state")
    }

    pub fn seed_transfer(&self, transfer: Transfer) {
        self.lock().transfers.push(transfer);
    }

    pub fn seed_node(&self, node: RemoteFile) {
        let mut state = self.lock();
        state.children.entry(node.parent_id).or_default().push(node.id);
        state.nodes.insert(node.id, node);
    }

    pub fn seed_url(&self, file_id: u64, url: String) {
        self.lock().urls.insert(file_id, url);
    }

    #[must_use]
    pub fn deleted_transfers(&self) -> Vec<u64> {
        self.lock().deleted_transfers.clone()
    }

    #[must_use]
    pub fn deleted_files(&self) -> Vec<u64> {
        self.lock().deleted_files.clone()
    }

    #[must_use]
    pub fn retried(&self) -> Vec<u64> {
        self.lock().retried.clone()
    }

    /// File ids whose download URL was resolved, in request order.
    #[must_use]
    pub fn url_requests(&self) -> Vec<u64> {
        self.lock().url_requests.clone()
    }
}

#[async_trait]
impl ProviderClient for MockProvider {
    async fn account_info(&self) -> ProviderResult<AccountInfo> {
        Ok(AccountInfo {
            username: "tester".to_string(),
            disk: DiskUsage {
                used: 0,
                total: 1_000_000,
                avail: 1_000_000,
            },
        })
    }

    async fn list_transfers(&self) -> ProviderResult<Vec<Transfer>> {
        Ok(self.lock().transfers.clone())
    }

    async fn add_transfer(&self, source: &str, folder_id: u64) -> ProviderResult<Transfer> {
        let mut state = self.lock();
        state.next_id += 1;
        let id = 9_000 + state.next_id;
        let added = transfer(
            id,
            source,
            &format!("hash-{id}"),
            folder_id,
            TransferStatus::InQueue,
            None,
        );
        state.transfers.push(added.clone());
        Ok(added)
    }

    async fn upload_torrent(
        &self,
        _bytes: Vec<u8>,
        filename: &str,
        folder_id: u64,
    ) -> ProviderResult<Transfer> {
        self.add_transfer(filename, folder_id).await
    }

    async fn retry_transfer(&self, id: u64) -> ProviderResult<Transfer> {
        let mut state = self.lock();
        state.retried.push(id);
        state
            .transfers
            .iter()
            .find(|transfer| transfer.id == id)
            .cloned()
            .ok_or(ProviderError::NotFound {
                operation: "retry_transfer",
                id,
            })
    }

    async fn delete_transfer(&self, id: u64) -> ProviderResult<()> {
        let mut state = self.lock();
        state.deleted_transfers.push(id);
        state.transfers.retain(|transfer| transfer.id != id);
        Ok(())
    }

    async fn list_files(&self, folder_id: u64) -> ProviderResult<Vec<RemoteFile>> {
        let state = self.lock();
        Ok(state
            .children
            .get(&folder_id)
            .into_iter()
            .flatten()
            .filter_map(|id| state.nodes.get(id).cloned())
            .collect())
    }

    async fn get_file(&self, id: u64) -> ProviderResult<RemoteFile> {
        self.lock()
            .nodes
            .get(&id)
            .cloned()
            .ok_or(ProviderError::NotFound {
                operation: "get_file",
                id,
            })
    }

    async fn download_url(&self, file_id: u64) -> ProviderResult<String> {
        let mut state = self.lock();
        state.url_requests.push(file_id);
        state
            .urls
            .get(&file_id)
            .cloned()
            .ok_or(ProviderError::NotFound {
                operation: "download_url",
                id: file_id,
            })
    }

    async fn delete_file(&self, file_id: u64) -> ProviderResult<()> {
        self.lock().deleted_files.push(file_id);
        Ok(())
    }

    async fn ensure_folder(&self, _name: &str) -> ProviderResult<u64> {
        Ok(999)
    }
}

/// One observed request against the file server.
#[derive(Debug, Clone)]
pub struct ObservedRequest {
    pub path: String,
    pub range_start: Option<u64>,
}

#[derive(Clone, Default)]
struct ServerState {
    files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    requests: Arc<Mutex<Vec<ObservedRequest>>>,
}

/// Range-aware HTTP file server for download fixtures.
pub struct FileServer {
    addr: SocketAddr,
    state: ServerState,
}

impl FileServer {
    pub async fn start() -> Self {
        let state = ServerState::default();
        let router = Router::new()
            .route("/files/{name}", get(serve_file))
            .with_state(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind file server");
        let addr = listener.local_addr().expect("file server addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        Self { addr, state }
    }

    pub fn put(&self, name: &str, payload: Vec<u8>) {
        self.state
            .files
            .lock()
            .expect("file map")
            .insert(name.to_string(), payload);
    }

    #[must_use]
    pub fn url(&self, name: &str) -> String {
        format!("http://{}/files/{name}", self.addr)
    }

    #[must_use]
    pub fn requests(&self) -> Vec<ObservedRequest> {
        self.state.requests.lock().expect("request log").clone()
    }
}

fn parse_range_start(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::RANGE)?
        .to_str()
        .ok()?
        .strip_prefix("bytes=")?
        .split('-')
        .next()?
        .parse()
        .ok()
}

async fn serve_file(
    AxumPath(name): AxumPath<String>,
    State(state): State<ServerState>,
    headers: HeaderMap,
) -> Response {
    let range_start = parse_range_start(&headers);
    state.requests.lock().expect("request log").push(ObservedRequest {
        path: name.clone(),
        range_start,
    });

    let payload = state.files.lock().expect("file map").get(&name).cloned();
    let Some(payload) = payload else {
        return Response::builder()
            .status(axum::http::StatusCode::NOT_FOUND)
            .body(Body::empty())
            .expect("response");
    };
    let total = payload.len() as u64;

    range_start.map_or_else(
        || {
            Response::builder()
                .status(axum::http::StatusCode::OK)
                .header(header::CONTENT_LENGTH, total)
                .body(Body::from(payload.clone()))
                .expect("response")
        },
        |start| {
            let start_idx = usize::try_from(start).expect("range fits usize");
            Response::builder()
                .status(axum::http::StatusCode::PARTIAL_CONTENT)
                .header(header::CONTENT_LENGTH, total - start)
                .header(
                    header::CONTENT_RANGE,
                    format!("bytes {start}-{}/{total}", total - 1),
                )
                .body(Body::from(payload[start_idx..].to_vec()))
                .expect("response")
        },
    )
}

/// Wait for an event matching the predicate, panicking after the budget.
pub async fn wait_for_event<F>(stream: &mut EventStream, mut predicate: F) -> Event
where
    F: FnMut(&Event) -> bool,
{
    tokio::time::timeout(WAIT_BUDGET, async {
        loop {
            let envelope = stream.next().await.expect("event stream closed");
            if predicate(&envelope.event) {
                return envelope.event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Deterministic pseudo-random payload of the given size.
#[must_use]
pub fn payload(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 251) as u8).collect()
}
