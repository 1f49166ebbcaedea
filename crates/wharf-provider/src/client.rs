//! Capability trait consumed by the transfer engine.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::ProviderResult;
use crate::model::{AccountInfo, RemoteFile, Transfer, TransferEntry};

/// Capability surface the engine consumes.
///
/// Implemented by the REST adapter in [`crate::rest`] and by test doubles.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Fetch account details, including remote disk usage.
    async fn account_info(&self) -> ProviderResult<AccountInfo>;

    /// Fetch the full transfer list for the account.
    async fn list_transfers(&self) -> ProviderResult<Vec<Transfer>>;

    /// Submit a magnet link or torrent URL into the given folder.
    async fn add_transfer(&self, source: &str, folder_id: u64) -> ProviderResult<Transfer>;

    /// Upload raw torrent metainfo bytes into the given folder.
    async fn upload_torrent(
        &self,
        bytes: Vec<u8>,
        filename: &str,
        folder_id: u64,
    ) -> ProviderResult<Transfer>;

    /// Ask the Provider to retry an errored transfer.
    async fn retry_transfer(&self, id: u64) -> ProviderResult<Transfer>;

    /// Delete a transfer on the Provider side.
    async fn delete_transfer(&self, id: u64) -> ProviderResult<()>;

    /// List the direct children of a folder node.
    async fn list_files(&self, folder_id: u64) -> ProviderResult<Vec<RemoteFile>>;

    /// Fetch a single file node.
    async fn get_file(&self, id: u64) -> ProviderResult<RemoteFile>;

    /// Resolve a short-lived download URL for a file node.
    async fn download_url(&self, file_id: u64) -> ProviderResult<String>;

    /// Delete a file node (and its children) on the Provider side.
    async fn delete_file(&self, file_id: u64) -> ProviderResult<()>;

    /// Resolve the id of a top-level folder with the given name, creating it
    /// when it does not exist yet.
    async fn ensure_folder(&self, name: &str) -> ProviderResult<u64>;

    /// Collect every downloadable file under a transfer's root node.
    ///
    /// For a single-file transfer the root node is the file itself and its
    /// relative path is just its name. For a folder root the paths are
    /// relative to that folder, which mirrors the transfer's own directory
    /// under the local target.
    async fn all_transfer_files(&self, root_id: u64) -> ProviderResult<Vec<TransferEntry>> {
        let root = self.get_file(root_id).await?;
        if root.is_file() {
            let relative_path = PathBuf::from(&root.name);
            return Ok(vec![TransferEntry {
                file: root,
                relative_path,
            }]);
        }

        let mut entries = Vec::new();
        let mut pending: Vec<(u64, PathBuf)> = vec![(root.id, PathBuf::new())];
        while let Some((folder_id, prefix)) = pending.pop() {
            for child in self.list_files(folder_id).await? {
                let path = prefix.join(&child.name);
                if child.is_file() {
                    entries.push(TransferEntry {
                        file: child,
                        relative_path: path,
                    });
                } else {
                    pending.push((child.id, path));
                }
            }
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::model::FileKind;
    use std::collections::HashMap;

    /// Minimal in-memory tree for exercising the default walker.
    struct TreeClient {
        nodes: HashMap<u64, RemoteFile>,
        children: HashMap<u64, Vec<u64>>,
    }

    impl TreeClient {
        fn new(nodes: Vec<RemoteFile>) -> Self {
            let mut children: HashMap<u64, Vec<u64>> = HashMap::new();
            for node in &nodes {
                children.entry(node.parent_id).or_default().push(node.id);
            }
            let nodes = nodes.into_iter().map(|node| (node.id, node)).collect();
            Self { nodes, children }
        }
    }

    fn folder(id: u64, parent_id: u64, name: &str) -> RemoteFile {
        RemoteFile {
            id,
            parent_id,
            name: name.to_string(),
            size: 0,
            kind: FileKind::Folder,
        }
    }

    fn file(id: u64, parent_id: u64, name: &str, size: u64) -> RemoteFile {
        RemoteFile {
            id,
            parent_id,
            name: name.to_string(),
            size,
            kind: FileKind::File,
        }
    }

    #[async_trait]
    impl ProviderClient for TreeClient {
        async fn account_info(&self) -> ProviderResult<AccountInfo> {
            unimplemented!("not used by walker tests")
        }

        async fn list_transfers(&self) -> ProviderResult<Vec<Transfer>> {
            unimplemented!("not used by walker tests")
        }

        async fn add_transfer(&self, _source: &str, _folder_id: u64) -> ProviderResult<Transfer> {
            unimplemented!("not used by walker tests")
        }

        async fn upload_torrent(
            &self,
            _bytes: Vec<u8>,
            _filename: &str,
            _folder_id: u64,
        ) -> ProviderResult<Transfer> {
            unimplemented!("not used by walker tests")
        }

        async fn retry_transfer(&self, _id: u64) -> ProviderResult<Transfer> {
            unimplemented!("not used by walker tests")
        }

        async fn delete_transfer(&self, _id: u64) -> ProviderResult<()> {
            unimplemented!("not used by walker tests")
        }

        async fn list_files(&self, folder_id: u64) -> ProviderResult<Vec<RemoteFile>> {
            Ok(self
                .children
                .get(&folder_id)
                .into_iter()
                .flatten()
                .filter_map(|id| self.nodes.get(id).cloned())
                .collect())
        }

        async fn get_file(&self, id: u64) -> ProviderResult<RemoteFile> {
            self.nodes
                .get(&id)
                .cloned()
                .ok_or(ProviderError::NotFound {
                    operation: "get_file",
                    id,
                })
        }

        async fn download_url(&self, _file_id: u64) -> ProviderResult<String> {
            unimplemented!("not used by walker tests")
        }

        async fn delete_file(&self, _file_id: u64) -> ProviderResult<()> {
            unimplemented!("not used by walker tests")
        }

        async fn ensure_folder(&self, _name: &str) -> ProviderResult<u64> {
            unimplemented!("not used by walker tests")
        }
    }

    #[tokio::test]
    async fn walker_returns_single_file_roots_directly() {
        let client = TreeClient::new(vec![file(1, 0, "movie.mkv", 100)]);
        let entries = client.all_transfer_files(1).await.expect("walk");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].relative_path, PathBuf::from("movie.mkv"));
    }

    #[tokio::test]
    async fn walker_recurses_nested_folders() {
        let client = TreeClient::new(vec![
            folder(1, 0, "show"),
            file(2, 1, "episode1.mkv", 10),
            folder(3, 1, "extras"),
            file(4, 3, "interview.mkv", 5),
        ]);
        let mut entries = client.all_transfer_files(1).await.expect("walk");
        entries.sort_by_key(|entry| entry.file.id);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].relative_path, PathBuf::from("episode1.mkv"));
        assert_eq!(
            entries[1].relative_path,
            PathBuf::from("extras/interview.mkv")
        );
    }

    #[tokio::test]
    async fn walker_surfaces_missing_roots() {
        let client = TreeClient::new(vec![]);
        let err = client.all_transfer_files(9).await.expect_err("missing");
        assert!(err.is_not_found());
    }
}
