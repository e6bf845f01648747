use crate::{Error, Result};
use std::fmt::Debug;

/// FileRead is used to read a file's content entirely into `Vec<u8>`.
///
/// Credential providers use this to read web identity token files,
/// `~/.aws/credentials` and the hypervisor markers used for EC2 detection.
#[async_trait::async_trait]
pub trait FileRead: Debug + Send + Sync + 'static {
    /// Read the file content entirely in `Vec<u8>`.
    async fn file_read(&self, path: &str) -> Result<Vec<u8>>;
}

/// Tokio-based implementation of the [`FileRead`] trait.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioFileRead;

#[async_trait::async_trait]
impl FileRead for TokioFileRead {
    async fn file_read(&self, path: &str) -> Result<Vec<u8>> {
        tokio::fs::read(path)
            .await
            .map_err(|e| Error::unexpected(format!("failed to read file {path}")).with_source(e))
    }
}
