//! The seam between reconcilers and the array.
//!
//! Reconcilers are generic over [`CommandApi`] so their flows can be
//! exercised against scripted fakes; the real implementation is
//! [`msa_client::Client`].

use async_trait::async_trait;
use msa_client::{ClientError, Response};
use tokio_util::sync::CancellationToken;

#[async_trait]
pub trait CommandApi: Send + Sync {
    /// Runs one command against the array, with session handling and wire
    /// retries behind the call.
    async fn execute(
        &self,
        cancel: &CancellationToken,
        parts: &[&str],
    ) -> Result<Response, ClientError>;
}

#[async_trait]
impl CommandApi for msa_client::Client {
    async fn execute(
        &self,
        cancel: &CancellationToken,
        parts: &[&str],
    ) -> Result<Response, ClientError> {
        msa_client::Client::execute(self, cancel, parts).await
    }
}

#[async_trait]
impl<T: CommandApi + ?Sized> CommandApi for &T {
    async fn execute(
        &self,
        cancel: &CancellationToken,
        parts: &[&str],
    ) -> Result<Response, ClientError> {
        (**self).execute(cancel, parts).await
    }
}

#[async_trait]
impl<T: CommandApi + ?Sized> CommandApi for std::sync::Arc<T> {
    async fn execute(
        &self,
        cancel: &CancellationToken,
        parts: &[&str],
    ) -> Result<Response, ClientError> {
        (**self).execute(cancel, parts).await
    }
}
