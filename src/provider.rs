use crate::model::{FetchScope, RowSet};
use anyhow::Result;
use async_trait::async_trait;

/// Backend the dashboard reads from. Every call is bounded by the caller's timeout and
/// failures are opaque `anyhow` errors.
#[async_trait]
pub trait DataProvider: Send + Sync {
    async fn list_services(&self, scope: &FetchScope) -> Result<RowSet>;

    async fn list_compute_pools(&self, scope: &FetchScope) -> Result<RowSet>;

    async fn list_image_repositories(&self, scope: &FetchScope) -> Result<RowSet>;

    /// Children of `scope.parent`.
    async fn list_service_instances(&self, scope: &FetchScope) -> Result<RowSet>;

    /// Key/value description of one service, in backend order.
    async fn describe_service(&self, scope: &FetchScope, name: &str)
    -> Result<Vec<(String, String)>>;
}
