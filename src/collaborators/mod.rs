//! Contracts of the external services a [`Selectable`](crate::Selectable) consumes: the catalog,
//! object store listing and the per-object query service.
//!
//! Implementations live with the caller; [`memory`] holds in-process versions used by the tests.

pub mod memory;

use std::sync::Arc;

use futures::stream::BoxStream;

use crate::models::enums::SelectEvent;
use crate::models::structs::{CatalogTable, ObjectListing, ObjectQueryRequest, PartitionPage};

/// Opaque failure reported by a collaborator client. Retries, if any, happen inside the client.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct ClientError {
    pub message: String,
}

impl ClientError {
    pub fn new(message: impl Into<String>) -> Self { Self { message: message.into() } }
}

pub type EventStream = BoxStream<'static, Result<SelectEvent, ClientError>>;

/// What the object query service hands back; `payload` is `None` when the service answered
/// without an event stream.
pub struct ObjectQueryResponse {
    pub payload: Option<EventStream>,
}

#[async_trait::async_trait]
pub trait CatalogClient: Send + Sync {
    /// `Ok(None)` when the table does not exist.
    async fn get_table(&self, database: &str, table: &str) -> Result<Option<CatalogTable>, ClientError>;

    /// One page of partitions; pass the previous page's `next_token` to continue.
    async fn get_partitions(
        &self,
        database: &str,
        table: &str,
        next_token: Option<String>,
    ) -> Result<PartitionPage, ClientError>;
}

#[async_trait::async_trait]
pub trait ObjectStoreClient: Send + Sync {
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        next_token: Option<String>,
    ) -> Result<ObjectListing, ClientError>;
}

#[async_trait::async_trait]
pub trait ObjectQueryClient: Send + Sync {
    async fn query(&self, request: ObjectQueryRequest) -> Result<ObjectQueryResponse, ClientError>;
}

/// The three collaborators one table session talks to.
#[derive(Clone)]
pub struct Clients {
    pub catalog: Arc<dyn CatalogClient>,
    pub object_store: Arc<dyn ObjectStoreClient>,
    pub object_query: Arc<dyn ObjectQueryClient>,
}

impl Clients {
    pub fn new(
        catalog: Arc<dyn CatalogClient>,
        object_store: Arc<dyn ObjectStoreClient>,
        object_query: Arc<dyn ObjectQueryClient>,
    ) -> Self {
        Self { catalog, object_store, object_query }
    }
}
