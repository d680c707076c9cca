use crate::collaborators::ClientError;
use crate::query_ast::QueryAstError;

#[derive(thiserror::Error, Debug)]
pub enum SelectableError {
    #[error("malformed query: {0}")]
    MalformedQuery(#[from] QueryAstError),
    #[error("invalid select params: {0}")]
    InvalidSelectParams(String),
    #[error("table not found: {0}")]
    TableNotFound(String),
    #[error("table {table} has no usable storage location (got {location:?})")]
    InvalidTableLocation { table: String, location: Option<String> },
    #[error("malformed partition path `{path}`: {reason}")]
    MalformedPartitionPath { path: String, reason: String },
    #[error("resolver I/O error: {0}")]
    ResolverIo(#[source] ClientError),
    #[error("object query for {key} returned no payload")]
    EmptyResultStream { key: String },
    #[error("object query for {key} failed: {source}")]
    ObjectQuery { key: String, #[source] source: ClientError },
}

pub type Result<T> = std::result::Result<T, SelectableError>;
