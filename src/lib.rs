//! Partition-pruned SQL over catalogued, Hive-partitioned object storage tables.
//!
//! A [`Selectable`] is bound to one `database.table`. For each statement it evaluates the
//! partition part of the WHERE clause against the catalog's partitions, lists the objects of the
//! surviving partitions and runs the rest of the statement against every object through the
//! object query service, merging the results under one global LIMIT.

pub mod collaborators;
pub mod config;
pub mod errors;
pub mod executor;
pub mod key_resolver;
pub mod models;
pub mod partition_index;
pub mod query_ast;
pub mod select_stream;

pub use collaborators::{CatalogClient, ClientError, Clients, ObjectQueryClient, ObjectStoreClient};
pub use config::{SelectableConfig, init_logging};
pub use errors::{Result, SelectableError};
pub use executor::{PreparedSelect, SelectHandlers, SelectPhase, Selectable, select_table_sql};
pub use key_resolver::KeyResolver;
pub use models::enums::{InputFormat, OutputFormat, SelectEvent};
pub use models::structs::{Explain, ObjectKey, SelectRequest, TableInfo, TableRef};
pub use partition_index::PartitionIndex;
pub use select_stream::{RowBudget, SelectStream};
