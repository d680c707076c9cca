use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::enums::{InputFormat, OutputFormat};

/// `FROM <database>.<table>`
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableRef {
    pub database: String,
    pub table: String,
}

impl TableRef {
    pub fn new(database: impl Into<String>, table: impl Into<String>) -> Self {
        Self { database: database.into(), table: table.into() }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}.{}", self.database, self.table) }
}

// Catalog responses

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogTable {
    /// Storage location, `s3://bucket/prefix`.
    pub location: Option<String>,
    pub partition_columns: Vec<String>,
    pub serialization_library: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogPartition {
    /// Values in partition-column order.
    pub values: Vec<String>,
    pub location: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PartitionPage {
    pub partitions: Vec<CatalogPartition>,
    pub next_token: Option<String>,
}

// Object store responses

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ObjectListing {
    pub keys: Vec<String>,
    pub next_token: Option<String>,
}

/// Bucket plus prefix of a storage location.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StorageLocation {
    pub bucket: String,
    pub prefix: String,
}

/// One concrete object.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectKey {
    pub bucket: String,
    pub key: String,
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "s3://{}/{}", self.bucket, self.key) }
}

/// A single call against the object query service.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObjectQueryRequest {
    pub bucket: String,
    pub key: String,
    pub expression: String,
    pub expression_type: String,
    pub input_format: InputFormat,
    pub output_format: OutputFormat,
}

/// Table metadata as resolved from the catalog, cached per session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TableInfo {
    pub location: String,
    pub bucket: String,
    pub prefix: String,
    pub partition_columns: Vec<String>,
    pub input_format: InputFormat,
}

impl TableInfo {
    pub fn is_partitioned(&self) -> bool { !self.partition_columns.is_empty() }
}

pub const EXPRESSION_TYPE_SQL: &str = "SQL";

/// Caller-supplied select parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SelectRequest {
    pub expression: String,
    pub expression_type: String,
    /// Overrides the format inferred from the catalog.
    pub input_format: Option<InputFormat>,
    pub output_format: Option<OutputFormat>,
}

impl SelectRequest {
    pub fn sql(expression: impl Into<String>) -> Self {
        Self { expression: expression.into(), expression_type: EXPRESSION_TYPE_SQL.to_string(), input_format: None, output_format: None }
    }

    pub fn with_expression_type(mut self, expression_type: impl Into<String>) -> Self {
        self.expression_type = expression_type.into();
        self
    }

    pub fn with_input_format(mut self, format: InputFormat) -> Self {
        self.input_format = Some(format);
        self
    }

    pub fn with_output_format(mut self, format: OutputFormat) -> Self {
        self.output_format = Some(format);
        self
    }
}

/// Planning report produced without dispatching any object query.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Explain {
    pub table_info: TableInfo,
    /// `WHERE ...` evaluated against partition values, `None` when nothing prunes.
    pub partition_filter_clause: Option<String>,
    pub matched_partitions: Vec<String>,
    pub resolved_keys: Vec<ObjectKey>,
    pub rewritten_expression: String,
    pub per_key_limit: Option<u64>,
    /// 0 means unbounded.
    pub global_limit: u64,
    pub short_circuit: bool,
}

impl Explain {
    pub fn to_json(&self) -> serde_json::Result<String> { serde_json::to_string_pretty(self) }
}
