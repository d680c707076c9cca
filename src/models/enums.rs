use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Input serialization hint passed to the object query service.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub enum InputFormat {
    Parquet,
    /// Line/document JSON.
    Json,
    /// Delimited text; catalog tables backed by the simple text serde are gzip-compressed by convention.
    Csv { gzip: bool },
    Unknown,
}

impl InputFormat {
    /// Infers the format from a catalog serialization library name such as
    /// `org.openx.data.jsonserde.JsonSerDe`.
    pub fn from_serialization_library(name: &str) -> Self {
        let name = name.to_ascii_lowercase();
        if name.contains("parquet") {
            InputFormat::Parquet
        } else if name.contains("json") {
            InputFormat::Json
        } else if name.contains("simple") || name.contains("csv") {
            InputFormat::Csv { gzip: true }
        } else {
            InputFormat::Unknown
        }
    }

    pub fn is_known(&self) -> bool { !matches!(self, InputFormat::Unknown) }
}

#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug, Default)]
pub enum OutputFormat {
    #[default]
    Json,
    Csv,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "csv" => Ok(OutputFormat::Csv),
            other => Err(format!("unknown output format `{}`", other)),
        }
    }
}

/// One event of an object query result stream.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum SelectEvent {
    /// Raw row payload bytes in the requested output format.
    Records { payload: Vec<u8> },
    Stats { bytes_scanned: u64, bytes_processed: u64, bytes_returned: u64 },
    Progress { bytes_scanned: u64, bytes_processed: u64, bytes_returned: u64 },
    Continuation,
    End,
}

impl SelectEvent {
    pub fn records(payload: impl Into<Vec<u8>>) -> Self { SelectEvent::Records { payload: payload.into() } }

    /// Only record events carry rows and count towards LIMIT.
    pub fn is_data(&self) -> bool { matches!(self, SelectEvent::Records { .. }) }

    pub fn payload(&self) -> Option<&[u8]> {
        match self {
            SelectEvent::Records { payload } => Some(payload),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_format_heuristic() {
        assert_eq!(InputFormat::from_serialization_library("org.apache.hadoop.hive.ql.io.parquet.serde.ParquetHiveSerDe"), InputFormat::Parquet);
        assert_eq!(InputFormat::from_serialization_library("org.openx.data.jsonserde.JsonSerDe"), InputFormat::Json);
        assert_eq!(InputFormat::from_serialization_library("org.apache.hadoop.hive.serde2.lazy.LazySimpleSerDe"), InputFormat::Csv { gzip: true });
        assert_eq!(InputFormat::from_serialization_library("com.example.AvroSerDe"), InputFormat::Unknown);
    }

    #[test]
    fn output_format_parses() {
        assert_eq!(" CSV ".parse::<OutputFormat>(), Ok(OutputFormat::Csv));
        assert!("xml".parse::<OutputFormat>().is_err());
    }
}
