#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum QueryAstError {
    #[error("parse error: {0}")] Parse(String),
    #[error("multiple queries not supported")] MultipleStatements,
    #[error("only SELECT queries are supported")] NotSelect,
    #[error("only SELECT queries with FROM are supported")] MissingFrom,
    #[error("only single table sources are supported")] MultipleSources,
    #[error("DUAL not supported")] DualNotSupported,
    #[error("both database and table needed, got `{0}`")] MissingDatabase(String),
    #[error("can not use format FROM catalog.db.table: `{0}`")] TooManyQualifiers(String),
    #[error("unknown partition column `{0}`")] UnknownColumn(String),
    #[error("unsupported feature: {0}")] Unsupported(&'static str),
}

impl From<sqlparser::parser::ParserError> for QueryAstError { fn from(e: sqlparser::parser::ParserError) -> Self { QueryAstError::Parse(e.to_string()) } }
