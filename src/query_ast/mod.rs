//! SQL layer for partitioned object tables.
//!
//! Statements look like `SELECT ... FROM db.table<path> [WHERE ...] [LIMIT n]`, where `<path>` is a
//! document-navigation suffix (`[*].a.b`) that only the object query service understands. It is
//! split off before sqlparser sees the statement and re-attached when the per-object statement
//! is emitted.
//!
//! WHERE clauses are lowered into the closed [`logical::Expr`] tree, which the rewrite layer
//! projects in two directions: partition-only (evaluated locally against partition values) and
//! non-partition-only (sent with each object query).

pub mod logical;
pub mod parser;
pub mod emitter;
pub mod rewrite;
pub mod errors;

pub use errors::*;
pub use logical::*;
pub use emitter::render_where;
pub use parser::{get_where_ast, parse_table_and_trailing_expr, parse_where_clause, split_path_expression};
pub use rewrite::{get_limit, project_non_partition_only, project_partition_only, rewrite_source_to_placeholder, set_limit};

/// Compile a table statement into the statement sent against a single object: the source becomes
/// `<placeholder><path>`, partition predicates are replaced by TRUE and an existing LIMIT is
/// overwritten with `per_key_limit`.
pub fn compile_object_query(
    raw: &str,
    partition_columns: &[String],
    placeholder: &str,
    per_key_limit: Option<u64>,
) -> Result<String, QueryAstError> {
    let mut parsed = parser::parse_statement(raw)?;
    let data_where = parsed.where_ast().map(|w| project_non_partition_only(&w, partition_columns));
    rewrite::set_where(&mut parsed, data_where.as_ref())?;
    rewrite::set_source(&mut parsed, placeholder)?;
    if let Some(n) = per_key_limit {
        parsed.set_limit(n);
    }
    let sql = parsed.query.to_string();
    log::debug!("compiled object query: {}", sql);
    Ok(sql)
}
