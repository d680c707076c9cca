use super::{
    emitter::emit_expr,
    errors::QueryAstError,
    logical::{Expr, unqualified},
    parser::{ParsedStatement, parse_statement},
};
use log::warn;
use sqlparser::ast as sq;

/// Which columns a predicate leaf touches, relative to the table's partition columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LeafScope {
    Constant,
    Partition,
    NonPartition,
    Mixed,
    Opaque,
}

fn leaf_scope(leaf: &Expr, partition_columns: &[String]) -> LeafScope {
    if matches!(leaf, Expr::Raw(_)) { return LeafScope::Opaque; }
    let cols = leaf.referenced_columns();
    let is_part = |c: &&str| partition_columns.iter().any(|p| p.eq_ignore_ascii_case(unqualified(c)));
    match (cols.iter().any(is_part), cols.iter().all(is_part)) {
        _ if cols.is_empty() => LeafScope::Constant,
        (true, true) => LeafScope::Partition,
        (false, _) => LeafScope::NonPartition,
        (true, false) => LeafScope::Mixed,
    }
}

fn project(expr: &Expr, keep: &dyn Fn(&Expr) -> bool) -> Expr {
    match expr {
        Expr::BinaryOp { left, op, right } if op.is_logical() => Expr::binary(project(left, keep), *op, project(right, keep)),
        Expr::Nested(inner) => Expr::Nested(Box::new(project(inner, keep))),
        // Replacing a leaf under NOT with TRUE would turn it into FALSE, so the whole negation goes.
        Expr::Not(inner) => {
            if project(inner, keep) == **inner { expr.clone() } else { Expr::boolean(true) }
        }
        Expr::Literal(_) => expr.clone(),
        leaf if keep(leaf) => leaf.clone(),
        _ => Expr::boolean(true),
    }
}

/// Every predicate that is not purely about partition columns becomes TRUE.
pub fn project_partition_only(ast: &Expr, partition_columns: &[String]) -> Expr {
    project(ast, &|leaf| match leaf_scope(leaf, partition_columns) {
        LeafScope::Constant | LeafScope::Partition => true,
        LeafScope::Mixed => {
            warn!("predicate `{}` mixes partition and data columns; it can not prune partitions", emit_expr(leaf));
            false
        }
        LeafScope::NonPartition | LeafScope::Opaque => false,
    })
}

/// Every predicate that touches a partition column becomes TRUE.
pub fn project_non_partition_only(ast: &Expr, partition_columns: &[String]) -> Expr {
    project(ast, &|leaf| match leaf_scope(leaf, partition_columns) {
        LeafScope::Constant | LeafScope::NonPartition | LeafScope::Opaque => true,
        LeafScope::Mixed => {
            warn!("predicate `{}` mixes partition and data columns; dropped from object queries", emit_expr(leaf));
            false
        }
        LeafScope::Partition => false,
    })
}

/// The LIMIT value, 0 when absent, not a number, or when the statement does not parse.
pub fn get_limit(sql: &str) -> u64 {
    parse_statement(sql).map(|parsed| parsed.limit()).unwrap_or(0)
}

/// Overwrites an existing LIMIT value; never adds one. The statement is re-rendered with its
/// source and path expression intact.
pub fn set_limit(sql: &str, limit: u64) -> Result<String, QueryAstError> {
    let mut parsed = parse_statement(sql)?;
    if !parsed.set_limit(limit) {
        return Ok(sql.to_string());
    }
    let source = parsed.source.join(".");
    set_source(&mut parsed, &source)?;
    Ok(parsed.query.to_string())
}

/// `FROM db.t[*].x` becomes `FROM <placeholder>[*].x`.
pub fn rewrite_source_to_placeholder(sql: &str, placeholder: &str) -> Result<String, QueryAstError> {
    let mut parsed = parse_statement(sql)?;
    set_source(&mut parsed, placeholder)?;
    Ok(parsed.query.to_string())
}

// An unquoted `Ident` is printed verbatim, which lets already-rendered SQL ride through the
// sqlparser tree without being re-parsed.
fn verbatim(sql: String) -> sq::Ident {
    sq::Ident::new(sql)
}

pub(crate) fn set_source(parsed: &mut ParsedStatement, placeholder: &str) -> Result<(), QueryAstError> {
    let source = format!("{}{}", placeholder, parsed.path);
    let sel = parsed.select_mut().ok_or(QueryAstError::NotSelect)?;
    match sel.from.first_mut().map(|f| &mut f.relation) {
        Some(sq::TableFactor::Table { name, .. }) => {
            *name = sq::ObjectName(vec![verbatim(source)]);
            Ok(())
        }
        _ => Err(QueryAstError::MissingFrom),
    }
}

pub(crate) fn set_where(parsed: &mut ParsedStatement, predicate: Option<&Expr>) -> Result<(), QueryAstError> {
    let sel = parsed.select_mut().ok_or(QueryAstError::NotSelect)?;
    sel.selection = predicate.map(|p| sq::Expr::Identifier(verbatim(emit_expr(p))));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query_ast::{emitter::render_where, parser::get_where_ast};

    fn cols(c: &[&str]) -> Vec<String> { c.iter().map(|s| s.to_string()).collect() }

    #[test]
    fn not_over_data_column_is_dropped_entirely() {
        let ast = get_where_ast("SELECT * FROM db.t WHERE NOT (year = 2020 AND foo = 1)").unwrap().unwrap();
        assert_eq!(render_where(&project_partition_only(&ast, &cols(&["year"]))), "WHERE TRUE");
        let ast = get_where_ast("SELECT * FROM db.t WHERE NOT year = 2020").unwrap().unwrap();
        assert_eq!(render_where(&project_partition_only(&ast, &cols(&["year"]))), "WHERE NOT year = 2020");
    }

    #[test]
    fn mixed_comparison_is_dropped_from_both_sides() {
        let ast = get_where_ast("SELECT * FROM db.t WHERE year = foo").unwrap().unwrap();
        assert_eq!(render_where(&project_partition_only(&ast, &cols(&["year"]))), "WHERE TRUE");
        assert_eq!(render_where(&project_non_partition_only(&ast, &cols(&["year"]))), "WHERE TRUE");
    }

    #[test]
    fn opaque_leaf_only_reaches_object_queries() {
        let ast = get_where_ast("SELECT * FROM db.t WHERE year = 2020 AND upper(name) = 'X'").unwrap().unwrap();
        assert_eq!(render_where(&project_partition_only(&ast, &cols(&["year"]))), "WHERE year = 2020 AND TRUE");
        let data = render_where(&project_non_partition_only(&ast, &cols(&["year"])));
        assert!(data.starts_with("WHERE TRUE AND "), "{data}");
        assert!(data.to_lowercase().contains("upper(name)"), "{data}");
    }

    #[test]
    fn partition_columns_match_case_insensitively_and_qualified() {
        let ast = get_where_ast("SELECT * FROM db.t s WHERE s.YEAR >= 2019").unwrap().unwrap();
        assert_eq!(render_where(&project_non_partition_only(&ast, &cols(&["year"]))), "WHERE TRUE");
    }

    #[test]
    fn set_limit_touches_only_the_number() {
        assert_eq!(set_limit("SELECT * FROM db.t[*] limit 10", 3).unwrap(), "SELECT * FROM db.t[*] LIMIT 3");
    }

    #[test]
    fn limit_inside_a_string_literal_is_data() {
        let sql = "SELECT * FROM db.t WHERE msg = 'limit 7' LIMIT 42";
        assert_eq!(get_limit(sql), 42);
        assert_eq!(set_limit(sql, 5).unwrap(), "SELECT * FROM db.t WHERE msg = 'limit 7' LIMIT 5");
        assert_eq!(get_limit("SELECT * FROM db.t WHERE msg = 'LIMIT 7'"), 0);
        assert_eq!(set_limit("SELECT * FROM db.t WHERE msg = 'LIMIT 7'", 5).unwrap(), "SELECT * FROM db.t WHERE msg = 'LIMIT 7'");
    }
}
