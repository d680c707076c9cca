//! In-memory partition filter.
//!
//! Each partition path (`col1=v1/col2=v2`) is decomposed once into its column values; a
//! partition-only WHERE clause is then evaluated per partition with SQL three-valued logic.
//! Only partitions for which the predicate is definitely TRUE survive.

use std::cmp::Ordering;

use once_cell::sync::OnceCell;
use regex::Regex;

use crate::errors::{Result, SelectableError};
use crate::query_ast::{BinaryOperator, Expr, Literal, QueryAstError, parse_where_clause, unqualified};

#[derive(Debug)]
struct PartitionRow {
    path: String,
    values: Vec<String>,
}

#[derive(Debug)]
pub struct PartitionIndex {
    columns: Vec<String>,
    paths: Vec<String>,
    rows: OnceCell<Vec<PartitionRow>>,
}

impl PartitionIndex {
    pub fn new(columns: Vec<String>, paths: Vec<String>) -> Self {
        Self { columns, paths, rows: OnceCell::new() }
    }

    pub fn columns(&self) -> &[String] { &self.columns }
    pub fn paths(&self) -> &[String] { &self.paths }

    /// Partitions satisfying `where_clause` (with or without the `WHERE` keyword).
    /// An empty clause returns every partition without evaluating anything.
    pub fn filter(&self, where_clause: Option<&str>) -> Result<Vec<String>> {
        let clause = match where_clause.map(str::trim) {
            None | Some("") => return Ok(self.paths.clone()),
            Some(c) => c,
        };
        match parse_where_clause(clause)? {
            Some(expr) => self.filter_expr(&expr),
            None => Ok(self.paths.clone()),
        }
    }

    pub fn filter_expr(&self, expr: &Expr) -> Result<Vec<String>> {
        if self.columns.is_empty() || self.paths.is_empty() {
            return Ok(Vec::new());
        }
        let rows = self.rows.get_or_try_init(|| self.decompose_all())?;
        let mut out = Vec::new();
        for row in rows {
            let eval = Evaluator { columns: &self.columns, values: &row.values };
            if eval.predicate(expr)? == Some(true) {
                out.push(row.path.clone());
            }
        }
        log::debug!("partition filter kept {} of {} partitions", out.len(), rows.len());
        Ok(out)
    }

    fn decompose_all(&self) -> Result<Vec<PartitionRow>> {
        self.paths
            .iter()
            .map(|p| Ok(PartitionRow { path: p.clone(), values: decompose(p, &self.columns)? }))
            .collect()
    }
}

/// Splits `col1=v1/col2=v2` into `[v1, v2]` following the column order. A value runs until the
/// next `/<column>=` marker, so values may themselves contain `/` or `=`.
pub fn decompose(path: &str, columns: &[String]) -> Result<Vec<String>> {
    let malformed = |reason: String| SelectableError::MalformedPartitionPath { path: path.to_string(), reason };
    let mut rest = path;
    let mut values = Vec::with_capacity(columns.len());
    for (i, col) in columns.iter().enumerate() {
        let prefix = format!("{}=", col);
        rest = rest.strip_prefix(prefix.as_str()).ok_or_else(|| malformed(format!("expected `{}` segment", prefix)))?;
        let value = match columns.get(i + 1) {
            Some(next) => {
                let marker = format!("/{}=", next);
                let end = rest.find(marker.as_str()).ok_or_else(|| malformed(format!("expected `{}=` segment", next)))?;
                let (value, tail) = rest.split_at(end);
                rest = &tail[1..];
                value
            }
            None => std::mem::take(&mut rest),
        };
        values.push(value.to_string());
    }
    Ok(values)
}

#[derive(Debug, Clone, PartialEq)]
enum Value {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
}

impl Value {
    fn truth(&self) -> Option<bool> {
        match self {
            Value::Null => None,
            Value::Bool(b) => Some(*b),
            Value::Number(n) => Some(*n != 0.0),
            Value::Text(t) => match t.to_ascii_lowercase().as_str() {
                "true" => Some(true),
                "false" => Some(false),
                other => Some(other.parse::<f64>().is_ok_and(|n| n != 0.0)),
            },
        }
    }

    fn as_text(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Bool(b) => Some(b.to_string()),
            Value::Number(n) => Some(n.to_string()),
            Value::Text(t) => Some(t.clone()),
        }
    }
}

/// Numbers compare numerically against text that parses as a number. Any other text sorts after
/// every number, the way SQLite orders values of numeric affinity. `None` is SQL unknown.
fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Null, _) | (_, Value::Null) => None,
        (Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
        (Value::Number(a), Value::Text(t)) => match t.trim().parse::<f64>() {
            Ok(b) => a.partial_cmp(&b),
            Err(_) => Some(Ordering::Less),
        },
        (Value::Text(t), Value::Number(b)) => match t.trim().parse::<f64>() {
            Ok(a) => a.partial_cmp(b),
            Err(_) => Some(Ordering::Greater),
        },
        (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Bool(b), other) => other.truth().map(|o| b.cmp(&o)),
        (other, Value::Bool(b)) => other.truth().map(|o| o.cmp(b)),
    }
}

fn and(a: Option<bool>, b: Option<bool>) -> Option<bool> {
    match (a, b) {
        (Some(false), _) | (_, Some(false)) => Some(false),
        (Some(true), Some(true)) => Some(true),
        _ => None,
    }
}

fn or(a: Option<bool>, b: Option<bool>) -> Option<bool> {
    match (a, b) {
        (Some(true), _) | (_, Some(true)) => Some(true),
        (Some(false), Some(false)) => Some(false),
        _ => None,
    }
}

fn negate_if(negated: bool, v: Option<bool>) -> Option<bool> {
    if negated { v.map(|b| !b) } else { v }
}

/// `%` and `_` wildcards, everything else literal.
fn like_regex(pattern: &str) -> std::result::Result<Regex, regex::Error> {
    let mut re = String::from("(?s)^");
    for c in pattern.chars() {
        match c {
            '%' => re.push_str(".*"),
            '_' => re.push('.'),
            c => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re)
}

struct Evaluator<'a> {
    columns: &'a [String],
    values: &'a [String],
}

impl Evaluator<'_> {
    fn value(&self, expr: &Expr) -> Result<Value> {
        match expr {
            Expr::Column(c) => {
                let name = unqualified(c);
                let idx = self
                    .columns
                    .iter()
                    .position(|col| col.eq_ignore_ascii_case(name))
                    .ok_or_else(|| QueryAstError::UnknownColumn(name.to_string()))?;
                // Partition values are directory names; `__HIVE_DEFAULT_PARTITION__` is text too.
                Ok(Value::Text(self.values[idx].clone()))
            }
            Expr::Literal(Literal::Null) => Ok(Value::Null),
            Expr::Literal(Literal::Boolean(b)) => Ok(Value::Bool(*b)),
            Expr::Literal(Literal::String(s)) => Ok(Value::Text(s.clone())),
            Expr::Literal(Literal::Number(n)) => n
                .parse::<f64>()
                .map(Value::Number)
                .map_err(|_| QueryAstError::Parse(format!("invalid number `{}`", n)).into()),
            Expr::Nested(inner) => self.value(inner),
            other => Ok(match self.predicate(other)? {
                Some(b) => Value::Bool(b),
                None => Value::Null,
            }),
        }
    }

    fn predicate(&self, expr: &Expr) -> Result<Option<bool>> {
        Ok(match expr {
            Expr::Column(_) | Expr::Literal(_) => self.value(expr)?.truth(),
            Expr::Nested(inner) => self.predicate(inner)?,
            Expr::Not(inner) => self.predicate(inner)?.map(|b| !b),
            Expr::BinaryOp { left, op, right } => match op {
                BinaryOperator::And => and(self.predicate(left)?, self.predicate(right)?),
                BinaryOperator::Or => or(self.predicate(left)?, self.predicate(right)?),
                cmp => compare(&self.value(left)?, &self.value(right)?).map(|o| match cmp {
                    BinaryOperator::Eq => o == Ordering::Equal,
                    BinaryOperator::NotEq => o != Ordering::Equal,
                    BinaryOperator::Lt => o == Ordering::Less,
                    BinaryOperator::LtEq => o != Ordering::Greater,
                    BinaryOperator::Gt => o == Ordering::Greater,
                    _ => o != Ordering::Less,
                }),
            },
            Expr::InList { expr, list, negated } => {
                let needle = self.value(expr)?;
                let mut result = Some(false);
                for item in list {
                    result = or(result, compare(&needle, &self.value(item)?).map(|o| o == Ordering::Equal));
                }
                negate_if(*negated, result)
            }
            Expr::Between { expr, low, high, negated } => {
                let v = self.value(expr)?;
                let above = compare(&v, &self.value(low)?).map(|o| o != Ordering::Less);
                let below = compare(&v, &self.value(high)?).map(|o| o != Ordering::Greater);
                negate_if(*negated, and(above, below))
            }
            Expr::Like { expr, pattern, negated } => {
                match (self.value(expr)?.as_text(), self.value(pattern)?.as_text()) {
                    (Some(text), Some(pattern)) => {
                        let re = like_regex(&pattern).map_err(|e| QueryAstError::Parse(e.to_string()))?;
                        negate_if(*negated, Some(re.is_match(&text)))
                    }
                    _ => None,
                }
            }
            Expr::IsNull { expr, negated } => Some((self.value(expr)? == Value::Null) != *negated),
            Expr::Raw(_) => return Err(QueryAstError::Unsupported("expression in partition filter").into()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> PartitionIndex {
        let columns = vec!["year".to_string(), "region".to_string()];
        let paths = ["2018", "2019", "2020", "2021"]
            .iter()
            .flat_map(|y| ["eu", "us"].map(|r| format!("year={}/region={}", y, r)))
            .collect();
        PartitionIndex::new(columns, paths)
    }

    #[test]
    fn empty_clause_returns_everything() {
        let idx = index();
        assert_eq!(idx.filter(None).unwrap().len(), 8);
        assert_eq!(idx.filter(Some("  ")).unwrap().len(), 8);
    }

    #[test]
    fn numeric_range_and_string_equality() {
        let got = index().filter(Some("WHERE year >= 2020 AND region = 'eu'")).unwrap();
        assert_eq!(got, vec!["year=2020/region=eu", "year=2021/region=eu"]);
    }

    #[test]
    fn in_between_like_and_not() {
        let idx = index();
        assert_eq!(idx.filter(Some("year IN (2018, 2021) AND region <> 'us'")).unwrap().len(), 2);
        assert_eq!(idx.filter(Some("year BETWEEN 2019 AND 2020")).unwrap().len(), 4);
        assert_eq!(idx.filter(Some("region LIKE 'e_'")).unwrap().len(), 4);
        assert_eq!(idx.filter(Some("NOT (year = 2018 OR region = 'us')")).unwrap().len(), 3);
    }

    #[test]
    fn true_literal_keeps_all() {
        assert_eq!(index().filter(Some("WHERE TRUE AND TRUE")).unwrap().len(), 8);
    }

    #[test]
    fn hive_default_partition_is_plain_text() {
        let idx = PartitionIndex::new(
            vec!["d".to_string()],
            vec!["d=1".to_string(), "d=__HIVE_DEFAULT_PARTITION__".to_string()],
        );
        assert_eq!(idx.filter(Some("d = '__HIVE_DEFAULT_PARTITION__'")).unwrap(), vec!["d=__HIVE_DEFAULT_PARTITION__"]);
        assert_eq!(idx.filter(Some("d <> 1")).unwrap(), vec!["d=__HIVE_DEFAULT_PARTITION__"]);
        assert_eq!(idx.filter(Some("d > 100")).unwrap(), vec!["d=__HIVE_DEFAULT_PARTITION__"]);
        assert!(idx.filter(Some("d IS NULL")).unwrap().is_empty());
    }

    #[test]
    fn null_comparisons_are_unknown() {
        let idx = PartitionIndex::new(vec!["d".to_string()], vec!["d=1".to_string(), "d=3".to_string()]);
        assert!(idx.filter(Some("d NOT IN (2, NULL)")).unwrap().is_empty());
        assert!(idx.filter(Some("d = NULL")).unwrap().is_empty());
        assert_eq!(idx.filter(Some("d IS NOT NULL")).unwrap().len(), 2);
    }

    #[test]
    fn unknown_column_is_malformed_query() {
        let err = index().filter(Some("month = 1")).unwrap_err();
        assert!(matches!(err, SelectableError::MalformedQuery(QueryAstError::UnknownColumn(_))));
    }

    #[test]
    fn decompose_respects_whole_segments() {
        let cols = vec!["code".to_string(), "response_code".to_string()];
        assert_eq!(decompose("code=a/b/response_code=200", &cols).unwrap(), vec!["a/b", "200"]);
        let err = decompose("year=2020", &cols).unwrap_err();
        assert!(matches!(err, SelectableError::MalformedPartitionPath { .. }));
    }

    #[test]
    fn malformed_path_fails_filter() {
        let idx = PartitionIndex::new(vec!["a".to_string()], vec!["b=1".to_string()]);
        assert!(matches!(idx.filter(Some("a = 1")), Err(SelectableError::MalformedPartitionPath { .. })));
        assert_eq!(idx.filter(None).unwrap(), vec!["b=1"]);
    }
}
