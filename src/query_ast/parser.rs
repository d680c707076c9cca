use super::{errors::QueryAstError, logical::{BinaryOperator, Expr, Literal}};
use crate::models::structs::TableRef;
use once_cell::sync::Lazy;
use regex::Regex;
use sqlparser::ast as sq;
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

// `FROM <ident>[ . <ident>]*<path>`; the path is whatever non-space text trails the identifiers.
static SOURCE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bFROM\s+([A-Za-z_][A-Za-z0-9_]*)((?:\s*\.\s*[A-Za-z_][A-Za-z0-9_]*)*)([^\s;,()]*)").expect("source regex")
});
static BARE_LIMIT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\s+LIMIT\s*;?\s*$").expect("bare limit regex"));

/// Location of the top-level `FROM <source><path>` clause inside a statement.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SourceClause {
    pub start: usize,
    pub end: usize,
    pub segments: Vec<String>,
    pub path: String,
}

/// A parsed single-source SELECT with its path expression split off.
pub(crate) struct ParsedStatement {
    pub query: Box<sq::Query>,
    pub source: Vec<String>,
    pub path: String,
}

impl ParsedStatement {
    pub fn select_mut(&mut self) -> Option<&mut sq::Select> {
        match self.query.body.as_mut() { sq::SetExpr::Select(sel) => Some(sel.as_mut()), _ => None }
    }

    fn select(&self) -> Option<&sq::Select> {
        match self.query.body.as_ref() { sq::SetExpr::Select(sel) => Some(sel.as_ref()), _ => None }
    }

    pub fn where_ast(&self) -> Option<Expr> {
        self.select().and_then(|sel| sel.selection.as_ref()).map(convert_expr)
    }

    /// The statement's own LIMIT, 0 when absent or not an integer.
    pub fn limit(&self) -> u64 {
        match &self.query.limit {
            Some(sq::Expr::Value(sq::Value::Number(n, _))) => n.parse().unwrap_or(0),
            _ => 0,
        }
    }

    /// Overwrites an existing LIMIT; returns false (and changes nothing) when there is none.
    pub fn set_limit(&mut self, limit: u64) -> bool {
        match self.query.limit.as_mut() {
            Some(current) => {
                *current = sq::Expr::Value(sq::Value::Number(limit.to_string(), false));
                true
            }
            None => false,
        }
    }
}

/// First `FROM` clause that is not nested inside parentheses or a quoted string
/// (so `EXTRACT(YEAR FROM ts)` in a projection is skipped).
pub(crate) fn find_source_clause(sql: &str) -> Option<SourceClause> {
    SOURCE_RE.captures_iter(sql).find_map(|caps| {
        let whole = caps.get(0)?;
        if !is_top_level(sql, whole.start()) { return None; }
        let mut segments = vec![caps[1].to_string()];
        segments.extend(caps[2].split('.').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string));
        Some(SourceClause { start: whole.start(), end: whole.end(), segments, path: caps[3].to_string() })
    })
}

fn is_top_level(sql: &str, pos: usize) -> bool {
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    for c in sql[..pos].chars() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"' | '`') => quote = Some(c),
            (None, '(') => depth += 1,
            (None, ')') => depth -= 1,
            _ => {}
        }
    }
    depth == 0 && quote.is_none()
}

/// Returns the statement with the path expression removed and the source normalised to
/// `db.table`, plus the removed path expression.
pub fn split_path_expression(sql: &str) -> (String, String) {
    match find_source_clause(sql) {
        Some(src) => {
            let plain = format!("{}FROM {}{}", &sql[..src.start], src.segments.join("."), &sql[src.end..]);
            (plain, src.path)
        }
        None => (sql.to_string(), String::new()),
    }
}

pub(crate) fn parse_statement(sql: &str) -> Result<ParsedStatement, QueryAstError> {
    let clause = find_source_clause(sql);
    let (plain, path) = split_path_expression(sql);
    let plain = BARE_LIMIT_RE.replace(&plain, "");

    let dialect = GenericDialect {};
    let mut ast = Parser::parse_sql(&dialect, &plain)?;
    if ast.len() > 1 { return Err(QueryAstError::MultipleStatements); }
    let query = match ast.pop() {
        Some(sq::Statement::Query(q)) => q,
        Some(_) => return Err(QueryAstError::NotSelect),
        None => return Err(QueryAstError::Parse("empty statement".into())),
    };
    let sel = match query.body.as_ref() {
        sq::SetExpr::Select(sel) => sel,
        _ => return Err(QueryAstError::Unsupported("set operations")),
    };
    if sel.from.is_empty() { return Err(QueryAstError::MissingFrom); }
    if sel.from.len() != 1 || !sel.from[0].joins.is_empty() { return Err(QueryAstError::MultipleSources); }
    let source: Vec<String> = match &sel.from[0].relation {
        sq::TableFactor::Table { name, .. } => name.0.iter().map(|i| i.value.clone()).collect(),
        _ => return Err(QueryAstError::Unsupported("derived table source")),
    };
    if source.len() == 1 && source[0].eq_ignore_ascii_case("dual") { return Err(QueryAstError::DualNotSupported); }
    // The regex and the parser must agree on what the source is, otherwise the path split was wrong.
    if let Some(c) = clause && c.segments != source {
        return Err(QueryAstError::Parse(format!("ambiguous source `{}`", source.join("."))));
    }
    Ok(ParsedStatement { query, source, path })
}

/// `FROM db.t[*].path AS x` yields (`db`, `t`) and `[*].path`.
pub fn parse_table_and_trailing_expr(sql: &str) -> Result<(TableRef, String), QueryAstError> {
    let parsed = parse_statement(sql)?;
    match parsed.source.as_slice() {
        [database, table] => Ok((TableRef::new(database.clone(), table.clone()), parsed.path)),
        [name] => Err(QueryAstError::MissingDatabase(name.clone())),
        many => Err(QueryAstError::TooManyQualifiers(many.join("."))),
    }
}

/// WHERE tree of the statement, `None` when it has no WHERE.
pub fn get_where_ast(sql: &str) -> Result<Option<Expr>, QueryAstError> {
    Ok(parse_statement(sql)?.where_ast())
}

/// Parses a standalone `WHERE ...` clause (the keyword is optional).
pub fn parse_where_clause(clause: &str) -> Result<Option<Expr>, QueryAstError> {
    let trimmed = clause.trim();
    if trimmed.is_empty() { return Ok(None); }
    let body = match (trimmed.get(..5), trimmed.get(5..)) {
        (Some(kw), Some(rest)) if kw.eq_ignore_ascii_case("where") && rest.starts_with(|c: char| c.is_whitespace() || c == '(') => rest,
        _ => trimmed,
    };
    get_where_ast(&format!("SELECT * FROM partition_rows WHERE {}", body))
}

fn convert_expr(e: &sq::Expr) -> Expr {
    match e {
        sq::Expr::Identifier(id) => Expr::Column(id.value.clone()),
        sq::Expr::CompoundIdentifier(parts) => Expr::Column(parts.iter().map(|p| p.value.clone()).collect::<Vec<_>>().join(".")),
        sq::Expr::Value(v) => convert_value(v).map(Expr::Literal).unwrap_or_else(|| Expr::Raw(e.to_string())),
        sq::Expr::UnaryOp { op: sq::UnaryOperator::Minus, expr } => match expr.as_ref() {
            sq::Expr::Value(sq::Value::Number(n, _)) => Expr::Literal(Literal::Number(format!("-{}", n))),
            _ => Expr::Raw(e.to_string()),
        },
        sq::Expr::UnaryOp { op: sq::UnaryOperator::Not, expr } => Expr::Not(Box::new(convert_expr(expr))),
        sq::Expr::Nested(inner) => Expr::Nested(Box::new(convert_expr(inner))),
        sq::Expr::BinaryOp { left, op, right } => match convert_op(op) {
            Some(op) if op.is_logical() => Expr::binary(convert_expr(left), op, convert_expr(right)),
            Some(op) => leaf(e, vec![convert_expr(left), convert_expr(right)], |mut o| {
                let right = o.pop()?;
                let left = o.pop()?;
                Some(Expr::binary(left, op, right))
            }),
            None => Expr::Raw(e.to_string()),
        },
        sq::Expr::InList { expr, list, negated, .. } => {
            let mut operands = vec![convert_expr(expr)];
            operands.extend(list.iter().map(convert_expr));
            leaf(e, operands, |mut o| {
                let list = o.split_off(1);
                Some(Expr::InList { expr: Box::new(o.pop()?), list, negated: *negated })
            })
        }
        sq::Expr::Between { expr, negated, low, high, .. } => leaf(e, vec![convert_expr(expr), convert_expr(low), convert_expr(high)], |mut o| {
            let high = o.pop()?;
            let low = o.pop()?;
            Some(Expr::Between { expr: Box::new(o.pop()?), low: Box::new(low), high: Box::new(high), negated: *negated })
        }),
        sq::Expr::Like { negated, expr, pattern, .. } => leaf(e, vec![convert_expr(expr), convert_expr(pattern)], |mut o| {
            let pattern = o.pop()?;
            Some(Expr::Like { expr: Box::new(o.pop()?), pattern: Box::new(pattern), negated: *negated })
        }),
        sq::Expr::IsNull(inner) => leaf(e, vec![convert_expr(inner)], |mut o| Some(Expr::IsNull { expr: Box::new(o.pop()?), negated: false })),
        sq::Expr::IsNotNull(inner) => leaf(e, vec![convert_expr(inner)], |mut o| Some(Expr::IsNull { expr: Box::new(o.pop()?), negated: true })),
        _ => Expr::Raw(e.to_string()),
    }
}

/// A predicate leaf is only understood when every operand is a plain column or literal;
/// anything else (functions, arithmetic, sub-predicates) makes the whole leaf opaque.
fn leaf(source: &sq::Expr, operands: Vec<Expr>, build: impl FnOnce(Vec<Expr>) -> Option<Expr>) -> Expr {
    if operands.iter().all(|o| matches!(o, Expr::Column(_) | Expr::Literal(_))) {
        build(operands).unwrap_or_else(|| Expr::Raw(source.to_string()))
    } else {
        Expr::Raw(source.to_string())
    }
}

fn convert_value(v: &sq::Value) -> Option<Literal> {
    match v {
        sq::Value::Number(n, _) => Some(Literal::Number(n.clone())),
        sq::Value::SingleQuotedString(s) => Some(Literal::String(s.clone())),
        sq::Value::Boolean(b) => Some(Literal::Boolean(*b)),
        sq::Value::Null => Some(Literal::Null),
        _ => None,
    }
}

fn convert_op(op: &sq::BinaryOperator) -> Option<BinaryOperator> {
    Some(match op {
        sq::BinaryOperator::And => BinaryOperator::And,
        sq::BinaryOperator::Or => BinaryOperator::Or,
        sq::BinaryOperator::Eq => BinaryOperator::Eq,
        sq::BinaryOperator::NotEq => BinaryOperator::NotEq,
        sq::BinaryOperator::Lt => BinaryOperator::Lt,
        sq::BinaryOperator::LtEq => BinaryOperator::LtEq,
        sq::BinaryOperator::Gt => BinaryOperator::Gt,
        sq::BinaryOperator::GtEq => BinaryOperator::GtEq,
        _ => return None,
    })
}
