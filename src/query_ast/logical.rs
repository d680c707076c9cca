//! Closed predicate tree for WHERE clauses.
//!
//! Only the shapes that partition pruning can reason about get their own variant; anything else
//! the SQL parser accepts is carried as [`Expr::Raw`] text and treated as opaque.

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    /// Numeric literal kept in source form so rendering round-trips exactly.
    Number(String),
    String(String),
    Boolean(bool),
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    And,
    Or,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl BinaryOperator {
    pub fn is_logical(self) -> bool { matches!(self, BinaryOperator::And | BinaryOperator::Or) }

    pub fn as_sql(self) -> &'static str {
        match self {
            BinaryOperator::And => "AND",
            BinaryOperator::Or => "OR",
            BinaryOperator::Eq => "=",
            BinaryOperator::NotEq => "<>",
            BinaryOperator::Lt => "<",
            BinaryOperator::LtEq => "<=",
            BinaryOperator::Gt => ">",
            BinaryOperator::GtEq => ">=",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Column(String),
    Literal(Literal),
    BinaryOp { left: Box<Expr>, op: BinaryOperator, right: Box<Expr> },
    Not(Box<Expr>),
    InList { expr: Box<Expr>, list: Vec<Expr>, negated: bool },
    Between { expr: Box<Expr>, low: Box<Expr>, high: Box<Expr>, negated: bool },
    Like { expr: Box<Expr>, pattern: Box<Expr>, negated: bool },
    IsNull { expr: Box<Expr>, negated: bool },
    /// Explicit parentheses from the source statement.
    Nested(Box<Expr>),
    Raw(String),
}

impl Expr {
    pub fn column(name: impl Into<String>) -> Self { Expr::Column(name.into()) }

    pub fn boolean(value: bool) -> Self { Expr::Literal(Literal::Boolean(value)) }

    pub fn binary(left: Expr, op: BinaryOperator, right: Expr) -> Self {
        Expr::BinaryOp { left: Box::new(left), op, right: Box::new(right) }
    }

    /// True for nodes that combine predicates rather than being one.
    pub fn is_connective(&self) -> bool {
        match self {
            Expr::BinaryOp { op, .. } => op.is_logical(),
            Expr::Nested(_) | Expr::Not(_) => true,
            _ => false,
        }
    }

    /// Column names referenced anywhere below this node, unqualified.
    pub fn referenced_columns(&self) -> Vec<&str> {
        fn rec<'a>(e: &'a Expr, out: &mut Vec<&'a str>) {
            match e {
                Expr::Column(c) => out.push(unqualified(c)),
                Expr::Literal(_) | Expr::Raw(_) => {}
                Expr::BinaryOp { left, right, .. } => { rec(left, out); rec(right, out); }
                Expr::Not(inner) | Expr::Nested(inner) => rec(inner, out),
                Expr::InList { expr, list, .. } => { rec(expr, out); list.iter().for_each(|i| rec(i, out)); }
                Expr::Between { expr, low, high, .. } => { rec(expr, out); rec(low, out); rec(high, out); }
                Expr::Like { expr, pattern, .. } => { rec(expr, out); rec(pattern, out); }
                Expr::IsNull { expr, .. } => rec(expr, out),
            }
        }
        let mut out = Vec::new();
        rec(self, &mut out);
        out
    }
}

/// `s.col` and `"col"` both name `col`.
pub fn unqualified(column: &str) -> &str {
    column.rsplit('.').next().unwrap_or(column).trim_matches(|c| c == '"' || c == '`')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn referenced_columns_walks_all_shapes() {
        let e = Expr::binary(
            Expr::InList { expr: Box::new(Expr::column("s.year")), list: vec![Expr::Literal(Literal::Number("1".into()))], negated: false },
            BinaryOperator::Or,
            Expr::Nested(Box::new(Expr::Between {
                expr: Box::new(Expr::column("month")),
                low: Box::new(Expr::Literal(Literal::Number("1".into()))),
                high: Box::new(Expr::column("day")),
                negated: true,
            })),
        );
        assert_eq!(e.referenced_columns(), vec!["year", "month", "day"]);
    }

    #[test]
    fn connectives() {
        assert!(Expr::binary(Expr::boolean(true), BinaryOperator::And, Expr::boolean(true)).is_connective());
        assert!(!Expr::binary(Expr::column("a"), BinaryOperator::Eq, Expr::boolean(true)).is_connective());
        assert!(!Expr::Raw("f(x)".into()).is_connective());
    }
}
