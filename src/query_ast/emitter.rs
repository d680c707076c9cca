use super::logical::{Expr, Literal};

/// Serialises a predicate tree as a `WHERE ...` clause.
pub fn render_where(expr: &Expr) -> String {
    format!("WHERE {}", emit_expr(expr))
}

pub fn emit_expr(expr: &Expr) -> String {
    match expr {
        Expr::Column(c) => emit_column(c),
        Expr::Literal(l) => emit_literal(l),
        Expr::BinaryOp { left, op, right } => format!("{} {} {}", emit_expr(left), op.as_sql(), emit_expr(right)),
        Expr::Not(inner) => format!("NOT {}", emit_expr(inner)),
        Expr::InList { expr, list, negated } => {
            let items = list.iter().map(emit_expr).collect::<Vec<_>>().join(", ");
            format!("{} {}IN ({})", emit_expr(expr), if *negated { "NOT " } else { "" }, items)
        }
        Expr::Between { expr, low, high, negated } => format!(
            "{} {}BETWEEN {} AND {}",
            emit_expr(expr),
            if *negated { "NOT " } else { "" },
            emit_expr(low),
            emit_expr(high)
        ),
        Expr::Like { expr, pattern, negated } => {
            format!("{} {}LIKE {}", emit_expr(expr), if *negated { "NOT " } else { "" }, emit_expr(pattern))
        }
        Expr::IsNull { expr, negated } => {
            format!("{} IS {}NULL", emit_expr(expr), if *negated { "NOT " } else { "" })
        }
        Expr::Nested(inner) => format!("({})", emit_expr(inner)),
        Expr::Raw(r) => r.clone(),
    }
}

fn emit_literal(lit: &Literal) -> String {
    match lit {
        Literal::Number(n) => n.clone(),
        Literal::String(s) => quote_string(s),
        Literal::Boolean(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        Literal::Null => "NULL".to_string(),
    }
}

fn emit_column(col: &str) -> String {
    col.split('.').map(quote_ident).collect::<Vec<_>>().join(".")
}

/// Plain identifiers stay bare; anything else is double-quoted.
pub fn quote_ident(ident: &str) -> String {
    let mut chars = ident.chars();
    let simple = chars.next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if simple { ident.to_string() } else { format!("\"{}\"", ident.replace('"', "\"\"")) }
}

pub fn quote_string(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}
