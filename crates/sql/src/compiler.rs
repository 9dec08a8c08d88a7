//! SELECT compiler.
//!
//! Accepted shape: `SELECT <field, ...> | * FROM <table> [WHERE <conjunction>]`.
//! Each WHERE conjunct compares one field of the table with a literal.
//! Equality conjuncts are pushed into metric loads; the other comparisons are
//! kept as residual predicates and evaluated after the join. Anything else
//! (OR, NOT, IN, BETWEEN, functions) is rejected instead of being dropped.

use indexmap::IndexMap;
use quarry_common::{LogicalTableDefinition, Operator, Predicate, Scalar};
use quarry_error::{ErrorCode, ErrorContext, QuarryError, Result};
use sqlparser::ast::{
    BinaryOperator, Expr, GroupByExpr, Ident, ObjectNamePart, Query, Select, SelectItem, SetExpr,
    Statement, TableFactor, UnaryOperator, Value,
};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use tracing::debug;

use crate::catalog::Catalog;
use crate::error::CompileError;
use crate::plan::QueryPlan;

type CompileResult<T> = std::result::Result<T, CompileError>;

/// Compiles `sql` against the tables known to `catalog`.
pub fn compile(sql: &str, catalog: &dyn Catalog) -> Result<QueryPlan> {
    compile_statement(sql, catalog).map_err(|e| {
        let err = QuarryError::from(e);
        if err.code == ErrorCode::SyntaxError {
            err.with_context(ErrorContext::SyntaxError {
                sql: sql.to_string(),
            })
        } else {
            err
        }
    })
}

fn compile_statement(sql: &str, catalog: &dyn Catalog) -> CompileResult<QueryPlan> {
    let statements = Parser::parse_sql(&GenericDialect {}, sql)?;
    let query = match statements.as_slice() {
        [Statement::Query(query)] => query,
        [other] => return Err(CompileError::NotASelect(statement_kind(other))),
        _ => return Err(CompileError::StatementCount(statements.len())),
    };
    let select = plain_select(query)?;

    let (table_name, alias) = single_table(select)?;
    let table = catalog
        .table(&table_name)
        .ok_or_else(|| CompileError::TableNotFound {
            table: table_name.clone(),
            available: catalog.table_names(),
        })?;
    let scope = Scope {
        table: &table,
        qualifiers: [Some(table_name.as_str()), alias.as_deref()],
    };

    let mut select_fields: Vec<String> = Vec::new();
    for item in &select.projection {
        match item {
            SelectItem::Wildcard(_) => {
                for field in table.fields() {
                    push_unique(&mut select_fields, field);
                }
            }
            SelectItem::UnnamedExpr(expr) => {
                let field = scope.column(expr)?.ok_or_else(|| {
                    CompileError::UnsupportedExpr(format!(
                        "select list entries must be column references, got `{}`",
                        expr
                    ))
                })?;
                push_unique(&mut select_fields, &field);
            }
            SelectItem::ExprWithAlias { alias, .. } => {
                return Err(CompileError::UnsupportedExpr(format!(
                    "column aliases are not supported (`AS {}`)",
                    alias
                )))
            }
            SelectItem::QualifiedWildcard(..) => {
                return Err(CompileError::UnsupportedExpr(
                    "qualified wildcards are not supported".to_string(),
                ))
            }
        }
    }

    let mut field_metric_map = IndexMap::with_capacity(select_fields.len());
    for field in &select_fields {
        let metric = table
            .metric_for(field)
            .ok_or_else(|| scope.field_not_found(field))?;
        field_metric_map.insert(field.clone(), metric.to_string());
    }

    let mut predicates = Vec::new();
    let mut residual = Vec::new();
    if let Some(selection) = &select.selection {
        let mut conjuncts = Vec::new();
        flatten_conjunction(selection, &mut conjuncts);
        for conjunct in conjuncts {
            let predicate = scope.comparison(conjunct)?;
            if predicate.operator == Operator::Eq {
                predicates.push(predicate);
            } else {
                residual.push(predicate);
            }
        }
    }

    debug!(
        table = %table.name,
        fields = select_fields.len(),
        pushed = predicates.len(),
        residual = residual.len(),
        "compiled query"
    );

    Ok(QueryPlan {
        sql: sql.to_string(),
        table,
        select_fields,
        field_metric_map,
        predicates,
        residual,
    })
}

fn statement_kind(statement: &Statement) -> String {
    statement
        .to_string()
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_uppercase()
}

fn plain_select(query: &Query) -> CompileResult<&Select> {
    if query.with.is_some() {
        return Err(CompileError::UnsupportedClause("WITH"));
    }
    if query.order_by.is_some() {
        return Err(CompileError::UnsupportedClause("ORDER BY"));
    }
    if query.limit_clause.is_some() || query.fetch.is_some() {
        return Err(CompileError::UnsupportedClause("LIMIT"));
    }
    let select = match query.body.as_ref() {
        SetExpr::Select(select) => select.as_ref(),
        SetExpr::SetOperation { .. } => return Err(CompileError::UnsupportedClause("UNION")),
        SetExpr::Query(_) => return Err(CompileError::UnsupportedClause("subquery")),
        other => return Err(CompileError::NotASelect(other.to_string())),
    };
    if select.distinct.is_some() {
        return Err(CompileError::UnsupportedClause("DISTINCT"));
    }
    match &select.group_by {
        GroupByExpr::Expressions(exprs, modifiers) if exprs.is_empty() && modifiers.is_empty() => {}
        _ => return Err(CompileError::UnsupportedClause("GROUP BY")),
    }
    if select.having.is_some() {
        return Err(CompileError::UnsupportedClause("HAVING"));
    }
    Ok(select)
}

/// Table name (unquoted) and optional alias of the single FROM entry.
fn single_table(select: &Select) -> CompileResult<(String, Option<String>)> {
    let from = match select.from.as_slice() {
        [from] => from,
        [] => return Err(CompileError::UnsupportedClause("SELECT without FROM")),
        _ => return Err(CompileError::UnsupportedClause("selecting from several tables")),
    };
    if !from.joins.is_empty() {
        return Err(CompileError::UnsupportedClause("JOIN"));
    }
    match &from.relation {
        TableFactor::Table {
            name, alias, args, ..
        } if args.is_none() => {
            let table = match name.0.last() {
                Some(ObjectNamePart::Identifier(ident)) => ident.value.clone(),
                _ => return Err(CompileError::UnsupportedExpr(format!("table name `{}`", name))),
            };
            Ok((table, alias.as_ref().map(|a| a.name.value.clone())))
        }
        _ => Err(CompileError::UnsupportedClause("FROM a derived table")),
    }
}

fn push_unique(fields: &mut Vec<String>, field: &str) {
    if !fields.iter().any(|f| f == field) {
        fields.push(field.to_string());
    }
}

/// Splits nested `AND`s (and parentheses around them) into conjuncts.
fn flatten_conjunction<'e>(expr: &'e Expr, out: &mut Vec<&'e Expr>) {
    match expr {
        Expr::BinaryOp {
            left,
            op: BinaryOperator::And,
            right,
        } => {
            flatten_conjunction(left, out);
            flatten_conjunction(right, out);
        }
        Expr::Nested(inner) => flatten_conjunction(inner, out),
        other => out.push(other),
    }
}

struct Scope<'a> {
    table: &'a LogicalTableDefinition,
    qualifiers: [Option<&'a str>; 2],
}

impl Scope<'_> {
    /// Resolves a column reference to a field of the table.
    ///
    /// `Ok(None)` when `expr` is not a column reference at all.
    fn column(&self, expr: &Expr) -> CompileResult<Option<String>> {
        let ident = match expr {
            Expr::Identifier(ident) => ident,
            Expr::CompoundIdentifier(parts) => match parts.as_slice() {
                [qualifier, ident] if self.is_qualifier(qualifier) => ident,
                _ => {
                    return Err(CompileError::UnsupportedExpr(format!(
                        "column reference `{}` does not belong to table '{}'",
                        expr, self.table.name
                    )))
                }
            },
            Expr::Nested(inner) => return self.column(inner),
            _ => return Ok(None),
        };
        self.resolve_field(&ident.value).map(Some)
    }

    fn is_qualifier(&self, ident: &Ident) -> bool {
        self.qualifiers
            .iter()
            .flatten()
            .any(|q| q.eq_ignore_ascii_case(&ident.value))
    }

    /// Exact match first, then a case-insensitive one.
    fn resolve_field(&self, name: &str) -> CompileResult<String> {
        if self.table.metric_for(name).is_some() {
            return Ok(name.to_string());
        }
        self.table
            .fields()
            .find(|f| f.eq_ignore_ascii_case(name))
            .map(str::to_string)
            .ok_or_else(|| self.field_not_found(name))
    }

    fn field_not_found(&self, field: &str) -> CompileError {
        CompileError::FieldNotFound {
            field: field.to_string(),
            table: self.table.name.clone(),
            available: self.table.fields().map(str::to_string).collect(),
        }
    }

    /// `column <op> literal`, or `literal <op> column` with the operator flipped.
    fn comparison(&self, expr: &Expr) -> CompileResult<Predicate> {
        let Expr::BinaryOp { left, op, right } = expr else {
            return Err(CompileError::UnsupportedExpr(format!("`{}`", expr)));
        };
        let operator = comparison_operator(op)
            .ok_or_else(|| CompileError::UnsupportedExpr(format!("operator {} in `{}`", op, expr)))?;

        if let Some(column) = self.column(left)? {
            let value = literal(right)?;
            return Ok(Predicate::new(column, operator, value));
        }
        if let Some(column) = self.column(right)? {
            let value = literal(left)?;
            return Ok(Predicate::new(column, operator.flip(), value));
        }
        Err(CompileError::UnsupportedExpr(format!(
            "`{}` must compare a column with a literal",
            expr
        )))
    }
}

fn comparison_operator(op: &BinaryOperator) -> Option<Operator> {
    match op {
        BinaryOperator::Eq => Some(Operator::Eq),
        BinaryOperator::NotEq => Some(Operator::NotEq),
        BinaryOperator::Lt => Some(Operator::Lt),
        BinaryOperator::LtEq => Some(Operator::LtEq),
        BinaryOperator::Gt => Some(Operator::Gt),
        BinaryOperator::GtEq => Some(Operator::GtEq),
        _ => None,
    }
}

fn literal(expr: &Expr) -> CompileResult<Scalar> {
    match expr {
        Expr::Value(v) => match &v.value {
            Value::Number(n, _) => number(n, false),
            Value::SingleQuotedString(s) => Ok(Scalar::Utf8(s.clone())),
            Value::Boolean(b) => Ok(Scalar::Boolean(*b)),
            other => Err(CompileError::UnsupportedLiteral(other.to_string())),
        },
        Expr::UnaryOp {
            op: UnaryOperator::Minus,
            expr: inner,
        } => match inner.as_ref() {
            Expr::Value(v) => match &v.value {
                Value::Number(n, _) => number(n, true),
                other => Err(CompileError::UnsupportedLiteral(format!("-{}", other))),
            },
            other => Err(CompileError::UnsupportedLiteral(format!("-{}", other))),
        },
        Expr::Nested(inner) => literal(inner),
        other => Err(CompileError::UnsupportedExpr(format!(
            "`{}` is not a literal",
            other
        ))),
    }
}

/// Integers become LONG, anything with a fraction or exponent DOUBLE.
fn number(text: &str, negative: bool) -> CompileResult<Scalar> {
    let signed = if negative {
        format!("-{}", text)
    } else {
        text.to_string()
    };
    if !text.contains(['.', 'e', 'E']) {
        if let Ok(i) = signed.parse::<i64>() {
            return Ok(Scalar::Int64(i));
        }
    }
    signed
        .parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .map(Scalar::Float64)
        .ok_or(CompileError::UnsupportedLiteral(signed))
}
