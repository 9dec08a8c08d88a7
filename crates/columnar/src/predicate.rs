//! Typed predicate matching shared by the filter evaluator and the loaders'
//! row-level pushdown.

use quarry_common::{DataType, Operator, Predicate, Scalar};
use quarry_error::{ErrorCode, QuarryError, Result};

use crate::column::TypedColumn;

pub const DOUBLE_EPSILON: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq)]
enum Literal {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl Literal {
    fn from_scalar(value: &Scalar, data_type: DataType, column: &str) -> Result<Self> {
        let coerced = value.coerce(data_type).ok_or_else(|| {
            QuarryError::new(
                ErrorCode::TypeMismatch,
                format!(
                    "value '{}' is not a valid {} for column '{}'",
                    value, data_type, column
                ),
            )
        })?;
        Ok(match coerced {
            Scalar::Utf8(s) => Literal::Str(s),
            Scalar::Int64(v) | Scalar::TimestampMillis(v) => Literal::Int(v),
            Scalar::Float64(v) => Literal::Float(v),
            Scalar::Boolean(v) => Literal::Bool(v),
        })
    }
}

/// A predicate bound to a column type, with its literal already coerced.
#[derive(Debug, Clone)]
pub struct CompiledPredicate {
    column: String,
    operator: Operator,
    data_type: DataType,
    /// One element except for `IN`
    literals: Vec<Literal>,
}

impl CompiledPredicate {
    /// Fails when the operator is not defined for the type (ordering on
    /// strings or booleans) or the literal does not parse as the column type.
    pub fn compile(predicate: &Predicate, data_type: DataType) -> Result<Self> {
        if predicate.operator.is_ordering()
            && matches!(data_type, DataType::String | DataType::Boolean)
        {
            return Err(QuarryError::new(
                ErrorCode::UnsupportedExpression,
                format!(
                    "operator '{}' is not supported on {} column '{}'",
                    predicate.operator, data_type, predicate.column
                ),
            )
            .with_hint("Only equality comparisons are allowed on this column"));
        }

        let literals = if predicate.operator == Operator::In {
            let list = predicate.value.to_string();
            list.split(',')
                .map(|item| {
                    Literal::from_scalar(
                        &Scalar::Utf8(item.trim().to_string()),
                        data_type,
                        &predicate.column,
                    )
                })
                .collect::<Result<Vec<_>>>()?
        } else {
            vec![Literal::from_scalar(
                &predicate.value,
                data_type,
                &predicate.column,
            )?]
        };

        Ok(Self {
            column: predicate.column.clone(),
            operator: predicate.operator,
            data_type,
            literals,
        })
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    /// Tests one cell of a typed column. Nulls never match.
    pub fn matches_column(&self, column: &TypedColumn, row: usize) -> bool {
        match self.data_type {
            DataType::String => column.str_value(row).is_some_and(|v| self.test_str(v)),
            DataType::Long | DataType::Timestamp => {
                column.i64_value(row).is_some_and(|v| self.test_i64(v))
            }
            DataType::Double => column.f64_value(row).is_some_and(|v| self.test_f64(v)),
            DataType::Boolean => column.bool_value(row).is_some_and(|v| self.test_bool(v)),
        }
    }

    /// Tests a raw source cell, parsed as the column type. Unparseable cells
    /// are nulls and never match.
    pub fn matches_raw(&self, raw: Option<&str>) -> bool {
        let Some(raw) = raw else {
            return false;
        };
        match self.data_type.parse_value(raw) {
            Some(value) => self.matches_scalar(&value),
            None => false,
        }
    }

    pub fn matches_scalar(&self, value: &Scalar) -> bool {
        match value.coerce(self.data_type) {
            Some(Scalar::Utf8(s)) => self.test_str(&s),
            Some(Scalar::Int64(v) | Scalar::TimestampMillis(v)) => self.test_i64(v),
            Some(Scalar::Float64(v)) => self.test_f64(v),
            Some(Scalar::Boolean(v)) => self.test_bool(v),
            None => false,
        }
    }

    fn any_or_single<F>(&self, mut eq: F) -> bool
    where
        F: FnMut(&Literal) -> bool,
    {
        match self.operator {
            Operator::In => self.literals.iter().any(&mut eq),
            Operator::NotEq => !self.literals.iter().any(eq),
            _ => self.literals.first().is_some_and(eq),
        }
    }

    fn test_str(&self, value: &str) -> bool {
        self.any_or_single(|l| matches!(l, Literal::Str(s) if s == value))
    }

    fn test_bool(&self, value: bool) -> bool {
        self.any_or_single(|l| matches!(l, Literal::Bool(b) if *b == value))
    }

    fn test_i64(&self, value: i64) -> bool {
        if matches!(self.operator, Operator::Eq | Operator::NotEq | Operator::In) {
            return self.any_or_single(|l| matches!(l, Literal::Int(x) if *x == value));
        }
        let Some(Literal::Int(x)) = self.literals.first() else {
            return false;
        };
        match self.operator {
            Operator::Gt => value > *x,
            Operator::GtEq => value >= *x,
            Operator::Lt => value < *x,
            Operator::LtEq => value <= *x,
            _ => false,
        }
    }

    fn test_f64(&self, value: f64) -> bool {
        if matches!(self.operator, Operator::Eq | Operator::NotEq | Operator::In) {
            return self.any_or_single(
                |l| matches!(l, Literal::Float(x) if (value - *x).abs() < DOUBLE_EPSILON),
            );
        }
        let Some(Literal::Float(x)) = self.literals.first() else {
            return false;
        };
        match self.operator {
            Operator::Gt => value > *x,
            Operator::GtEq => value >= *x - DOUBLE_EPSILON,
            Operator::Lt => value < *x,
            Operator::LtEq => value <= *x + DOUBLE_EPSILON,
            _ => false,
        }
    }
}
