//! # quarry-columnar
//!
//! In-memory columnar tables and the operators that run over them:
//! - [`ColumnarTable`] / [`TypedColumn`]: typed buffers with validity bitmaps
//!   and an explicit, idempotent `release`.
//! - [`filter`]: `<column> <op> <literal>` expressions and typed predicates.
//! - [`join`]: multi-way inner hash join driven by the first table.
//! - [`export`]: CSV, JSON rows and Arrow IPC encoders.

mod bitmap;
pub mod column;
pub mod export;
pub mod filter;
pub mod join;
pub mod predicate;
pub mod table;

pub use column::TypedColumn;
pub use filter::{evaluate, evaluate_predicates, FilterExpression};
pub use join::join;
pub use predicate::CompiledPredicate;
pub use table::{ColumnarTable, Field, Schema};
