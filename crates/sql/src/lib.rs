//! SQL front end for Quarry.
//!
//! Compiles a restricted `SELECT` over one logical table into a [`QueryPlan`]
//! (`compiler`), and decides which metrics to load with which predicates
//! (`pushdown`).
pub mod catalog;
pub mod compiler;
pub mod error;
pub mod plan;
pub mod pushdown;

pub use catalog::Catalog;
pub use compiler::compile;
pub use error::CompileError;
pub use plan::QueryPlan;
pub use pushdown::{plan_loads, LoadPlan, MetricLoad};
