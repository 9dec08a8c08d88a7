//! Query execution infrastructure.
//!
//! - **Cache**: compute-once table caches with TTL and capacity limits. The
//!   metric tier holds loaded metric tables, the query tier final results.

pub mod cache;

pub use cache::{MetricKey, TableCache};
