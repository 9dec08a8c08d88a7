//! Shared building blocks for the Quarry crates:
//! - **Models**: data types, scalars, predicates, metric and table definitions (`models`).
//! - **Catalog**: YAML catalog of metrics and logical tables (`catalog`).
//! - **Configuration**: strongly typed application configuration (`config`).
//! - **Telemetry**: optional OpenTelemetry layer (`telemetry`).
pub mod catalog;
pub mod config;
pub mod models;
pub mod telemetry;

pub use crate::catalog::CatalogConfig;
pub use crate::models::{
    DataType, LogicalTableDefinition, MetricDescriptor, Operator, Predicate, Scalar, SourceKind,
};
