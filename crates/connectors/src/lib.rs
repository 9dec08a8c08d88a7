//! Source connectors for metric data.
//!
//! [`transport`] moves bytes from a file or an HTTP endpoint. [`sources`]
//! turns those bytes into columnar tables, applying pushdown predicates
//! while parsing.

pub mod sources;
pub mod transport;

pub use sources::{default_registry, LoadSpec, LoaderRegistry, MetricLoader};
pub use transport::{Location, Transport};
