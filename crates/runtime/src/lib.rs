//! Quarry runtime: the moving parts between the HTTP layer and the sources.
//!
//! ```text
//! ┌──────────────┐   compile / plan_loads   ┌──────────────┐
//! │  Federation  │ ───────────────────────▶ │ TableRegistry│
//! │    Engine    │                          └──────────────┘
//! └──────┬───────┘
//!        │ metric cache (compute once)
//!   ┌────┴─────┐
//!   │ Loaders  │ (file / HTTP, CSV / JSON)
//!   └──────────┘
//! ```

pub mod federation;
pub mod query;
pub mod registry;

pub use federation::{FederationEngine, FederationEngineOptions};
pub use registry::{RegistrySnapshot, TableRegistry};
