#![warn(clippy::unwrap_used)]

pub mod dependencies;
pub mod events;
pub mod health;
pub mod registry;

pub use dependencies::{resolve_operation, EntityType, NamespaceCatalog, NamespaceDependencyMap, OperationResolution};
pub use events::{EventLog, InvalidationEvent};
pub use health::{HealthReport, HealthReporter, NamespaceKeyCount};
pub use registry::{ForceInvalidationResult, InvalidationRegistry, InvalidationResult};
