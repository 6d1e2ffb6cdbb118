#![warn(clippy::unwrap_used)]

pub mod clock;
pub mod config;
pub mod error;
pub mod filters;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::AppConfig;
pub use error::{CacheError, CacheResult};
pub use filters::canonicalize;
pub use types::{CacheKey, FilterSet, FilterValue, Namespace};
