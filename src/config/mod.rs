//! Server configuration.
//!
//! `sortie.yaml` holds the listener, rate limiter, mission directory,
//! session defaults and HTTP target environments. Every section has
//! defaults; CLI flags override the file.

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{ConfigLoader, LoadResult, LoadWarning, LoaderOptions};
pub use schema::{MissionSettings, ServerSettings, SortieConfig};
pub use validation::{ValidationResult, Validator};
