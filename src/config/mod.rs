pub mod loader;
pub mod models;
pub mod validation;

pub use loader::{load_config, load_registry};
pub use models::*;
pub use validation::{ApiDefinitionValidator, ServerConfigValidator, ValidationError, ValidationResult};
