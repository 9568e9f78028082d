pub mod constants;
pub mod error;
pub mod schema;
pub mod types;

pub use constants::*;
pub use error::SdnError;
pub use schema::{validate_schema_name, SchemaName};
pub use types::*;
