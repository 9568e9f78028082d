//! sdn-schemas
//!
//! The closed set of recognized record schemas and their validators. The
//! registry is the sole arbiter of what "valid" means per schema; everything
//! downstream treats record payloads as opaque bytes once validation passes.

pub mod registry;
pub mod validators;

pub use registry::SchemaRegistry;
pub use validators::{MaxSizeValidator, RecordValidator};
