pub mod error;
pub mod pattern;
pub mod types;
pub mod value;

pub use error::{DbError, EntityErrorKind, Result};
pub use types::{ComputedValue, EntityKey, FieldDescriptor, FieldFormat, Row};
pub use value::{DataType, Value};
