pub mod catalog;
pub mod descriptor;

pub use catalog::Metadata;
pub use descriptor::{EntityTypeDescriptor, ForeignKeyDescriptor, KeyGeneration};
