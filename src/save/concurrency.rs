use crate::changeset::EntityRecord;
use crate::core::{DbError, Result};
use crate::metadata::EntityTypeDescriptor;

/// Put the version the store last saw back into the entity.
///
/// Clients advance the version field for their own change tracking; the
/// store compares the incoming value with the stored one, so the recorded
/// original has to be written back first. The original is converted to the
/// field's declared type, since deserialized numbers are always 64-bit.
/// No-op for unversioned types or when no original was recorded.
pub fn restore_version(record: &mut EntityRecord, descriptor: &EntityTypeDescriptor) -> Result<()> {
    let Some(field) = descriptor.version_field() else {
        return Ok(());
    };
    let Some(original) = record.original(&field.name) else {
        return Ok(());
    };

    let value = original
        .coerce_to(&field.data_type)
        .map_err(|e| DbError::Validation {
            entity_type: descriptor.name().to_string(),
            property: field.name.clone(),
            message: e.to_string(),
        })?;
    record.entity.set(field.name.clone(), value);
    Ok(())
}
