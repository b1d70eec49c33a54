use crate::core::{DataType, DbError, Result, Value};
use crate::metadata::EntityTypeDescriptor;
use std::sync::Mutex;
use uuid::Uuid;

/// Source of real keys for types declared with `KeyGeneration::KeyGenerator`.
pub trait KeyGenerator: Send + Sync {
    /// Produce the next key value for an entity of `descriptor`'s type.
    fn next_key(&self, descriptor: &EntityTypeDescriptor) -> Result<Value>;
}

fn key_type(descriptor: &EntityTypeDescriptor) -> Result<&DataType> {
    let name = descriptor.key_fields().first().ok_or_else(|| {
        DbError::Execution(format!("Entity type '{}' has no key field", descriptor.name()))
    })?;
    descriptor
        .get_field(name)
        .map(|f| &f.data_type)
        .ok_or_else(|| DbError::FieldNotFound(name.clone(), descriptor.name().to_string()))
}

#[derive(Debug)]
struct Block {
    next: i64,
    max: i64,
    /// High-water mark of everything handed out in blocks so far
    allocated: i64,
}

/// Numeric keys handed out from blocks reserved in advance.
///
/// One generator serves every type that uses it, so ids are unique across
/// types. A block is reserved when the current one runs out; allocation is
/// serialized under a lock.
#[derive(Debug)]
pub struct NumericKeyGenerator {
    block_size: i64,
    block: Mutex<Block>,
}

impl NumericKeyGenerator {
    pub const DEFAULT_BLOCK_SIZE: usize = 100;

    pub fn new(block_size: usize) -> Self {
        Self::starting_at(1, block_size)
    }

    /// Generator whose first key is `first`
    pub fn starting_at(first: i64, block_size: usize) -> Self {
        Self {
            block_size: i64::try_from(block_size.max(1)).unwrap_or(i64::MAX),
            block: Mutex::new(Block {
                next: first,
                max: first,
                allocated: first,
            }),
        }
    }

    /// Reserve `count` consecutive ids and return the first.
    pub fn next_ids(&self, count: usize) -> Result<i64> {
        let count = i64::try_from(count)
            .map_err(|_| DbError::Execution(format!("Cannot allocate {} ids", count)))?;
        let mut block = self.block.lock()?;

        if block.next + count > block.max {
            let size = count.max(self.block_size);
            let start = block.allocated;
            block.allocated = start.checked_add(size).ok_or_else(|| {
                DbError::Execution("Numeric key space exhausted".to_string())
            })?;
            block.next = start;
            block.max = block.allocated;
            log::debug!("Reserved key block [{}, {})", start, block.max);
        }

        let first = block.next;
        block.next += count;
        Ok(first)
    }
}

impl Default for NumericKeyGenerator {
    fn default() -> Self {
        Self::new(Self::DEFAULT_BLOCK_SIZE)
    }
}

impl KeyGenerator for NumericKeyGenerator {
    fn next_key(&self, descriptor: &EntityTypeDescriptor) -> Result<Value> {
        let data_type = key_type(descriptor)?;
        if !data_type.is_integer() {
            return Err(DbError::Execution(format!(
                "Numeric key generator cannot generate keys of type {} for '{}'",
                data_type,
                descriptor.name()
            )));
        }
        Value::Integer(self.next_ids(1)?).coerce_to(data_type)
    }
}

/// Random v4 UUID keys.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidKeyGenerator;

impl KeyGenerator for UuidKeyGenerator {
    fn next_key(&self, descriptor: &EntityTypeDescriptor) -> Result<Value> {
        match key_type(descriptor)? {
            DataType::Uuid => Ok(Value::Uuid(Uuid::new_v4())),
            DataType::Text => Ok(Value::Text(Uuid::new_v4().to_string())),
            other => Err(DbError::Execution(format!(
                "UUID key generator cannot generate keys of type {} for '{}'",
                other,
                descriptor.name()
            ))),
        }
    }
}
