use crate::core::{DbError, EntityKey, Result, Row, Value};
use im::OrdMap;

/// Rows of one entity type, keyed by identifier.
///
/// Backed by a persistent map, so cloning a table (and therefore taking a
/// transaction snapshot or savepoint) is O(1) and later writes only copy the
/// touched path.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    name: String,
    rows: OrdMap<EntityKey, Row>,
}

impl Table {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rows: OrdMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, key: &EntityKey) -> Option<&Row> {
        self.rows.get(key)
    }

    pub fn contains(&self, key: &EntityKey) -> bool {
        self.rows.contains_key(key)
    }

    pub fn insert(&mut self, key: EntityKey, row: Row) -> Result<()> {
        if self.rows.contains_key(&key) {
            return Err(DbError::DuplicateKey {
                entity_type: self.name.clone(),
                key: key.to_string(),
            });
        }
        self.rows.insert(key, row);
        Ok(())
    }

    pub fn update(&mut self, key: &EntityKey, row: Row) -> Result<()> {
        match self.rows.get_mut(key) {
            Some(existing) => {
                *existing = row;
                Ok(())
            }
            None => Err(self.not_found(key)),
        }
    }

    pub fn remove(&mut self, key: &EntityKey) -> Result<Row> {
        self.rows.remove(key).ok_or_else(|| self.not_found(key))
    }

    /// Insert or replace without checks; used when publishing committed rows.
    pub(crate) fn put(&mut self, key: EntityKey, row: Row) {
        self.rows.insert(key, row);
    }

    pub(crate) fn discard(&mut self, key: &EntityKey) {
        self.rows.remove(key);
    }

    /// First row whose `field` holds a value identifying `value`.
    pub fn find_referencing(&self, field: &str, value: &Value) -> Option<(&EntityKey, &Row)> {
        self.rows
            .iter()
            .find(|(_, row)| row.get(field).is_some_and(|v| v.key_eq(value)))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&EntityKey, &Row)> {
        self.rows.iter()
    }

    /// Largest integer in the first key component, used to seed identity sequences.
    pub fn max_integer_key(&self) -> Option<i64> {
        self.rows
            .keys()
            .filter_map(|key| key.values().first().and_then(Value::as_i64))
            .max()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn not_found(&self, key: &EntityKey) -> DbError {
        DbError::EntityNotFound {
            entity_type: self.name.clone(),
            key: key.to_string(),
        }
    }
}
