use super::{DataType, DbError, Result, Value, pattern};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A stored row: field name to value.
pub type Row = BTreeMap<String, Value>;

/// Identifier of an entity: the values of its key fields, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityKey(pub Vec<Value>);

impl EntityKey {
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    pub fn single(value: impl Into<Value>) -> Self {
        Self(vec![value.into()])
    }

    pub fn values(&self) -> &[Value] {
        &self.0
    }

    /// A key with a null component cannot identify a stored row.
    pub fn is_complete(&self) -> bool {
        !self.0.is_empty() && self.0.iter().all(|v| !v.is_null())
    }

    pub fn key_eq(&self, other: &EntityKey) -> bool {
        self.0.len() == other.0.len() && self.0.iter().zip(&other.0).all(|(a, b)| a.key_eq(b))
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.as_slice() {
            [single] => write!(f, "{}", single),
            values => {
                write!(f, "(")?;
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", value)?;
                }
                write!(f, ")")
            }
        }
    }
}

/// Format constraint on a text field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldFormat {
    Email,
    Pattern(String),
}

/// Value the store computes for a field when it writes the row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComputedValue {
    /// Set on insert, kept on update
    CreatedAt,
    /// Set on every insert and update
    UpdatedAt,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
    pub max_length: Option<usize>,
    pub format: Option<FieldFormat>,
    pub computed: Option<ComputedValue>,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
            max_length: None,
            format: None,
            computed: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn max_length(mut self, max: usize) -> Self {
        self.max_length = Some(max);
        self
    }

    pub fn email(mut self) -> Self {
        self.format = Some(FieldFormat::Email);
        self
    }

    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.format = Some(FieldFormat::Pattern(pattern.into()));
        self
    }

    pub fn computed(mut self, computed: ComputedValue) -> Self {
        self.computed = Some(computed);
        self
    }

    /// Check a value against this field's type, nullability and format.
    ///
    /// Failures are reported as `Validation` errors naming the property so the
    /// save pipeline can hand them back to the caller per entity.
    pub fn validate(&self, entity_type: &str, value: &Value) -> Result<()> {
        let invalid = |message: String| DbError::Validation {
            entity_type: entity_type.to_string(),
            property: self.name.clone(),
            message,
        };

        if value.is_null() {
            // Computed fields are filled by the store
            if !self.nullable && self.computed.is_none() {
                return Err(invalid("is required".to_string()));
            }
            return Ok(());
        }

        if !self.data_type.is_compatible(value) {
            return Err(invalid(format!(
                "expects type {}, got {} '{}'",
                self.data_type,
                value.type_name(),
                value
            )));
        }

        if let Some(text) = value.as_str() {
            if let Some(max) = self.max_length {
                let len = text.chars().count();
                if len > max {
                    return Err(invalid(format!(
                        "length {} exceeds maximum of {}",
                        len, max
                    )));
                }
            }

            match &self.format {
                Some(FieldFormat::Email) if !pattern::is_email(text) => {
                    return Err(invalid(format!("'{}' is not a valid email address", text)));
                }
                Some(FieldFormat::Pattern(p)) if !pattern::matches_pattern(text, p)? => {
                    return Err(invalid(format!("'{}' does not match pattern {}", text, p)));
                }
                _ => {}
            }
        }

        Ok(())
    }
}
