use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::{Result, StoreError};

/// A JSON document stored under a key within a collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub key: String,
    pub body: Value,
}

impl Document {
    /// Creates a document from a raw JSON body.
    pub fn new(key: impl Into<String>, body: Value) -> Self {
        Self {
            key: key.into(),
            body,
        }
    }

    /// Serializes `value` into a document body.
    pub fn from_value<T: Serialize>(key: impl Into<String>, value: &T) -> Result<Self> {
        Ok(Self::new(key, serde_json::to_value(value)?))
    }

    /// Deserializes the document body.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.body.clone())?)
    }

    /// Reads an integer field. Missing fields count as zero.
    pub fn integer_field(&self, field: &str) -> Result<i64> {
        match self.body.get(field) {
            None | Some(Value::Null) => Ok(0),
            Some(value) => value.as_i64().ok_or_else(|| {
                StoreError::InvalidOperation(format!(
                    "field '{field}' of document {} is not an integer",
                    self.key
                ))
            }),
        }
    }

    /// Adds `delta` to an integer field in place and returns the new value.
    pub(crate) fn apply_increment(&mut self, field: &str, delta: i64) -> Result<i64> {
        let current = self.integer_field(field)?;
        let updated = current.checked_add(delta).ok_or_else(|| {
            StoreError::InvalidOperation(format!("increment of '{field}' overflows"))
        })?;
        let Value::Object(map) = &mut self.body else {
            return Err(StoreError::InvalidOperation(format!(
                "document {} is not an object",
                self.key
            )));
        };
        map.insert(field.to_string(), Value::from(updated));
        Ok(updated)
    }
}

/// One leg of a grouped increment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Increment {
    pub key: String,
    pub field: String,
    pub delta: i64,
}

impl Increment {
    pub fn new(key: impl Into<String>, field: impl Into<String>, delta: i64) -> Self {
        Self {
            key: key.into(),
            field: field.into(),
            delta,
        }
    }
}

/// Outcome of a grouped multi-document write.
#[derive(Debug, Clone, Default)]
pub struct BulkWriteResult {
    /// Number of increments whose key matched a document.
    pub matched_count: usize,
    /// Post-update documents, aligned with the submitted increments.
    /// `None` where the key did not match.
    pub documents: Vec<Option<Document>>,
}

/// Rejects grouped writes that touch the same key twice.
pub(crate) fn validate_increments(increments: &[Increment]) -> Result<()> {
    if increments.is_empty() {
        return Err(StoreError::InvalidOperation(
            "Cannot apply an empty bulk write".to_string(),
        ));
    }
    for (i, op) in increments.iter().enumerate() {
        if increments[..i].iter().any(|other| other.key == op.key) {
            return Err(StoreError::InvalidOperation(format!(
                "key {} appears more than once in bulk write",
                op.key
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increment_updates_integer_field() {
        let mut doc = Document::new("A", serde_json::json!({"balance": 100}));
        assert_eq!(doc.apply_increment("balance", -30).unwrap(), 70);
        assert_eq!(doc.body["balance"], 70);
    }

    #[test]
    fn increment_treats_missing_field_as_zero() {
        let mut doc = Document::new("A", serde_json::json!({}));
        assert_eq!(doc.apply_increment("balance", 5).unwrap(), 5);
    }

    #[test]
    fn increment_rejects_non_integer_field() {
        let mut doc = Document::new("A", serde_json::json!({"balance": "lots"}));
        assert!(matches!(
            doc.apply_increment("balance", 1),
            Err(StoreError::InvalidOperation(_))
        ));
    }

    #[test]
    fn bulk_validation_rejects_repeated_keys() {
        let ops = vec![
            Increment::new("A", "balance", -1),
            Increment::new("A", "balance", 1),
        ];
        assert!(validate_increments(&ops).is_err());
        assert!(validate_increments(&[]).is_err());
        assert!(validate_increments(&ops[..1]).is_ok());
    }
}
