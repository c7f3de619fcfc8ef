use crate::error::LockstepError;
use std::collections::HashMap;

/// Value stored in a [`Record`].
#[derive(Debug, Clone, PartialEq)]
pub enum RecordValue {
    /// A single floating-point value, typically a loss or a learning rate.
    Scalar(f32),
}

/// A container of named values.
///
/// Inserting an existing key overwrites its value.
#[derive(Debug, Clone, Default)]
pub struct Record(HashMap<String, RecordValue>);

impl Record {
    /// Creates a record containing a single scalar value.
    pub fn from_scalar(name: impl Into<String>, value: f32) -> Self {
        Self(HashMap::from([(name.into(), RecordValue::Scalar(value))]))
    }

    /// Creates a record from a slice of key-value pairs.
    pub fn from_slice<K: Into<String> + Clone>(s: &[(K, RecordValue)]) -> Self {
        Self(
            s.iter()
                .map(|(k, v)| (k.clone().into(), v.clone()))
                .collect(),
        )
    }

    /// Inserts a key-value pair into the record.
    pub fn insert(&mut self, k: impl Into<String>, v: RecordValue) {
        self.0.insert(k.into(), v);
    }

    /// Gets a scalar value from the record.
    pub fn get_scalar(&self, k: &str) -> Result<f32, LockstepError> {
        match self.0.get(k) {
            Some(RecordValue::Scalar(v)) => Ok(*v),
            None => Err(LockstepError::RecordKeyError(k.to_string())),
        }
    }

    /// Checks if the record is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.0.len()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_missing_key() {
        let record = Record::from_scalar("loss", 1.0);
        assert_eq!(record.get_scalar("loss"), Ok(1.0));
        assert_eq!(
            record.get_scalar("missing"),
            Err(LockstepError::RecordKeyError("missing".into()))
        );
    }

    #[test]
    fn test_insert_overwrites() {
        let mut record = Record::from_slice(&[
            ("loss", RecordValue::Scalar(1.0)),
            ("lr", RecordValue::Scalar(0.1)),
        ]);
        record.insert("loss", RecordValue::Scalar(2.0));
        assert_eq!(record.len(), 2);
        assert_eq!(record.get_scalar("loss"), Ok(2.0));
    }
}
