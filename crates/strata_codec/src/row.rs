//! Named field values of one object.

use crate::error::{CodecError, CodecResult};
use crate::value::Value;
use serde::{Deserialize, Serialize};

/// The fields of one object in declaration order.
///
/// Rows are what backends bind into statements. They can be encoded to
/// CBOR for backends that keep rows as opaque payloads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Row {
    fields: Vec<(String, Value)>,
}

impl Row {
    /// Create an empty row.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a field.
    pub fn push(&mut self, name: impl Into<String>, value: Value) {
        self.fields.push((name.into(), value));
    }

    /// Look up a field by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if the row has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Field names in declaration order.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    /// Fields in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Encode the row as CBOR.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_cbor(&self) -> CodecResult<Vec<u8>> {
        let mut out = Vec::new();
        ciborium::into_writer(self, &mut out)
            .map_err(|e| CodecError::encoding_failed(e.to_string()))?;
        Ok(out)
    }

    /// Decode a row from CBOR.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a valid encoded row.
    pub fn from_cbor(bytes: &[u8]) -> CodecResult<Self> {
        ciborium::from_reader(bytes).map_err(|e| CodecError::decoding_failed(e.to_string()))
    }
}

impl FromIterator<(String, Value)> for Row {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Row {
        let mut row = Row::new();
        row.push("id", Value::Unsigned(1));
        row.push("title", Value::from("Blue in Green"));
        row.push("album", Value::Reference(4));
        row.push("tags", Value::Array(vec![Value::Reference(2)]));
        row
    }

    #[test]
    fn lookup_by_name() {
        let row = sample();
        assert_eq!(row.get("title"), Some(&Value::from("Blue in Green")));
        assert_eq!(row.get("missing"), None);
        assert_eq!(
            row.columns().collect::<Vec<_>>(),
            vec!["id", "title", "album", "tags"]
        );
    }

    #[test]
    fn cbor_payload_decodes_to_same_row() {
        let row = sample();
        let bytes = row.to_cbor().unwrap();
        assert_eq!(Row::from_cbor(&bytes).unwrap(), row);
    }

    #[test]
    fn garbage_payload_is_an_error() {
        assert!(Row::from_cbor(&[0xff, 0x00]).is_err());
    }
}
