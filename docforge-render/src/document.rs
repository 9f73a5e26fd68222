//! Document utilities shared by the definitions.

use bson::{Bson, Document};
use serde::Serialize;

use crate::error::{RenderError, RenderResult};

/// Extension trait for BSON documents.
pub trait DocumentExt {
    /// Name of the first element, typically a stage or operator name.
    fn first_key(&self) -> Option<&str>;

    /// Overwrite or append every element of `other`, keeping existing positions.
    fn merge_overwrite(&mut self, other: Document);

    /// Merge an operator document into this one.
    ///
    /// Operator keys present on both sides have their sub-documents merged
    /// field by field, `other` winning on conflicts. Unrelated keys are
    /// appended in the order they appear.
    fn merge_operators(&mut self, other: Document);

    /// Whether every key is an operator (`$`-prefixed).
    fn is_operator_document(&self) -> bool;
}

impl DocumentExt for Document {
    fn first_key(&self) -> Option<&str> {
        self.keys().next().map(String::as_str)
    }

    fn merge_overwrite(&mut self, other: Document) {
        for (key, value) in other {
            self.insert(key, value);
        }
    }

    fn merge_operators(&mut self, other: Document) {
        for (operator, value) in other {
            if let Bson::Document(incoming) = value {
                if let Some(Bson::Document(existing)) = self.get_mut(&operator) {
                    existing.merge_overwrite(incoming);
                } else {
                    self.insert(operator, Bson::Document(incoming));
                }
            } else {
                self.insert(operator, value);
            }
        }
    }

    fn is_operator_document(&self) -> bool {
        !self.is_empty() && self.keys().all(|k| k.starts_with('$'))
    }
}

/// Parse a JSON (or relaxed extended JSON) object into a document.
pub fn parse_json_document(json: &str) -> RenderResult<Document> {
    let value: serde_json::Value = serde_json::from_str(json)
        .map_err(|e| RenderError::invalid_argument(format!("invalid JSON document: {}", e)))?;

    match Bson::try_from(value) {
        Ok(Bson::Document(document)) => Ok(document),
        Ok(_) => Err(RenderError::invalid_argument("JSON value is not an object")),
        Err(e) => Err(RenderError::invalid_argument(format!(
            "invalid extended JSON: {}",
            e
        ))),
    }
}

/// Serialize a value into a document, e.g. a replacement or a `let` block.
pub fn to_document<T: Serialize>(value: &T) -> RenderResult<Document> {
    match bson::to_bson(value)? {
        Bson::Document(document) => Ok(document),
        other => Err(RenderError::invalid_argument(format!(
            "expected a document, got {:?}",
            other.element_type()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_first_key() {
        assert_eq!(doc! { "$match": {}, "x": 1 }.first_key(), Some("$match"));
        assert_eq!(Document::new().first_key(), None);
    }

    #[test]
    fn test_merge_overwrite_keeps_position() {
        let mut target = doc! { "a": 1, "b": 2 };
        target.merge_overwrite(doc! { "a": 3, "c": 4 });
        assert_eq!(target, doc! { "a": 3, "b": 2, "c": 4 });
    }

    #[test]
    fn test_merge_operators() {
        let mut target = doc! { "$set": { "a": 1, "b": 1 } };
        target.merge_operators(doc! { "$inc": { "a": 1 }, "$set": { "a": 2 } });
        assert_eq!(
            target,
            doc! { "$set": { "a": 2, "b": 1 }, "$inc": { "a": 1 } }
        );
    }

    #[test]
    fn test_parse_json_document() {
        let parsed = parse_json_document(r#"{ "status": "A", "qty": { "$lt": 30 } }"#).unwrap();
        assert_eq!(parsed, doc! { "status": "A", "qty": { "$lt": 30 } });
        assert!(parse_json_document("[1, 2]").is_err());
        assert!(parse_json_document("{").is_err());
    }

    #[test]
    fn test_to_document() {
        #[derive(Serialize)]
        struct Point {
            x: i32,
            y: i32,
        }
        assert_eq!(to_document(&Point { x: 1, y: 2 }).unwrap(), doc! { "x": 1, "y": 2 });
        assert!(to_document(&5_i32).unwrap_err().is_invalid_argument());
    }
}
