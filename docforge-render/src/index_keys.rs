//! Index key definitions.
//!
//! ```rust,ignore
//! let keys = IndexKeysDefinition::<Person>::ascending("name")
//!     .then(IndexKeysDefinition::descending("age"));
//! assert_eq!(keys.render(&context)?, doc! { "n": 1, "age": -1 });
//! ```

use std::fmt;
use std::marker::PhantomData;

use bson::{Bson, Document};

use crate::context::RenderContext;
use crate::error::{RenderError, RenderResult};
use crate::field::{FieldDefinition, FieldSpec};

/// Kind of a single index key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKeyKind {
    /// Ascending B-tree key.
    Ascending,
    /// Descending B-tree key.
    Descending,
    /// Legacy planar geospatial key.
    Geo2D,
    /// Spherical geospatial key.
    Geo2DSphere,
    /// Hashed key.
    Hashed,
    /// Text key.
    Text,
    /// Wildcard key over a subtree, or the whole document without a field.
    Wildcard,
}

impl IndexKeyKind {
    fn to_bson(self) -> Bson {
        match self {
            Self::Ascending | Self::Wildcard => Bson::Int32(1),
            Self::Descending => Bson::Int32(-1),
            Self::Geo2D => Bson::String("2d".into()),
            Self::Geo2DSphere => Bson::String("2dsphere".into()),
            Self::Hashed => Bson::String("hashed".into()),
            Self::Text => Bson::String("text".into()),
        }
    }
}

#[derive(Clone, Debug)]
enum IndexKey {
    Field(FieldSpec, IndexKeyKind),
    AllFields,
    Document(Document),
}

/// Keys of an index over documents of type `T`.
pub struct IndexKeysDefinition<T> {
    keys: Vec<IndexKey>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> IndexKeysDefinition<T> {
    fn from_keys(keys: Vec<IndexKey>) -> Self {
        Self {
            keys,
            _marker: PhantomData,
        }
    }

    fn field(field: impl Into<FieldDefinition<T>>, kind: IndexKeyKind) -> Self {
        let field: FieldDefinition<T> = field.into();
        Self::from_keys(vec![IndexKey::Field(field.spec().clone(), kind)])
    }

    /// Keys given as a raw document.
    pub fn from_document(document: Document) -> Self {
        Self::from_keys(vec![IndexKey::Document(document)])
    }

    /// Ascending key.
    pub fn ascending(field: impl Into<FieldDefinition<T>>) -> Self {
        Self::field(field, IndexKeyKind::Ascending)
    }

    /// Descending key.
    pub fn descending(field: impl Into<FieldDefinition<T>>) -> Self {
        Self::field(field, IndexKeyKind::Descending)
    }

    /// `2d` key.
    pub fn geo_2d(field: impl Into<FieldDefinition<T>>) -> Self {
        Self::field(field, IndexKeyKind::Geo2D)
    }

    /// `2dsphere` key.
    pub fn geo_2dsphere(field: impl Into<FieldDefinition<T>>) -> Self {
        Self::field(field, IndexKeyKind::Geo2DSphere)
    }

    /// Hashed key.
    pub fn hashed(field: impl Into<FieldDefinition<T>>) -> Self {
        Self::field(field, IndexKeyKind::Hashed)
    }

    /// Text key.
    pub fn text(field: impl Into<FieldDefinition<T>>) -> Self {
        Self::field(field, IndexKeyKind::Text)
    }

    /// Wildcard key over `field` and everything below it.
    pub fn wildcard(field: impl Into<FieldDefinition<T>>) -> Self {
        Self::field(field, IndexKeyKind::Wildcard)
    }

    /// Wildcard key over every field (`$**`).
    pub fn wildcard_all() -> Self {
        Self::from_keys(vec![IndexKey::AllFields])
    }

    /// Append the keys of `other`.
    pub fn then(mut self, other: IndexKeysDefinition<T>) -> Self {
        self.keys.extend(other.keys);
        self
    }

    /// Concatenate key definitions in order.
    pub fn combine(definitions: impl IntoIterator<Item = IndexKeysDefinition<T>>) -> Self {
        Self::from_keys(definitions.into_iter().flat_map(|d| d.keys).collect())
    }

    /// Render the key document. A field named twice is rejected.
    pub fn render(&self, context: &RenderContext) -> RenderResult<Document> {
        let mut document = Document::new();
        let insert = |document: &mut Document, name: String, value: Bson| {
            if document.contains_key(&name) {
                return Err(RenderError::invalid_argument(format!(
                    "index key '{}' is declared more than once",
                    name
                )));
            }
            document.insert(name, value);
            Ok(())
        };

        for key in &self.keys {
            match key {
                IndexKey::Field(field, IndexKeyKind::Wildcard) => {
                    let name = format!("{}.$**", field.render(context)?.field_name);
                    insert(&mut document, name, IndexKeyKind::Wildcard.to_bson())?;
                }
                IndexKey::Field(field, kind) => {
                    let name = field.render(context)?.field_name;
                    insert(&mut document, name, kind.to_bson())?;
                }
                IndexKey::AllFields => {
                    insert(&mut document, "$**".to_string(), Bson::Int32(1))?;
                }
                IndexKey::Document(raw) => {
                    for (name, value) in raw {
                        insert(&mut document, name.clone(), value.clone())?;
                    }
                }
            }
        }
        Ok(document)
    }
}

impl<T> Clone for IndexKeysDefinition<T> {
    fn clone(&self) -> Self {
        Self::from_keys(self.keys.clone())
    }
}

impl<T> fmt::Debug for IndexKeysDefinition<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("IndexKeysDefinition").field(&self.keys).finish()
    }
}

impl<T> From<Document> for IndexKeysDefinition<T> {
    fn from(document: Document) -> Self {
        Self::from_document(document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SerializerRegistry;
    use crate::serializer::{DocumentSerializer, ScalarSerializer};
    use bson::doc;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    struct Place;

    fn context() -> RenderContext {
        let place = DocumentSerializer::builder("Place")
            .member_as("name", "n", ScalarSerializer::string())
            .member_as("location", "loc", ScalarSerializer::string())
            .member("attributes", ScalarSerializer::string())
            .build();
        let registry = SerializerRegistry::new().with::<Place>(place);
        RenderContext::for_type::<Place>(Arc::new(registry))
    }

    #[test]
    fn test_compound_keys_keep_order() {
        let keys = IndexKeysDefinition::<Place>::descending("name")
            .then(IndexKeysDefinition::ascending("location"));
        assert_eq!(keys.render(&context()).unwrap(), doc! { "n": -1, "loc": 1 });
    }

    #[test]
    fn test_special_kinds() {
        let keys = IndexKeysDefinition::<Place>::combine([
            IndexKeysDefinition::geo_2dsphere("location"),
            IndexKeysDefinition::text("name"),
            IndexKeysDefinition::hashed("attributes"),
        ]);
        assert_eq!(
            keys.render(&context()).unwrap(),
            doc! { "loc": "2dsphere", "n": "text", "attributes": "hashed" }
        );
        assert_eq!(
            IndexKeysDefinition::<Place>::geo_2d("location").render(&context()).unwrap(),
            doc! { "loc": "2d" }
        );
    }

    #[test]
    fn test_wildcard() {
        assert_eq!(
            IndexKeysDefinition::<Place>::wildcard("attributes").render(&context()).unwrap(),
            doc! { "attributes.$**": 1 }
        );
        assert_eq!(
            IndexKeysDefinition::<Place>::wildcard_all().render(&context()).unwrap(),
            doc! { "$**": 1 }
        );
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let keys = IndexKeysDefinition::<Place>::ascending("name")
            .then(IndexKeysDefinition::from_document(doc! { "n": -1 }));
        assert!(keys.render(&context()).unwrap_err().is_invalid_argument());
    }
}
