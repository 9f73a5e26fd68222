//! Sort definitions.

use std::fmt;
use std::marker::PhantomData;

use bson::{Bson, Document, doc};

use crate::context::RenderContext;
use crate::document::DocumentExt;
use crate::error::RenderResult;
use crate::field::{FieldDefinition, FieldSpec};

/// Sort order of one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    /// Ascending order.
    Ascending,
    /// Descending order.
    Descending,
    /// Order by text search score.
    TextScore,
}

impl SortDirection {
    fn to_bson(self) -> Bson {
        match self {
            Self::Ascending => Bson::Int32(1),
            Self::Descending => Bson::Int32(-1),
            Self::TextScore => Bson::Document(doc! { "$meta": "textScore" }),
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) enum SortKind {
    Document(Document),
    Fields(Vec<(FieldSpec, SortDirection)>),
    Combined(Vec<SortKind>),
}

impl SortKind {
    pub(crate) fn render(&self, context: &RenderContext) -> RenderResult<Document> {
        match self {
            Self::Document(document) => Ok(document.clone()),
            Self::Fields(fields) => {
                let mut document = Document::new();
                for (field, direction) in fields {
                    let rendered = field.render(context)?;
                    document.insert(rendered.field_name, direction.to_bson());
                }
                Ok(document)
            }
            Self::Combined(sorts) => {
                let mut document = Document::new();
                for sort in sorts {
                    document.merge_overwrite(sort.render(context)?);
                }
                Ok(document)
            }
        }
    }

    fn len(&self) -> usize {
        match self {
            Self::Document(document) => document.len(),
            Self::Fields(fields) => fields.len(),
            Self::Combined(sorts) => sorts.iter().map(SortKind::len).sum(),
        }
    }
}

/// A sort over documents of type `T`.
pub struct SortDefinition<T> {
    kind: SortKind,
    _marker: PhantomData<fn() -> T>,
}

impl<T> SortDefinition<T> {
    fn from_kind(kind: SortKind) -> Self {
        Self {
            kind,
            _marker: PhantomData,
        }
    }

    pub(crate) fn into_kind(self) -> SortKind {
        self.kind
    }

    /// A sort given as a raw document.
    pub fn from_document(document: Document) -> Self {
        Self::from_kind(SortKind::Document(document))
    }

    /// Sort by a field.
    pub fn by(field: impl Into<FieldDefinition<T>>, direction: SortDirection) -> Self {
        let field = field.into();
        Self::from_kind(SortKind::Fields(vec![(field.spec().clone(), direction)]))
    }

    /// Sort ascending by a field.
    pub fn ascending(field: impl Into<FieldDefinition<T>>) -> Self {
        Self::by(field, SortDirection::Ascending)
    }

    /// Sort descending by a field.
    pub fn descending(field: impl Into<FieldDefinition<T>>) -> Self {
        Self::by(field, SortDirection::Descending)
    }

    /// Sort by text score, projected into `field`.
    pub fn text_score(field: impl Into<FieldDefinition<T>>) -> Self {
        Self::by(field, SortDirection::TextScore)
    }

    /// Append a field to this sort.
    pub fn then_by(
        mut self,
        field: impl Into<FieldDefinition<T>>,
        direction: SortDirection,
    ) -> Self {
        let field: FieldDefinition<T> = field.into();
        let entry = (field.spec().clone(), direction);
        match &mut self.kind {
            SortKind::Fields(fields) => fields.push(entry),
            other => {
                let previous = std::mem::replace(other, SortKind::Combined(Vec::new()));
                *other = SortKind::Combined(vec![previous, SortKind::Fields(vec![entry])]);
            }
        }
        self
    }

    /// Append an ascending field.
    pub fn then_ascending(self, field: impl Into<FieldDefinition<T>>) -> Self {
        self.then_by(field, SortDirection::Ascending)
    }

    /// Append a descending field.
    pub fn then_descending(self, field: impl Into<FieldDefinition<T>>) -> Self {
        self.then_by(field, SortDirection::Descending)
    }

    /// Concatenate sorts; later sorts win on repeated fields.
    pub fn combine(sorts: impl IntoIterator<Item = SortDefinition<T>>) -> Self {
        Self::from_kind(SortKind::Combined(
            sorts.into_iter().map(SortDefinition::into_kind).collect(),
        ))
    }

    /// Number of sort keys declared.
    pub fn len(&self) -> usize {
        self.kind.len()
    }

    /// Whether no sort key is declared.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Render the sort.
    pub fn render(&self, context: &RenderContext) -> RenderResult<Document> {
        self.kind.render(context)
    }
}

impl<T> Clone for SortDefinition<T> {
    fn clone(&self) -> Self {
        Self::from_kind(self.kind.clone())
    }
}

impl<T> fmt::Debug for SortDefinition<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SortDefinition").field(&self.kind).finish()
    }
}

impl<T> From<Document> for SortDefinition<T> {
    fn from(document: Document) -> Self {
        Self::from_document(document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SerializerRegistry;
    use crate::serializer::{DocumentSerializer, ScalarSerializer};
    use std::sync::Arc;

    fn context() -> RenderContext {
        let person = DocumentSerializer::builder("Person")
            .member_as("name", "n", ScalarSerializer::string())
            .build();
        RenderContext::new(person, Arc::new(SerializerRegistry::new()))
    }

    #[test]
    fn test_sort_fields() {
        let sort = SortDefinition::<()>::ascending("name").then_descending("age");
        assert_eq!(sort.len(), 2);
        assert_eq!(sort.render(&context()).unwrap(), doc! { "n": 1, "age": -1 });
    }

    #[test]
    fn test_combine_later_wins() {
        let sort = SortDefinition::<()>::combine([
            SortDefinition::from_document(doc! { "n": 1, "x": 1 }),
            SortDefinition::descending("name"),
        ]);
        assert_eq!(sort.render(&context()).unwrap(), doc! { "n": -1, "x": 1 });
    }

    #[test]
    fn test_text_score() {
        let sort = SortDefinition::<()>::text_score("score");
        assert_eq!(
            sort.render(&context()).unwrap(),
            doc! { "score": { "$meta": "textScore" } }
        );
    }
}
