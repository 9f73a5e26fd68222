//! Update operator definitions and their combination.
//!
//! Every primitive operator renders to a single-operator document such as
//! `{ "$set": { "a": 1 } }`. [`UpdateDefinition::combine`] renders its inputs
//! left to right and merges them operator by operator: repeated fields under
//! the same operator keep the rightmost value, different operators are
//! simply unioned.
//!
//! ```rust,ignore
//! use docforge_render::update::UpdateDefinition;
//!
//! let update = UpdateDefinition::<Person>::set("name", "Ada")
//!     .and(UpdateDefinition::inc("visits", 1))
//!     .and(UpdateDefinition::push("tags", "new"));
//! ```

use std::fmt;
use std::marker::PhantomData;

use bson::{Bson, Document, doc};

use crate::context::RenderContext;
use crate::document::DocumentExt;
use crate::error::{RenderError, RenderResult};
use crate::field::{FieldDefinition, FieldSpec};
use crate::filter::{FilterDefinition, FilterKind};
use crate::sort::{SortDefinition, SortDirection, SortKind};

/// Type written by `$currentDate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurrentDateType {
    /// BSON datetime.
    Date,
    /// BSON timestamp.
    Timestamp,
}

/// Operator of a `$bit` update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitwiseOperator {
    /// Bitwise and.
    And,
    /// Bitwise or.
    Or,
    /// Bitwise xor.
    Xor,
}

impl BitwiseOperator {
    fn as_str(self) -> &'static str {
        match self {
            Self::And => "and",
            Self::Or => "or",
            Self::Xor => "xor",
        }
    }
}

/// Ordering applied by a `$push` with `$sort`.
#[derive(Debug, Clone)]
pub enum PushSort {
    /// Sort scalar items (`1` or `-1`).
    Values(SortDirection),
    /// Sort document items by fields of the item type.
    Fields(SortKindHandle),
}

/// Opaque handle to a sort over array items.
#[derive(Debug, Clone)]
pub struct SortKindHandle(SortKind);

/// Modifiers of a `$push` with `$each`.
#[derive(Debug, Clone, Default)]
pub struct PushOptions {
    slice: Option<i32>,
    position: Option<i32>,
    sort: Option<PushSort>,
}

impl PushOptions {
    /// Create empty push options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep only `slice` items after pushing (negative keeps the tail).
    pub fn slice(mut self, slice: i32) -> Self {
        self.slice = Some(slice);
        self
    }

    /// Insert at `position` instead of appending.
    pub fn position(mut self, position: i32) -> Self {
        self.position = Some(position);
        self
    }

    /// Sort scalar items. `TextScore` fails to render.
    pub fn sort_values(mut self, direction: SortDirection) -> Self {
        self.sort = Some(PushSort::Values(direction));
        self
    }

    /// Sort document items, rendered against the item serializer.
    pub fn sort<I>(mut self, sort: SortDefinition<I>) -> Self {
        self.sort = Some(PushSort::Fields(SortKindHandle(sort.into_kind())));
        self
    }

    fn has_modifiers(&self) -> bool {
        self.slice.is_some() || self.position.is_some() || self.sort.is_some()
    }
}

/// A rendered update: an operator document or an aggregation pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderedUpdate {
    /// Operator document (`{ $set: ... }`) or replacement-free update document.
    Document(Document),
    /// Pipeline-style update.
    Pipeline(Vec<Document>),
}

impl RenderedUpdate {
    /// Convert into the command value.
    pub fn into_bson(self) -> Bson {
        match self {
            Self::Document(document) => Bson::Document(document),
            Self::Pipeline(stages) => Bson::Array(stages.into_iter().map(Bson::Document).collect()),
        }
    }

    /// The document form, if any.
    pub fn as_document(&self) -> Option<&Document> {
        match self {
            Self::Document(document) => Some(document),
            Self::Pipeline(_) => None,
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) enum UpdateKind {
    Operator {
        operator: &'static str,
        field: FieldSpec,
        value: Bson,
    },
    Rename {
        field: FieldSpec,
        new_name: String,
    },
    Unset {
        field: FieldSpec,
    },
    Pop {
        field: FieldSpec,
        first: bool,
    },
    CurrentDate {
        field: FieldSpec,
        kind: Option<CurrentDateType>,
    },
    Bitwise {
        field: FieldSpec,
        operator: BitwiseOperator,
        value: Bson,
    },
    Push {
        field: FieldSpec,
        values: Vec<Bson>,
        options: PushOptions,
    },
    Pull {
        field: FieldSpec,
        values: Vec<Bson>,
    },
    PullFilter {
        field: FieldSpec,
        filter: FilterKind,
    },
    AddToSet {
        field: FieldSpec,
        values: Vec<Bson>,
    },
    Combined(Vec<UpdateKind>),
    Document(Document),
    Pipeline(Vec<Document>),
}

impl UpdateKind {
    fn render(&self, context: &RenderContext) -> RenderResult<RenderedUpdate> {
        let document = match self {
            Self::Operator {
                operator,
                field,
                value,
            } => {
                let rendered = field.render(context)?;
                let value = rendered.serialize_value(value)?;
                doc! { *operator: { rendered.field_name: value } }
            }
            Self::Rename { field, new_name } => {
                let rendered = field.render(context)?;
                doc! { "$rename": { rendered.field_name: new_name.as_str() } }
            }
            Self::Unset { field } => {
                let rendered = field.render(context)?;
                doc! { "$unset": { rendered.field_name: 1 } }
            }
            Self::Pop { field, first } => {
                let rendered = field.render(context)?;
                doc! { "$pop": { rendered.field_name: if *first { -1 } else { 1 } } }
            }
            Self::CurrentDate { field, kind } => {
                let rendered = field.render(context)?;
                let value = match kind {
                    None => Bson::Boolean(true),
                    Some(CurrentDateType::Date) => Bson::Document(doc! { "$type": "date" }),
                    Some(CurrentDateType::Timestamp) => {
                        Bson::Document(doc! { "$type": "timestamp" })
                    }
                };
                doc! { "$currentDate": { rendered.field_name: value } }
            }
            Self::Bitwise {
                field,
                operator,
                value,
            } => {
                let rendered = field.render(context)?;
                let value = rendered.serialize_value(value)?;
                doc! { "$bit": { rendered.field_name: { operator.as_str(): value } } }
            }
            Self::Push {
                field,
                values,
                options,
            } => {
                let rendered = field.render(context)?;
                let item_serializer = rendered.item_serializer()?;
                let mut items = rendered.serialize_items(values)?;

                if items.len() == 1 && !options.has_modifiers() {
                    doc! { "$push": { rendered.field_name: items.remove(0) } }
                } else {
                    let mut each = doc! { "$each": items };
                    if let Some(slice) = options.slice {
                        each.insert("$slice", slice);
                    }
                    if let Some(position) = options.position {
                        each.insert("$position", position);
                    }
                    match &options.sort {
                        Some(PushSort::Values(direction)) => {
                            let direction = match direction {
                                SortDirection::Ascending => 1,
                                SortDirection::Descending => -1,
                                SortDirection::TextScore => {
                                    return Err(RenderError::invalid_argument(
                                        "$push cannot sort values by text score",
                                    ));
                                }
                            };
                            each.insert("$sort", direction);
                        }
                        Some(PushSort::Fields(SortKindHandle(sort))) => {
                            let item_context = context.with_document_serializer(item_serializer);
                            each.insert("$sort", sort.render(&item_context)?);
                        }
                        None => {}
                    }
                    doc! { "$push": { rendered.field_name: each } }
                }
            }
            Self::Pull { field, values } => {
                let rendered = field.render(context)?;
                let mut items = rendered.serialize_items(values)?;
                if items.len() == 1 {
                    doc! { "$pull": { rendered.field_name: items.remove(0) } }
                } else {
                    doc! { "$pullAll": { rendered.field_name: items } }
                }
            }
            Self::PullFilter { field, filter } => {
                let rendered = field.render(context)?;
                let item_serializer = rendered.item_serializer()?;
                let filter = filter.render(&context.with_document_serializer(item_serializer))?;
                doc! { "$pull": { rendered.field_name: filter } }
            }
            Self::AddToSet { field, values } => {
                let rendered = field.render(context)?;
                let mut items = rendered.serialize_items(values)?;
                if items.len() == 1 {
                    doc! { "$addToSet": { rendered.field_name: items.remove(0) } }
                } else {
                    doc! { "$addToSet": { rendered.field_name: { "$each": items } } }
                }
            }
            Self::Combined(updates) => {
                let mut combined = Document::new();
                for update in updates {
                    match update.render(context)? {
                        RenderedUpdate::Document(document) => combined.merge_operators(document),
                        RenderedUpdate::Pipeline(_) => {
                            return Err(RenderError::invalid_argument(
                                "pipeline updates cannot be combined with other updates",
                            ));
                        }
                    }
                }
                combined
            }
            Self::Document(document) => document.clone(),
            Self::Pipeline(stages) => return Ok(RenderedUpdate::Pipeline(stages.clone())),
        };

        Ok(RenderedUpdate::Document(document))
    }

    fn is_empty(&self) -> bool {
        match self {
            Self::Combined(updates) => updates.iter().all(UpdateKind::is_empty),
            Self::Document(document) => document.is_empty(),
            Self::Pipeline(stages) => stages.is_empty(),
            _ => false,
        }
    }
}

/// An update of documents of type `T`.
pub struct UpdateDefinition<T> {
    kind: UpdateKind,
    _marker: PhantomData<fn() -> T>,
}

impl<T> UpdateDefinition<T> {
    fn from_kind(kind: UpdateKind) -> Self {
        Self {
            kind,
            _marker: PhantomData,
        }
    }

    fn operator(
        operator: &'static str,
        field: impl Into<FieldDefinition<T>>,
        value: impl Into<Bson>,
    ) -> Self {
        let field: FieldDefinition<T> = field.into();
        Self::from_kind(UpdateKind::Operator {
            operator,
            field: field.spec().clone(),
            value: value.into(),
        })
    }

    fn spec(field: impl Into<FieldDefinition<T>>) -> FieldSpec {
        let field: FieldDefinition<T> = field.into();
        field.spec().clone()
    }

    /// An update given as a raw document.
    pub fn from_document(document: Document) -> Self {
        Self::from_kind(UpdateKind::Document(document))
    }

    /// A pipeline-style update.
    pub fn from_pipeline(stages: Vec<Document>) -> Self {
        Self::from_kind(UpdateKind::Pipeline(stages))
    }

    /// `$set` a field.
    pub fn set(field: impl Into<FieldDefinition<T>>, value: impl Into<Bson>) -> Self {
        Self::operator("$set", field, value)
    }

    /// `$setOnInsert` a field.
    pub fn set_on_insert(field: impl Into<FieldDefinition<T>>, value: impl Into<Bson>) -> Self {
        Self::operator("$setOnInsert", field, value)
    }

    /// `$inc` a field.
    pub fn inc(field: impl Into<FieldDefinition<T>>, value: impl Into<Bson>) -> Self {
        Self::operator("$inc", field, value)
    }

    /// `$max` a field.
    pub fn max(field: impl Into<FieldDefinition<T>>, value: impl Into<Bson>) -> Self {
        Self::operator("$max", field, value)
    }

    /// `$min` a field.
    pub fn min(field: impl Into<FieldDefinition<T>>, value: impl Into<Bson>) -> Self {
        Self::operator("$min", field, value)
    }

    /// `$mul` a field.
    pub fn mul(field: impl Into<FieldDefinition<T>>, value: impl Into<Bson>) -> Self {
        Self::operator("$mul", field, value)
    }

    /// `$rename` a field.
    pub fn rename(field: impl Into<FieldDefinition<T>>, new_name: impl Into<String>) -> Self {
        Self::from_kind(UpdateKind::Rename {
            field: Self::spec(field),
            new_name: new_name.into(),
        })
    }

    /// `$unset` a field.
    pub fn unset(field: impl Into<FieldDefinition<T>>) -> Self {
        Self::from_kind(UpdateKind::Unset {
            field: Self::spec(field),
        })
    }

    /// Remove the first array item.
    pub fn pop_first(field: impl Into<FieldDefinition<T>>) -> Self {
        Self::from_kind(UpdateKind::Pop {
            field: Self::spec(field),
            first: true,
        })
    }

    /// Remove the last array item.
    pub fn pop_last(field: impl Into<FieldDefinition<T>>) -> Self {
        Self::from_kind(UpdateKind::Pop {
            field: Self::spec(field),
            first: false,
        })
    }

    /// `$currentDate`, optionally forcing the written type.
    pub fn current_date(
        field: impl Into<FieldDefinition<T>>,
        kind: Option<CurrentDateType>,
    ) -> Self {
        Self::from_kind(UpdateKind::CurrentDate {
            field: Self::spec(field),
            kind,
        })
    }

    /// `$bit` with the given operator.
    pub fn bitwise(
        field: impl Into<FieldDefinition<T>>,
        operator: BitwiseOperator,
        value: impl Into<Bson>,
    ) -> Self {
        Self::from_kind(UpdateKind::Bitwise {
            field: Self::spec(field),
            operator,
            value: value.into(),
        })
    }

    /// `$bit: { and }`.
    pub fn bitwise_and(field: impl Into<FieldDefinition<T>>, value: impl Into<Bson>) -> Self {
        Self::bitwise(field, BitwiseOperator::And, value)
    }

    /// `$bit: { or }`.
    pub fn bitwise_or(field: impl Into<FieldDefinition<T>>, value: impl Into<Bson>) -> Self {
        Self::bitwise(field, BitwiseOperator::Or, value)
    }

    /// `$bit: { xor }`.
    pub fn bitwise_xor(field: impl Into<FieldDefinition<T>>, value: impl Into<Bson>) -> Self {
        Self::bitwise(field, BitwiseOperator::Xor, value)
    }

    /// `$push` one value.
    pub fn push(field: impl Into<FieldDefinition<T>>, value: impl Into<Bson>) -> Self {
        Self::push_each(field, [value], PushOptions::default())
    }

    /// `$push` several values with `$each` modifiers.
    pub fn push_each<V: Into<Bson>>(
        field: impl Into<FieldDefinition<T>>,
        values: impl IntoIterator<Item = V>,
        options: PushOptions,
    ) -> Self {
        Self::from_kind(UpdateKind::Push {
            field: Self::spec(field),
            values: values.into_iter().map(Into::into).collect(),
            options,
        })
    }

    /// `$pull` one value.
    pub fn pull(field: impl Into<FieldDefinition<T>>, value: impl Into<Bson>) -> Self {
        Self::pull_all(field, [value])
    }

    /// `$pullAll` the values (`$pull` when there is exactly one).
    pub fn pull_all<V: Into<Bson>>(
        field: impl Into<FieldDefinition<T>>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Self::from_kind(UpdateKind::Pull {
            field: Self::spec(field),
            values: values.into_iter().map(Into::into).collect(),
        })
    }

    /// `$pull` items matching a filter over the item type.
    pub fn pull_filter<I>(field: impl Into<FieldDefinition<T>>, filter: FilterDefinition<I>) -> Self {
        Self::from_kind(UpdateKind::PullFilter {
            field: Self::spec(field),
            filter: filter.into_kind(),
        })
    }

    /// `$addToSet` one value.
    pub fn add_to_set(field: impl Into<FieldDefinition<T>>, value: impl Into<Bson>) -> Self {
        Self::add_to_set_each(field, [value])
    }

    /// `$addToSet` several values with `$each`.
    pub fn add_to_set_each<V: Into<Bson>>(
        field: impl Into<FieldDefinition<T>>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Self::from_kind(UpdateKind::AddToSet {
            field: Self::spec(field),
            values: values.into_iter().map(Into::into).collect(),
        })
    }

    /// Combine updates, merging them operator by operator.
    pub fn combine(updates: impl IntoIterator<Item = UpdateDefinition<T>>) -> Self {
        Self::from_kind(UpdateKind::Combined(
            updates.into_iter().map(|u| u.kind).collect(),
        ))
    }

    /// Combine this update with another one applied after it.
    pub fn and(self, other: UpdateDefinition<T>) -> Self {
        Self::combine([self, other])
    }

    /// Whether the update would render to nothing.
    pub fn is_empty(&self) -> bool {
        self.kind.is_empty()
    }

    /// Whether this is a pipeline-style update.
    pub fn is_pipeline(&self) -> bool {
        matches!(self.kind, UpdateKind::Pipeline(_))
    }

    /// Render the update.
    pub fn render(&self, context: &RenderContext) -> RenderResult<RenderedUpdate> {
        self.kind.render(context)
    }

    /// Render an operator-document update.
    pub fn render_document(&self, context: &RenderContext) -> RenderResult<Document> {
        match self.render(context)? {
            RenderedUpdate::Document(document) => Ok(document),
            RenderedUpdate::Pipeline(_) => Err(RenderError::invalid_argument(
                "expected an update document but found a pipeline",
            )),
        }
    }
}

impl<T> Clone for UpdateDefinition<T> {
    fn clone(&self) -> Self {
        Self::from_kind(self.kind.clone())
    }
}

impl<T> fmt::Debug for UpdateDefinition<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("UpdateDefinition").field(&self.kind).finish()
    }
}

impl<T> From<Document> for UpdateDefinition<T> {
    fn from(document: Document) -> Self {
        Self::from_document(document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SerializerRegistry;
    use crate::serializer::{ArraySerializer, BsonValueSerializer, DocumentSerializer, ScalarSerializer};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    struct Person;
    struct Score;

    fn untyped() -> RenderContext {
        RenderContext::new(BsonValueSerializer::shared(), Arc::new(SerializerRegistry::new()))
    }

    fn typed() -> RenderContext {
        let score = DocumentSerializer::builder("Score")
            .member_as("points", "p", ScalarSerializer::int32())
            .build();
        let person = DocumentSerializer::builder("Person")
            .member("age", ScalarSerializer::int64())
            .member("tags", ArraySerializer::of(ScalarSerializer::string()))
            .member("scores", ArraySerializer::of(score))
            .build();
        RenderContext::new(person, Arc::new(SerializerRegistry::new()))
    }

    fn render(update: &UpdateDefinition<Person>, context: &RenderContext) -> Document {
        update.render_document(context).unwrap()
    }

    #[test]
    fn test_primitive_operators() {
        let ctx = untyped();
        assert_eq!(render(&UpdateDefinition::set("a", 1), &ctx), doc! { "$set": { "a": 1 } });
        assert_eq!(render(&UpdateDefinition::unset("a"), &ctx), doc! { "$unset": { "a": 1 } });
        assert_eq!(
            render(&UpdateDefinition::rename("a", "b"), &ctx),
            doc! { "$rename": { "a": "b" } }
        );
        assert_eq!(render(&UpdateDefinition::pop_first("a"), &ctx), doc! { "$pop": { "a": -1 } });
        assert_eq!(
            render(&UpdateDefinition::current_date("d", Some(CurrentDateType::Timestamp)), &ctx),
            doc! { "$currentDate": { "d": { "$type": "timestamp" } } }
        );
        assert_eq!(
            render(&UpdateDefinition::current_date("d", None), &ctx),
            doc! { "$currentDate": { "d": true } }
        );
        assert_eq!(
            render(&UpdateDefinition::bitwise_xor("flags", 5), &ctx),
            doc! { "$bit": { "flags": { "xor": 5 } } }
        );
    }

    #[test]
    fn test_combine_same_operator_last_write_wins() {
        let update = UpdateDefinition::<Person>::set("a", 1).and(UpdateDefinition::set("a", 2));
        assert_eq!(render(&update, &untyped()), doc! { "$set": { "a": 2 } });
    }

    #[test]
    fn test_combine_different_operators_coexist() {
        let update = UpdateDefinition::<Person>::set("a", 1).and(UpdateDefinition::inc("a", 1));
        assert_eq!(
            render(&update, &untyped()),
            doc! { "$set": { "a": 1 }, "$inc": { "a": 1 } }
        );

        let update = UpdateDefinition::<Person>::set("a", 1).and(UpdateDefinition::inc("b", 1));
        assert_eq!(
            render(&update, &untyped()),
            doc! { "$set": { "a": 1 }, "$inc": { "b": 1 } }
        );
    }

    #[test]
    fn test_combine_grouping_is_irrelevant() {
        let ctx = untyped();
        let a = || UpdateDefinition::<Person>::set("x", 1);
        let b = || UpdateDefinition::<Person>::inc("y", 2).and(UpdateDefinition::set("x", 5));
        let c = || UpdateDefinition::<Person>::set("z", 3);

        let left = UpdateDefinition::combine([UpdateDefinition::combine([a(), b()]), c()]);
        let right = UpdateDefinition::combine([a(), UpdateDefinition::combine([b(), c()])]);
        let flat = UpdateDefinition::combine([a(), b(), c()]);

        assert_eq!(render(&left, &ctx), render(&flat, &ctx));
        assert_eq!(render(&right, &ctx), render(&flat, &ctx));
        assert_eq!(
            render(&flat, &ctx),
            doc! { "$set": { "x": 5, "z": 3 }, "$inc": { "y": 2 } }
        );
    }

    #[test]
    fn test_push_each_single_value_equals_push() {
        let ctx = typed();
        let push = UpdateDefinition::<Person>::push("tags", "a");
        let each = UpdateDefinition::<Person>::push_each("tags", ["a"], PushOptions::new());
        assert_eq!(render(&push, &ctx), render(&each, &ctx));
        assert_eq!(render(&push, &ctx), doc! { "$push": { "tags": "a" } });
    }

    #[test]
    fn test_push_each_with_modifiers() {
        let ctx = typed();
        let update = UpdateDefinition::<Person>::push_each(
            "scores",
            [doc! { "p": 10 }],
            PushOptions::new()
                .slice(-5)
                .position(0)
                .sort(SortDefinition::<Score>::descending("points")),
        );
        assert_eq!(
            render(&update, &ctx),
            doc! { "$push": { "scores": {
                "$each": [ { "p": 10 } ],
                "$slice": -5,
                "$position": 0,
                "$sort": { "p": -1 },
            } } }
        );
    }

    #[test]
    fn test_push_multiple_values_uses_each() {
        let update = UpdateDefinition::<Person>::push_each("tags", ["a", "b"], PushOptions::new());
        assert_eq!(
            render(&update, &typed()),
            doc! { "$push": { "tags": { "$each": ["a", "b"] } } }
        );
    }

    #[test]
    fn test_push_sort_values_direction() {
        let descending = UpdateDefinition::<Person>::push_each(
            "tags",
            ["a"],
            PushOptions::new().sort_values(SortDirection::Descending),
        );
        assert_eq!(
            render(&descending, &typed()),
            doc! { "$push": { "tags": { "$each": ["a"], "$sort": -1 } } }
        );

        let text_score = UpdateDefinition::<Person>::push_each(
            "tags",
            ["a"],
            PushOptions::new().sort_values(SortDirection::TextScore),
        );
        let err = text_score.render_document(&typed()).unwrap_err();
        assert!(err.is_invalid_argument());
    }

    #[test]
    fn test_array_operators_require_array_field() {
        let ctx = typed();
        for update in [
            UpdateDefinition::<Person>::push("age", 1),
            UpdateDefinition::<Person>::pull("age", 1),
            UpdateDefinition::<Person>::add_to_set("age", 1),
            UpdateDefinition::<Person>::pull_filter("age", FilterDefinition::<()>::eq("x", 1)),
        ] {
            let err = update.render(&ctx).unwrap_err();
            assert!(err.is_serialization_mismatch(), "{err}");
        }
    }

    #[test]
    fn test_pull_forms() {
        let ctx = typed();
        assert_eq!(
            render(&UpdateDefinition::pull("tags", "a"), &ctx),
            doc! { "$pull": { "tags": "a" } }
        );
        assert_eq!(
            render(&UpdateDefinition::pull_all("tags", ["a", "b"]), &ctx),
            doc! { "$pullAll": { "tags": ["a", "b"] } }
        );
        assert_eq!(
            render(
                &UpdateDefinition::pull_filter("scores", FilterDefinition::<Score>::lt("points", 3)),
                &ctx
            ),
            doc! { "$pull": { "scores": { "p": { "$lt": 3 } } } }
        );
    }

    #[test]
    fn test_add_to_set_forms() {
        let ctx = typed();
        assert_eq!(
            render(&UpdateDefinition::add_to_set("tags", "a"), &ctx),
            doc! { "$addToSet": { "tags": "a" } }
        );
        assert_eq!(
            render(&UpdateDefinition::add_to_set_each("tags", ["a", "b"]), &ctx),
            doc! { "$addToSet": { "tags": { "$each": ["a", "b"] } } }
        );
    }

    #[test]
    fn test_values_use_field_serializer() {
        let update = UpdateDefinition::<Person>::inc("age", 1);
        assert_eq!(render(&update, &typed()), doc! { "$inc": { "age": 1_i64 } });
    }

    #[test]
    fn test_empty_and_pipeline() {
        assert!(UpdateDefinition::<Person>::combine([]).is_empty());
        assert!(UpdateDefinition::<Person>::from_document(Document::new()).is_empty());

        let pipeline =
            UpdateDefinition::<Person>::from_pipeline(vec![doc! { "$set": { "a": 1 } }]);
        assert!(pipeline.is_pipeline());
        assert!(pipeline.render_document(&untyped()).is_err());

        let combined = pipeline.and(UpdateDefinition::set("b", 1));
        assert!(combined.render(&untyped()).unwrap_err().is_invalid_argument());
    }

    #[test]
    fn test_render_is_repeatable() {
        let ctx = typed();
        let update = UpdateDefinition::<Person>::set("age", 3)
            .and(UpdateDefinition::push("tags", "x"))
            .and(UpdateDefinition::unset("old"));
        let first = bson::to_vec(&render(&update, &ctx)).unwrap();
        let second = bson::to_vec(&render(&update, &ctx)).unwrap();
        assert_eq!(first, second);
    }
}
