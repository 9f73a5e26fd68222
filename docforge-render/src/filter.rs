//! Filter definitions.
//!
//! Filters are built declaratively and rendered against the document
//! serializer: field names go through the resolver and operand values
//! through the field's serializer.
//!
//! ```rust,ignore
//! use docforge_render::filter::{FilterBuilder, FilterDefinition};
//!
//! let filter = FilterBuilder::<Person>::new()
//!     .eq("status", "active")
//!     .gte("age", 18)
//!     .regex("email", r"@example\.com$")
//!     .build();
//!
//! let either = FilterDefinition::eq("a", 1) | FilterDefinition::eq("b", 2);
//! ```

use std::fmt;
use std::marker::PhantomData;
use std::ops::{BitAnd, BitOr, Not};

use bson::oid::ObjectId;
use bson::{Bson, Document, doc};

use crate::context::{ExpressionRef, RenderContext};
use crate::document::{DocumentExt, parse_json_document};
use crate::error::RenderResult;
use crate::field::{FieldDefinition, FieldSpec, RenderedField};

#[derive(Clone, Debug)]
pub(crate) enum FieldOperator {
    Eq(Bson),
    Ne(Bson),
    Gt(Bson),
    Gte(Bson),
    Lt(Bson),
    Lte(Bson),
    In(Vec<Bson>),
    Nin(Vec<Bson>),
    All(Vec<Bson>),
    Exists(bool),
    Type(String),
    Size(i64),
    Regex { pattern: String, options: String },
    Mod { divisor: i64, remainder: i64 },
    ElemMatch(Box<FilterKind>),
}

#[derive(Clone, Debug)]
pub(crate) enum FilterKind {
    Empty,
    Document(Document),
    Json(String),
    Field {
        field: FieldSpec,
        operator: FieldOperator,
    },
    And(Vec<FilterKind>),
    Or(Vec<FilterKind>),
    Nor(Vec<FilterKind>),
    Not(Box<FilterKind>),
    Text {
        search: String,
        language: Option<String>,
        case_sensitive: Option<bool>,
        diacritic_sensitive: Option<bool>,
    },
    Expression(ExpressionRef),
}

impl FilterKind {
    pub(crate) fn render(&self, context: &RenderContext) -> RenderResult<Document> {
        match self {
            Self::Empty => Ok(Document::new()),
            Self::Document(document) => Ok(document.clone()),
            Self::Json(json) => parse_json_document(json),
            Self::Field { field, operator } => {
                let rendered = field.render(context)?;
                render_field_operator(&rendered, operator, context)
            }
            Self::And(filters) => render_and(filters, context),
            Self::Or(filters) => {
                let mut clauses = Vec::with_capacity(filters.len());
                for filter in filters {
                    let rendered = filter.render(context)?;
                    match rendered.get("$or") {
                        Some(Bson::Array(nested)) if rendered.len() == 1 => {
                            clauses.extend(nested.iter().cloned())
                        }
                        _ => clauses.push(Bson::Document(rendered)),
                    }
                }
                Ok(doc! { "$or": clauses })
            }
            Self::Nor(filters) => {
                let clauses = filters
                    .iter()
                    .map(|f| f.render(context).map(Bson::Document))
                    .collect::<RenderResult<Vec<_>>>()?;
                Ok(doc! { "$nor": clauses })
            }
            Self::Not(filter) => Ok(negate(filter.render(context)?)),
            Self::Text {
                search,
                language,
                case_sensitive,
                diacritic_sensitive,
            } => {
                let mut text = doc! { "$search": search.as_str() };
                if let Some(language) = language {
                    text.insert("$language", language.as_str());
                }
                if let Some(case_sensitive) = case_sensitive {
                    text.insert("$caseSensitive", *case_sensitive);
                }
                if let Some(diacritic_sensitive) = diacritic_sensitive {
                    text.insert("$diacriticSensitive", *diacritic_sensitive);
                }
                Ok(doc! { "$text": text })
            }
            Self::Expression(expression) => context
                .translator(expression.as_ref())?
                .translate_filter(expression.as_ref(), context),
        }
    }
}

fn render_field_operator(
    field: &RenderedField,
    operator: &FieldOperator,
    context: &RenderContext,
) -> RenderResult<Document> {
    let name = field.field_name.clone();
    let values = |values: &[Bson]| -> RenderResult<Vec<Bson>> {
        values.iter().map(|v| field.serialize_filter_value(v)).collect()
    };

    let document = match operator {
        FieldOperator::Eq(value) => {
            let value = field.serialize_filter_value(value)?;
            if context.render_dollar_form() {
                doc! { name: { "$eq": value } }
            } else {
                doc! { name: value }
            }
        }
        FieldOperator::Ne(value) => doc! { name: { "$ne": field.serialize_filter_value(value)? } },
        FieldOperator::Gt(value) => doc! { name: { "$gt": field.serialize_filter_value(value)? } },
        FieldOperator::Gte(value) => doc! { name: { "$gte": field.serialize_filter_value(value)? } },
        FieldOperator::Lt(value) => doc! { name: { "$lt": field.serialize_filter_value(value)? } },
        FieldOperator::Lte(value) => doc! { name: { "$lte": field.serialize_filter_value(value)? } },
        FieldOperator::In(items) => doc! { name: { "$in": values(items)? } },
        FieldOperator::Nin(items) => doc! { name: { "$nin": values(items)? } },
        FieldOperator::All(items) => doc! { name: { "$all": field.serialize_items(items)? } },
        FieldOperator::Exists(exists) => doc! { name: { "$exists": *exists } },
        FieldOperator::Type(bson_type) => doc! { name: { "$type": bson_type.as_str() } },
        FieldOperator::Size(size) => doc! { name: { "$size": *size } },
        FieldOperator::Regex { pattern, options } => {
            let mut regex = doc! { "$regex": pattern.as_str() };
            if !options.is_empty() {
                regex.insert("$options", options.as_str());
            }
            doc! { name: regex }
        }
        FieldOperator::Mod { divisor, remainder } => {
            doc! { name: { "$mod": [*divisor, *remainder] } }
        }
        FieldOperator::ElemMatch(filter) => {
            let item = field.item_serializer()?;
            let inner = filter.render(&context.with_document_serializer(item))?;
            doc! { name: { "$elemMatch": inner } }
        }
    };

    Ok(document)
}

fn render_and(filters: &[FilterKind], context: &RenderContext) -> RenderResult<Document> {
    let mut rendered = Vec::with_capacity(filters.len());
    for filter in filters {
        let document = filter.render(context)?;
        match document.get("$and") {
            Some(Bson::Array(nested)) if document.len() == 1 => {
                for clause in nested {
                    if let Bson::Document(clause) = clause {
                        rendered.push(clause.clone());
                    }
                }
            }
            _ => rendered.push(document),
        }
    }

    let mut merged = Document::new();
    for clause in &rendered {
        for (key, value) in clause {
            if !try_merge_clause(&mut merged, key, value) {
                let clauses: Vec<Bson> = rendered.iter().cloned().map(Bson::Document).collect();
                return Ok(doc! { "$and": clauses });
            }
        }
    }
    Ok(merged)
}

fn try_merge_clause(merged: &mut Document, key: &str, value: &Bson) -> bool {
    match merged.get_mut(key) {
        None => {
            merged.insert(key, value.clone());
            true
        }
        Some(Bson::Document(existing))
            if !key.starts_with('$') && existing.is_operator_document() =>
        {
            match value {
                Bson::Document(incoming)
                    if incoming.is_operator_document()
                        && incoming.keys().all(|k| !existing.contains_key(k)) =>
                {
                    existing.merge_overwrite(incoming.clone());
                    true
                }
                _ => false,
            }
        }
        Some(_) => false,
    }
}

fn negate(filter: Document) -> Document {
    if filter.len() == 1 {
        if let Some((key, value)) = filter.iter().next() {
            if key == "$or" {
                return doc! { "$nor": value.clone() };
            }
            if !key.starts_with('$') {
                return match value {
                    Bson::Document(operators) if operators.is_operator_document() => {
                        doc! { key: negate_operators(operators) }
                    }
                    Bson::RegularExpression(_) => doc! { key: { "$not": value.clone() } },
                    _ => doc! { key: { "$ne": value.clone() } },
                };
            }
        }
    }
    doc! { "$nor": [filter] }
}

fn negate_operators(operators: &Document) -> Bson {
    if operators.len() == 1 {
        if let Some((operator, operand)) = operators.iter().next() {
            match operator.as_str() {
                "$eq" => return Bson::Document(doc! { "$ne": operand.clone() }),
                "$ne" => return operand.clone(),
                "$in" => return Bson::Document(doc! { "$nin": operand.clone() }),
                "$nin" => return Bson::Document(doc! { "$in": operand.clone() }),
                _ => {}
            }
        }
    }
    Bson::Document(doc! { "$not": operators.clone() })
}

/// A filter over documents of type `T`.
pub struct FilterDefinition<T> {
    kind: FilterKind,
    _marker: PhantomData<fn() -> T>,
}

impl<T> FilterDefinition<T> {
    pub(crate) fn from_kind(kind: FilterKind) -> Self {
        Self {
            kind,
            _marker: PhantomData,
        }
    }

    pub(crate) fn into_kind(self) -> FilterKind {
        self.kind
    }

    fn field(field: impl Into<FieldDefinition<T>>, operator: FieldOperator) -> Self {
        let field = field.into();
        Self::from_kind(FilterKind::Field {
            field: field.spec().clone(),
            operator,
        })
    }

    /// A filter matching every document.
    pub fn empty() -> Self {
        Self::from_kind(FilterKind::Empty)
    }

    /// A filter given as a raw document.
    pub fn from_document(document: Document) -> Self {
        Self::from_kind(FilterKind::Document(document))
    }

    /// A filter given as JSON text, parsed at render time.
    pub fn from_json(json: impl Into<String>) -> Self {
        Self::from_kind(FilterKind::Json(json.into()))
    }

    /// A filter given as a native predicate.
    pub fn from_expression(expression: ExpressionRef) -> Self {
        Self::from_kind(FilterKind::Expression(expression))
    }

    /// Field equals value.
    pub fn eq(field: impl Into<FieldDefinition<T>>, value: impl Into<Bson>) -> Self {
        Self::field(field, FieldOperator::Eq(value.into()))
    }

    /// Field differs from value.
    pub fn ne(field: impl Into<FieldDefinition<T>>, value: impl Into<Bson>) -> Self {
        Self::field(field, FieldOperator::Ne(value.into()))
    }

    /// Field greater than value.
    pub fn gt(field: impl Into<FieldDefinition<T>>, value: impl Into<Bson>) -> Self {
        Self::field(field, FieldOperator::Gt(value.into()))
    }

    /// Field greater than or equal to value.
    pub fn gte(field: impl Into<FieldDefinition<T>>, value: impl Into<Bson>) -> Self {
        Self::field(field, FieldOperator::Gte(value.into()))
    }

    /// Field less than value.
    pub fn lt(field: impl Into<FieldDefinition<T>>, value: impl Into<Bson>) -> Self {
        Self::field(field, FieldOperator::Lt(value.into()))
    }

    /// Field less than or equal to value.
    pub fn lte(field: impl Into<FieldDefinition<T>>, value: impl Into<Bson>) -> Self {
        Self::field(field, FieldOperator::Lte(value.into()))
    }

    /// Field equals any of the values.
    pub fn in_array<V: Into<Bson>>(
        field: impl Into<FieldDefinition<T>>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        let values = values.into_iter().map(Into::into).collect();
        Self::field(field, FieldOperator::In(values))
    }

    /// Field equals none of the values.
    pub fn not_in<V: Into<Bson>>(
        field: impl Into<FieldDefinition<T>>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        let values = values.into_iter().map(Into::into).collect();
        Self::field(field, FieldOperator::Nin(values))
    }

    /// Array field contains all of the values.
    pub fn all<V: Into<Bson>>(
        field: impl Into<FieldDefinition<T>>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        let values = values.into_iter().map(Into::into).collect();
        Self::field(field, FieldOperator::All(values))
    }

    /// Field presence.
    pub fn exists(field: impl Into<FieldDefinition<T>>, exists: bool) -> Self {
        Self::field(field, FieldOperator::Exists(exists))
    }

    /// Field has the given BSON type alias.
    pub fn type_is(field: impl Into<FieldDefinition<T>>, bson_type: impl Into<String>) -> Self {
        Self::field(field, FieldOperator::Type(bson_type.into()))
    }

    /// Array field has exactly `size` elements.
    pub fn size(field: impl Into<FieldDefinition<T>>, size: i64) -> Self {
        Self::field(field, FieldOperator::Size(size))
    }

    /// Field matches a regular expression.
    pub fn regex(field: impl Into<FieldDefinition<T>>, pattern: impl Into<String>) -> Self {
        Self::regex_with_options(field, pattern, "")
    }

    /// Field matches a regular expression with options.
    pub fn regex_with_options(
        field: impl Into<FieldDefinition<T>>,
        pattern: impl Into<String>,
        options: impl Into<String>,
    ) -> Self {
        Self::field(
            field,
            FieldOperator::Regex {
                pattern: pattern.into(),
                options: options.into(),
            },
        )
    }

    /// Field modulo `divisor` equals `remainder`.
    pub fn modulo(field: impl Into<FieldDefinition<T>>, divisor: i64, remainder: i64) -> Self {
        Self::field(field, FieldOperator::Mod { divisor, remainder })
    }

    /// At least one array item matches `filter`, rendered against the item serializer.
    pub fn elem_match<I>(field: impl Into<FieldDefinition<T>>, filter: FilterDefinition<I>) -> Self {
        Self::field(field, FieldOperator::ElemMatch(Box::new(filter.into_kind())))
    }

    /// Match on `_id`.
    pub fn by_id(id: ObjectId) -> Self {
        Self::eq("_id", id)
    }

    /// Full text search.
    pub fn text(search: impl Into<String>) -> Self {
        Self::from_kind(FilterKind::Text {
            search: search.into(),
            language: None,
            case_sensitive: None,
            diacritic_sensitive: None,
        })
    }

    /// Full text search with language and sensitivity options.
    pub fn text_with_options(
        search: impl Into<String>,
        language: Option<String>,
        case_sensitive: Option<bool>,
        diacritic_sensitive: Option<bool>,
    ) -> Self {
        Self::from_kind(FilterKind::Text {
            search: search.into(),
            language,
            case_sensitive,
            diacritic_sensitive,
        })
    }

    /// All filters match.
    pub fn and(filters: impl IntoIterator<Item = FilterDefinition<T>>) -> Self {
        Self::from_kind(FilterKind::And(
            filters.into_iter().map(FilterDefinition::into_kind).collect(),
        ))
    }

    /// Any filter matches.
    pub fn or(filters: impl IntoIterator<Item = FilterDefinition<T>>) -> Self {
        Self::from_kind(FilterKind::Or(
            filters.into_iter().map(FilterDefinition::into_kind).collect(),
        ))
    }

    /// No filter matches.
    pub fn nor(filters: impl IntoIterator<Item = FilterDefinition<T>>) -> Self {
        Self::from_kind(FilterKind::Nor(
            filters.into_iter().map(FilterDefinition::into_kind).collect(),
        ))
    }

    /// Whether this filter matches every document without rendering.
    pub fn is_empty(&self) -> bool {
        match &self.kind {
            FilterKind::Empty => true,
            FilterKind::Document(document) => document.is_empty(),
            FilterKind::And(filters) => filters.is_empty(),
            _ => false,
        }
    }

    /// Render the filter.
    pub fn render(&self, context: &RenderContext) -> RenderResult<Document> {
        self.kind.render(context)
    }
}

impl<T> Clone for FilterDefinition<T> {
    fn clone(&self) -> Self {
        Self::from_kind(self.kind.clone())
    }
}

impl<T> fmt::Debug for FilterDefinition<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FilterDefinition").field(&self.kind).finish()
    }
}

impl<T> Default for FilterDefinition<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T> From<Document> for FilterDefinition<T> {
    fn from(document: Document) -> Self {
        Self::from_document(document)
    }
}

impl<T> BitAnd for FilterDefinition<T> {
    type Output = FilterDefinition<T>;

    fn bitand(self, rhs: Self) -> Self::Output {
        FilterDefinition::and([self, rhs])
    }
}

impl<T> BitOr for FilterDefinition<T> {
    type Output = FilterDefinition<T>;

    fn bitor(self, rhs: Self) -> Self::Output {
        FilterDefinition::or([self, rhs])
    }
}

impl<T> Not for FilterDefinition<T> {
    type Output = FilterDefinition<T>;

    fn not(self) -> Self::Output {
        FilterDefinition::from_kind(FilterKind::Not(Box::new(self.kind)))
    }
}

/// Fluent builder producing a conjunction of conditions.
pub struct FilterBuilder<T> {
    conditions: Vec<FilterDefinition<T>>,
}

impl<T> Default for FilterBuilder<T> {
    fn default() -> Self {
        Self {
            conditions: Vec::new(),
        }
    }
}

impl<T> fmt::Debug for FilterBuilder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(&self.conditions).finish()
    }
}

impl<T> FilterBuilder<T> {
    /// Create a new empty filter builder.
    pub fn new() -> Self {
        Self::default()
    }

    fn push(mut self, condition: FilterDefinition<T>) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Add an equality condition.
    pub fn eq(self, field: &str, value: impl Into<Bson>) -> Self {
        self.push(FilterDefinition::eq(field, value))
    }

    /// Add a not-equal condition.
    pub fn ne(self, field: &str, value: impl Into<Bson>) -> Self {
        self.push(FilterDefinition::ne(field, value))
    }

    /// Add a greater-than condition.
    pub fn gt(self, field: &str, value: impl Into<Bson>) -> Self {
        self.push(FilterDefinition::gt(field, value))
    }

    /// Add a greater-than-or-equal condition.
    pub fn gte(self, field: &str, value: impl Into<Bson>) -> Self {
        self.push(FilterDefinition::gte(field, value))
    }

    /// Add a less-than condition.
    pub fn lt(self, field: &str, value: impl Into<Bson>) -> Self {
        self.push(FilterDefinition::lt(field, value))
    }

    /// Add a less-than-or-equal condition.
    pub fn lte(self, field: &str, value: impl Into<Bson>) -> Self {
        self.push(FilterDefinition::lte(field, value))
    }

    /// Add an $in condition.
    pub fn in_array(self, field: &str, values: Vec<impl Into<Bson>>) -> Self {
        self.push(FilterDefinition::in_array(field, values))
    }

    /// Add a $nin condition.
    pub fn not_in(self, field: &str, values: Vec<impl Into<Bson>>) -> Self {
        self.push(FilterDefinition::not_in(field, values))
    }

    /// Add a regex condition.
    pub fn regex(self, field: &str, pattern: &str) -> Self {
        self.push(FilterDefinition::regex(field, pattern))
    }

    /// Add an exists condition.
    pub fn exists(self, field: &str, exists: bool) -> Self {
        self.push(FilterDefinition::exists(field, exists))
    }

    /// Add an $elemMatch condition.
    pub fn elem_match<I>(self, field: &str, filter: FilterDefinition<I>) -> Self {
        self.push(FilterDefinition::elem_match(field, filter))
    }

    /// Add an arbitrary filter.
    pub fn filter(self, filter: FilterDefinition<T>) -> Self {
        self.push(filter)
    }

    /// Check if the builder has no conditions.
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Build the filter.
    pub fn build(self) -> FilterDefinition<T> {
        if self.conditions.is_empty() {
            FilterDefinition::empty()
        } else {
            FilterDefinition::and(self.conditions)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SerializerRegistry;
    use crate::serializer::{ArraySerializer, DocumentSerializer, ScalarSerializer};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    struct Person;

    fn context() -> RenderContext {
        let item = DocumentSerializer::builder("Item")
            .member("sku", ScalarSerializer::string())
            .member("qty", ScalarSerializer::int32())
            .build();
        let person = DocumentSerializer::builder("Person")
            .member_as("name", "n", ScalarSerializer::string())
            .member("age", ScalarSerializer::int64())
            .member("tags", ArraySerializer::of(ScalarSerializer::string()))
            .member("items", ArraySerializer::of(item))
            .build();
        RenderContext::new(person, Arc::new(SerializerRegistry::new()))
    }

    #[test]
    fn test_eq_uses_element_name_and_serializer() {
        let filter = FilterDefinition::<Person>::eq("name", "Ada") & FilterDefinition::gt("age", 30);
        assert_eq!(
            filter.render(&context()).unwrap(),
            doc! { "n": "Ada", "age": { "$gt": 30_i64 } }
        );
    }

    #[test]
    fn test_dollar_form() {
        let filter = FilterDefinition::<Person>::eq("name", "Ada");
        assert_eq!(
            filter.render(&context().with_dollar_form(true)).unwrap(),
            doc! { "n": { "$eq": "Ada" } }
        );
    }

    #[test]
    fn test_and_merges_operators_on_same_field() {
        let filter = FilterDefinition::<Person>::gte("age", 18) & FilterDefinition::lt("age", 65);
        assert_eq!(
            filter.render(&context()).unwrap(),
            doc! { "age": { "$gte": 18_i64, "$lt": 65_i64 } }
        );
    }

    #[test]
    fn test_and_falls_back_on_conflict() {
        let filter = FilterDefinition::<Person>::eq("age", 1) & FilterDefinition::eq("age", 2);
        assert_eq!(
            filter.render(&context()).unwrap(),
            doc! { "$and": [ { "age": 1_i64 }, { "age": 2_i64 } ] }
        );
    }

    #[test]
    fn test_or_flattens() {
        let filter = FilterDefinition::<Person>::eq("age", 1)
            | FilterDefinition::eq("age", 2)
            | FilterDefinition::eq("age", 3);
        assert_eq!(
            filter.render(&context()).unwrap(),
            doc! { "$or": [ { "age": 1_i64 }, { "age": 2_i64 }, { "age": 3_i64 } ] }
        );
    }

    #[test]
    fn test_not() {
        let ctx = context();
        assert_eq!(
            (!FilterDefinition::<Person>::eq("age", 3)).render(&ctx).unwrap(),
            doc! { "age": { "$ne": 3_i64 } }
        );
        assert_eq!(
            (!FilterDefinition::<Person>::gt("age", 3)).render(&ctx).unwrap(),
            doc! { "age": { "$not": { "$gt": 3_i64 } } }
        );
        assert_eq!(
            (!FilterDefinition::<Person>::in_array("age", [1, 2])).render(&ctx).unwrap(),
            doc! { "age": { "$nin": [1_i64, 2_i64] } }
        );
    }

    #[test]
    fn test_array_field_accepts_single_value() {
        let filter = FilterDefinition::<Person>::eq("tags", "red");
        assert_eq!(filter.render(&context()).unwrap(), doc! { "tags": "red" });
    }

    #[test]
    fn test_elem_match_renders_against_item() {
        struct Item;
        let filter = FilterDefinition::<Person>::elem_match(
            "items",
            FilterDefinition::<Item>::eq("sku", "abc") & FilterDefinition::gte("qty", 2),
        );
        assert_eq!(
            filter.render(&context()).unwrap(),
            doc! { "items": { "$elemMatch": { "sku": "abc", "qty": { "$gte": 2 } } } }
        );
    }

    #[test]
    fn test_elem_match_requires_array() {
        let filter =
            FilterDefinition::<Person>::elem_match("age", FilterDefinition::<()>::eq("x", 1));
        assert!(filter.render(&context()).unwrap_err().is_serialization_mismatch());
    }

    #[test]
    fn test_value_mismatch() {
        let filter = FilterDefinition::<Person>::eq("name", 5);
        assert!(filter.render(&context()).is_err());
    }

    #[test]
    fn test_builder() {
        let filter = FilterBuilder::<Person>::new()
            .eq("name", "Ada")
            .exists("tags", true)
            .regex("name", "^A")
            .build();
        assert_eq!(
            filter.render(&context()).unwrap(),
            doc! { "$and": [
                { "n": "Ada" },
                { "tags": { "$exists": true } },
                { "n": { "$regex": "^A" } },
            ] }
        );
        assert!(FilterBuilder::<Person>::new().build().is_empty());
    }

    #[test]
    fn test_text_and_json() {
        let ctx = context();
        assert_eq!(
            FilterDefinition::<Person>::text("coffee").render(&ctx).unwrap(),
            doc! { "$text": { "$search": "coffee" } }
        );
        assert_eq!(
            FilterDefinition::<Person>::from_json(r#"{ "x": 1 }"#).render(&ctx).unwrap(),
            doc! { "x": 1 }
        );
    }
}
