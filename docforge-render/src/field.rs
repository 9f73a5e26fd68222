//! Field definitions and path resolution.
//!
//! A field is either a dotted path (`"address.city"`, `"items.$.qty"`) or a
//! native expression. Paths are resolved member by member against the
//! document serializer, which maps logical names onto wire element names and
//! yields the serializer of the addressed value.

use std::fmt;
use std::marker::PhantomData;

use bson::Bson;

use crate::context::{ExpressionRef, RenderContext};
use crate::error::{RenderError, RenderResult};
use crate::registry::SerializerRegistry;
use crate::serializer::{BsonValueSerializer, SerializerRef};

/// A resolved field: its wire name and, when known, its value serializer.
#[derive(Debug, Clone)]
pub struct RenderedField {
    /// Dotted wire name.
    pub field_name: String,
    /// Serializer of the field value; `None` when the path left the known model.
    pub field_serializer: Option<SerializerRef>,
}

impl RenderedField {
    /// Create a rendered field.
    pub fn new(field_name: impl Into<String>, field_serializer: Option<SerializerRef>) -> Self {
        Self {
            field_name: field_name.into(),
            field_serializer,
        }
    }

    /// The field as an aggregation field path (`$name`).
    pub fn dollar_path(&self) -> String {
        format!("${}", self.field_name)
    }

    /// Serialize a value exactly as the field serializer would.
    pub fn serialize_value(&self, value: &Bson) -> RenderResult<Bson> {
        match &self.field_serializer {
            Some(serializer) => serializer
                .serialize_value(value)
                .map_err(|e| self.relabel(e)),
            None => Ok(value.clone()),
        }
    }

    /// Serialize a filter operand.
    ///
    /// Array fields also accept a single item, as in `{ tags: "red" }`.
    pub fn serialize_filter_value(&self, value: &Bson) -> RenderResult<Bson> {
        match self.serialize_value(value) {
            Ok(serialized) => Ok(serialized),
            Err(err) => match (&self.field_serializer, value) {
                (Some(serializer), v) if !matches!(v, Bson::Array(_)) => {
                    match serializer.item_serializer() {
                        Some(item) => item.serialize_value(v).map_err(|e| self.relabel(e)),
                        None => Err(err),
                    }
                }
                _ => Err(err),
            },
        }
    }

    /// Serializer of the array items.
    ///
    /// Unresolved fields are treated as untyped values and always qualify.
    pub fn item_serializer(&self) -> RenderResult<SerializerRef> {
        match &self.field_serializer {
            None => Ok(BsonValueSerializer::shared()),
            Some(serializer) => serializer
                .item_serializer()
                .ok_or_else(|| RenderError::not_an_array(&self.field_name)),
        }
    }

    /// Serialize each value with the item serializer.
    pub fn serialize_items(&self, values: &[Bson]) -> RenderResult<Vec<Bson>> {
        let item = self.item_serializer()?;
        values
            .iter()
            .map(|v| item.serialize_value(v).map_err(|e| self.relabel(e)))
            .collect()
    }

    fn relabel(&self, err: RenderError) -> RenderError {
        match err {
            RenderError::SerializationMismatch { message, .. } => {
                RenderError::serialization_mismatch(self.field_name.clone(), message)
            }
            other => other,
        }
    }
}

fn is_positional(segment: &str) -> bool {
    segment == "$"
        || (segment.starts_with("$[") && segment.ends_with(']'))
        || (!segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit()))
}

/// Resolve a dotted path against a serializer.
///
/// Returns the wire name and the serializer of the addressed value. Segments
/// past the last known member are copied verbatim and leave the serializer
/// unknown.
pub fn resolve_path(path: &str, serializer: &SerializerRef) -> (String, Option<SerializerRef>) {
    let mut current = Some(serializer.clone());
    let mut parts: Vec<String> = Vec::new();

    for segment in path.split('.') {
        current = match current.take() {
            Some(s) => {
                if let Some(member) = s.member(segment) {
                    parts.push(member.element_name);
                    Some(member.serializer)
                } else if is_positional(segment) {
                    parts.push(segment.to_string());
                    s.item_serializer()
                } else {
                    parts.push(segment.to_string());
                    None
                }
            }
            None => {
                parts.push(segment.to_string());
                None
            }
        };
    }

    (parts.join("."), current)
}

type FallbackSerializer = fn(&SerializerRegistry) -> SerializerRef;

#[derive(Clone)]
pub(crate) enum FieldSpec {
    Path {
        path: String,
        fallback: Option<FallbackSerializer>,
    },
    Expression(ExpressionRef),
}

impl fmt::Debug for FieldSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path { path, .. } => f.debug_tuple("Path").field(path).finish(),
            Self::Expression(e) => f.debug_tuple("Expression").field(&e.describe()).finish(),
        }
    }
}

impl FieldSpec {
    pub(crate) fn path(path: impl Into<String>) -> Self {
        Self::Path {
            path: path.into(),
            fallback: None,
        }
    }

    pub(crate) fn render(&self, context: &RenderContext) -> RenderResult<RenderedField> {
        match self {
            Self::Path { path, fallback } => {
                let (name, serializer) = resolve_path(path, context.document_serializer());
                let serializer =
                    serializer.or_else(|| fallback.map(|f| f(context.registry().as_ref())));
                Ok(RenderedField::new(name, serializer))
            }
            Self::Expression(expression) => context
                .translator(expression.as_ref())?
                .translate_field(expression.as_ref(), context),
        }
    }
}

/// A field of documents of type `T`.
pub struct FieldDefinition<T> {
    spec: FieldSpec,
    _marker: PhantomData<fn() -> T>,
}

impl<T> FieldDefinition<T> {
    /// Create a field from a dotted path.
    pub fn new(path: impl Into<String>) -> Self {
        Self::from_spec(FieldSpec::path(path))
    }

    /// Create a field from a native member expression.
    pub fn from_expression(expression: ExpressionRef) -> Self {
        Self::from_spec(FieldSpec::Expression(expression))
    }

    pub(crate) fn from_spec(spec: FieldSpec) -> Self {
        Self {
            spec,
            _marker: PhantomData,
        }
    }

    pub(crate) fn spec(&self) -> &FieldSpec {
        &self.spec
    }

    /// The path, when this field is not an expression.
    pub fn path(&self) -> Option<&str> {
        match &self.spec {
            FieldSpec::Path { path, .. } => Some(path),
            FieldSpec::Expression(_) => None,
        }
    }

    /// Resolve the field against the context's document serializer.
    pub fn render(&self, context: &RenderContext) -> RenderResult<RenderedField> {
        self.spec.render(context)
    }
}

impl<T> Clone for FieldDefinition<T> {
    fn clone(&self) -> Self {
        Self::from_spec(self.spec.clone())
    }
}

impl<T> fmt::Debug for FieldDefinition<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FieldDefinition").field(&self.spec).finish()
    }
}

impl<T> From<&str> for FieldDefinition<T> {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

impl<T> From<String> for FieldDefinition<T> {
    fn from(path: String) -> Self {
        Self::new(path)
    }
}

impl<T> From<&String> for FieldDefinition<T> {
    fn from(path: &String) -> Self {
        Self::new(path.as_str())
    }
}

/// A field of documents of type `T` whose value has type `F`.
///
/// When the path cannot be resolved against the document serializer, the
/// serializer registered for `F` is used for the value.
pub struct TypedFieldDefinition<T, F> {
    spec: FieldSpec,
    _marker: PhantomData<fn() -> (T, F)>,
}

impl<T, F: 'static> TypedFieldDefinition<T, F> {
    /// Create a typed field from a dotted path.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            spec: FieldSpec::Path {
                path: path.into(),
                fallback: Some(SerializerRegistry::serializer::<F>),
            },
            _marker: PhantomData,
        }
    }

    /// Create a typed field from a native member expression.
    pub fn from_expression(expression: ExpressionRef) -> Self {
        Self {
            spec: FieldSpec::Expression(expression),
            _marker: PhantomData,
        }
    }

    /// Resolve the field.
    pub fn render(&self, context: &RenderContext) -> RenderResult<RenderedField> {
        self.spec.render(context)
    }

    /// Forget the value type.
    pub fn into_field(self) -> FieldDefinition<T> {
        FieldDefinition::from_spec(self.spec)
    }
}

impl<T, F> Clone for TypedFieldDefinition<T, F> {
    fn clone(&self) -> Self {
        Self {
            spec: self.spec.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T, F> fmt::Debug for TypedFieldDefinition<T, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TypedFieldDefinition").field(&self.spec).finish()
    }
}

impl<T, F: 'static> From<&str> for TypedFieldDefinition<T, F> {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

impl<T, F: 'static> From<String> for TypedFieldDefinition<T, F> {
    fn from(path: String) -> Self {
        Self::new(path)
    }
}

impl<T, F: 'static> From<TypedFieldDefinition<T, F>> for FieldDefinition<T> {
    fn from(field: TypedFieldDefinition<T, F>) -> Self {
        field.into_field()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serializer::{ArraySerializer, DocumentSerializer, ScalarSerializer};
    use std::sync::Arc;

    fn person_serializer() -> SerializerRef {
        let address = DocumentSerializer::builder("Address")
            .member_as("city", "c", ScalarSerializer::string())
            .build();
        let order = DocumentSerializer::builder("Order")
            .member("qty", ScalarSerializer::int32())
            .build();
        DocumentSerializer::builder("Person")
            .member_as("id", "_id", ScalarSerializer::object_id())
            .member("address", address)
            .member("orders", ArraySerializer::of(order))
            .member("age", ScalarSerializer::int32())
            .build()
    }

    fn context() -> RenderContext {
        RenderContext::new(person_serializer(), Arc::new(SerializerRegistry::new()))
    }

    #[test]
    fn test_resolve_nested_member() {
        let field = FieldDefinition::<()>::new("address.city");
        let rendered = field.render(&context()).unwrap();
        assert_eq!(rendered.field_name, "address.c");
        assert_eq!(rendered.field_serializer.unwrap().type_name(), "String");
    }

    #[test]
    fn test_resolve_positional_segments() {
        let rendered = FieldDefinition::<()>::new("orders.$.qty")
            .render(&context())
            .unwrap();
        assert_eq!(rendered.field_name, "orders.$.qty");
        assert_eq!(rendered.field_serializer.unwrap().type_name(), "i32");

        let rendered = FieldDefinition::<()>::new("orders.0.qty")
            .render(&context())
            .unwrap();
        assert_eq!(rendered.field_name, "orders.0.qty");
    }

    #[test]
    fn test_unknown_member_left_verbatim() {
        let rendered = FieldDefinition::<()>::new("nickname.first")
            .render(&context())
            .unwrap();
        assert_eq!(rendered.field_name, "nickname.first");
        assert!(rendered.field_serializer.is_none());
    }

    #[test]
    fn test_typed_field_fallback() {
        let rendered = TypedFieldDefinition::<(), i64>::new("score")
            .render(&context())
            .unwrap();
        assert_eq!(rendered.field_serializer.unwrap().type_name(), "i64");
    }

    #[test]
    fn test_item_serializer_requires_array() {
        let ctx = context();
        let age = FieldDefinition::<()>::new("age").render(&ctx).unwrap();
        assert!(age.item_serializer().unwrap_err().is_serialization_mismatch());

        let orders = FieldDefinition::<()>::new("orders").render(&ctx).unwrap();
        assert_eq!(orders.item_serializer().unwrap().type_name(), "Order");
    }

    #[test]
    fn test_filter_value_accepts_single_item() {
        let ctx = context();
        let tags = RenderedField::new("tags", Some(ArraySerializer::of(ScalarSerializer::int64())));
        assert_eq!(
            tags.serialize_filter_value(&Bson::Int32(3)).unwrap(),
            Bson::Int64(3)
        );
        assert!(tags.serialize_value(&Bson::Int32(3)).is_err());

        let age = FieldDefinition::<()>::new("age").render(&ctx).unwrap();
        let err = age.serialize_value(&Bson::String("x".into())).unwrap_err();
        assert_eq!(
            err,
            RenderError::serialization_mismatch("age", "i32 cannot represent a value of type String")
        );
    }
}
