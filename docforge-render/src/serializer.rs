//! Serializer descriptions used to resolve fields and convert values.
//!
//! A serializer answers the questions rendering needs: which wire name does a
//! member map to, does the value behave like an array, and how is a single
//! value represented in BSON. Byte-level encoding is out of reach here; the
//! serializers only normalize [`Bson`] values.
//!
//! ```rust,ignore
//! use docforge_render::serializer::{DocumentSerializer, ScalarSerializer, ArraySerializer};
//!
//! let person = DocumentSerializer::builder("Person")
//!     .member_as("id", "_id", ScalarSerializer::object_id())
//!     .member("name", ScalarSerializer::string())
//!     .member("tags", ArraySerializer::of(ScalarSerializer::string()))
//!     .build();
//! ```

use std::fmt;
use std::sync::{Arc, OnceLock};

use bson::{Bson, Document};

use crate::error::{RenderError, RenderResult};

/// Shared handle to a serializer.
pub type SerializerRef = Arc<dyn BsonSerializer>;

/// Mapping of a logical member onto its wire element.
#[derive(Debug, Clone)]
pub struct MemberInfo {
    /// Element name written to the wire.
    pub element_name: String,
    /// Serializer of the member value.
    pub serializer: SerializerRef,
}

/// Reflection surface a serializer exposes to the renderer.
pub trait BsonSerializer: fmt::Debug + Send + Sync {
    /// Name of the value type this serializer handles.
    fn type_name(&self) -> &str;

    /// Normalize a single value into its wire representation.
    fn serialize_value(&self, value: &Bson) -> RenderResult<Bson> {
        Ok(value.clone())
    }

    /// Look up a member by its logical name.
    fn member(&self, _name: &str) -> Option<MemberInfo> {
        None
    }

    /// Serializer of the items when the value has array semantics.
    fn item_serializer(&self) -> Option<SerializerRef> {
        None
    }

    /// Whether values of this serializer are computed on the client.
    fn is_client_side_projection(&self) -> bool {
        false
    }
}

fn mismatch(type_name: &str, value: &Bson) -> RenderError {
    RenderError::serialization_mismatch(
        String::new(),
        format!("{} cannot represent a value of type {:?}", type_name, value.element_type()),
    )
}

/// Untyped serializer: every member exists and every value may be an array.
#[derive(Debug, Clone, Copy, Default)]
pub struct BsonValueSerializer;

impl BsonValueSerializer {
    /// Get the shared instance.
    pub fn shared() -> SerializerRef {
        static INSTANCE: OnceLock<SerializerRef> = OnceLock::new();
        INSTANCE
            .get_or_init(|| Arc::new(BsonValueSerializer) as SerializerRef)
            .clone()
    }
}

impl BsonSerializer for BsonValueSerializer {
    fn type_name(&self) -> &str {
        "BsonValue"
    }

    fn member(&self, name: &str) -> Option<MemberInfo> {
        Some(MemberInfo {
            element_name: name.to_string(),
            serializer: Self::shared(),
        })
    }

    fn item_serializer(&self) -> Option<SerializerRef> {
        Some(Self::shared())
    }
}

/// BSON representation a scalar serializer produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    /// UTF-8 string.
    String,
    /// 32-bit integer.
    Int32,
    /// 64-bit integer.
    Int64,
    /// Double precision float.
    Double,
    /// Boolean.
    Boolean,
    /// UTC datetime.
    DateTime,
    /// ObjectId.
    ObjectId,
    /// Decimal128.
    Decimal128,
    /// Binary data.
    Binary,
}

/// Serializer for a single scalar representation.
#[derive(Debug, Clone)]
pub struct ScalarSerializer {
    type_name: String,
    kind: ScalarKind,
}

impl ScalarSerializer {
    /// Create a scalar serializer with a custom type name.
    pub fn new(type_name: impl Into<String>, kind: ScalarKind) -> SerializerRef {
        Arc::new(Self {
            type_name: type_name.into(),
            kind,
        })
    }

    /// String serializer.
    pub fn string() -> SerializerRef {
        Self::new("String", ScalarKind::String)
    }

    /// 32-bit integer serializer.
    pub fn int32() -> SerializerRef {
        Self::new("i32", ScalarKind::Int32)
    }

    /// 64-bit integer serializer.
    pub fn int64() -> SerializerRef {
        Self::new("i64", ScalarKind::Int64)
    }

    /// Double serializer.
    pub fn double() -> SerializerRef {
        Self::new("f64", ScalarKind::Double)
    }

    /// Boolean serializer.
    pub fn boolean() -> SerializerRef {
        Self::new("bool", ScalarKind::Boolean)
    }

    /// Datetime serializer.
    pub fn date_time() -> SerializerRef {
        Self::new("DateTime", ScalarKind::DateTime)
    }

    /// ObjectId serializer.
    pub fn object_id() -> SerializerRef {
        Self::new("ObjectId", ScalarKind::ObjectId)
    }

    /// Decimal128 serializer.
    pub fn decimal128() -> SerializerRef {
        Self::new("Decimal128", ScalarKind::Decimal128)
    }

    /// Binary serializer.
    pub fn binary() -> SerializerRef {
        Self::new("Binary", ScalarKind::Binary)
    }

    /// Get the scalar kind.
    pub fn kind(&self) -> ScalarKind {
        self.kind
    }
}

impl BsonSerializer for ScalarSerializer {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn serialize_value(&self, value: &Bson) -> RenderResult<Bson> {
        let converted = match (self.kind, value) {
            (_, Bson::Null) => Some(Bson::Null),
            (ScalarKind::String, Bson::String(_)) => Some(value.clone()),
            (ScalarKind::Int32, Bson::Int32(_)) => Some(value.clone()),
            (ScalarKind::Int32, Bson::Int64(v)) => i32::try_from(*v).ok().map(Bson::Int32),
            (ScalarKind::Int64, Bson::Int64(_)) => Some(value.clone()),
            (ScalarKind::Int64, Bson::Int32(v)) => Some(Bson::Int64(i64::from(*v))),
            (ScalarKind::Double, Bson::Double(_)) => Some(value.clone()),
            (ScalarKind::Double, Bson::Int32(v)) => Some(Bson::Double(f64::from(*v))),
            (ScalarKind::Double, Bson::Int64(v)) => Some(Bson::Double(*v as f64)),
            (ScalarKind::Boolean, Bson::Boolean(_)) => Some(value.clone()),
            (ScalarKind::DateTime, Bson::DateTime(_)) => Some(value.clone()),
            (ScalarKind::ObjectId, Bson::ObjectId(_)) => Some(value.clone()),
            (ScalarKind::Decimal128, Bson::Decimal128(_)) => Some(value.clone()),
            (ScalarKind::Binary, Bson::Binary(_)) => Some(value.clone()),
            _ => None,
        };

        converted.ok_or_else(|| mismatch(&self.type_name, value))
    }
}

/// Serializer for homogeneous arrays.
#[derive(Debug, Clone)]
pub struct ArraySerializer {
    type_name: String,
    item: SerializerRef,
}

impl ArraySerializer {
    /// Create an array serializer over the given item serializer.
    pub fn of(item: SerializerRef) -> SerializerRef {
        let type_name = format!("Vec<{}>", item.type_name());
        Arc::new(Self { type_name, item })
    }
}

impl BsonSerializer for ArraySerializer {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn serialize_value(&self, value: &Bson) -> RenderResult<Bson> {
        match value {
            Bson::Null => Ok(Bson::Null),
            Bson::Array(items) => items
                .iter()
                .map(|item| self.item.serialize_value(item))
                .collect::<RenderResult<Vec<_>>>()
                .map(Bson::Array),
            other => Err(mismatch(&self.type_name, other)),
        }
    }

    fn item_serializer(&self) -> Option<SerializerRef> {
        Some(self.item.clone())
    }
}

#[derive(Debug, Clone)]
struct MemberMap {
    name: String,
    element_name: String,
    serializer: SerializerRef,
}

/// Class-map style serializer for structured documents.
#[derive(Debug, Clone)]
pub struct DocumentSerializer {
    type_name: String,
    members: Vec<MemberMap>,
}

impl DocumentSerializer {
    /// Create a builder for a document serializer.
    pub fn builder(type_name: impl Into<String>) -> DocumentSerializerBuilder {
        DocumentSerializerBuilder {
            type_name: type_name.into(),
            members: Vec::new(),
        }
    }

    /// Logical member names in declaration order.
    pub fn member_names(&self) -> impl Iterator<Item = &str> {
        self.members.iter().map(|m| m.name.as_str())
    }
}

impl BsonSerializer for DocumentSerializer {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn serialize_value(&self, value: &Bson) -> RenderResult<Bson> {
        let Bson::Document(document) = value else {
            return match value {
                Bson::Null => Ok(Bson::Null),
                other => Err(mismatch(&self.type_name, other)),
            };
        };

        let mut out = Document::new();
        for (key, item) in document {
            let normalized = match self.members.iter().find(|m| &m.element_name == key) {
                Some(member) => member.serializer.serialize_value(item)?,
                None => item.clone(),
            };
            out.insert(key.clone(), normalized);
        }
        Ok(Bson::Document(out))
    }

    fn member(&self, name: &str) -> Option<MemberInfo> {
        self.members
            .iter()
            .find(|m| m.name == name || m.element_name == name)
            .map(|m| MemberInfo {
                element_name: m.element_name.clone(),
                serializer: m.serializer.clone(),
            })
    }
}

/// Builder for [`DocumentSerializer`].
#[derive(Debug)]
pub struct DocumentSerializerBuilder {
    type_name: String,
    members: Vec<MemberMap>,
}

impl DocumentSerializerBuilder {
    /// Add a member whose element name equals its logical name.
    pub fn member(self, name: impl Into<String>, serializer: SerializerRef) -> Self {
        let name = name.into();
        let element_name = name.clone();
        self.member_as(name, element_name, serializer)
    }

    /// Add a member stored under a different element name.
    pub fn member_as(
        mut self,
        name: impl Into<String>,
        element_name: impl Into<String>,
        serializer: SerializerRef,
    ) -> Self {
        self.members.push(MemberMap {
            name: name.into(),
            element_name: element_name.into(),
            serializer,
        });
        self
    }

    /// Build the serializer.
    pub fn build(self) -> SerializerRef {
        Arc::new(DocumentSerializer {
            type_name: self.type_name,
            members: self.members,
        })
    }
}

/// Marks a projection result that is materialized on the client.
///
/// Server-only stages reject any input carrying this serializer.
#[derive(Debug, Clone)]
pub struct ClientSideProjectionSerializer {
    type_name: String,
    inner: SerializerRef,
}

impl ClientSideProjectionSerializer {
    /// Wrap the serializer of the server-side portion of a projection.
    pub fn wrap(type_name: impl Into<String>, inner: SerializerRef) -> SerializerRef {
        Arc::new(Self {
            type_name: type_name.into(),
            inner,
        })
    }
}

impl BsonSerializer for ClientSideProjectionSerializer {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn serialize_value(&self, value: &Bson) -> RenderResult<Bson> {
        self.inner.serialize_value(value)
    }

    fn member(&self, name: &str) -> Option<MemberInfo> {
        self.inner.member(name)
    }

    fn item_serializer(&self) -> Option<SerializerRef> {
        self.inner.item_serializer()
    }

    fn is_client_side_projection(&self) -> bool {
        true
    }
}

/// Serializer of a grouping: a key plus the elements that share it.
///
/// Used as the input of bucket and group output projections, where the key
/// is stored in `_id` and the grouping itself iterates the source documents.
#[derive(Debug, Clone)]
pub struct GroupingSerializer {
    type_name: String,
    key: SerializerRef,
    element: SerializerRef,
}

impl GroupingSerializer {
    /// Create a grouping serializer.
    pub fn new(key: SerializerRef, element: SerializerRef) -> SerializerRef {
        let type_name = format!("Grouping<{}, {}>", key.type_name(), element.type_name());
        Arc::new(Self {
            type_name,
            key,
            element,
        })
    }

    /// Serializer of the grouping key.
    pub fn key_serializer(&self) -> &SerializerRef {
        &self.key
    }
}

impl BsonSerializer for GroupingSerializer {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn member(&self, name: &str) -> Option<MemberInfo> {
        match name {
            "Key" | "key" | "_id" => Some(MemberInfo {
                element_name: "_id".to_string(),
                serializer: self.key.clone(),
            }),
            _ => None,
        }
    }

    fn item_serializer(&self) -> Option<SerializerRef> {
        Some(self.element.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::{doc, oid::ObjectId};

    #[test]
    fn test_scalar_widening() {
        let s = ScalarSerializer::int64();
        assert_eq!(s.serialize_value(&Bson::Int32(5)).unwrap(), Bson::Int64(5));

        let d = ScalarSerializer::double();
        assert_eq!(d.serialize_value(&Bson::Int32(2)).unwrap(), Bson::Double(2.0));
    }

    #[test]
    fn test_scalar_mismatch() {
        let s = ScalarSerializer::string();
        let err = s.serialize_value(&Bson::Int32(1)).unwrap_err();
        assert!(err.is_serialization_mismatch());
    }

    #[test]
    fn test_array_serializer_items() {
        let s = ArraySerializer::of(ScalarSerializer::int64());
        let out = s
            .serialize_value(&Bson::Array(vec![Bson::Int32(1), Bson::Int32(2)]))
            .unwrap();
        assert_eq!(out, Bson::Array(vec![Bson::Int64(1), Bson::Int64(2)]));
        assert!(s.item_serializer().is_some());
        assert!(s.serialize_value(&Bson::Int32(1)).is_err());
    }

    #[test]
    fn test_document_serializer_members() {
        let s = DocumentSerializer::builder("Person")
            .member_as("id", "_id", ScalarSerializer::object_id())
            .member("age", ScalarSerializer::int64())
            .build();

        let member = s.member("id").unwrap();
        assert_eq!(member.element_name, "_id");
        assert!(s.member("missing").is_none());

        let oid = ObjectId::new();
        let value = Bson::Document(doc! { "_id": oid, "age": 3, "extra": "x" });
        assert_eq!(
            s.serialize_value(&value).unwrap(),
            Bson::Document(doc! { "_id": oid, "age": 3_i64, "extra": "x" })
        );
    }

    #[test]
    fn test_client_side_projection_flag() {
        let s = ClientSideProjectionSerializer::wrap("Summary", BsonValueSerializer::shared());
        assert!(s.is_client_side_projection());
        assert!(!BsonValueSerializer::shared().is_client_side_projection());
    }

    #[test]
    fn test_grouping_key_member() {
        let g = GroupingSerializer::new(ScalarSerializer::int32(), BsonValueSerializer::shared());
        assert_eq!(g.member("Key").unwrap().element_name, "_id");
        assert!(g.item_serializer().is_some());
    }
}
