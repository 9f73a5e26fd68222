//! Type to serializer lookup.

use std::any::{TypeId, type_name};
use std::collections::HashMap;

use bson::oid::ObjectId;
use bson::{Bson, Document};

use crate::serializer::{BsonValueSerializer, ScalarSerializer, SerializerRef};

/// Registry mapping Rust types onto serializers.
///
/// Types that were never registered resolve to the untyped
/// [`BsonValueSerializer`], which accepts any member and any value.
#[derive(Debug, Clone)]
pub struct SerializerRegistry {
    serializers: HashMap<TypeId, SerializerRef>,
}

impl Default for SerializerRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register::<String>(ScalarSerializer::string());
        registry.register::<i32>(ScalarSerializer::int32());
        registry.register::<i64>(ScalarSerializer::int64());
        registry.register::<f64>(ScalarSerializer::double());
        registry.register::<bool>(ScalarSerializer::boolean());
        registry.register::<ObjectId>(ScalarSerializer::object_id());
        registry.register::<bson::DateTime>(ScalarSerializer::date_time());
        registry.register::<bson::Decimal128>(ScalarSerializer::decimal128());
        registry.register::<Document>(BsonValueSerializer::shared());
        registry.register::<Bson>(BsonValueSerializer::shared());
        registry
    }
}

impl SerializerRegistry {
    /// Create a registry preloaded with the scalar serializers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry without any registrations.
    pub fn empty() -> Self {
        Self {
            serializers: HashMap::new(),
        }
    }

    /// Register (or replace) the serializer for `T`.
    pub fn register<T: 'static>(&mut self, serializer: SerializerRef) {
        tracing::trace!(
            type_name = type_name::<T>(),
            serializer = serializer.type_name(),
            "registering serializer"
        );
        self.serializers.insert(TypeId::of::<T>(), serializer);
    }

    /// Builder-style registration.
    pub fn with<T: 'static>(mut self, serializer: SerializerRef) -> Self {
        self.register::<T>(serializer);
        self
    }

    /// Get the serializer for `T`.
    pub fn serializer<T: 'static>(&self) -> SerializerRef {
        self.lookup(TypeId::of::<T>())
    }

    /// Get the serializer registered under a type id.
    pub fn lookup(&self, type_id: TypeId) -> SerializerRef {
        self.serializers
            .get(&type_id)
            .cloned()
            .unwrap_or_else(BsonValueSerializer::shared)
    }

    /// Check whether `T` has an explicit registration.
    pub fn contains<T: 'static>(&self) -> bool {
        self.serializers.contains_key(&TypeId::of::<T>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serializer::DocumentSerializer;

    struct Person;

    #[test]
    fn test_defaults_registered() {
        let registry = SerializerRegistry::new();
        assert_eq!(registry.serializer::<String>().type_name(), "String");
        assert_eq!(registry.serializer::<i64>().type_name(), "i64");
        assert!(registry.contains::<Document>());
    }

    #[test]
    fn test_unregistered_falls_back_to_untyped() {
        let registry = SerializerRegistry::new();
        assert!(!registry.contains::<Person>());
        assert_eq!(registry.serializer::<Person>().type_name(), "BsonValue");
    }

    #[test]
    fn test_register_custom() {
        let registry = SerializerRegistry::new().with::<Person>(
            DocumentSerializer::builder("Person")
                .member("name", ScalarSerializer::string())
                .build(),
        );
        assert_eq!(registry.serializer::<Person>().type_name(), "Person");
    }
}
