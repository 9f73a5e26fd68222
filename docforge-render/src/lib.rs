//! # docforge-render
//!
//! Typed definitions that render into BSON command fragments.
//!
//! This crate provides:
//! - Field resolution through per-type serializers and a serializer registry
//! - Filter, projection, sort and update definitions
//! - Aggregate expressions and accumulator helpers
//! - Typed aggregation pipelines with the full stage catalog
//! - Index key definitions and namespaces
//!
//! Rendering is pure and synchronous: a definition can be rendered any number
//! of times against a [`RenderContext`] and always yields the same documents.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use docforge_render::prelude::*;
//!
//! struct Person;
//!
//! let person = DocumentSerializer::builder("Person")
//!     .member_as("name", "n", ScalarSerializer::string())
//!     .member("age", ScalarSerializer::int32())
//!     .build();
//! let registry = Arc::new(SerializerRegistry::new().with::<Person>(person));
//! let context = RenderContext::for_type::<Person>(registry);
//!
//! let filter = FilterDefinition::<Person>::gte("age", 18);
//! assert_eq!(filter.render(&context)?, doc! { "age": { "$gte": 18 } });
//!
//! let pipeline = PipelineDefinition::<Person, Person>::new()
//!     .append(stages::match_stage(filter))
//!     .append(stages::limit(10)?);
//! let rendered = pipeline.render(&context)?;
//! ```

pub mod context;
pub mod document;
pub mod error;
pub mod expression;
pub mod field;
pub mod field_type;
pub mod filter;
pub mod index_keys;
pub mod namespace;
pub mod pipeline;
pub mod projection;
pub mod registry;
pub mod serializer;
pub mod sort;
pub mod stages;
pub mod update;

pub use bson::{Bson, Document, doc};
pub use context::{
    ExpressionRef, ExpressionTranslator, NativeExpression, RenderContext, TranslationMode,
};
pub use document::{DocumentExt, parse_json_document, to_document};
pub use error::{RenderError, RenderResult};
pub use expression::{AggregateExpressionDefinition, accumulators};
pub use field::{FieldDefinition, RenderedField, TypedFieldDefinition, resolve_path};
pub use field_type::{FieldKind, FieldType, are_connectable, ensure_connectable};
pub use filter::{FilterBuilder, FilterDefinition};
pub use index_keys::{IndexKeyKind, IndexKeysDefinition};
pub use namespace::{CollectionNamespace, DatabaseNamespace};
pub use pipeline::{
    NoPipelineInput, PipelineDefinition, PipelineStageDefinition, RenderedPipeline,
    RenderedPipelineStage,
};
pub use projection::{ProjectionDefinition, RenderedProjection};
pub use registry::SerializerRegistry;
pub use serializer::{
    ArraySerializer, BsonSerializer, BsonValueSerializer, ClientSideProjectionSerializer,
    DocumentSerializer, DocumentSerializerBuilder, GroupingSerializer, MemberInfo, ScalarKind,
    ScalarSerializer, SerializerRef,
};
pub use sort::{SortDefinition, SortDirection};
pub use update::{
    BitwiseOperator, CurrentDateType, PushOptions, PushSort, RenderedUpdate, UpdateDefinition,
};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::context::{ExpressionTranslator, NativeExpression, RenderContext};
    pub use crate::document::DocumentExt;
    pub use crate::error::{RenderError, RenderResult};
    pub use crate::expression::{AggregateExpressionDefinition, accumulators};
    pub use crate::field::{FieldDefinition, TypedFieldDefinition};
    pub use crate::filter::{FilterBuilder, FilterDefinition};
    pub use crate::index_keys::IndexKeysDefinition;
    pub use crate::namespace::{CollectionNamespace, DatabaseNamespace};
    pub use crate::pipeline::{PipelineDefinition, PipelineStageDefinition, RenderedPipeline};
    pub use crate::projection::ProjectionDefinition;
    pub use crate::registry::SerializerRegistry;
    pub use crate::serializer::{
        ArraySerializer, BsonSerializer, DocumentSerializer, ScalarSerializer, SerializerRef,
    };
    pub use crate::sort::{SortDefinition, SortDirection};
    pub use crate::stages;
    pub use crate::update::{PushOptions, UpdateDefinition};
    pub use bson::oid::ObjectId;
    pub use bson::{Bson, Document, doc};
}
