//! Pipeline stage catalog.
//!
//! Each builder returns a [`PipelineStageDefinition`] whose render closure
//! rejects client-side projected input, resolves the serializers it needs
//! and declares the serializer of its output. Builders whose arguments can
//! be invalid on their own return [`RenderResult`] so mistakes surface when
//! the stage is built.

mod bucket;
mod facet;
mod lookup;
mod output;
mod search;
mod window;

pub use bucket::{
    BucketAutoOptions, BucketGranularity, BucketOptions, Grouping, bucket, bucket_auto,
    bucket_auto_with_output, bucket_auto_with_output_expression, bucket_with_output,
    bucket_with_output_expression,
};
pub use facet::{AggregateFacet, AggregateFacetResults, facet};
pub use lookup::{GraphLookupOptions, graph_lookup, lookup, lookup_pipeline};
pub use output::{
    MergeAction, MergeNotMatchedAction, MergeStageOptions, TimeSeriesGranularity,
    TimeSeriesOptions, merge, out,
};
pub use search::{QueryVector, VectorSearchOptions, vector_search};
pub use window::{
    DensifyBounds, DensifyRange, DensifyTimeUnit, WindowBound, WindowBounds, WindowOutput,
    densify, set_window_fields,
};

use std::any::TypeId;

use bson::{Bson, Document, doc};

use crate::context::RenderContext;
use crate::error::{RenderError, RenderResult};
use crate::expression::AggregateExpressionDefinition;
use crate::field::FieldDefinition;
use crate::filter::FilterDefinition;
use crate::pipeline::{
    NoPipelineInput, PipelineDefinition, PipelineStageDefinition, RenderedPipelineStage,
};
use crate::projection::ProjectionDefinition;
use crate::serializer::{DocumentSerializer, ScalarSerializer, SerializerRef};
use crate::sort::SortDefinition;

/// Options of an `$unwind` stage.
#[derive(Debug, Clone, Default)]
pub struct UnwindOptions {
    /// Field receiving the array index of each unwound item.
    pub include_array_index: Option<String>,
    /// Keep documents whose array is missing, null or empty.
    pub preserve_null_and_empty_arrays: Option<bool>,
}

impl UnwindOptions {
    /// Create default unwind options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the array index in `field`.
    pub fn include_array_index(mut self, field: impl Into<String>) -> Self {
        self.include_array_index = Some(field.into());
        self
    }

    /// Keep documents without array items.
    pub fn preserve_null_and_empty_arrays(mut self, preserve: bool) -> Self {
        self.preserve_null_and_empty_arrays = Some(preserve);
        self
    }

    fn is_empty(&self) -> bool {
        self.include_array_index.is_none() && self.preserve_null_and_empty_arrays.is_none()
    }
}

fn single(
    context: &RenderContext,
    operator: &str,
    body: impl Into<Bson>,
    output_serializer: SerializerRef,
) -> RenderResult<RenderedPipelineStage> {
    context.ensure_server_side(operator)?;
    let mut document = Document::new();
    document.insert(operator, body.into());
    Ok(RenderedPipelineStage::single(operator, document, output_serializer))
}

fn count_result_serializer() -> SerializerRef {
    DocumentSerializer::builder("AggregateCountResult")
        .member("count", ScalarSerializer::int64())
        .build()
}

/// `$match` documents of `T`.
pub fn match_stage<T: 'static>(filter: FilterDefinition<T>) -> PipelineStageDefinition<T, T> {
    PipelineStageDefinition::new("$match", move |context| {
        context.ensure_server_side("$match")?;
        let rendered = filter.render(&context.for_find(false))?;
        single(context, "$match", rendered, context.document_serializer().clone())
    })
}

/// `$project` into `TOut`.
///
/// A projection computed entirely on the client renders no stage document.
pub fn project<TIn: 'static, TOut: 'static>(
    projection: ProjectionDefinition<TIn, TOut>,
) -> PipelineStageDefinition<TIn, TOut> {
    PipelineStageDefinition::new("$project", move |context| {
        context.ensure_server_side("$project")?;
        let rendered = projection.render(&context.for_find(false))?;
        Ok(RenderedPipelineStage {
            operator_name: "$project".to_string(),
            documents: rendered
                .document
                .map(|d| doc! { "$project": d })
                .into_iter()
                .collect(),
            output_serializer: rendered.output_serializer,
        })
    })
}

/// `$group` by a projection that must contain `_id`.
pub fn group<TIn: 'static, TOut: 'static>(
    projection: ProjectionDefinition<TIn, TOut>,
) -> PipelineStageDefinition<TIn, TOut> {
    PipelineStageDefinition::new("$group", move |context| {
        context.ensure_server_side("$group")?;
        let rendered = projection.render(&context.for_find(false))?;
        if rendered.is_client_side() {
            return Err(RenderError::client_side_projection("$group"));
        }
        let document = rendered.document.unwrap_or_default();
        if !document.contains_key("_id") {
            return Err(RenderError::invalid_argument(
                "a $group projection must contain an _id",
            ));
        }
        single(context, "$group", document, rendered.output_serializer)
    })
}

/// `$group` by an id expression with accumulator fields.
pub fn group_by<TIn: 'static, TKey: 'static, TOut: 'static>(
    id: AggregateExpressionDefinition<TIn, TKey>,
    accumulators: Document,
) -> PipelineStageDefinition<TIn, TOut> {
    PipelineStageDefinition::new("$group", move |context| {
        let mut group = doc! { "_id": id.render(context)? };
        for (name, accumulator) in &accumulators {
            group.insert(name.clone(), accumulator.clone());
        }
        single(context, "$group", group, context.serializer_for::<TOut>())
    })
}

/// `$sort`.
pub fn sort<T: 'static>(sort: SortDefinition<T>) -> PipelineStageDefinition<T, T> {
    PipelineStageDefinition::new("$sort", move |context| {
        let rendered = sort.render(context)?;
        single(context, "$sort", rendered, context.document_serializer().clone())
    })
}

/// `$limit`; `limit` must be positive.
pub fn limit<T>(limit: i64) -> RenderResult<PipelineStageDefinition<T, T>> {
    if limit <= 0 {
        return Err(RenderError::invalid_argument(format!(
            "limit must be greater than zero, got {}",
            limit
        )));
    }
    Ok(PipelineStageDefinition::new("$limit", move |context| {
        single(context, "$limit", limit, context.document_serializer().clone())
    }))
}

/// `$skip`; `skip` must not be negative.
pub fn skip<T>(skip: i64) -> RenderResult<PipelineStageDefinition<T, T>> {
    if skip < 0 {
        return Err(RenderError::invalid_argument(format!(
            "skip cannot be negative, got {}",
            skip
        )));
    }
    Ok(PipelineStageDefinition::new("$skip", move |context| {
        single(context, "$skip", skip, context.document_serializer().clone())
    }))
}

/// `$sample`; `size` must be positive.
pub fn sample<T>(size: i64) -> RenderResult<PipelineStageDefinition<T, T>> {
    if size <= 0 {
        return Err(RenderError::invalid_argument(format!(
            "sample size must be greater than zero, got {}",
            size
        )));
    }
    Ok(PipelineStageDefinition::new("$sample", move |context| {
        single(
            context,
            "$sample",
            doc! { "size": size },
            context.document_serializer().clone(),
        )
    }))
}

/// `$count` into `{ count }`.
pub fn count<T>() -> PipelineStageDefinition<T, Document> {
    PipelineStageDefinition::new("$count", |context| {
        single(context, "$count", "count", count_result_serializer())
    })
}

/// `$unwind` an array field.
pub fn unwind<TIn: 'static, TOut: 'static>(
    field: impl Into<FieldDefinition<TIn>>,
) -> PipelineStageDefinition<TIn, TOut> {
    unwind_with_options(field, UnwindOptions::default())
}

/// `$unwind` with options; without options the compact string form is used.
pub fn unwind_with_options<TIn: 'static, TOut: 'static>(
    field: impl Into<FieldDefinition<TIn>>,
    options: UnwindOptions,
) -> PipelineStageDefinition<TIn, TOut> {
    let field: FieldDefinition<TIn> = field.into();
    PipelineStageDefinition::new("$unwind", move |context| {
        let path = field.render(context)?.dollar_path();
        let body = if options.is_empty() {
            Bson::String(path)
        } else {
            let mut body = doc! { "path": path };
            if let Some(index) = &options.include_array_index {
                body.insert("includeArrayIndex", index.as_str());
            }
            if let Some(preserve) = options.preserve_null_and_empty_arrays {
                body.insert("preserveNullAndEmptyArrays", preserve);
            }
            Bson::Document(body)
        };
        single(context, "$unwind", body, context.serializer_for::<TOut>())
    })
}

/// `$sortByCount` of an expression into `{ _id, count }`.
pub fn sort_by_count<TIn: 'static, TKey: 'static>(
    expression: AggregateExpressionDefinition<TIn, TKey>,
) -> PipelineStageDefinition<TIn, Document> {
    PipelineStageDefinition::new("$sortByCount", move |context| {
        let output = DocumentSerializer::builder("AggregateSortByCountResult")
            .member_as("id", "_id", context.serializer_for::<TKey>())
            .member("count", ScalarSerializer::int64())
            .build();
        single(context, "$sortByCount", expression.render(context)?, output)
    })
}

/// `$replaceRoot` with a new root document.
pub fn replace_root<TIn: 'static, TOut: 'static>(
    new_root: AggregateExpressionDefinition<TIn, TOut>,
) -> PipelineStageDefinition<TIn, TOut> {
    PipelineStageDefinition::new("$replaceRoot", move |context| {
        let body = doc! { "newRoot": new_root.render(context)? };
        single(context, "$replaceRoot", body, context.serializer_for::<TOut>())
    })
}

/// `$replaceWith` a new root document.
pub fn replace_with<TIn: 'static, TOut: 'static>(
    new_root: AggregateExpressionDefinition<TIn, TOut>,
) -> PipelineStageDefinition<TIn, TOut> {
    PipelineStageDefinition::new("$replaceWith", move |context| {
        let body = new_root.render(context)?;
        single(context, "$replaceWith", body, context.serializer_for::<TOut>())
    })
}

fn computed_fields<T: 'static>(
    operator: &'static str,
    fields: Vec<(FieldDefinition<T>, AggregateExpressionDefinition<T>)>,
) -> PipelineStageDefinition<T, T> {
    PipelineStageDefinition::new(operator, move |context| {
        let mut body = Document::new();
        for (field, value) in &fields {
            body.insert(field.render(context)?.field_name, value.render(context)?);
        }
        single(context, operator, body, context.document_serializer().clone())
    })
}

/// `$set` computed fields.
pub fn set<T: 'static>(
    fields: Vec<(FieldDefinition<T>, AggregateExpressionDefinition<T>)>,
) -> PipelineStageDefinition<T, T> {
    computed_fields("$set", fields)
}

/// `$addFields` computed fields.
pub fn add_fields<T: 'static>(
    fields: Vec<(FieldDefinition<T>, AggregateExpressionDefinition<T>)>,
) -> PipelineStageDefinition<T, T> {
    computed_fields("$addFields", fields)
}

/// `$unset` fields; a single field renders as a string.
pub fn unset<T: 'static>(
    fields: impl IntoIterator<Item = impl Into<FieldDefinition<T>>>,
) -> RenderResult<PipelineStageDefinition<T, T>> {
    let fields: Vec<FieldDefinition<T>> = fields.into_iter().map(Into::into).collect();
    if fields.is_empty() {
        return Err(RenderError::invalid_argument("$unset needs at least one field"));
    }
    Ok(PipelineStageDefinition::new("$unset", move |context| {
        let mut names = fields
            .iter()
            .map(|f| f.render(context).map(|r| Bson::String(r.field_name)))
            .collect::<RenderResult<Vec<_>>>()?;
        let body = if names.len() == 1 {
            names.remove(0)
        } else {
            Bson::Array(names)
        };
        single(context, "$unset", body, context.document_serializer().clone())
    }))
}

/// `$unionWith` another collection.
///
/// When the other collection's document type differs from `TIn`, a pipeline
/// mapping it into `TIn` is required.
pub fn union_with<TIn: 'static, TWith: 'static>(
    collection: impl Into<String>,
    pipeline: Option<PipelineDefinition<TWith, TIn>>,
) -> RenderResult<PipelineStageDefinition<TIn, TIn>> {
    if pipeline.is_none() && TypeId::of::<TWith>() != TypeId::of::<TIn>() {
        return Err(RenderError::invalid_argument(format!(
            "$unionWith from {} into {} requires a pipeline",
            std::any::type_name::<TWith>(),
            std::any::type_name::<TIn>()
        )));
    }
    let collection = collection.into();
    Ok(PipelineStageDefinition::new("$unionWith", move |context| {
        let mut body = doc! { "coll": collection.as_str() };
        if let Some(pipeline) = &pipeline {
            let rendered = pipeline.render(&context.with_document_type::<TWith>())?;
            body.insert("pipeline", rendered.documents);
        }
        single(context, "$unionWith", body, context.document_serializer().clone())
    }))
}

/// `$documents`: generate the input documents of a database-level pipeline.
pub fn documents<TOut: 'static>(
    documents: Vec<Document>,
) -> PipelineStageDefinition<NoPipelineInput, TOut> {
    PipelineStageDefinition::new("$documents", move |context| {
        single(
            context,
            "$documents",
            documents.clone(),
            context.serializer_for::<TOut>(),
        )
    })
}
