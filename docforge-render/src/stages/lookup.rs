//! `$lookup` and `$graphLookup`.

use bson::{Document, doc};

use crate::error::RenderResult;
use crate::expression::AggregateExpressionDefinition;
use crate::field::{FieldDefinition, TypedFieldDefinition, resolve_path};
use crate::field_type::{FieldType, ensure_connectable};
use crate::filter::FilterDefinition;
use crate::pipeline::{PipelineDefinition, PipelineStageDefinition, RenderedPipelineStage};

/// `$lookup` joining `local_field` to `foreign_field` of another collection.
///
/// The foreign field is resolved against `TForeign`, the `as` field against
/// the output type.
pub fn lookup<TIn: 'static, TForeign: 'static, TOut: 'static>(
    from: impl Into<String>,
    local_field: impl Into<FieldDefinition<TIn>>,
    foreign_field: impl Into<FieldDefinition<TForeign>>,
    as_field: impl Into<FieldDefinition<TOut>>,
) -> PipelineStageDefinition<TIn, TOut> {
    let from = from.into();
    let local_field: FieldDefinition<TIn> = local_field.into();
    let foreign_field: FieldDefinition<TForeign> = foreign_field.into();
    let as_field: FieldDefinition<TOut> = as_field.into();

    PipelineStageDefinition::new("$lookup", move |context| {
        context.ensure_server_side("$lookup")?;
        let foreign = context.with_document_type::<TForeign>();
        let output = context.with_document_type::<TOut>();
        let body = doc! {
            "from": from.as_str(),
            "localField": local_field.render(context)?.field_name,
            "foreignField": foreign_field.render(&foreign)?.field_name,
            "as": as_field.render(&output)?.field_name,
        };
        Ok(RenderedPipelineStage::single(
            "$lookup",
            doc! { "$lookup": body },
            output.document_serializer().clone(),
        ))
    })
}

/// `$lookup` running a pipeline over the foreign collection.
///
/// `let_variables` are rendered verbatim; `from` may be omitted for pipelines
/// that start with `$documents`.
pub fn lookup_pipeline<TIn: 'static, TForeign: 'static, TAsElement, TOut: 'static>(
    from: Option<String>,
    let_variables: Option<Document>,
    pipeline: PipelineDefinition<TForeign, TAsElement>,
    as_field: impl Into<FieldDefinition<TOut>>,
) -> PipelineStageDefinition<TIn, TOut>
where
    TAsElement: 'static,
{
    let as_field: FieldDefinition<TOut> = as_field.into();

    PipelineStageDefinition::new("$lookup", move |context| {
        context.ensure_server_side("$lookup")?;
        let output = context.with_document_type::<TOut>();
        let rendered = pipeline.render(&context.with_document_type::<TForeign>())?;

        let mut body = Document::new();
        if let Some(from) = &from {
            body.insert("from", from.as_str());
        }
        if let Some(let_variables) = &let_variables {
            body.insert("let", let_variables.clone());
        }
        body.insert("pipeline", rendered.documents);
        body.insert("as", as_field.render(&output)?.field_name);

        Ok(RenderedPipelineStage::single(
            "$lookup",
            doc! { "$lookup": body },
            output.document_serializer().clone(),
        ))
    })
}

/// Options of a `$graphLookup` stage.
pub struct GraphLookupOptions<TFrom> {
    /// Field of each matched document receiving its recursion depth.
    pub depth_field: Option<String>,
    /// Maximum recursion depth.
    pub max_depth: Option<i32>,
    /// Additional condition on visited documents.
    pub restrict_search_with_match: Option<FilterDefinition<TFrom>>,
}

impl<TFrom> Default for GraphLookupOptions<TFrom> {
    fn default() -> Self {
        Self {
            depth_field: None,
            max_depth: None,
            restrict_search_with_match: None,
        }
    }
}

impl<TFrom> GraphLookupOptions<TFrom> {
    /// Create empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the depth in `field` of each result.
    pub fn depth_field(mut self, field: impl Into<String>) -> Self {
        self.depth_field = Some(field.into());
        self
    }

    /// Stop after `depth` recursions.
    pub fn max_depth(mut self, depth: i32) -> Self {
        self.max_depth = Some(depth);
        self
    }

    /// Only follow documents matching `filter`.
    pub fn restrict_search_with_match(mut self, filter: FilterDefinition<TFrom>) -> Self {
        self.restrict_search_with_match = Some(filter);
        self
    }
}

/// `$graphLookup` over another collection.
///
/// The value types of the connect-from field and the start value must each
/// be identical to, or iterables of, the connect-to field type. Mismatches
/// fail here instead of at render time.
pub fn graph_lookup<TIn, TFrom, TConnectFrom, TConnectTo, TStartWith, TOut>(
    from: impl Into<String>,
    connect_from_field: TypedFieldDefinition<TFrom, TConnectFrom>,
    connect_to_field: TypedFieldDefinition<TFrom, TConnectTo>,
    start_with: AggregateExpressionDefinition<TIn, TStartWith>,
    as_field: impl Into<FieldDefinition<TOut>>,
    options: GraphLookupOptions<TFrom>,
) -> RenderResult<PipelineStageDefinition<TIn, TOut>>
where
    TIn: 'static,
    TFrom: 'static,
    TConnectFrom: FieldType,
    TConnectTo: FieldType,
    TStartWith: FieldType,
    TOut: 'static,
{
    ensure_connectable::<TConnectFrom, TConnectTo>("connectFromField", "connectToField")?;
    ensure_connectable::<TStartWith, TConnectTo>("startWith", "connectToField")?;

    let from = from.into();
    let as_field: FieldDefinition<TOut> = as_field.into();

    Ok(PipelineStageDefinition::new("$graphLookup", move |context| {
        context.ensure_server_side("$graphLookup")?;
        let from_context = context.with_document_type::<TFrom>();
        let output = context.with_document_type::<TOut>();
        let rendered_as = as_field.render(&output)?;

        let mut body = doc! {
            "from": from.as_str(),
            "connectFromField": connect_from_field.render(&from_context)?.field_name,
            "connectToField": connect_to_field.render(&from_context)?.field_name,
            "startWith": start_with.render(context)?,
        };
        body.insert("as", rendered_as.field_name.as_str());
        if let Some(depth_field) = &options.depth_field {
            let element = rendered_as.item_serializer()?;
            let (depth_field, _) = resolve_path(depth_field, &element);
            body.insert("depthField", depth_field);
        }
        if let Some(max_depth) = options.max_depth {
            body.insert("maxDepth", max_depth);
        }
        if let Some(filter) = &options.restrict_search_with_match {
            body.insert("restrictSearchWithMatch", filter.render(&from_context)?);
        }

        Ok(RenderedPipelineStage::single(
            "$graphLookup",
            doc! { "$graphLookup": body },
            output.document_serializer().clone(),
        ))
    }))
}
