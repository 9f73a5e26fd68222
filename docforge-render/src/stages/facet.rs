//! `$facet`.

use std::fmt;
use std::sync::Arc;

use bson::{Bson, Document, doc};

use crate::context::RenderContext;
use crate::error::{RenderError, RenderResult};
use crate::pipeline::{
    PipelineDefinition, PipelineStageDefinition, RenderedPipeline, RenderedPipelineStage,
};
use crate::serializer::{ArraySerializer, DocumentSerializer};

/// Default output of a `$facet` stage: one array field per facet.
#[derive(Debug, Clone, Copy)]
pub struct AggregateFacetResults;

type FacetRenderer = Arc<dyn Fn(&RenderContext) -> RenderResult<RenderedPipeline> + Send + Sync>;

/// A named sub-pipeline of a `$facet` stage over `TIn` documents.
pub struct AggregateFacet<TIn> {
    name: String,
    renderer: FacetRenderer,
    _marker: std::marker::PhantomData<fn(TIn)>,
}

impl<TIn: 'static> AggregateFacet<TIn> {
    /// Create a facet from a pipeline.
    pub fn new<TOut: 'static>(
        name: impl Into<String>,
        pipeline: PipelineDefinition<TIn, TOut>,
    ) -> Self {
        Self {
            name: name.into(),
            renderer: Arc::new(move |context| pipeline.render(context)),
            _marker: std::marker::PhantomData,
        }
    }
}

impl<TIn> AggregateFacet<TIn> {
    /// Name of the output field holding the facet results.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<TIn> Clone for AggregateFacet<TIn> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            renderer: self.renderer.clone(),
            _marker: std::marker::PhantomData,
        }
    }
}

impl<TIn> fmt::Debug for AggregateFacet<TIn> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AggregateFacet").field(&self.name).finish()
    }
}

/// `$facet` running several sub-pipelines over the same input.
///
/// Unless `TOut` has a registered serializer, the output serializer is built
/// from the facets, one array member per facet.
pub fn facet<TIn: 'static, TOut: 'static>(
    facets: Vec<AggregateFacet<TIn>>,
) -> RenderResult<PipelineStageDefinition<TIn, TOut>> {
    if facets.is_empty() {
        return Err(RenderError::invalid_argument("$facet needs at least one facet"));
    }
    Ok(PipelineStageDefinition::new("$facet", move |context| {
        context.ensure_server_side("$facet")?;
        let mut body = Document::new();
        let mut results = DocumentSerializer::builder("AggregateFacetResults");
        for facet in &facets {
            let rendered = (facet.renderer)(context)?;
            body.insert(
                facet.name.clone(),
                rendered.documents.into_iter().map(Bson::Document).collect::<Vec<_>>(),
            );
            let items = ArraySerializer::of(rendered.output_serializer);
            results = results.member(facet.name.clone(), items);
        }
        let output_serializer = if context.registry().contains::<TOut>() {
            context.serializer_for::<TOut>()
        } else {
            results.build()
        };
        Ok(RenderedPipelineStage::single(
            "$facet",
            doc! { "$facet": body },
            output_serializer,
        ))
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::resolve_path;
    use crate::filter::FilterDefinition;
    use crate::stages::tests::{Person, context};
    use crate::stages::{count, limit, match_stage};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_facet_renders_each_pipeline() {
        let adults = PipelineDefinition::<Person, Person>::new()
            .append(match_stage(FilterDefinition::gte("age", 18)))
            .append(count());
        let first = PipelineDefinition::<Person, Person>::new().append(limit(1).unwrap());

        let stage = facet::<Person, AggregateFacetResults>(vec![
            AggregateFacet::new("adults", adults),
            AggregateFacet::new("first", first),
        ])
        .unwrap();
        let rendered = stage.render(&context()).unwrap();
        assert_eq!(
            rendered.documents,
            vec![doc! { "$facet": {
                "adults": [ { "$match": { "age": { "$gte": 18 } } }, { "$count": "count" } ],
                "first": [ { "$limit": 1_i64 } ],
            } }]
        );

        let (name, serializer) = resolve_path("first.0.name", &rendered.output_serializer);
        assert_eq!(name, "first.0.n");
        assert_eq!(serializer.unwrap().type_name(), "String");
    }

    #[test]
    fn test_facet_requires_facets() {
        assert!(facet::<Person, AggregateFacetResults>(Vec::new()).is_err());
    }
}
