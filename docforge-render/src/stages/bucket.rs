//! `$bucket` and `$bucketAuto`.
//!
//! The optional output of a bucket is a projection over a [`Grouping`] of
//! the input documents keyed by the bucket id. When that projection is a
//! native expression, translation waits until render time, where the key
//! serializer is known.

use std::marker::PhantomData;

use bson::{Bson, Document, doc};

use crate::context::{ExpressionRef, RenderContext};
use crate::error::{RenderError, RenderResult};
use crate::expression::AggregateExpressionDefinition;
use crate::pipeline::{PipelineStageDefinition, RenderedPipelineStage};
use crate::projection::ProjectionDefinition;
use crate::serializer::{DocumentSerializer, GroupingSerializer, ScalarSerializer, SerializerRef};

/// Input type of bucket output projections: documents sharing a key.
pub struct Grouping<TKey, TElement>(PhantomData<fn() -> (TKey, TElement)>);

/// Options of a `$bucket` stage.
#[derive(Debug, Clone, Default)]
pub struct BucketOptions {
    /// Bucket id of documents outside every boundary.
    pub default_bucket: Option<Bson>,
}

impl BucketOptions {
    /// Put documents outside the boundaries into `bucket`.
    pub fn default_bucket(bucket: impl Into<Bson>) -> Self {
        Self {
            default_bucket: Some(bucket.into()),
        }
    }
}

/// Preferred number series for `$bucketAuto` boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketGranularity {
    /// Renard R5.
    R5,
    /// Renard R10.
    R10,
    /// Renard R20.
    R20,
    /// Renard R40.
    R40,
    /// Renard R80.
    R80,
    /// 1-2-5 series.
    Series125,
    /// E6.
    E6,
    /// E12.
    E12,
    /// E24.
    E24,
    /// E48.
    E48,
    /// E96.
    E96,
    /// E192.
    E192,
    /// Powers of two.
    PowersOf2,
}

impl BucketGranularity {
    /// The server name of the series.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::R5 => "R5",
            Self::R10 => "R10",
            Self::R20 => "R20",
            Self::R40 => "R40",
            Self::R80 => "R80",
            Self::Series125 => "1-2-5",
            Self::E6 => "E6",
            Self::E12 => "E12",
            Self::E24 => "E24",
            Self::E48 => "E48",
            Self::E96 => "E96",
            Self::E192 => "E192",
            Self::PowersOf2 => "POWERSOF2",
        }
    }
}

/// Options of a `$bucketAuto` stage.
#[derive(Debug, Clone, Copy, Default)]
pub struct BucketAutoOptions {
    /// Boundary series.
    pub granularity: Option<BucketGranularity>,
}

impl BucketAutoOptions {
    /// Use a preferred number series.
    pub fn granularity(granularity: BucketGranularity) -> Self {
        Self {
            granularity: Some(granularity),
        }
    }
}

enum BucketOutput<TIn, TValue, TOut> {
    Default,
    Projection(ProjectionDefinition<Grouping<TValue, TIn>, TOut>),
    Expression(ExpressionRef),
}

impl<TIn, TValue, TOut: 'static> BucketOutput<TIn, TValue, TOut> {
    /// Render the output document against a grouping of the input.
    fn render(
        &self,
        operator: &str,
        key: SerializerRef,
        context: &RenderContext,
    ) -> RenderResult<Option<(Document, SerializerRef)>> {
        let element = context.document_serializer().clone();
        let grouping = context.with_document_serializer(GroupingSerializer::new(key, element));
        let rendered = match self {
            Self::Default => return Ok(None),
            Self::Projection(projection) => projection.render(&grouping)?,
            Self::Expression(expression) => context
                .translator(expression.as_ref())?
                .translate_projection(expression.as_ref(), &grouping)?,
        };
        let client_side = rendered.is_client_side();
        match rendered.document {
            Some(document) if !client_side => Ok(Some((document, rendered.output_serializer))),
            _ => Err(RenderError::client_side_projection(operator)),
        }
    }
}

fn result_serializer(type_name: &str, id: SerializerRef) -> SerializerRef {
    DocumentSerializer::builder(type_name)
        .member_as("id", "_id", id)
        .member("count", ScalarSerializer::int64())
        .build()
}

fn auto_id_serializer(value: SerializerRef) -> SerializerRef {
    DocumentSerializer::builder("AggregateBucketAutoResultId")
        .member("min", value.clone())
        .member("max", value)
        .build()
}

fn bucket_stage<TIn: 'static, TValue: 'static, TOut: 'static>(
    group_by: AggregateExpressionDefinition<TIn, TValue>,
    boundaries: Vec<Bson>,
    options: BucketOptions,
    output: BucketOutput<TIn, TValue, TOut>,
) -> RenderResult<PipelineStageDefinition<TIn, TOut>> {
    if boundaries.len() < 2 {
        return Err(RenderError::invalid_argument(
            "$bucket needs at least two boundaries",
        ));
    }
    Ok(PipelineStageDefinition::new("$bucket", move |context| {
        context.ensure_server_side("$bucket")?;
        let key = context.serializer_for::<TValue>();
        let boundaries = boundaries
            .iter()
            .map(|b| key.serialize_value(b))
            .collect::<RenderResult<Vec<_>>>()?;

        let mut body = doc! { "groupBy": group_by.render(context)?, "boundaries": boundaries };
        if let Some(default_bucket) = &options.default_bucket {
            body.insert("default", default_bucket.clone());
        }
        let output_serializer = match output.render("$bucket", key.clone(), context)? {
            Some((document, serializer)) => {
                body.insert("output", document);
                serializer
            }
            None => result_serializer("AggregateBucketResult", key),
        };
        Ok(RenderedPipelineStage::single(
            "$bucket",
            doc! { "$bucket": body },
            output_serializer,
        ))
    }))
}

fn bucket_auto_stage<TIn: 'static, TValue: 'static, TOut: 'static>(
    group_by: AggregateExpressionDefinition<TIn, TValue>,
    buckets: i32,
    options: BucketAutoOptions,
    output: BucketOutput<TIn, TValue, TOut>,
) -> RenderResult<PipelineStageDefinition<TIn, TOut>> {
    if buckets <= 0 {
        return Err(RenderError::invalid_argument(format!(
            "buckets must be greater than zero, got {}",
            buckets
        )));
    }
    Ok(PipelineStageDefinition::new("$bucketAuto", move |context| {
        context.ensure_server_side("$bucketAuto")?;
        let key = auto_id_serializer(context.serializer_for::<TValue>());

        let mut body = doc! { "groupBy": group_by.render(context)?, "buckets": buckets };
        if let Some(granularity) = options.granularity {
            body.insert("granularity", granularity.as_str());
        }
        let output_serializer = match output.render("$bucketAuto", key.clone(), context)? {
            Some((document, serializer)) => {
                body.insert("output", document);
                serializer
            }
            None => result_serializer("AggregateBucketAutoResult", key),
        };
        Ok(RenderedPipelineStage::single(
            "$bucketAuto",
            doc! { "$bucketAuto": body },
            output_serializer,
        ))
    }))
}

/// `$bucket` with the default `{ _id, count }` output.
pub fn bucket<TIn: 'static, TValue: 'static>(
    group_by: AggregateExpressionDefinition<TIn, TValue>,
    boundaries: Vec<Bson>,
    options: BucketOptions,
) -> RenderResult<PipelineStageDefinition<TIn, Document>> {
    bucket_stage(group_by, boundaries, options, BucketOutput::Default)
}

/// `$bucket` with an output projection over each bucket.
pub fn bucket_with_output<TIn: 'static, TValue: 'static, TOut: 'static>(
    group_by: AggregateExpressionDefinition<TIn, TValue>,
    boundaries: Vec<Bson>,
    output: ProjectionDefinition<Grouping<TValue, TIn>, TOut>,
    options: BucketOptions,
) -> RenderResult<PipelineStageDefinition<TIn, TOut>> {
    bucket_stage(group_by, boundaries, options, BucketOutput::Projection(output))
}

/// `$bucket` whose output is a native expression translated at render time.
pub fn bucket_with_output_expression<TIn: 'static, TValue: 'static, TOut: 'static>(
    group_by: AggregateExpressionDefinition<TIn, TValue>,
    boundaries: Vec<Bson>,
    output: ExpressionRef,
    options: BucketOptions,
) -> RenderResult<PipelineStageDefinition<TIn, TOut>> {
    bucket_stage(group_by, boundaries, options, BucketOutput::Expression(output))
}

/// `$bucketAuto` with the default `{ _id: { min, max }, count }` output.
pub fn bucket_auto<TIn: 'static, TValue: 'static>(
    group_by: AggregateExpressionDefinition<TIn, TValue>,
    buckets: i32,
    options: BucketAutoOptions,
) -> RenderResult<PipelineStageDefinition<TIn, Document>> {
    bucket_auto_stage(group_by, buckets, options, BucketOutput::Default)
}

/// `$bucketAuto` with an output projection over each bucket.
pub fn bucket_auto_with_output<TIn: 'static, TValue: 'static, TOut: 'static>(
    group_by: AggregateExpressionDefinition<TIn, TValue>,
    buckets: i32,
    output: ProjectionDefinition<Grouping<TValue, TIn>, TOut>,
    options: BucketAutoOptions,
) -> RenderResult<PipelineStageDefinition<TIn, TOut>> {
    bucket_auto_stage(group_by, buckets, options, BucketOutput::Projection(output))
}

/// `$bucketAuto` whose output is a native expression translated at render time.
pub fn bucket_auto_with_output_expression<TIn: 'static, TValue: 'static, TOut: 'static>(
    group_by: AggregateExpressionDefinition<TIn, TValue>,
    buckets: i32,
    output: ExpressionRef,
    options: BucketAutoOptions,
) -> RenderResult<PipelineStageDefinition<TIn, TOut>> {
    bucket_auto_stage(group_by, buckets, options, BucketOutput::Expression(output))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ExpressionTranslator, NativeExpression};
    use crate::expression::accumulators;
    use crate::field::RenderedField;
    use crate::projection::RenderedProjection;
    use crate::stages::tests::{Person, context};
    use pretty_assertions::assert_eq;
    use std::any::Any;
    use std::sync::Arc;

    #[derive(Debug)]
    struct CountPerBucket;

    impl NativeExpression for CountPerBucket {
        fn describe(&self) -> String {
            "g => new { Count = g.Count() }".to_string()
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[derive(Debug)]
    struct KeyEchoTranslator;

    impl ExpressionTranslator for KeyEchoTranslator {
        fn translate_filter(
            &self,
            _expression: &dyn NativeExpression,
            _context: &RenderContext,
        ) -> RenderResult<Document> {
            Ok(Document::new())
        }

        fn translate_field(
            &self,
            _expression: &dyn NativeExpression,
            _context: &RenderContext,
        ) -> RenderResult<RenderedField> {
            Err(RenderError::translation("no fields"))
        }

        fn translate_projection(
            &self,
            _expression: &dyn NativeExpression,
            context: &RenderContext,
        ) -> RenderResult<RenderedProjection> {
            let key = context.document_serializer().type_name().to_string();
            Ok(RenderedProjection {
                document: Some(doc! { "count": { "$sum": 1 }, "grouping": key }),
                output_serializer: context.document_serializer().clone(),
            })
        }

        fn translate_expression(
            &self,
            _expression: &dyn NativeExpression,
            _context: &RenderContext,
        ) -> RenderResult<Bson> {
            Ok(Bson::Null)
        }
    }

    #[test]
    fn test_bucket_default_output() {
        let stage = bucket::<Person, i32>(
            AggregateExpressionDefinition::field("age"),
            vec![Bson::Int32(0), Bson::Int32(18), Bson::Int32(65)],
            BucketOptions::default_bucket("other"),
        )
        .unwrap();
        let rendered = stage.render(&context()).unwrap();
        assert_eq!(
            rendered.documents,
            vec![doc! { "$bucket": {
                "groupBy": "$age",
                "boundaries": [0, 18, 65],
                "default": "other",
            } }]
        );
        assert_eq!(rendered.output_serializer.type_name(), "AggregateBucketResult");
    }

    #[test]
    fn test_bucket_with_output_projection() {
        let output = ProjectionDefinition::<Grouping<i32, Person>, Document>::from_document(
            doc! { "n": accumulators::count() },
        );
        let stage = bucket_with_output::<Person, i32, Document>(
            AggregateExpressionDefinition::field("age"),
            vec![Bson::Int32(0), Bson::Int32(100)],
            output,
            BucketOptions::default(),
        )
        .unwrap();
        let rendered = stage.render(&context()).unwrap();
        assert_eq!(
            rendered.documents[0].get_document("$bucket").unwrap().get_document("output").unwrap(),
            &doc! { "n": { "$sum": 1 } }
        );
    }

    #[test]
    fn test_bucket_validation() {
        assert!(
            bucket::<Person, i32>(
                AggregateExpressionDefinition::field("age"),
                vec![Bson::Int32(0)],
                BucketOptions::default(),
            )
            .is_err()
        );
        assert!(
            bucket_auto::<Person, i32>(
                AggregateExpressionDefinition::field("age"),
                0,
                BucketAutoOptions::default(),
            )
            .unwrap_err()
            .is_invalid_argument()
        );
    }

    #[test]
    fn test_bucket_auto_with_granularity() {
        let stage = bucket_auto::<Person, i32>(
            AggregateExpressionDefinition::field("age"),
            4,
            BucketAutoOptions::granularity(BucketGranularity::Series125),
        )
        .unwrap();
        assert_eq!(
            stage.render(&context()).unwrap().documents,
            vec![doc! { "$bucketAuto": {
                "groupBy": "$age",
                "buckets": 4,
                "granularity": "1-2-5",
            } }]
        );
    }

    #[test]
    fn test_output_expression_translated_against_grouping() {
        let stage = bucket_auto_with_output_expression::<Person, i32, Document>(
            AggregateExpressionDefinition::field("age"),
            2,
            Arc::new(CountPerBucket),
            BucketAutoOptions::default(),
        )
        .unwrap();

        assert!(stage.render(&context()).is_err());

        let ctx = context().with_translator(Arc::new(KeyEchoTranslator));
        let rendered = stage.render(&ctx).unwrap();
        let output = rendered.documents[0]
            .get_document("$bucketAuto")
            .unwrap()
            .get_document("output")
            .unwrap()
            .clone();
        assert_eq!(
            output,
            doc! { "count": { "$sum": 1 }, "grouping": "Grouping<AggregateBucketAutoResultId, Person>" }
        );
    }
}
