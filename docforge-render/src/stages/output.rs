//! Terminal stages: `$out` and `$merge`.

use bson::{Bson, Document, doc};

use crate::error::{RenderError, RenderResult};
use crate::namespace::CollectionNamespace;
use crate::pipeline::{PipelineDefinition, PipelineStageDefinition, RenderedPipelineStage};

/// Bucketing granularity of a time-series collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeSeriesGranularity {
    /// Seconds.
    Seconds,
    /// Minutes.
    Minutes,
    /// Hours.
    Hours,
}

impl TimeSeriesGranularity {
    fn as_str(self) -> &'static str {
        match self {
            Self::Seconds => "seconds",
            Self::Minutes => "minutes",
            Self::Hours => "hours",
        }
    }
}

/// Options of a time-series output collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeSeriesOptions {
    /// Field holding the measurement time.
    pub time_field: String,
    /// Field holding the series metadata.
    pub meta_field: Option<String>,
    /// Bucketing granularity.
    pub granularity: Option<TimeSeriesGranularity>,
}

impl TimeSeriesOptions {
    /// Create options for a time field.
    pub fn new(time_field: impl Into<String>) -> Self {
        Self {
            time_field: time_field.into(),
            meta_field: None,
            granularity: None,
        }
    }

    /// Set the metadata field.
    pub fn meta_field(mut self, field: impl Into<String>) -> Self {
        self.meta_field = Some(field.into());
        self
    }

    /// Set the granularity.
    pub fn granularity(mut self, granularity: TimeSeriesGranularity) -> Self {
        self.granularity = Some(granularity);
        self
    }

    /// Render the options document.
    pub fn to_document(&self) -> Document {
        let mut document = doc! { "timeField": self.time_field.as_str() };
        if let Some(meta_field) = &self.meta_field {
            document.insert("metaField", meta_field.as_str());
        }
        if let Some(granularity) = self.granularity {
            document.insert("granularity", granularity.as_str());
        }
        document
    }
}

/// `$out` into a collection, replacing its contents.
pub fn out<T>(
    collection: CollectionNamespace,
    time_series: Option<TimeSeriesOptions>,
) -> PipelineStageDefinition<T, T> {
    PipelineStageDefinition::new("$out", move |context| {
        context.ensure_server_side("$out")?;
        let mut target = doc! {
            "db": collection.database_name(),
            "coll": collection.collection_name(),
        };
        if let Some(time_series) = &time_series {
            target.insert("timeseries", time_series.to_document());
        }
        Ok(RenderedPipelineStage::single(
            "$out",
            doc! { "$out": target },
            context.document_serializer().clone(),
        ))
    })
}

/// Action when a merged document matches an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeAction {
    /// Replace the existing document.
    Replace,
    /// Keep the existing document.
    KeepExisting,
    /// Merge fields into the existing document.
    Merge,
    /// Fail the operation.
    Fail,
    /// Update the existing document with the `when_matched_pipeline`.
    Pipeline,
}

impl MergeAction {
    fn as_str(self) -> &'static str {
        match self {
            Self::Replace => "replace",
            Self::KeepExisting => "keepExisting",
            Self::Merge => "merge",
            Self::Fail => "fail",
            Self::Pipeline => "pipeline",
        }
    }
}

/// Action when a merged document matches nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeNotMatchedAction {
    /// Insert the new document.
    Insert,
    /// Discard the document.
    Discard,
    /// Fail the operation.
    Fail,
}

impl MergeNotMatchedAction {
    fn as_str(self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Discard => "discard",
            Self::Fail => "fail",
        }
    }
}

/// Options of a `$merge` stage writing `TOut` documents.
pub struct MergeStageOptions<TOut> {
    /// Fields identifying a matching document.
    pub on: Vec<String>,
    /// Variables visible to the `when_matched_pipeline`.
    pub let_variables: Option<Document>,
    /// Action on match.
    pub when_matched: Option<MergeAction>,
    /// Pipeline applied on match when `when_matched` is [`MergeAction::Pipeline`].
    pub when_matched_pipeline: Option<PipelineDefinition<TOut, TOut>>,
    /// Action without a match.
    pub when_not_matched: Option<MergeNotMatchedAction>,
}

impl<TOut> Default for MergeStageOptions<TOut> {
    fn default() -> Self {
        Self {
            on: Vec::new(),
            let_variables: None,
            when_matched: None,
            when_matched_pipeline: None,
            when_not_matched: None,
        }
    }
}

impl<TOut> MergeStageOptions<TOut> {
    /// Create empty merge options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Match on these fields.
    pub fn on<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.on = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Set the `let` variables.
    pub fn let_variables(mut self, variables: Document) -> Self {
        self.let_variables = Some(variables);
        self
    }

    /// Set the match action.
    pub fn when_matched(mut self, action: MergeAction) -> Self {
        self.when_matched = Some(action);
        self
    }

    /// Update matches with a pipeline; also sets the match action.
    pub fn when_matched_pipeline(mut self, pipeline: PipelineDefinition<TOut, TOut>) -> Self {
        self.when_matched = Some(MergeAction::Pipeline);
        self.when_matched_pipeline = Some(pipeline);
        self
    }

    /// Set the no-match action.
    pub fn when_not_matched(mut self, action: MergeNotMatchedAction) -> Self {
        self.when_not_matched = Some(action);
        self
    }

    fn validate(&self) -> RenderResult<()> {
        let pipeline_action = self.when_matched == Some(MergeAction::Pipeline);
        if self.let_variables.is_some() && !pipeline_action {
            return Err(RenderError::invalid_argument(
                "let variables can only be set when whenMatched is a pipeline",
            ));
        }
        match (&self.when_matched_pipeline, pipeline_action) {
            (None, true) => Err(RenderError::invalid_argument(
                "a whenMatched pipeline is required when whenMatched is a pipeline",
            )),
            (Some(_), false) => Err(RenderError::invalid_argument(
                "a whenMatched pipeline can only be set when whenMatched is a pipeline",
            )),
            _ => Ok(()),
        }
    }
}

/// `$merge` into a collection of `TOut` documents.
pub fn merge<TIn, TOut: 'static>(
    into: CollectionNamespace,
    options: MergeStageOptions<TOut>,
) -> RenderResult<PipelineStageDefinition<TIn, TOut>> {
    options.validate()?;

    Ok(PipelineStageDefinition::new("$merge", move |context| {
        context.ensure_server_side("$merge")?;
        let output = context.with_document_type::<TOut>();

        let mut body = doc! {
            "into": { "db": into.database_name(), "coll": into.collection_name() },
        };
        match options.on.as_slice() {
            [] => {}
            [single] => {
                body.insert("on", single.as_str());
            }
            many => {
                body.insert("on", many.iter().map(|f| Bson::String(f.clone())).collect::<Vec<_>>());
            }
        }
        if let Some(let_variables) = &options.let_variables {
            body.insert("let", let_variables.clone());
        }
        match (options.when_matched, &options.when_matched_pipeline) {
            (Some(MergeAction::Pipeline), Some(pipeline)) => {
                body.insert("whenMatched", pipeline.render(&output)?.documents);
            }
            (Some(action), _) => {
                body.insert("whenMatched", action.as_str());
            }
            (None, _) => {}
        }
        if let Some(action) = options.when_not_matched {
            body.insert("whenNotMatched", action.as_str());
        }

        Ok(RenderedPipelineStage::single(
            "$merge",
            doc! { "$merge": body },
            output.document_serializer().clone(),
        ))
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespace::DatabaseNamespace;
    use crate::pipeline::RenderedPipeline;
    use crate::stages::tests::{Person, context};
    use pretty_assertions::assert_eq;

    fn target() -> CollectionNamespace {
        DatabaseNamespace::new("shop").unwrap().collection("totals").unwrap()
    }

    #[test]
    fn test_out_with_time_series() {
        let stage = out::<Person>(
            target(),
            Some(
                TimeSeriesOptions::new("at")
                    .meta_field("sensor")
                    .granularity(TimeSeriesGranularity::Minutes),
            ),
        );
        assert_eq!(
            stage.render(&context()).unwrap().documents,
            vec![doc! { "$out": {
                "db": "shop",
                "coll": "totals",
                "timeseries": { "timeField": "at", "metaField": "sensor", "granularity": "minutes" },
            } }]
        );
    }

    #[test]
    fn test_merge_renders_options_in_order() {
        let options = MergeStageOptions::<Person>::new()
            .on(["_id"])
            .when_matched(MergeAction::KeepExisting)
            .when_not_matched(MergeNotMatchedAction::Insert);
        let stage = merge::<Person, Person>(target(), options).unwrap();
        let rendered = stage.render(&context()).unwrap();
        assert_eq!(
            rendered.documents,
            vec![doc! { "$merge": {
                "into": { "db": "shop", "coll": "totals" },
                "on": "_id",
                "whenMatched": "keepExisting",
                "whenNotMatched": "insert",
            } }]
        );

        let pipeline = RenderedPipeline {
            documents: rendered.documents,
            output_serializer: rendered.output_serializer,
        };
        let db = DatabaseNamespace::new("other").unwrap();
        assert_eq!(pipeline.output_namespace(0, &db).unwrap(), target());
    }

    #[test]
    fn test_merge_pipeline_with_let() {
        let update = PipelineDefinition::<Person, Person>::from_documents([
            doc! { "$set": { "n": "$$new.n" } },
        ])
        .unwrap();
        let options = MergeStageOptions::<Person>::new()
            .on(["a", "b"])
            .let_variables(doc! { "new": "$$ROOT" })
            .when_matched_pipeline(update);
        let stage = merge::<Person, Person>(target(), options).unwrap();
        assert_eq!(
            stage.render(&context()).unwrap().documents,
            vec![doc! { "$merge": {
                "into": { "db": "shop", "coll": "totals" },
                "on": ["a", "b"],
                "let": { "new": "$$ROOT" },
                "whenMatched": [ { "$set": { "n": "$$new.n" } } ],
            } }]
        );
    }

    #[test]
    fn test_merge_validation() {
        let options = MergeStageOptions::<Person>::new()
            .let_variables(doc! {})
            .when_matched(MergeAction::Merge);
        assert!(merge::<Person, Person>(target(), options).unwrap_err().is_invalid_argument());

        let options = MergeStageOptions::<Person>::new().when_matched(MergeAction::Pipeline);
        assert!(merge::<Person, Person>(target(), options).is_err());

        let mut options = MergeStageOptions::<Person>::new()
            .when_matched_pipeline(PipelineDefinition::new());
        options.when_matched = Some(MergeAction::Replace);
        assert!(merge::<Person, Person>(target(), options).is_err());
    }
}
