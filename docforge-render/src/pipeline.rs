//! Pipeline stages and pipelines.
//!
//! A stage is a render closure from an input document type to an output
//! document type. A pipeline chains stages, threading each stage's output
//! serializer into the context of the next one.
//!
//! ```rust,ignore
//! use docforge_render::pipeline::PipelineDefinition;
//! use docforge_render::stages;
//!
//! let pipeline = PipelineDefinition::<Order, Order>::new()
//!     .append(stages::match_stage(FilterDefinition::eq("status", "paid")))
//!     .append(stages::sort(SortDefinition::descending("total")))
//!     .append(stages::limit(10)?);
//! ```

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use bson::{Bson, Document};

use crate::context::RenderContext;
use crate::error::{RenderError, RenderResult};
use crate::namespace::{CollectionNamespace, DatabaseNamespace};
use crate::serializer::SerializerRef;

/// Input type of pipelines that generate their own documents (`$documents`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoPipelineInput;

/// A rendered stage: zero or more stage documents plus the output serializer.
#[derive(Debug, Clone)]
pub struct RenderedPipelineStage {
    /// Stage operator, e.g. `$match`.
    pub operator_name: String,
    /// Stage documents; empty when the stage renders to nothing.
    pub documents: Vec<Document>,
    /// Serializer of the documents leaving the stage.
    pub output_serializer: SerializerRef,
}

impl RenderedPipelineStage {
    /// A stage rendered to a single document.
    pub fn single(
        operator_name: impl Into<String>,
        document: Document,
        output_serializer: SerializerRef,
    ) -> Self {
        Self {
            operator_name: operator_name.into(),
            documents: vec![document],
            output_serializer,
        }
    }
}

pub(crate) type StageRenderer =
    Arc<dyn Fn(&RenderContext) -> RenderResult<RenderedPipelineStage> + Send + Sync>;

#[derive(Clone)]
struct StageEntry {
    operator_name: String,
    renderer: StageRenderer,
}

impl fmt::Debug for StageEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.operator_name)
    }
}

/// A stage taking `TIn` documents and producing `TOut` documents.
pub struct PipelineStageDefinition<TIn, TOut> {
    entry: StageEntry,
    _marker: PhantomData<fn(TIn) -> TOut>,
}

impl<TIn, TOut> PipelineStageDefinition<TIn, TOut> {
    /// Create a stage from its render closure.
    pub fn new<F>(operator_name: impl Into<String>, renderer: F) -> Self
    where
        F: Fn(&RenderContext) -> RenderResult<RenderedPipelineStage> + Send + Sync + 'static,
    {
        Self {
            entry: StageEntry {
                operator_name: operator_name.into(),
                renderer: Arc::new(renderer),
            },
            _marker: PhantomData,
        }
    }

    /// The stage operator.
    pub fn operator_name(&self) -> &str {
        &self.entry.operator_name
    }

    /// Render the stage against the input context.
    pub fn render(&self, context: &RenderContext) -> RenderResult<RenderedPipelineStage> {
        (self.entry.renderer)(context)
    }
}

impl<TIn, TOut: 'static> PipelineStageDefinition<TIn, TOut> {
    /// A stage given as a raw document; its operator is the document's first key.
    pub fn from_document(document: Document) -> RenderResult<Self> {
        let operator_name = document
            .keys()
            .next()
            .filter(|k| k.starts_with('$'))
            .cloned()
            .ok_or_else(|| {
                RenderError::invalid_argument("a stage document must start with an operator")
            })?;
        let name = operator_name.clone();
        Ok(Self::new(operator_name, move |context| {
            context.ensure_server_side(&name)?;
            Ok(RenderedPipelineStage::single(
                name.clone(),
                document.clone(),
                context.serializer_for::<TOut>(),
            ))
        }))
    }
}

impl<TIn, TOut> Clone for PipelineStageDefinition<TIn, TOut> {
    fn clone(&self) -> Self {
        Self {
            entry: self.entry.clone(),
            _marker: PhantomData,
        }
    }
}

impl<TIn, TOut> fmt::Debug for PipelineStageDefinition<TIn, TOut> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PipelineStageDefinition")
            .field(&self.entry.operator_name)
            .finish()
    }
}

/// A rendered pipeline.
#[derive(Debug, Clone)]
pub struct RenderedPipeline {
    /// Stage documents in order.
    pub documents: Vec<Document>,
    /// Serializer of the pipeline output.
    pub output_serializer: SerializerRef,
}

fn is_terminal(stage: &Document) -> bool {
    matches!(stage.keys().next().map(String::as_str), Some("$out" | "$merge"))
}

impl RenderedPipeline {
    /// Indexes of all `$out`/`$merge` stages.
    pub fn terminal_stage_indexes(&self) -> Vec<usize> {
        self.documents
            .iter()
            .enumerate()
            .filter(|(_, stage)| is_terminal(stage))
            .map(|(i, _)| i)
            .collect()
    }

    /// Index of the single terminal stage, failing when there are several.
    pub fn terminal_stage_index(&self) -> RenderResult<Option<usize>> {
        let indexes = self.terminal_stage_indexes();
        match indexes.as_slice() {
            [] => Ok(None),
            [index] => Ok(Some(*index)),
            _ => Err(RenderError::invalid_argument(
                "a pipeline can contain at most one $out or $merge stage",
            )),
        }
    }

    /// Whether the pipeline writes to a collection.
    pub fn has_terminal_stage(&self) -> bool {
        self.documents.iter().any(is_terminal)
    }

    /// The namespace written by the stage at `index`.
    ///
    /// `database` resolves output collections given without a database.
    pub fn output_namespace(
        &self,
        index: usize,
        database: &DatabaseNamespace,
    ) -> RenderResult<CollectionNamespace> {
        let stage = self
            .documents
            .get(index)
            .ok_or_else(|| RenderError::invalid_argument(format!("no stage at {}", index)))?;

        let target = match (stage.get("$out"), stage.get("$merge")) {
            (Some(out), _) => out,
            (None, Some(Bson::Document(merge))) => merge.get("into").ok_or_else(|| {
                RenderError::invalid_argument("$merge stage is missing 'into'")
            })?,
            (None, Some(into)) => into,
            (None, None) => {
                return Err(RenderError::invalid_argument(format!(
                    "stage {} does not write to a collection",
                    index
                )));
            }
        };

        match target {
            Bson::String(collection) => database.collection(collection.as_str()),
            Bson::Document(target) => {
                let db = match target.get_str("db") {
                    Ok(db) => DatabaseNamespace::new(db)?,
                    Err(_) => database.clone(),
                };
                let coll = target.get_str("coll").map_err(|_| {
                    RenderError::invalid_argument("output target is missing 'coll'")
                })?;
                db.collection(coll)
            }
            other => Err(RenderError::invalid_argument(format!(
                "unsupported output target {}",
                other
            ))),
        }
    }
}

/// A pipeline from `TIn` documents to `TOut` documents.
pub struct PipelineDefinition<TIn, TOut> {
    stages: Vec<StageEntry>,
    _marker: PhantomData<fn(TIn) -> TOut>,
}

impl<T> PipelineDefinition<T, T> {
    /// An empty pipeline.
    pub fn new() -> Self {
        Self {
            stages: Vec::new(),
            _marker: PhantomData,
        }
    }
}

impl<T> Default for PipelineDefinition<T, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<TIn, TOut> PipelineDefinition<TIn, TOut> {
    /// Append a stage.
    pub fn append<TNext>(
        self,
        stage: PipelineStageDefinition<TOut, TNext>,
    ) -> PipelineDefinition<TIn, TNext> {
        let mut stages = self.stages;
        stages.push(stage.entry);
        PipelineDefinition {
            stages,
            _marker: PhantomData,
        }
    }

    /// Operators of the stages, in order.
    pub fn operator_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.operator_name.as_str()).collect()
    }

    /// Number of stages.
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Whether the pipeline has no stages.
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Render every stage, threading output serializers through.
    pub fn render(&self, context: &RenderContext) -> RenderResult<RenderedPipeline> {
        let mut current = context.clone();
        let mut documents = Vec::new();

        for (index, stage) in self.stages.iter().enumerate() {
            if index > 0 && stage.operator_name == "$documents" {
                return Err(RenderError::invalid_argument(
                    "$documents must be the first stage of a pipeline",
                ));
            }
            let rendered = (stage.renderer)(&current)?;
            documents.extend(rendered.documents);
            current = current.with_document_serializer(rendered.output_serializer);
        }

        tracing::trace!(stages = documents.len(), "rendered pipeline");

        Ok(RenderedPipeline {
            documents,
            output_serializer: current.document_serializer().clone(),
        })
    }
}

impl<TIn, TOut: 'static> PipelineDefinition<TIn, TOut> {
    /// A pipeline given as raw stage documents.
    pub fn from_documents(documents: impl IntoIterator<Item = Document>) -> RenderResult<Self> {
        let stages = documents
            .into_iter()
            .map(|d| PipelineStageDefinition::<TOut, TOut>::from_document(d).map(|s| s.entry))
            .collect::<RenderResult<Vec<_>>>()?;
        Ok(Self {
            stages,
            _marker: PhantomData,
        })
    }
}

impl<TIn, TOut> Clone for PipelineDefinition<TIn, TOut> {
    fn clone(&self) -> Self {
        Self {
            stages: self.stages.clone(),
            _marker: PhantomData,
        }
    }
}

impl<TIn, TOut> fmt::Debug for PipelineDefinition<TIn, TOut> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.stages.iter()).finish()
    }
}

impl<TIn, TOut> From<PipelineStageDefinition<TIn, TOut>> for PipelineDefinition<TIn, TOut> {
    fn from(stage: PipelineStageDefinition<TIn, TOut>) -> Self {
        Self {
            stages: vec![stage.entry],
            _marker: PhantomData,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SerializerRegistry;
    use crate::serializer::{BsonValueSerializer, ClientSideProjectionSerializer};
    use bson::doc;

    fn context() -> RenderContext {
        RenderContext::new(BsonValueSerializer::shared(), Arc::new(SerializerRegistry::new()))
    }

    fn db() -> DatabaseNamespace {
        DatabaseNamespace::new("shop").unwrap()
    }

    #[test]
    fn test_from_documents() {
        let pipeline = PipelineDefinition::<Document, Document>::from_documents([
            doc! { "$match": { "a": 1 } },
            doc! { "$limit": 5 },
        ])
        .unwrap();
        assert_eq!(pipeline.operator_names(), vec!["$match", "$limit"]);
        let rendered = pipeline.render(&context()).unwrap();
        assert_eq!(rendered.documents.len(), 2);
        assert!(!rendered.has_terminal_stage());
    }

    #[test]
    fn test_stage_document_requires_operator() {
        assert!(PipelineStageDefinition::<Document, Document>::from_document(doc! { "a": 1 }).is_err());
    }

    #[test]
    fn test_output_namespace_forms() {
        let rendered = RenderedPipeline {
            documents: vec![
                doc! { "$out": "archive" },
                doc! { "$out": { "db": "other", "coll": "archive" } },
                doc! { "$merge": { "into": "totals", "on": "_id" } },
                doc! { "$merge": "plain" },
            ],
            output_serializer: BsonValueSerializer::shared(),
        };
        assert_eq!(rendered.output_namespace(0, &db()).unwrap().full_name(), "shop.archive");
        assert_eq!(rendered.output_namespace(1, &db()).unwrap().full_name(), "other.archive");
        assert_eq!(rendered.output_namespace(2, &db()).unwrap().full_name(), "shop.totals");
        assert_eq!(rendered.output_namespace(3, &db()).unwrap().full_name(), "shop.plain");
        assert!(rendered.terminal_stage_index().is_err());
    }

    #[test]
    fn test_raw_stage_rejects_client_side_input() {
        let stage = PipelineStageDefinition::<Document, Document>::from_document(
            doc! { "$match": {} },
        )
        .unwrap();
        let ctx = context().with_document_serializer(ClientSideProjectionSerializer::wrap(
            "Projected",
            BsonValueSerializer::shared(),
        ));
        assert!(stage.render(&ctx).unwrap_err().is_client_side_evaluation());
    }
}
