//! Projection definitions.

use std::fmt;
use std::marker::PhantomData;

use bson::{Bson, Document, doc};

use crate::context::{ExpressionRef, RenderContext};
use crate::error::RenderResult;
use crate::field::{FieldDefinition, FieldSpec};
use crate::filter::{FilterDefinition, FilterKind};
use crate::serializer::SerializerRef;

/// A rendered projection.
#[derive(Debug, Clone)]
pub struct RenderedProjection {
    /// The projection document; `None` when nothing is projected server side.
    pub document: Option<Document>,
    /// Serializer of the projected output.
    pub output_serializer: SerializerRef,
}

impl RenderedProjection {
    /// Whether the output is computed on the client.
    pub fn is_client_side(&self) -> bool {
        self.output_serializer.is_client_side_projection()
    }
}

#[derive(Clone, Debug)]
pub(crate) enum ProjectionOperator {
    Include,
    Exclude,
    Slice { skip: Option<i64>, limit: i64 },
    ElemMatch(FilterKind),
    Meta(String),
    Computed(Bson),
}

#[derive(Clone, Debug)]
pub(crate) enum ProjectionKind {
    Document(Document),
    Fields(Vec<(FieldSpec, ProjectionOperator)>),
    Expression(ExpressionRef),
}

/// A projection from `TIn` documents to `TOut` values.
pub struct ProjectionDefinition<TIn, TOut = Document> {
    kind: ProjectionKind,
    output_serializer: Option<SerializerRef>,
    _marker: PhantomData<fn(TIn) -> TOut>,
}

impl<TIn, TOut> ProjectionDefinition<TIn, TOut> {
    fn from_kind(kind: ProjectionKind) -> Self {
        Self {
            kind,
            output_serializer: None,
            _marker: PhantomData,
        }
    }

    /// A projection given as a raw document.
    pub fn from_document(document: Document) -> Self {
        Self::from_kind(ProjectionKind::Document(document))
    }

    /// A projection given as a native expression.
    pub fn from_expression(expression: ExpressionRef) -> Self {
        Self::from_kind(ProjectionKind::Expression(expression))
    }

    /// Use an explicit serializer for the output instead of the registered one.
    pub fn with_output_serializer(mut self, serializer: SerializerRef) -> Self {
        self.output_serializer = Some(serializer);
        self
    }

    /// Re-declare the output type.
    pub fn into_output<TNew>(self) -> ProjectionDefinition<TIn, TNew> {
        ProjectionDefinition {
            kind: self.kind,
            output_serializer: self.output_serializer,
            _marker: PhantomData,
        }
    }

    /// Whether this projection is a native expression.
    pub fn is_expression(&self) -> bool {
        matches!(self.kind, ProjectionKind::Expression(_))
    }
}

impl<TIn, TOut: 'static> ProjectionDefinition<TIn, TOut> {
    /// Render the projection.
    pub fn render(&self, context: &RenderContext) -> RenderResult<RenderedProjection> {
        let output_serializer = || {
            self.output_serializer
                .clone()
                .unwrap_or_else(|| context.serializer_for::<TOut>())
        };

        match &self.kind {
            ProjectionKind::Document(document) => Ok(RenderedProjection {
                document: Some(document.clone()),
                output_serializer: output_serializer(),
            }),
            ProjectionKind::Fields(fields) => {
                let mut document = Document::new();
                for (field, operator) in fields {
                    let rendered = field.render(context)?;
                    let value = match operator {
                        ProjectionOperator::Include => Bson::Int32(1),
                        ProjectionOperator::Exclude => Bson::Int32(0),
                        ProjectionOperator::Slice { skip: None, limit } => {
                            Bson::Document(doc! { "$slice": *limit })
                        }
                        ProjectionOperator::Slice {
                            skip: Some(skip),
                            limit,
                        } => Bson::Document(doc! { "$slice": [*skip, *limit] }),
                        ProjectionOperator::ElemMatch(filter) => {
                            let item = rendered.item_serializer()?;
                            let inner = filter.render(&context.with_document_serializer(item))?;
                            Bson::Document(doc! { "$elemMatch": inner })
                        }
                        ProjectionOperator::Meta(meta) => {
                            Bson::Document(doc! { "$meta": meta.as_str() })
                        }
                        ProjectionOperator::Computed(expression) => expression.clone(),
                    };
                    document.insert(rendered.field_name, value);
                }
                Ok(RenderedProjection {
                    document: Some(document),
                    output_serializer: output_serializer(),
                })
            }
            ProjectionKind::Expression(expression) => {
                let rendered = context
                    .translator(expression.as_ref())?
                    .translate_projection(expression.as_ref(), context)?;
                match &self.output_serializer {
                    Some(serializer) => Ok(RenderedProjection {
                        document: rendered.document,
                        output_serializer: serializer.clone(),
                    }),
                    None => Ok(rendered),
                }
            }
        }
    }
}

impl<TIn> ProjectionDefinition<TIn, Document> {
    /// Start a field-by-field projection.
    pub fn fields() -> Self {
        Self::from_kind(ProjectionKind::Fields(Vec::new()))
    }

    fn push(mut self, field: FieldDefinition<TIn>, operator: ProjectionOperator) -> Self {
        let entry = (field.spec().clone(), operator);
        match &mut self.kind {
            ProjectionKind::Fields(fields) => fields.push(entry),
            _ => self.kind = ProjectionKind::Fields(vec![entry]),
        }
        self
    }

    /// Include a field.
    pub fn include(self, field: impl Into<FieldDefinition<TIn>>) -> Self {
        self.push(field.into(), ProjectionOperator::Include)
    }

    /// Exclude a field.
    pub fn exclude(self, field: impl Into<FieldDefinition<TIn>>) -> Self {
        self.push(field.into(), ProjectionOperator::Exclude)
    }

    /// Return the first `limit` items of an array (negative counts from the end).
    pub fn slice(self, field: impl Into<FieldDefinition<TIn>>, limit: i64) -> Self {
        self.push(field.into(), ProjectionOperator::Slice { skip: None, limit })
    }

    /// Return `limit` array items after skipping `skip`.
    pub fn slice_with_skip(
        self,
        field: impl Into<FieldDefinition<TIn>>,
        skip: i64,
        limit: i64,
    ) -> Self {
        self.push(
            field.into(),
            ProjectionOperator::Slice {
                skip: Some(skip),
                limit,
            },
        )
    }

    /// Return the first array item matching `filter`.
    pub fn elem_match<I>(
        self,
        field: impl Into<FieldDefinition<TIn>>,
        filter: FilterDefinition<I>,
    ) -> Self {
        self.push(field.into(), ProjectionOperator::ElemMatch(filter.into_kind()))
    }

    /// Project the text search score.
    pub fn meta_text_score(self, field: impl Into<FieldDefinition<TIn>>) -> Self {
        self.push(field.into(), ProjectionOperator::Meta("textScore".to_string()))
    }

    /// Project a computed aggregation expression.
    pub fn computed(
        self,
        field: impl Into<FieldDefinition<TIn>>,
        expression: impl Into<Bson>,
    ) -> Self {
        self.push(field.into(), ProjectionOperator::Computed(expression.into()))
    }
}

impl<TIn, TOut> Clone for ProjectionDefinition<TIn, TOut> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind.clone(),
            output_serializer: self.output_serializer.clone(),
            _marker: PhantomData,
        }
    }
}

impl<TIn, TOut> fmt::Debug for ProjectionDefinition<TIn, TOut> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProjectionDefinition")
            .field("kind", &self.kind)
            .field("output_serializer", &self.output_serializer)
            .finish()
    }
}

impl<TIn, TOut> From<Document> for ProjectionDefinition<TIn, TOut> {
    fn from(document: Document) -> Self {
        Self::from_document(document)
    }
}
