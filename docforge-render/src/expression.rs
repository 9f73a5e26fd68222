//! Aggregate expressions and accumulators.

use std::fmt;
use std::marker::PhantomData;

use bson::{Bson, Document};

use crate::context::{ExpressionRef, RenderContext};
use crate::error::RenderResult;
use crate::field::{FieldDefinition, FieldSpec};

#[derive(Clone, Debug)]
pub(crate) enum ExpressionKind {
    Value(Bson),
    Field(FieldSpec),
    Native(ExpressionRef),
}

/// An aggregation expression evaluated over `TSource`, producing `TResult`.
pub struct AggregateExpressionDefinition<TSource, TResult = Bson> {
    kind: ExpressionKind,
    _marker: PhantomData<fn(TSource) -> TResult>,
}

impl<TSource, TResult> AggregateExpressionDefinition<TSource, TResult> {
    fn from_kind(kind: ExpressionKind) -> Self {
        Self {
            kind,
            _marker: PhantomData,
        }
    }

    /// An expression given as a literal value or raw expression document.
    pub fn value(value: impl Into<Bson>) -> Self {
        Self::from_kind(ExpressionKind::Value(value.into()))
    }

    /// The value of a field (`"$field"`).
    pub fn field(field: impl Into<FieldDefinition<TSource>>) -> Self {
        let field: FieldDefinition<TSource> = field.into();
        Self::from_kind(ExpressionKind::Field(field.spec().clone()))
    }

    /// An expression translated from a native expression.
    pub fn from_expression(expression: ExpressionRef) -> Self {
        Self::from_kind(ExpressionKind::Native(expression))
    }

    /// Render the expression.
    pub fn render(&self, context: &RenderContext) -> RenderResult<Bson> {
        match &self.kind {
            ExpressionKind::Value(value) => Ok(value.clone()),
            ExpressionKind::Field(field) => {
                Ok(Bson::String(field.render(context)?.dollar_path()))
            }
            ExpressionKind::Native(expression) => context
                .translator(expression.as_ref())?
                .translate_expression(expression.as_ref(), context),
        }
    }

    /// Whether this is a native expression.
    pub fn is_native(&self) -> bool {
        matches!(self.kind, ExpressionKind::Native(_))
    }
}

impl<TSource, TResult> Clone for AggregateExpressionDefinition<TSource, TResult> {
    fn clone(&self) -> Self {
        Self::from_kind(self.kind.clone())
    }
}

impl<TSource, TResult> fmt::Debug for AggregateExpressionDefinition<TSource, TResult> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AggregateExpressionDefinition")
            .field(&self.kind)
            .finish()
    }
}

impl<TSource, TResult> From<Document> for AggregateExpressionDefinition<TSource, TResult> {
    fn from(document: Document) -> Self {
        Self::value(document)
    }
}

impl<TSource, TResult> From<&str> for AggregateExpressionDefinition<TSource, TResult> {
    /// Strings are literal expressions; `"$name"` therefore addresses a raw path.
    fn from(value: &str) -> Self {
        Self::value(value)
    }
}

/// Accumulators for `$group`, `$bucket` and `$bucketAuto` outputs.
pub mod accumulators {
    use bson::{Bson, doc};

    /// Sum accumulator.
    pub fn sum(expr: impl Into<Bson>) -> Bson {
        Bson::Document(doc! { "$sum": expr.into() })
    }

    /// Average accumulator.
    pub fn avg(expr: impl Into<Bson>) -> Bson {
        Bson::Document(doc! { "$avg": expr.into() })
    }

    /// Minimum accumulator.
    pub fn min(expr: impl Into<Bson>) -> Bson {
        Bson::Document(doc! { "$min": expr.into() })
    }

    /// Maximum accumulator.
    pub fn max(expr: impl Into<Bson>) -> Bson {
        Bson::Document(doc! { "$max": expr.into() })
    }

    /// First accumulator.
    pub fn first(expr: impl Into<Bson>) -> Bson {
        Bson::Document(doc! { "$first": expr.into() })
    }

    /// Last accumulator.
    pub fn last(expr: impl Into<Bson>) -> Bson {
        Bson::Document(doc! { "$last": expr.into() })
    }

    /// Push accumulator (creates array).
    pub fn push(expr: impl Into<Bson>) -> Bson {
        Bson::Document(doc! { "$push": expr.into() })
    }

    /// AddToSet accumulator (creates unique array).
    pub fn add_to_set(expr: impl Into<Bson>) -> Bson {
        Bson::Document(doc! { "$addToSet": expr.into() })
    }

    /// Merge documents into one.
    pub fn merge_objects(expr: impl Into<Bson>) -> Bson {
        Bson::Document(doc! { "$mergeObjects": expr.into() })
    }

    /// Count accumulator.
    pub fn count() -> Bson {
        Bson::Document(doc! { "$sum": 1 })
    }

    /// Standard deviation (population) accumulator.
    pub fn std_dev_pop(expr: impl Into<Bson>) -> Bson {
        Bson::Document(doc! { "$stdDevPop": expr.into() })
    }

    /// Standard deviation (sample) accumulator.
    pub fn std_dev_samp(expr: impl Into<Bson>) -> Bson {
        Bson::Document(doc! { "$stdDevSamp": expr.into() })
    }

    /// Top `n` values by `sort_by`.
    pub fn top_n(n: i64, sort_by: bson::Document, output: impl Into<Bson>) -> Bson {
        Bson::Document(doc! { "$topN": { "n": n, "sortBy": sort_by, "output": output.into() } })
    }
}
