//! `$densify` and `$setWindowFields`.

use std::collections::HashSet;

use bson::{Bson, Document, doc};

use crate::error::{RenderError, RenderResult};
use crate::expression::AggregateExpressionDefinition;
use crate::field::{FieldDefinition, TypedFieldDefinition};
use crate::field_type::{FieldKind, FieldType};
use crate::pipeline::{PipelineStageDefinition, RenderedPipelineStage};
use crate::sort::SortDefinition;

fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(v) => Some(f64::from(*v)),
        Bson::Int64(v) => Some(*v as f64),
        Bson::Double(v) => Some(*v),
        _ => None,
    }
}

/// Time unit of date densification and range windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DensifyTimeUnit {
    /// Milliseconds.
    Millisecond,
    /// Seconds.
    Second,
    /// Minutes.
    Minute,
    /// Hours.
    Hour,
    /// Days.
    Day,
    /// Weeks.
    Week,
    /// Months.
    Month,
    /// Quarters.
    Quarter,
    /// Years.
    Year,
}

impl DensifyTimeUnit {
    /// The server name of the unit.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Millisecond => "millisecond",
            Self::Second => "second",
            Self::Minute => "minute",
            Self::Hour => "hour",
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
            Self::Quarter => "quarter",
            Self::Year => "year",
        }
    }
}

/// Bounds of a densification.
#[derive(Debug, Clone, PartialEq)]
pub enum DensifyBounds {
    /// From the minimum to the maximum over all documents.
    Full,
    /// From the minimum to the maximum within each partition.
    Partition,
    /// An explicit `[lower, upper)` range.
    Range(Bson, Bson),
}

impl DensifyBounds {
    fn to_bson(&self) -> Bson {
        match self {
            Self::Full => Bson::String("full".to_string()),
            Self::Partition => Bson::String("partition".to_string()),
            Self::Range(lower, upper) => Bson::Array(vec![lower.clone(), upper.clone()]),
        }
    }
}

/// Range of values filled in by `$densify`.
#[derive(Debug, Clone, PartialEq)]
pub enum DensifyRange {
    /// Numeric values.
    Numeric {
        /// Bounds.
        bounds: DensifyBounds,
        /// Step between values.
        step: Bson,
    },
    /// Dates.
    DateTime {
        /// Bounds.
        bounds: DensifyBounds,
        /// Step between values, in `unit`.
        step: i64,
        /// Unit of `step`.
        unit: DensifyTimeUnit,
    },
}

impl DensifyRange {
    /// A numeric range; `step` must be positive and explicit bounds ordered.
    pub fn numeric(bounds: DensifyBounds, step: impl Into<Bson>) -> RenderResult<Self> {
        let step = step.into();
        match as_f64(&step) {
            Some(s) if s > 0.0 => {}
            _ => {
                return Err(RenderError::invalid_argument(format!(
                    "densify step must be a positive number, got {}",
                    step
                )));
            }
        }
        if let DensifyBounds::Range(lower, upper) = &bounds {
            match (as_f64(lower), as_f64(upper)) {
                (Some(l), Some(u)) if l < u => {}
                _ => {
                    return Err(RenderError::invalid_argument(
                        "numeric densify bounds must be numbers with lower < upper",
                    ));
                }
            }
        }
        Ok(Self::Numeric { bounds, step })
    }

    /// A date range; `step` must be positive and explicit bounds ordered dates.
    pub fn date_time(bounds: DensifyBounds, step: i64, unit: DensifyTimeUnit) -> RenderResult<Self> {
        if step <= 0 {
            return Err(RenderError::invalid_argument(format!(
                "densify step must be positive, got {}",
                step
            )));
        }
        if let DensifyBounds::Range(lower, upper) = &bounds {
            match (lower, upper) {
                (Bson::DateTime(l), Bson::DateTime(u)) if l < u => {}
                _ => {
                    return Err(RenderError::invalid_argument(
                        "date densify bounds must be dates with lower < upper",
                    ));
                }
            }
        }
        Ok(Self::DateTime { bounds, step, unit })
    }

    fn is_date(&self) -> bool {
        matches!(self, Self::DateTime { .. })
    }

    fn render(&self) -> Document {
        match self {
            Self::Numeric { bounds, step } => doc! {
                "step": step.clone(),
                "bounds": bounds.to_bson(),
            },
            Self::DateTime { bounds, step, unit } => doc! {
                "step": *step,
                "unit": unit.as_str(),
                "bounds": bounds.to_bson(),
            },
        }
    }
}

/// `$densify` a numeric or date field.
///
/// The range kind must match the declared value type of the field.
pub fn densify<T: 'static, F: FieldType>(
    field: TypedFieldDefinition<T, F>,
    range: DensifyRange,
    partition_by_fields: Vec<FieldDefinition<T>>,
) -> RenderResult<PipelineStageDefinition<T, T>> {
    let compatible = match F::kind() {
        FieldKind::Other => true,
        FieldKind::Date => range.is_date(),
        FieldKind::Numeric => !range.is_date(),
        _ => false,
    };
    if !compatible {
        return Err(RenderError::incompatible_types(format!(
            "a {} range cannot densify a field of type {}",
            if range.is_date() { "date" } else { "numeric" },
            std::any::type_name::<F>()
        )));
    }

    Ok(PipelineStageDefinition::new("$densify", move |context| {
        context.ensure_server_side("$densify")?;
        let mut body = doc! { "field": field.render(context)?.field_name };
        if !partition_by_fields.is_empty() {
            let names = partition_by_fields
                .iter()
                .map(|f| f.render(context).map(|r| Bson::String(r.field_name)))
                .collect::<RenderResult<Vec<_>>>()?;
            body.insert("partitionByFields", names);
        }
        body.insert("range", range.render());
        Ok(RenderedPipelineStage::single(
            "$densify",
            doc! { "$densify": body },
            context.document_serializer().clone(),
        ))
    }))
}

/// One bound of a window.
#[derive(Debug, Clone, PartialEq)]
pub enum WindowBound {
    /// No bound.
    Unbounded,
    /// The current document.
    Current,
    /// An offset from the current document (documents) or value (range).
    Offset(Bson),
}

impl WindowBound {
    fn to_bson(&self) -> Bson {
        match self {
            Self::Unbounded => Bson::String("unbounded".to_string()),
            Self::Current => Bson::String("current".to_string()),
            Self::Offset(offset) => offset.clone(),
        }
    }

    fn position(&self) -> Option<f64> {
        match self {
            Self::Unbounded => None,
            Self::Current => Some(0.0),
            Self::Offset(offset) => as_f64(offset),
        }
    }
}

fn check_order(lower: &WindowBound, upper: &WindowBound) -> RenderResult<()> {
    if *lower == WindowBound::Unbounded || *upper == WindowBound::Unbounded {
        return Ok(());
    }
    match (lower.position(), upper.position()) {
        (Some(l), Some(u)) if l <= u => Ok(()),
        (Some(_), Some(_)) => Err(RenderError::invalid_argument(
            "the lower window bound must not follow the upper bound",
        )),
        _ => Err(RenderError::invalid_argument("window offsets must be numbers")),
    }
}

/// The window of a window operator.
#[derive(Debug, Clone, PartialEq)]
pub enum WindowBounds {
    /// A window counted in documents.
    Documents(WindowBound, WindowBound),
    /// A window over the sort values.
    Range {
        /// Lower bound.
        lower: WindowBound,
        /// Upper bound.
        upper: WindowBound,
        /// Unit when the sort field is a date.
        unit: Option<DensifyTimeUnit>,
    },
}

impl WindowBounds {
    /// A documents window; integer offsets, lower not after upper.
    pub fn documents(lower: WindowBound, upper: WindowBound) -> RenderResult<Self> {
        for bound in [&lower, &upper] {
            if let WindowBound::Offset(offset) = bound {
                if !matches!(offset, Bson::Int32(_) | Bson::Int64(_)) {
                    return Err(RenderError::invalid_argument(
                        "documents window offsets must be integers",
                    ));
                }
            }
        }
        check_order(&lower, &upper)?;
        Ok(Self::Documents(lower, upper))
    }

    /// A range window; lower not after upper.
    pub fn range(
        lower: WindowBound,
        upper: WindowBound,
        unit: Option<DensifyTimeUnit>,
    ) -> RenderResult<Self> {
        check_order(&lower, &upper)?;
        Ok(Self::Range { lower, upper, unit })
    }

    fn is_unbounded(&self) -> bool {
        matches!(
            self,
            Self::Documents(WindowBound::Unbounded, WindowBound::Unbounded)
        )
    }

    fn render(&self) -> Document {
        match self {
            Self::Documents(lower, upper) => doc! {
                "documents": [lower.to_bson(), upper.to_bson()],
            },
            Self::Range { lower, upper, unit } => {
                let mut window = doc! { "range": [lower.to_bson(), upper.to_bson()] };
                if let Some(unit) = unit {
                    window.insert("unit", unit.as_str());
                }
                window
            }
        }
    }
}

/// An output field of `$setWindowFields`.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowOutput {
    field: String,
    operator: Document,
    window: Option<WindowBounds>,
}

impl WindowOutput {
    /// Compute `field` with a window operator such as `{ $sum: "$qty" }`.
    pub fn new(field: impl Into<String>, operator: Document) -> Self {
        Self {
            field: field.into(),
            operator,
            window: None,
        }
    }

    /// Restrict the operator to a window.
    pub fn window(mut self, window: WindowBounds) -> Self {
        self.window = Some(window);
        self
    }
}

/// `$setWindowFields`.
///
/// Output fields must be distinct, and bounded windows need `sort_by`.
pub fn set_window_fields<T: 'static>(
    partition_by: Option<AggregateExpressionDefinition<T>>,
    sort_by: Option<SortDefinition<T>>,
    output: Vec<WindowOutput>,
) -> RenderResult<PipelineStageDefinition<T, Document>> {
    if output.is_empty() {
        return Err(RenderError::invalid_argument(
            "$setWindowFields needs at least one output field",
        ));
    }
    let mut seen = HashSet::new();
    for field in &output {
        if !seen.insert(field.field.as_str()) {
            return Err(RenderError::invalid_argument(format!(
                "duplicate window output field '{}'",
                field.field
            )));
        }
        let bounded = field.window.as_ref().is_some_and(|w| !w.is_unbounded());
        if bounded && sort_by.is_none() {
            return Err(RenderError::invalid_argument(format!(
                "window output '{}' needs a sortBy",
                field.field
            )));
        }
    }

    Ok(PipelineStageDefinition::new("$setWindowFields", move |context| {
        context.ensure_server_side("$setWindowFields")?;
        let mut body = Document::new();
        if let Some(partition_by) = &partition_by {
            body.insert("partitionBy", partition_by.render(context)?);
        }
        if let Some(sort_by) = &sort_by {
            body.insert("sortBy", sort_by.render(context)?);
        }
        let mut fields = Document::new();
        for output in &output {
            let mut computed = output.operator.clone();
            if let Some(window) = &output.window {
                computed.insert("window", window.render());
            }
            fields.insert(output.field.clone(), computed);
        }
        body.insert("output", fields);

        Ok(RenderedPipelineStage::single(
            "$setWindowFields",
            doc! { "$setWindowFields": body },
            context.serializer_for::<Document>(),
        ))
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::tests::{Person, context};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_densify_numeric() {
        let range = DensifyRange::numeric(DensifyBounds::Range(Bson::Int32(0), Bson::Int32(100)), 10)
            .unwrap();
        let stage = densify::<Person, i32>(
            TypedFieldDefinition::new("age"),
            range,
            vec![FieldDefinition::new("name")],
        )
        .unwrap();
        assert_eq!(
            stage.render(&context()).unwrap().documents,
            vec![doc! { "$densify": {
                "field": "age",
                "partitionByFields": ["n"],
                "range": { "step": 10, "bounds": [0, 100] },
            } }]
        );
    }

    #[test]
    fn test_densify_validation() {
        assert!(DensifyRange::numeric(DensifyBounds::Full, 0).is_err());
        assert!(DensifyRange::numeric(DensifyBounds::Range(Bson::Int32(5), Bson::Int32(1)), 1).is_err());
        assert!(DensifyRange::date_time(DensifyBounds::Full, 0, DensifyTimeUnit::Day).is_err());

        let date_range =
            DensifyRange::date_time(DensifyBounds::Partition, 1, DensifyTimeUnit::Hour).unwrap();
        let err = densify::<Person, i32>(TypedFieldDefinition::new("age"), date_range, Vec::new())
            .unwrap_err();
        assert!(err.is_incompatible_types());

        let numeric = DensifyRange::numeric(DensifyBounds::Full, 1).unwrap();
        assert!(
            densify::<Person, bson::DateTime>(TypedFieldDefinition::new("at"), numeric, Vec::new())
                .is_err()
        );
    }

    #[test]
    fn test_set_window_fields() {
        let stage = set_window_fields::<Person>(
            Some(AggregateExpressionDefinition::field("name")),
            Some(SortDefinition::ascending("age")),
            vec![
                WindowOutput::new("running", doc! { "$sum": "$age" }).window(
                    WindowBounds::documents(WindowBound::Unbounded, WindowBound::Current).unwrap(),
                ),
            ],
        )
        .unwrap();
        assert_eq!(
            stage.render(&context()).unwrap().documents,
            vec![doc! { "$setWindowFields": {
                "partitionBy": "$n",
                "sortBy": { "age": 1 },
                "output": {
                    "running": { "$sum": "$age", "window": { "documents": ["unbounded", "current"] } },
                },
            } }]
        );
    }

    #[test]
    fn test_window_validation() {
        assert!(WindowBounds::documents(WindowBound::Offset(Bson::Int32(1)), WindowBound::Current).is_err());
        assert!(WindowBounds::documents(WindowBound::Offset(Bson::Double(0.5)), WindowBound::Current).is_err());
        assert!(WindowBounds::range(WindowBound::Offset(Bson::Int32(-10)), WindowBound::Offset(Bson::Int32(10)), None).is_ok());

        let bounded = WindowOutput::new("avg", doc! { "$avg": "$age" }).window(
            WindowBounds::documents(WindowBound::Offset(Bson::Int32(-1)), WindowBound::Current).unwrap(),
        );
        assert!(set_window_fields::<Person>(None, None, vec![bounded]).is_err());

        let a = WindowOutput::new("x", doc! { "$sum": 1 });
        assert!(set_window_fields::<Person>(None, None, vec![a.clone(), a]).is_err());
        assert!(set_window_fields::<Person>(None, None, Vec::new()).is_err());
    }
}
