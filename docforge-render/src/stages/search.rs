//! `$vectorSearch`.

use bson::{Bson, doc};

use crate::error::{RenderError, RenderResult};
use crate::field::FieldDefinition;
use crate::filter::FilterDefinition;
use crate::pipeline::{PipelineStageDefinition, RenderedPipelineStage};

/// Query vector of a `$vectorSearch` stage.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryVector {
    /// Double precision components.
    Doubles(Vec<f64>),
    /// Single precision components, widened on the wire.
    Floats(Vec<f32>),
    /// Integer components.
    Ints(Vec<i32>),
}

impl QueryVector {
    /// Number of components.
    pub fn len(&self) -> usize {
        match self {
            Self::Doubles(v) => v.len(),
            Self::Floats(v) => v.len(),
            Self::Ints(v) => v.len(),
        }
    }

    /// Whether the vector has no components.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn to_bson(&self) -> Bson {
        let items: Vec<Bson> = match self {
            Self::Doubles(v) => v.iter().copied().map(Bson::Double).collect(),
            Self::Floats(v) => v.iter().map(|c| Bson::Double(f64::from(*c))).collect(),
            Self::Ints(v) => v.iter().copied().map(Bson::Int32).collect(),
        };
        Bson::Array(items)
    }
}

impl From<Vec<f64>> for QueryVector {
    fn from(value: Vec<f64>) -> Self {
        Self::Doubles(value)
    }
}

impl From<Vec<f32>> for QueryVector {
    fn from(value: Vec<f32>) -> Self {
        Self::Floats(value)
    }
}

impl From<Vec<i32>> for QueryVector {
    fn from(value: Vec<i32>) -> Self {
        Self::Ints(value)
    }
}

/// Options of a `$vectorSearch` stage.
pub struct VectorSearchOptions<T> {
    /// Pre-filter on indexed fields.
    pub filter: Option<FilterDefinition<T>>,
    /// Search index name; `"default"` when unset.
    pub index_name: Option<String>,
    /// Candidates considered by approximate search; `limit * 10` when unset.
    pub num_candidates: Option<i32>,
    /// Run an exact nearest neighbour search.
    pub exact: bool,
}

impl<T> Default for VectorSearchOptions<T> {
    fn default() -> Self {
        Self {
            filter: None,
            index_name: None,
            num_candidates: None,
            exact: false,
        }
    }
}

impl<T> VectorSearchOptions<T> {
    /// Create default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the pre-filter.
    pub fn filter(mut self, filter: FilterDefinition<T>) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Set the index name.
    pub fn index_name(mut self, name: impl Into<String>) -> Self {
        self.index_name = Some(name.into());
        self
    }

    /// Set the candidate count.
    pub fn num_candidates(mut self, count: i32) -> Self {
        self.num_candidates = Some(count);
        self
    }

    /// Request exact search.
    pub fn exact(mut self, exact: bool) -> Self {
        self.exact = exact;
        self
    }
}

/// `$vectorSearch` returning the `limit` nearest documents to `query_vector`.
///
/// Exact search takes no candidate count; combining the two is rejected.
pub fn vector_search<T: 'static>(
    field: impl Into<FieldDefinition<T>>,
    query_vector: impl Into<QueryVector>,
    limit: i32,
    options: VectorSearchOptions<T>,
) -> RenderResult<PipelineStageDefinition<T, T>> {
    if limit <= 0 {
        return Err(RenderError::invalid_argument(format!(
            "$vectorSearch limit must be greater than zero, got {}",
            limit
        )));
    }
    if options.exact && options.num_candidates.is_some() {
        return Err(RenderError::invalid_argument(
            "number of candidates must be omitted for exact nearest neighbour search",
        ));
    }

    let field: FieldDefinition<T> = field.into();
    let query_vector = query_vector.into();

    Ok(PipelineStageDefinition::new("$vectorSearch", move |context| {
        context.ensure_server_side("$vectorSearch")?;
        let mut body = doc! {
            "queryVector": query_vector.to_bson(),
            "path": field.render(context)?.field_name,
            "limit": limit,
        };
        if !options.exact {
            let candidates = options.num_candidates.unwrap_or(limit.saturating_mul(10));
            body.insert("numCandidates", candidates);
        }
        body.insert("index", options.index_name.as_deref().unwrap_or("default"));
        if let Some(filter) = &options.filter {
            body.insert("filter", filter.render(&context.with_dollar_form(true))?);
        }
        if options.exact {
            body.insert("exact", true);
        }

        Ok(RenderedPipelineStage::single(
            "$vectorSearch",
            doc! { "$vectorSearch": body },
            context.document_serializer().clone(),
        ))
    }))
}
