//! Per-call options.
//!
//! Options are plain values with public fields and `mut self` setters; the
//! facade never mutates the options it is given.

use std::time::Duration;

use bson::{Bson, Document, doc};
use docforge_render::{
    CollectionNamespace, DatabaseNamespace, FilterDefinition, ProjectionDefinition, RenderResult,
    SortDefinition,
};

/// Index hint.
#[derive(Debug, Clone, PartialEq)]
pub enum Hint {
    /// Index name.
    Name(String),
    /// Index key pattern.
    Keys(Document),
}

impl Hint {
    /// Command value of the hint.
    pub fn to_bson(&self) -> Bson {
        match self {
            Self::Name(name) => Bson::String(name.clone()),
            Self::Keys(keys) => Bson::Document(keys.clone()),
        }
    }
}

impl From<&str> for Hint {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<Document> for Hint {
    fn from(keys: Document) -> Self {
        Self::Keys(keys)
    }
}

/// Which version of the document a find-and-modify returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReturnDocument {
    /// The document before modification.
    #[default]
    Before,
    /// The document after modification.
    After,
}

/// Options of `find`.
pub struct FindOptions<T, TProjection = T> {
    /// Projection of the results.
    pub projection: Option<ProjectionDefinition<T, TProjection>>,
    /// Sort order.
    pub sort: Option<SortDefinition<T>>,
    /// Documents to skip.
    pub skip: Option<i64>,
    /// Maximum number of documents.
    pub limit: Option<i64>,
    /// Documents per batch.
    pub batch_size: Option<u32>,
    /// Return all results in the first batch.
    pub single_batch: bool,
    /// Collation.
    pub collation: Option<Document>,
    /// Index hint.
    pub hint: Option<Hint>,
    /// Server-side time limit.
    pub max_time: Option<Duration>,
    /// Comment attached to the command.
    pub comment: Option<Bson>,
    /// Allow the server to use temporary files.
    pub allow_disk_use: Option<bool>,
    /// Keep the cursor open while idle.
    pub no_cursor_timeout: Option<bool>,
    /// Variables usable in the filter.
    pub let_vars: Option<Document>,
}

impl<T, TProjection> Default for FindOptions<T, TProjection> {
    fn default() -> Self {
        Self {
            projection: None,
            sort: None,
            skip: None,
            limit: None,
            batch_size: None,
            single_batch: false,
            collation: None,
            hint: None,
            max_time: None,
            comment: None,
            allow_disk_use: None,
            no_cursor_timeout: None,
            let_vars: None,
        }
    }
}

impl<T, TProjection> FindOptions<T, TProjection> {
    /// Set the projection.
    pub fn projection(mut self, projection: ProjectionDefinition<T, TProjection>) -> Self {
        self.projection = Some(projection);
        self
    }

    /// Set the sort.
    pub fn sort(mut self, sort: SortDefinition<T>) -> Self {
        self.sort = Some(sort);
        self
    }

    /// Set the skip.
    pub fn skip(mut self, skip: i64) -> Self {
        self.skip = Some(skip);
        self
    }

    /// Set the limit.
    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set the batch size.
    pub fn batch_size(mut self, size: u32) -> Self {
        self.batch_size = Some(size);
        self
    }

    /// Set the collation.
    pub fn collation(mut self, collation: Document) -> Self {
        self.collation = Some(collation);
        self
    }

    /// Set the hint.
    pub fn hint(mut self, hint: impl Into<Hint>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Set the time limit.
    pub fn max_time(mut self, max_time: Duration) -> Self {
        self.max_time = Some(max_time);
        self
    }
}

/// Options of `aggregate`.
#[derive(Debug, Clone, Default)]
pub struct AggregateOptions {
    /// Allow the server to use temporary files.
    pub allow_disk_use: Option<bool>,
    /// Documents per batch.
    pub batch_size: Option<u32>,
    /// Skip document validation of `$out`/`$merge` targets.
    pub bypass_document_validation: Option<bool>,
    /// Collation.
    pub collation: Option<Document>,
    /// Comment attached to the command.
    pub comment: Option<Bson>,
    /// Index hint.
    pub hint: Option<Hint>,
    /// Pipeline variables.
    pub let_vars: Option<Document>,
    /// Server-side time limit.
    pub max_time: Option<Duration>,
}

impl AggregateOptions {
    /// Set the batch size.
    pub fn batch_size(mut self, size: u32) -> Self {
        self.batch_size = Some(size);
        self
    }

    /// Set the collation.
    pub fn collation(mut self, collation: Document) -> Self {
        self.collation = Some(collation);
        self
    }

    /// Set the time limit.
    pub fn max_time(mut self, max_time: Duration) -> Self {
        self.max_time = Some(max_time);
        self
    }

    /// Allow temporary files.
    pub fn allow_disk_use(mut self, allow: bool) -> Self {
        self.allow_disk_use = Some(allow);
        self
    }
}

/// Options of `count_documents`.
#[derive(Debug, Clone, Default)]
pub struct CountOptions {
    /// Documents to skip.
    pub skip: Option<i64>,
    /// Maximum number to count.
    pub limit: Option<i64>,
    /// Index hint.
    pub hint: Option<Hint>,
    /// Collation.
    pub collation: Option<Document>,
    /// Server-side time limit.
    pub max_time: Option<Duration>,
    /// Comment attached to the command.
    pub comment: Option<Bson>,
}

/// Options of `estimated_document_count`.
#[derive(Debug, Clone, Default)]
pub struct EstimatedDocumentCountOptions {
    /// Server-side time limit.
    pub max_time: Option<Duration>,
    /// Comment attached to the command.
    pub comment: Option<Bson>,
}

/// Options of `distinct`.
#[derive(Debug, Clone, Default)]
pub struct DistinctOptions {
    /// Collation.
    pub collation: Option<Document>,
    /// Server-side time limit.
    pub max_time: Option<Duration>,
    /// Comment attached to the command.
    pub comment: Option<Bson>,
}

/// Options of `find_one_and_delete`.
pub struct FindOneAndDeleteOptions<T, TProjection = T> {
    /// Projection of the returned document.
    pub projection: Option<ProjectionDefinition<T, TProjection>>,
    /// Picks the document when several match.
    pub sort: Option<SortDefinition<T>>,
    /// Collation.
    pub collation: Option<Document>,
    /// Index hint.
    pub hint: Option<Hint>,
    /// Server-side time limit.
    pub max_time: Option<Duration>,
    /// Comment attached to the command.
    pub comment: Option<Bson>,
    /// Variables usable in the filter.
    pub let_vars: Option<Document>,
}

impl<T, TProjection> Default for FindOneAndDeleteOptions<T, TProjection> {
    fn default() -> Self {
        Self {
            projection: None,
            sort: None,
            collation: None,
            hint: None,
            max_time: None,
            comment: None,
            let_vars: None,
        }
    }
}

/// Options of `find_one_and_replace`.
pub struct FindOneAndReplaceOptions<T, TProjection = T> {
    /// Projection of the returned document.
    pub projection: Option<ProjectionDefinition<T, TProjection>>,
    /// Picks the document when several match.
    pub sort: Option<SortDefinition<T>>,
    /// Insert when nothing matches.
    pub upsert: Option<bool>,
    /// Return the document before or after replacement.
    pub return_document: ReturnDocument,
    /// Skip document validation.
    pub bypass_document_validation: Option<bool>,
    /// Collation.
    pub collation: Option<Document>,
    /// Index hint.
    pub hint: Option<Hint>,
    /// Server-side time limit.
    pub max_time: Option<Duration>,
    /// Comment attached to the command.
    pub comment: Option<Bson>,
    /// Variables usable in the filter.
    pub let_vars: Option<Document>,
}

impl<T, TProjection> Default for FindOneAndReplaceOptions<T, TProjection> {
    fn default() -> Self {
        Self {
            projection: None,
            sort: None,
            upsert: None,
            return_document: ReturnDocument::Before,
            bypass_document_validation: None,
            collation: None,
            hint: None,
            max_time: None,
            comment: None,
            let_vars: None,
        }
    }
}

/// Options of `find_one_and_update`.
pub struct FindOneAndUpdateOptions<T, TProjection = T> {
    /// Projection of the returned document.
    pub projection: Option<ProjectionDefinition<T, TProjection>>,
    /// Picks the document when several match.
    pub sort: Option<SortDefinition<T>>,
    /// Insert when nothing matches.
    pub upsert: Option<bool>,
    /// Return the document before or after the update.
    pub return_document: ReturnDocument,
    /// Filters selecting array elements to update.
    pub array_filters: Option<Vec<Document>>,
    /// Skip document validation.
    pub bypass_document_validation: Option<bool>,
    /// Collation.
    pub collation: Option<Document>,
    /// Index hint.
    pub hint: Option<Hint>,
    /// Server-side time limit.
    pub max_time: Option<Duration>,
    /// Comment attached to the command.
    pub comment: Option<Bson>,
    /// Variables usable in the filter and update.
    pub let_vars: Option<Document>,
}

impl<T, TProjection> Default for FindOneAndUpdateOptions<T, TProjection> {
    fn default() -> Self {
        Self {
            projection: None,
            sort: None,
            upsert: None,
            return_document: ReturnDocument::Before,
            array_filters: None,
            bypass_document_validation: None,
            collation: None,
            hint: None,
            max_time: None,
            comment: None,
            let_vars: None,
        }
    }
}

impl<T, TProjection> FindOneAndUpdateOptions<T, TProjection> {
    /// Return the updated document.
    pub fn return_after(mut self) -> Self {
        self.return_document = ReturnDocument::After;
        self
    }

    /// Insert when nothing matches.
    pub fn upsert(mut self, upsert: bool) -> Self {
        self.upsert = Some(upsert);
        self
    }

    /// Set the sort.
    pub fn sort(mut self, sort: SortDefinition<T>) -> Self {
        self.sort = Some(sort);
        self
    }

    /// Set the projection.
    pub fn projection(mut self, projection: ProjectionDefinition<T, TProjection>) -> Self {
        self.projection = Some(projection);
        self
    }
}

/// Options of `bulk_write`.
#[derive(Debug, Clone)]
pub struct BulkWriteOptions {
    /// Stop at the first failure and keep list order.
    pub ordered: bool,
    /// Skip document validation.
    pub bypass_document_validation: Option<bool>,
    /// Comment attached to the commands.
    pub comment: Option<Bson>,
    /// Variables usable in filters and updates.
    pub let_vars: Option<Document>,
}

impl Default for BulkWriteOptions {
    fn default() -> Self {
        Self {
            ordered: true,
            bypass_document_validation: None,
            comment: None,
            let_vars: None,
        }
    }
}

impl BulkWriteOptions {
    /// Unordered execution.
    pub fn unordered() -> Self {
        Self {
            ordered: false,
            ..Self::default()
        }
    }
}

/// Options of `insert_one`.
#[derive(Debug, Clone, Default)]
pub struct InsertOneOptions {
    /// Skip document validation.
    pub bypass_document_validation: Option<bool>,
    /// Comment attached to the command.
    pub comment: Option<Bson>,
}

/// Options of `insert_many`.
#[derive(Debug, Clone)]
pub struct InsertManyOptions {
    /// Stop at the first failure.
    pub ordered: bool,
    /// Skip document validation.
    pub bypass_document_validation: Option<bool>,
    /// Comment attached to the command.
    pub comment: Option<Bson>,
}

impl Default for InsertManyOptions {
    fn default() -> Self {
        Self {
            ordered: true,
            bypass_document_validation: None,
            comment: None,
        }
    }
}

/// Options of `update_one` and `update_many`.
#[derive(Debug, Clone, Default)]
pub struct UpdateOptions {
    /// Insert when nothing matches.
    pub upsert: bool,
    /// Filters selecting array elements to update.
    pub array_filters: Option<Vec<Document>>,
    /// Collation.
    pub collation: Option<Document>,
    /// Index hint.
    pub hint: Option<Hint>,
    /// Skip document validation.
    pub bypass_document_validation: Option<bool>,
    /// Comment attached to the command.
    pub comment: Option<Bson>,
    /// Variables usable in the filter and update.
    pub let_vars: Option<Document>,
}

/// Options of `replace_one`.
#[derive(Debug, Clone, Default)]
pub struct ReplaceOptions {
    /// Insert when nothing matches.
    pub upsert: bool,
    /// Collation.
    pub collation: Option<Document>,
    /// Index hint.
    pub hint: Option<Hint>,
    /// Skip document validation.
    pub bypass_document_validation: Option<bool>,
    /// Comment attached to the command.
    pub comment: Option<Bson>,
    /// Variables usable in the filter.
    pub let_vars: Option<Document>,
}

/// Options of `delete_one` and `delete_many`.
#[derive(Debug, Clone, Default)]
pub struct DeleteOptions {
    /// Collation.
    pub collation: Option<Document>,
    /// Index hint.
    pub hint: Option<Hint>,
    /// Comment attached to the command.
    pub comment: Option<Bson>,
    /// Variables usable in the filter.
    pub let_vars: Option<Document>,
}

/// Where map-reduce results go.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum MapReduceOutput {
    /// Return results inline.
    #[default]
    Inline,
    /// Replace the output collection.
    Replace {
        /// Output collection.
        collection: String,
        /// Output database; the source database when unset.
        database: Option<String>,
    },
    /// Merge into the output collection.
    Merge {
        /// Output collection.
        collection: String,
        /// Output database; the source database when unset.
        database: Option<String>,
    },
    /// Reduce into the output collection.
    Reduce {
        /// Output collection.
        collection: String,
        /// Output database; the source database when unset.
        database: Option<String>,
        /// Do not lock the output database.
        non_atomic: bool,
    },
}

impl MapReduceOutput {
    /// Whether results are written to a collection.
    pub fn is_collection(&self) -> bool {
        !matches!(self, Self::Inline)
    }

    /// The `out` value of the command.
    pub fn to_bson(&self) -> Bson {
        let (action, collection, database) = match self {
            Self::Inline => return Bson::Document(doc! { "inline": 1 }),
            Self::Replace { collection, database } => ("replace", collection, database),
            Self::Merge { collection, database } => ("merge", collection, database),
            Self::Reduce { collection, database, .. } => ("reduce", collection, database),
        };
        let mut out = doc! { action: collection.as_str() };
        if let Some(database) = database {
            out.insert("db", database.as_str());
        }
        if let Self::Reduce { non_atomic: true, .. } = self {
            out.insert("nonAtomic", true);
        }
        Bson::Document(out)
    }

    /// Output collection, resolved against the source database.
    pub fn namespace(
        &self,
        source: &DatabaseNamespace,
    ) -> RenderResult<Option<CollectionNamespace>> {
        let (collection, database) = match self {
            Self::Inline => return Ok(None),
            Self::Replace { collection, database }
            | Self::Merge { collection, database }
            | Self::Reduce { collection, database, .. } => (collection, database),
        };
        let database = match database {
            Some(name) => DatabaseNamespace::new(name.as_str())?,
            None => source.clone(),
        };
        database.collection(collection.as_str()).map(Some)
    }
}

/// Options of `map_reduce`.
pub struct MapReduceOptions<T> {
    /// Output target.
    pub output: MapReduceOutput,
    /// Input filter.
    pub filter: Option<FilterDefinition<T>>,
    /// Input sort.
    pub sort: Option<SortDefinition<T>>,
    /// Maximum number of input documents.
    pub limit: Option<i64>,
    /// Finalize function.
    pub finalize: Option<String>,
    /// Global variables of the functions.
    pub scope: Option<Document>,
    /// Keep intermediate data in JavaScript objects.
    pub js_mode: Option<bool>,
    /// Include timing information.
    pub verbose: Option<bool>,
    /// Collation.
    pub collation: Option<Document>,
    /// Server-side time limit.
    pub max_time: Option<Duration>,
    /// Documents per batch of the deferred read.
    pub batch_size: Option<u32>,
    /// Skip document validation of the output collection.
    pub bypass_document_validation: Option<bool>,
}

impl<T> Default for MapReduceOptions<T> {
    fn default() -> Self {
        Self {
            output: MapReduceOutput::Inline,
            filter: None,
            sort: None,
            limit: None,
            finalize: None,
            scope: None,
            js_mode: None,
            verbose: None,
            collation: None,
            max_time: None,
            batch_size: None,
            bypass_document_validation: None,
        }
    }
}

impl<T> MapReduceOptions<T> {
    /// Set the output target.
    pub fn output(mut self, output: MapReduceOutput) -> Self {
        self.output = output;
        self
    }

    /// Set the input filter.
    pub fn filter(mut self, filter: FilterDefinition<T>) -> Self {
        self.filter = Some(filter);
        self
    }
}

/// Options of index creation.
#[derive(Debug, Clone, Default)]
pub struct CreateIndexOptions {
    /// Replica set members that must build the index before it is ready.
    pub commit_quorum: Option<Bson>,
    /// Server-side time limit.
    pub max_time: Option<Duration>,
    /// Comment attached to the command.
    pub comment: Option<Bson>,
}

/// Options of index removal.
#[derive(Debug, Clone, Default)]
pub struct DropIndexOptions {
    /// Server-side time limit.
    pub max_time: Option<Duration>,
    /// Comment attached to the command.
    pub comment: Option<Bson>,
}

/// Options of index listing.
#[derive(Debug, Clone, Default)]
pub struct ListIndexesOptions {
    /// Documents per batch.
    pub batch_size: Option<u32>,
    /// Comment attached to the command.
    pub comment: Option<Bson>,
}
