//! Write models, normalized write requests and bulk-write correlation.
//!
//! Each [`WriteModel`] renders into a [`WriteRequest`] whose correlation id
//! is the model's position in the caller's list. The runtime may execute
//! requests in any grouping; it reports outcomes by its own processing
//! order, and the facade maps them back through the correlation ids.

use std::any::Any;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use bson::oid::ObjectId;
use bson::{Bson, Document, doc};
use docforge_render::{
    DocumentExt, FilterDefinition, RenderContext, RenderedUpdate, UpdateDefinition, to_document,
};
use serde::Serialize;

use crate::error::{ClientError, ClientResult};
use crate::options::Hint;

/// Insert one document.
#[derive(Debug, Clone)]
pub struct InsertOneModel<T> {
    /// The document.
    pub document: T,
}

/// Delete the first or every matching document.
#[derive(Debug, Clone)]
pub struct DeleteModel<T> {
    /// Selects the documents.
    pub filter: FilterDefinition<T>,
    /// Collation.
    pub collation: Option<Document>,
    /// Index hint.
    pub hint: Option<Hint>,
}

impl<T> DeleteModel<T> {
    /// Create a delete model.
    pub fn new(filter: FilterDefinition<T>) -> Self {
        Self {
            filter,
            collation: None,
            hint: None,
        }
    }
}

/// Update the first or every matching document.
#[derive(Debug, Clone)]
pub struct UpdateModel<T> {
    /// Selects the documents.
    pub filter: FilterDefinition<T>,
    /// The update.
    pub update: UpdateDefinition<T>,
    /// Insert when nothing matches.
    pub upsert: bool,
    /// Filters selecting array elements to update.
    pub array_filters: Option<Vec<Document>>,
    /// Collation.
    pub collation: Option<Document>,
    /// Index hint.
    pub hint: Option<Hint>,
}

impl<T> UpdateModel<T> {
    /// Create an update model.
    pub fn new(filter: FilterDefinition<T>, update: UpdateDefinition<T>) -> Self {
        Self {
            filter,
            update,
            upsert: false,
            array_filters: None,
            collation: None,
            hint: None,
        }
    }

    /// Insert when nothing matches.
    pub fn upsert(mut self, upsert: bool) -> Self {
        self.upsert = upsert;
        self
    }

    /// Set the array filters.
    pub fn array_filters(mut self, filters: Vec<Document>) -> Self {
        self.array_filters = Some(filters);
        self
    }
}

/// Replace the first matching document.
#[derive(Debug, Clone)]
pub struct ReplaceOneModel<T> {
    /// Selects the document.
    pub filter: FilterDefinition<T>,
    /// The replacement.
    pub replacement: T,
    /// Insert when nothing matches.
    pub upsert: bool,
    /// Collation.
    pub collation: Option<Document>,
    /// Index hint.
    pub hint: Option<Hint>,
}

impl<T> ReplaceOneModel<T> {
    /// Create a replace model.
    pub fn new(filter: FilterDefinition<T>, replacement: T) -> Self {
        Self {
            filter,
            replacement,
            upsert: false,
            collation: None,
            hint: None,
        }
    }

    /// Insert when nothing matches.
    pub fn upsert(mut self, upsert: bool) -> Self {
        self.upsert = upsert;
        self
    }
}

/// A high-level write request over `T` documents.
#[derive(Debug, Clone)]
pub enum WriteModel<T> {
    /// Insert one document.
    InsertOne(InsertOneModel<T>),
    /// Delete the first match.
    DeleteOne(DeleteModel<T>),
    /// Delete every match.
    DeleteMany(DeleteModel<T>),
    /// Update the first match.
    UpdateOne(UpdateModel<T>),
    /// Update every match.
    UpdateMany(UpdateModel<T>),
    /// Replace the first match.
    ReplaceOne(ReplaceOneModel<T>),
}

impl<T> WriteModel<T> {
    /// Insert `document`.
    pub fn insert_one(document: T) -> Self {
        Self::InsertOne(InsertOneModel { document })
    }

    /// Delete the first document matching `filter`.
    pub fn delete_one(filter: FilterDefinition<T>) -> Self {
        Self::DeleteOne(DeleteModel::new(filter))
    }

    /// Delete every document matching `filter`.
    pub fn delete_many(filter: FilterDefinition<T>) -> Self {
        Self::DeleteMany(DeleteModel::new(filter))
    }

    /// Update the first document matching `filter`.
    pub fn update_one(filter: FilterDefinition<T>, update: UpdateDefinition<T>) -> Self {
        Self::UpdateOne(UpdateModel::new(filter, update))
    }

    /// Update every document matching `filter`.
    pub fn update_many(filter: FilterDefinition<T>, update: UpdateDefinition<T>) -> Self {
        Self::UpdateMany(UpdateModel::new(filter, update))
    }

    /// Replace the first document matching `filter`.
    pub fn replace_one(filter: FilterDefinition<T>, replacement: T) -> Self {
        Self::ReplaceOne(ReplaceOneModel::new(filter, replacement))
    }
}

impl<T: Serialize> WriteModel<T> {
    /// Render into a normalized request tagged with `correlation_id`.
    pub fn render(&self, context: &RenderContext, correlation_id: usize) -> ClientResult<WriteRequest> {
        let kind = match self {
            Self::InsertOne(model) => return insert_request(&model.document, correlation_id),
            Self::DeleteOne(model) | Self::DeleteMany(model) => WriteRequestKind::Delete {
                filter: model.filter.render(context)?,
                limit: if matches!(self, Self::DeleteOne(_)) { 1 } else { 0 },
                collation: model.collation.clone(),
                hint: model.hint.clone(),
            },
            Self::UpdateOne(model) | Self::UpdateMany(model) => WriteRequestKind::Update {
                update: render_update(&model.update, context)?,
                filter: model.filter.render(context)?,
                multi: matches!(self, Self::UpdateMany(_)),
                upsert: model.upsert,
                array_filters: model.array_filters.clone(),
                collation: model.collation.clone(),
                hint: model.hint.clone(),
            },
            Self::ReplaceOne(model) => WriteRequestKind::Update {
                update: RenderedUpdate::Document(replacement_document(&model.replacement)?),
                filter: model.filter.render(context)?,
                multi: false,
                upsert: model.upsert,
                array_filters: None,
                collation: model.collation.clone(),
                hint: model.hint.clone(),
            },
        };
        Ok(WriteRequest { correlation_id, kind })
    }
}

/// An insert request; an `_id` is generated first when the document has none.
pub(crate) fn insert_request<T: Serialize>(
    document: &T,
    correlation_id: usize,
) -> ClientResult<WriteRequest> {
    let document = to_document(document)?;
    let document = if document.contains_key("_id") {
        document
    } else {
        let mut with_id = doc! { "_id": ObjectId::new() };
        with_id.extend(document);
        with_id
    };
    Ok(WriteRequest {
        correlation_id,
        kind: WriteRequestKind::Insert { document },
    })
}

/// Render an update that must be non-empty and operator-only.
pub(crate) fn render_update<T>(
    update: &UpdateDefinition<T>,
    context: &RenderContext,
) -> ClientResult<RenderedUpdate> {
    if update.is_empty() {
        return Err(ClientError::argument("update must not be empty"));
    }
    let update = update.render(context)?;
    if let RenderedUpdate::Document(document) = &update {
        if !document.is_operator_document() {
            return Err(ClientError::argument(
                "update document must contain only update operators",
            ));
        }
    }
    Ok(update)
}

/// Serialize a replacement, rejecting update operators.
pub(crate) fn replacement_document<T: Serialize>(replacement: &T) -> ClientResult<Document> {
    let replacement = to_document(replacement)?;
    if replacement.keys().any(|k| k.starts_with('$')) {
        return Err(ClientError::argument(
            "replacement document must not contain update operators",
        ));
    }
    Ok(replacement)
}

/// Kind of a normalized request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WriteRequestType {
    /// `insert` command.
    Insert,
    /// `update` command.
    Update,
    /// `delete` command.
    Delete,
}

impl WriteRequestType {
    /// Command name.
    pub fn command_name(self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    /// Name of the statement array in the command.
    pub fn statements_field(self) -> &'static str {
        match self {
            Self::Insert => "documents",
            Self::Update => "updates",
            Self::Delete => "deletes",
        }
    }
}

/// Rendered content of a normalized request.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteRequestKind {
    /// Insert a document.
    Insert {
        /// The document, with an `_id`.
        document: Document,
    },
    /// Update or replace.
    Update {
        /// Selects the documents.
        filter: Document,
        /// Update operators, pipeline or replacement.
        update: RenderedUpdate,
        /// Update every match.
        multi: bool,
        /// Insert when nothing matches.
        upsert: bool,
        /// Filters selecting array elements.
        array_filters: Option<Vec<Document>>,
        /// Collation.
        collation: Option<Document>,
        /// Index hint.
        hint: Option<Hint>,
    },
    /// Delete.
    Delete {
        /// Selects the documents.
        filter: Document,
        /// `1` for the first match, `0` for all.
        limit: i32,
        /// Collation.
        collation: Option<Document>,
        /// Index hint.
        hint: Option<Hint>,
    },
}

/// A normalized write request.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteRequest {
    /// Position of the originating model in the caller's list.
    pub correlation_id: usize,
    /// Rendered content.
    pub kind: WriteRequestKind,
}

impl WriteRequest {
    /// Kind of command carrying this request.
    pub fn request_type(&self) -> WriteRequestType {
        match self.kind {
            WriteRequestKind::Insert { .. } => WriteRequestType::Insert,
            WriteRequestKind::Update { .. } => WriteRequestType::Update,
            WriteRequestKind::Delete { .. } => WriteRequestType::Delete,
        }
    }

    /// `_id` of an inserted document.
    pub fn inserted_id(&self) -> Option<&Bson> {
        match &self.kind {
            WriteRequestKind::Insert { document } => document.get("_id"),
            _ => None,
        }
    }

    /// The statement inside an `insert`, `update` or `delete` command.
    pub fn to_statement(&self) -> Document {
        match &self.kind {
            WriteRequestKind::Insert { document } => document.clone(),
            WriteRequestKind::Update {
                filter,
                update,
                multi,
                upsert,
                array_filters,
                collation,
                hint,
            } => {
                let mut statement = doc! { "q": filter.clone(), "u": update.clone().into_bson() };
                if *multi {
                    statement.insert("multi", true);
                }
                if *upsert {
                    statement.insert("upsert", true);
                }
                if let Some(filters) = array_filters {
                    statement.insert("arrayFilters", filters.clone());
                }
                if let Some(collation) = collation {
                    statement.insert("collation", collation.clone());
                }
                if let Some(hint) = hint {
                    statement.insert("hint", hint.to_bson());
                }
                statement
            }
            WriteRequestKind::Delete {
                filter,
                limit,
                collation,
                hint,
            } => {
                let mut statement = doc! { "q": filter.clone(), "limit": *limit };
                if let Some(collation) = collation {
                    statement.insert("collation", collation.clone());
                }
                if let Some(hint) = hint {
                    statement.insert("hint", hint.to_bson());
                }
                statement
            }
        }
    }
}

/// A failed write, keyed by request position.
///
/// In runtime reports the index is the processing position; in
/// [`BulkWriteException`] it is the correlation id.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteError {
    /// Request position.
    pub index: usize,
    /// Server error code.
    pub code: i32,
    /// Server message.
    pub message: String,
    /// Additional information.
    pub details: Option<Document>,
}

/// A write concern failure.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteConcernError {
    /// Server error code.
    pub code: i32,
    /// Server message.
    pub message: String,
    /// Additional information.
    pub details: Option<Document>,
}

/// A document inserted by an upsert.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkWriteUpsert {
    /// Request position.
    pub index: usize,
    /// `_id` of the inserted document.
    pub id: Bson,
}

/// Outcome of a bulk write as reported by the runtime.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BulkWriteOutcome {
    /// Whether counts are available.
    pub acknowledged: bool,
    /// Inserted documents.
    pub inserted_count: i64,
    /// Documents matched by updates.
    pub matched_count: i64,
    /// Documents modified by updates.
    pub modified_count: i64,
    /// Deleted documents.
    pub deleted_count: i64,
    /// Upserted documents, indexed by processing position.
    pub upserts: Vec<BulkWriteUpsert>,
    /// Requests attempted, in processing order.
    pub processed_requests: Vec<WriteRequest>,
}

/// A partial bulk failure as reported by the runtime.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkWriteOperationError {
    /// Counts of what succeeded.
    pub outcome: BulkWriteOutcome,
    /// Write errors, indexed by processing position.
    pub write_errors: Vec<WriteError>,
    /// Write concern error, if any.
    pub write_concern_error: Option<WriteConcernError>,
    /// Requests never attempted.
    pub unprocessed_requests: Vec<WriteRequest>,
}

impl fmt::Display for BulkWriteOperationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} write errors, {} unprocessed requests",
            self.write_errors.len(),
            self.unprocessed_requests.len()
        )?;
        if let Some(error) = &self.write_concern_error {
            write!(f, ", write concern error: {}", error.message)?;
        }
        Ok(())
    }
}

/// Result of a bulk write; upsert indexes are correlation ids.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BulkWriteResult {
    /// Whether counts are available.
    pub acknowledged: bool,
    /// Number of requests submitted.
    pub request_count: usize,
    /// Inserted documents.
    pub inserted_count: i64,
    /// Documents matched by updates.
    pub matched_count: i64,
    /// Documents modified by updates.
    pub modified_count: i64,
    /// Deleted documents.
    pub deleted_count: i64,
    /// Upserted documents.
    pub upserts: Vec<BulkWriteUpsert>,
    /// Correlation ids of every attempted request.
    pub processed_ids: Vec<usize>,
}

fn correlate(processed: &[WriteRequest], index: usize, request_count: usize) -> ClientResult<usize> {
    let id = processed
        .get(index)
        .map(|request| request.correlation_id)
        .ok_or_else(|| {
            ClientError::execution(format!("runtime reported unknown request index {}", index))
        })?;
    if id >= request_count {
        return Err(ClientError::execution(format!(
            "correlation id {} is outside the {} submitted requests",
            id, request_count
        )));
    }
    Ok(id)
}

impl BulkWriteResult {
    /// Translate a runtime outcome for `request_count` submitted requests.
    pub fn from_outcome(outcome: &BulkWriteOutcome, request_count: usize) -> ClientResult<Self> {
        let processed = &outcome.processed_requests;
        let upserts = outcome
            .upserts
            .iter()
            .map(|upsert| {
                Ok(BulkWriteUpsert {
                    index: correlate(processed, upsert.index, request_count)?,
                    id: upsert.id.clone(),
                })
            })
            .collect::<ClientResult<Vec<_>>>()?;
        let processed_ids = (0..processed.len())
            .map(|i| correlate(processed, i, request_count))
            .collect::<ClientResult<Vec<_>>>()?;

        Ok(Self {
            acknowledged: outcome.acknowledged,
            request_count,
            inserted_count: outcome.inserted_count,
            matched_count: outcome.matched_count,
            modified_count: outcome.modified_count,
            deleted_count: outcome.deleted_count,
            upserts,
            processed_ids,
        })
    }

    /// `_id` of the document upserted by the request with `correlation_id`.
    pub fn upserted_id(&self, correlation_id: usize) -> Option<&Bson> {
        self.upserts
            .iter()
            .find(|u| u.index == correlation_id)
            .map(|u| &u.id)
    }
}

/// The caller's write models, type-erased so the exception stays untyped.
#[derive(Clone)]
struct CallerModels(Arc<dyn Any + Send + Sync>);

impl fmt::Debug for CallerModels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CallerModels(..)")
    }
}

impl PartialEq for CallerModels {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// A partial bulk failure with errors keyed by correlation id.
///
/// Raised by a typed bulk write, it also carries the caller's models; see
/// [`BulkWriteException::models`].
#[derive(Debug, Clone, PartialEq)]
pub struct BulkWriteException {
    /// What succeeded.
    pub result: BulkWriteResult,
    /// Write errors; `index` is the correlation id.
    pub write_errors: Vec<WriteError>,
    /// Write concern error, if any.
    pub write_concern_error: Option<WriteConcernError>,
    /// Requests never attempted, with their correlation ids.
    pub unprocessed_requests: Vec<WriteRequest>,
    models: Option<CallerModels>,
}

impl BulkWriteException {
    /// Translate a runtime failure for `request_count` submitted requests.
    pub fn from_operation_error(
        error: &BulkWriteOperationError,
        request_count: usize,
    ) -> ClientResult<Self> {
        let processed = &error.outcome.processed_requests;
        let write_errors = error
            .write_errors
            .iter()
            .map(|e| {
                Ok(WriteError {
                    index: correlate(processed, e.index, request_count)?,
                    ..e.clone()
                })
            })
            .collect::<ClientResult<Vec<_>>>()?;

        if let Some(request) = error
            .unprocessed_requests
            .iter()
            .find(|r| r.correlation_id >= request_count)
        {
            return Err(ClientError::execution(format!(
                "correlation id {} is outside the {} submitted requests",
                request.correlation_id, request_count
            )));
        }

        Ok(Self {
            result: BulkWriteResult::from_outcome(&error.outcome, request_count)?,
            write_errors,
            write_concern_error: error.write_concern_error.clone(),
            unprocessed_requests: error.unprocessed_requests.clone(),
            models: None,
        })
    }

    /// Attach the caller's models; correlation ids index into `models`.
    pub fn with_models<T: Clone + Send + Sync + 'static>(mut self, models: &[WriteModel<T>]) -> Self {
        self.models = Some(CallerModels(Arc::new(models.to_vec())));
        self
    }

    /// The caller's models, when the failure came from a bulk write over `T`.
    pub fn models<T: 'static>(&self) -> Option<&[WriteModel<T>]> {
        self.models
            .as_ref()?
            .0
            .downcast_ref::<Vec<WriteModel<T>>>()
            .map(Vec::as_slice)
    }

    /// The caller's model for `correlation_id`.
    pub fn model<T: 'static>(&self, correlation_id: usize) -> Option<&WriteModel<T>> {
        self.models::<T>()?.get(correlation_id)
    }

    /// The caller's models that were never attempted, in correlation order.
    pub fn unprocessed_models<T: 'static>(&self) -> Option<Vec<&WriteModel<T>>> {
        let models = self.models::<T>()?;
        self.unprocessed_ids()
            .into_iter()
            .map(|id| models.get(id))
            .collect()
    }

    /// Correlation ids of failed requests.
    pub fn failed_ids(&self) -> BTreeSet<usize> {
        self.write_errors.iter().map(|e| e.index).collect()
    }

    /// Correlation ids of attempted requests that did not fail.
    pub fn succeeded_ids(&self) -> BTreeSet<usize> {
        let failed = self.failed_ids();
        self.result
            .processed_ids
            .iter()
            .copied()
            .filter(|id| !failed.contains(id))
            .collect()
    }

    /// Correlation ids of requests never attempted.
    pub fn unprocessed_ids(&self) -> BTreeSet<usize> {
        self.unprocessed_requests.iter().map(|r| r.correlation_id).collect()
    }
}

impl fmt::Display for BulkWriteException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed requests {:?}", self.failed_ids())?;
        if let Some(error) = &self.write_concern_error {
            write!(f, ", write concern error: {}", error.message)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docforge_render::{DocumentSerializer, ScalarSerializer, SerializerRegistry};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    #[derive(Debug, Clone, Serialize)]
    struct Item {
        #[serde(rename = "_id")]
        id: i32,
        name: String,
    }

    fn context() -> RenderContext {
        let item = DocumentSerializer::builder("Item")
            .member("_id", ScalarSerializer::int32())
            .member_as("name", "nm", ScalarSerializer::string())
            .build();
        RenderContext::for_type::<Item>(Arc::new(SerializerRegistry::new().with::<Item>(item)))
    }

    fn insert(id: usize) -> WriteRequest {
        WriteRequest {
            correlation_id: id,
            kind: WriteRequestKind::Insert { document: doc! { "_id": id as i32 } },
        }
    }

    #[test]
    fn test_models_render_statements() {
        let ctx = context();
        let update = WriteModel::<Item>::update_many(
            FilterDefinition::eq("name", "a"),
            UpdateDefinition::set("name", "b"),
        )
        .render(&ctx, 3)
        .unwrap();
        assert_eq!(update.correlation_id, 3);
        assert_eq!(update.request_type(), WriteRequestType::Update);
        assert_eq!(
            update.to_statement(),
            doc! { "q": { "nm": "a" }, "u": { "$set": { "nm": "b" } }, "multi": true }
        );

        let delete = WriteModel::<Item>::delete_one(FilterDefinition::eq("name", "a"))
            .render(&ctx, 0)
            .unwrap();
        assert_eq!(delete.to_statement(), doc! { "q": { "nm": "a" }, "limit": 1 });
    }

    #[test]
    fn test_insert_generates_missing_id() {
        let ctx = context();
        let request = WriteModel::insert_one(doc! { "name": "x" }).render(&ctx, 0).unwrap();
        let WriteRequestKind::Insert { document } = &request.kind else {
            panic!("expected insert");
        };
        assert_eq!(document.keys().next().map(String::as_str), Some("_id"));
        assert!(matches!(request.inserted_id(), Some(Bson::ObjectId(_))));

        let request = WriteModel::insert_one(Item { id: 7, name: "x".into() })
            .render(&ctx, 0)
            .unwrap();
        assert_eq!(request.inserted_id(), Some(&Bson::Int32(7)));
    }

    #[test]
    fn test_invalid_models_rejected() {
        let ctx = context();
        let empty = WriteModel::<Item>::update_one(
            FilterDefinition::empty(),
            UpdateDefinition::combine(Vec::new()),
        );
        assert!(empty.render(&ctx, 0).unwrap_err().is_argument_error());

        let replace = WriteModel::replace_one(
            FilterDefinition::<Document>::empty(),
            doc! { "$set": { "a": 1 } },
        );
        assert!(replace.render(&ctx, 0).unwrap_err().is_argument_error());
    }

    #[test]
    fn test_unordered_failure_is_correlated() {
        // The runtime processed the requests as 2, 0, 1 and request 1 failed.
        let error = BulkWriteOperationError {
            outcome: BulkWriteOutcome {
                acknowledged: true,
                inserted_count: 2,
                processed_requests: vec![insert(2), insert(0), insert(1)],
                ..BulkWriteOutcome::default()
            },
            write_errors: vec![WriteError {
                index: 2,
                code: 11000,
                message: "duplicate key".into(),
                details: None,
            }],
            write_concern_error: None,
            unprocessed_requests: Vec::new(),
        };

        let exception = BulkWriteException::from_operation_error(&error, 3).unwrap();
        assert_eq!(exception.failed_ids(), BTreeSet::from([1]));
        assert_eq!(exception.succeeded_ids(), BTreeSet::from([0, 2]));
        assert!(exception.unprocessed_ids().is_empty());
        assert_eq!(exception.write_errors[0].code, 11000);
    }

    #[test]
    fn test_ordered_failure_reports_unprocessed() {
        let error = BulkWriteOperationError {
            outcome: BulkWriteOutcome {
                acknowledged: true,
                inserted_count: 1,
                processed_requests: vec![insert(0), insert(1)],
                ..BulkWriteOutcome::default()
            },
            write_errors: vec![WriteError {
                index: 1,
                code: 11000,
                message: "duplicate key".into(),
                details: None,
            }],
            write_concern_error: None,
            unprocessed_requests: vec![insert(2), insert(3)],
        };

        let exception = BulkWriteException::from_operation_error(&error, 4).unwrap();
        assert_eq!(exception.succeeded_ids(), BTreeSet::from([0]));
        assert_eq!(exception.failed_ids(), BTreeSet::from([1]));
        assert_eq!(exception.unprocessed_ids(), BTreeSet::from([2, 3]));
        assert!(exception.unprocessed_models::<Item>().is_none());
    }

    #[test]
    fn test_caller_models_follow_correlation_ids() {
        let models: Vec<WriteModel<Item>> = (0..3)
            .map(|id| WriteModel::insert_one(Item { id, name: format!("item-{}", id) }))
            .collect();
        let error = BulkWriteOperationError {
            outcome: BulkWriteOutcome {
                acknowledged: true,
                processed_requests: vec![insert(0)],
                ..BulkWriteOutcome::default()
            },
            write_errors: vec![WriteError {
                index: 0,
                code: 11000,
                message: "duplicate key".into(),
                details: None,
            }],
            write_concern_error: None,
            unprocessed_requests: vec![insert(1), insert(2)],
        };

        let exception = BulkWriteException::from_operation_error(&error, 3)
            .unwrap()
            .with_models(&models);
        let unprocessed = exception.unprocessed_models::<Item>().unwrap();
        let ids: Vec<i32> = unprocessed
            .iter()
            .map(|model| match model {
                WriteModel::InsertOne(insert) => insert.document.id,
                other => panic!("unexpected model {:?}", other),
            })
            .collect();
        assert_eq!(ids, vec![1, 2]);
        assert!(matches!(
            exception.model::<Item>(0),
            Some(WriteModel::InsertOne(InsertOneModel { document })) if document.name == "item-0"
        ));
        assert!(exception.models::<Document>().is_none());
    }

    #[test]
    fn test_unprocessed_out_of_range_rejected() {
        let error = BulkWriteOperationError {
            outcome: BulkWriteOutcome::default(),
            write_errors: Vec::new(),
            write_concern_error: None,
            unprocessed_requests: vec![insert(3)],
        };
        assert!(BulkWriteException::from_operation_error(&error, 2).is_err());
    }

    #[test]
    fn test_out_of_range_correlation_rejected() {
        let outcome = BulkWriteOutcome {
            acknowledged: true,
            processed_requests: vec![insert(5)],
            ..BulkWriteOutcome::default()
        };
        assert!(BulkWriteResult::from_outcome(&outcome, 2).is_err());

        let outcome = BulkWriteOutcome {
            acknowledged: true,
            upserts: vec![BulkWriteUpsert { index: 4, id: Bson::Int32(1) }],
            processed_requests: vec![insert(0)],
            ..BulkWriteOutcome::default()
        };
        assert!(BulkWriteResult::from_outcome(&outcome, 1).is_err());
    }
}
