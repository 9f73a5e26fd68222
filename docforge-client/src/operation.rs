//! Operation descriptors.
//!
//! A descriptor names its namespace, carries the rendered command body and
//! the execution options the runtime needs. Building a descriptor is pure:
//! the same inputs always produce the same command document, whichever
//! execution path later consumes it.

use std::time::Duration;

use bson::{Bson, Document, doc};
use docforge_render::CollectionNamespace;

use crate::bulk::{BulkWriteOutcome, WriteRequest, WriteRequestType};
use crate::config::{ReadConcern, WriteConcern};
use crate::error::{ClientError, ClientResult};
use crate::options::Hint;

fn put(document: &mut Document, key: &str, value: Option<impl Into<Bson>>) {
    if let Some(value) = value {
        document.insert(key, value.into());
    }
}

fn millis(duration: Option<Duration>) -> Option<i64> {
    duration.map(|d| d.as_millis() as i64)
}

/// Rendered arguments of a `find` command.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FindCommand {
    /// Query filter.
    pub filter: Document,
    /// Projection.
    pub projection: Option<Document>,
    /// Sort.
    pub sort: Option<Document>,
    /// Documents to skip.
    pub skip: Option<i64>,
    /// Maximum number of documents.
    pub limit: Option<i64>,
    /// Documents per batch.
    pub batch_size: Option<u32>,
    /// Return a single batch and close the cursor.
    pub single_batch: Option<bool>,
    /// Collation.
    pub collation: Option<Document>,
    /// Index hint.
    pub hint: Option<Hint>,
    /// Server-side time limit.
    pub max_time: Option<Duration>,
    /// Comment.
    pub comment: Option<Bson>,
    /// Allow temporary files.
    pub allow_disk_use: Option<bool>,
    /// Keep an idle cursor open.
    pub no_cursor_timeout: Option<bool>,
    /// Variables usable in the filter.
    pub let_vars: Option<Document>,
}

impl FindCommand {
    fn to_body(&self, collection: &str) -> Document {
        let mut body = doc! { "find": collection, "filter": self.filter.clone() };
        put(&mut body, "sort", self.sort.clone());
        put(&mut body, "projection", self.projection.clone());
        put(&mut body, "hint", self.hint.as_ref().map(Hint::to_bson));
        put(&mut body, "skip", self.skip);
        put(&mut body, "limit", self.limit);
        put(&mut body, "batchSize", self.batch_size.map(|n| n as i32));
        put(&mut body, "singleBatch", self.single_batch);
        put(&mut body, "comment", self.comment.clone());
        put(&mut body, "maxTimeMS", millis(self.max_time));
        put(&mut body, "noCursorTimeout", self.no_cursor_timeout);
        put(&mut body, "allowDiskUse", self.allow_disk_use);
        put(&mut body, "collation", self.collation.clone());
        put(&mut body, "let", self.let_vars.clone());
        body
    }
}

/// Rendered arguments of an `aggregate` command.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AggregateCommand {
    /// Stage documents.
    pub pipeline: Vec<Document>,
    /// Allow temporary files.
    pub allow_disk_use: Option<bool>,
    /// Documents per batch.
    pub batch_size: Option<u32>,
    /// Skip document validation of an output collection.
    pub bypass_document_validation: Option<bool>,
    /// Collation.
    pub collation: Option<Document>,
    /// Comment.
    pub comment: Option<Bson>,
    /// Index hint.
    pub hint: Option<Hint>,
    /// Variables usable in the pipeline.
    pub let_vars: Option<Document>,
    /// Server-side time limit.
    pub max_time: Option<Duration>,
}

impl AggregateCommand {
    fn to_body(&self, collection: &str, writes_output: bool) -> Document {
        let cursor = match (writes_output, self.batch_size) {
            (false, Some(size)) => doc! { "batchSize": size as i32 },
            _ => Document::new(),
        };
        let mut body = doc! {
            "aggregate": collection,
            "pipeline": self.pipeline.clone(),
            "cursor": cursor,
        };
        put(&mut body, "allowDiskUse", self.allow_disk_use);
        if writes_output {
            put(&mut body, "bypassDocumentValidation", self.bypass_document_validation);
        }
        put(&mut body, "collation", self.collation.clone());
        put(&mut body, "comment", self.comment.clone());
        put(&mut body, "hint", self.hint.as_ref().map(Hint::to_bson));
        put(&mut body, "let", self.let_vars.clone());
        put(&mut body, "maxTimeMS", millis(self.max_time));
        body
    }
}

/// Rendered arguments of a `mapReduce` command.
#[derive(Debug, Clone, PartialEq)]
pub struct MapReduceCommand {
    /// Map function source.
    pub map: String,
    /// Reduce function source.
    pub reduce: String,
    /// `out` value.
    pub out: Bson,
    /// Input filter.
    pub query: Option<Document>,
    /// Input sort.
    pub sort: Option<Document>,
    /// Maximum number of input documents.
    pub limit: Option<i64>,
    /// Finalize function source.
    pub finalize: Option<String>,
    /// Global variables.
    pub scope: Option<Document>,
    /// Keep intermediate data in JavaScript objects.
    pub js_mode: Option<bool>,
    /// Include timing information.
    pub verbose: Option<bool>,
    /// Collation.
    pub collation: Option<Document>,
    /// Server-side time limit.
    pub max_time: Option<Duration>,
    /// Skip document validation of the output collection.
    pub bypass_document_validation: Option<bool>,
}

impl MapReduceCommand {
    fn to_body(&self, collection: &str) -> Document {
        let mut body = doc! {
            "mapReduce": collection,
            "map": Bson::JavaScriptCode(self.map.clone()),
            "reduce": Bson::JavaScriptCode(self.reduce.clone()),
            "out": self.out.clone(),
        };
        put(&mut body, "query", self.query.clone());
        put(&mut body, "sort", self.sort.clone());
        put(&mut body, "limit", self.limit);
        put(&mut body, "finalize", self.finalize.clone().map(Bson::JavaScriptCode));
        put(&mut body, "scope", self.scope.clone());
        put(&mut body, "jsMode", self.js_mode);
        put(&mut body, "verbose", self.verbose);
        put(&mut body, "collation", self.collation.clone());
        put(&mut body, "maxTimeMS", millis(self.max_time));
        put(&mut body, "bypassDocumentValidation", self.bypass_document_validation);
        body
    }
}

/// Which read a [`ReadOperation`] performs.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadCommand {
    /// `find`.
    Find(FindCommand),
    /// `aggregate` returning a cursor.
    Aggregate(AggregateCommand),
    /// `countDocuments`, executed as an aggregate with a `$group` count.
    CountDocuments {
        /// Query filter.
        filter: Document,
        /// Documents to skip.
        skip: Option<i64>,
        /// Maximum number of documents counted.
        limit: Option<i64>,
        /// Collation.
        collation: Option<Document>,
        /// Index hint.
        hint: Option<Hint>,
        /// Server-side time limit.
        max_time: Option<Duration>,
        /// Comment.
        comment: Option<Bson>,
    },
    /// `count` from collection metadata.
    EstimatedDocumentCount {
        /// Server-side time limit.
        max_time: Option<Duration>,
        /// Comment.
        comment: Option<Bson>,
    },
    /// `distinct`.
    Distinct {
        /// Field whose values are collected.
        key: String,
        /// Query filter.
        filter: Document,
        /// Collation.
        collation: Option<Document>,
        /// Server-side time limit.
        max_time: Option<Duration>,
        /// Comment.
        comment: Option<Bson>,
    },
    /// `listIndexes`.
    ListIndexes {
        /// Documents per batch.
        batch_size: Option<u32>,
        /// Comment.
        comment: Option<Bson>,
    },
    /// Inline `mapReduce`.
    MapReduce(MapReduceCommand),
    /// `getMore` on an open cursor.
    GetMore {
        /// Server cursor id.
        cursor_id: i64,
        /// Documents per batch.
        batch_size: Option<u32>,
    },
}

/// A read operation descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadOperation {
    /// Target collection.
    pub namespace: CollectionNamespace,
    /// The read.
    pub command: ReadCommand,
    /// Read concern; omitted inside transactions.
    pub read_concern: ReadConcern,
    /// Whether the runtime may retry the read once.
    pub retry_requested: bool,
}

impl ReadOperation {
    /// Create a read descriptor with server-default read concern.
    pub fn new(namespace: CollectionNamespace, command: ReadCommand) -> Self {
        Self {
            namespace,
            command,
            read_concern: ReadConcern::server_default(),
            retry_requested: false,
        }
    }

    /// Set the read concern.
    pub fn with_read_concern(mut self, read_concern: ReadConcern) -> Self {
        self.read_concern = read_concern;
        self
    }

    /// Set the retry flag.
    pub fn with_retry(mut self, retry_requested: bool) -> Self {
        self.retry_requested = retry_requested;
        self
    }

    /// Command name, used in logs.
    pub fn name(&self) -> &'static str {
        match self.command {
            ReadCommand::Find(_) => "find",
            ReadCommand::Aggregate(_) => "aggregate",
            ReadCommand::CountDocuments { .. } => "countDocuments",
            ReadCommand::EstimatedDocumentCount { .. } => "count",
            ReadCommand::Distinct { .. } => "distinct",
            ReadCommand::ListIndexes { .. } => "listIndexes",
            ReadCommand::MapReduce(_) => "mapReduce",
            ReadCommand::GetMore { .. } => "getMore",
        }
    }

    /// Batch size for follow-up `getMore` commands.
    pub fn batch_size(&self) -> Option<u32> {
        match &self.command {
            ReadCommand::Find(find) => find.batch_size,
            ReadCommand::Aggregate(aggregate) => aggregate.batch_size,
            ReadCommand::ListIndexes { batch_size, .. } | ReadCommand::GetMore { batch_size, .. } => {
                *batch_size
            }
            _ => None,
        }
    }

    /// The command document, without session fields.
    pub fn to_command(&self) -> Document {
        let collection = self.namespace.collection_name();
        let mut body = match &self.command {
            ReadCommand::Find(find) => find.to_body(collection),
            ReadCommand::Aggregate(aggregate) => aggregate.to_body(collection, false),
            ReadCommand::CountDocuments {
                filter,
                skip,
                limit,
                collation,
                hint,
                max_time,
                comment,
            } => {
                let mut pipeline = vec![doc! { "$match": filter.clone() }];
                if let Some(skip) = skip {
                    pipeline.push(doc! { "$skip": *skip });
                }
                if let Some(limit) = limit {
                    pipeline.push(doc! { "$limit": *limit });
                }
                pipeline.push(doc! { "$group": { "_id": 1, "n": { "$sum": 1 } } });
                let mut body = doc! { "aggregate": collection, "pipeline": pipeline, "cursor": {} };
                put(&mut body, "collation", collation.clone());
                put(&mut body, "hint", hint.as_ref().map(Hint::to_bson));
                put(&mut body, "maxTimeMS", millis(*max_time));
                put(&mut body, "comment", comment.clone());
                body
            }
            ReadCommand::EstimatedDocumentCount { max_time, comment } => {
                let mut body = doc! { "count": collection };
                put(&mut body, "maxTimeMS", millis(*max_time));
                put(&mut body, "comment", comment.clone());
                body
            }
            ReadCommand::Distinct {
                key,
                filter,
                collation,
                max_time,
                comment,
            } => {
                let mut body = doc! { "distinct": collection, "key": key.as_str(), "query": filter.clone() };
                put(&mut body, "collation", collation.clone());
                put(&mut body, "maxTimeMS", millis(*max_time));
                put(&mut body, "comment", comment.clone());
                body
            }
            ReadCommand::ListIndexes { batch_size, comment } => {
                let cursor = match batch_size {
                    Some(size) => doc! { "batchSize": *size as i32 },
                    None => Document::new(),
                };
                let mut body = doc! { "listIndexes": collection, "cursor": cursor };
                put(&mut body, "comment", comment.clone());
                body
            }
            ReadCommand::MapReduce(map_reduce) => map_reduce.to_body(collection),
            ReadCommand::GetMore { cursor_id, batch_size } => {
                let mut body = doc! { "getMore": *cursor_id, "collection": collection };
                put(&mut body, "batchSize", batch_size.map(|n| n as i32));
                return body;
            }
        };
        put(&mut body, "readConcern", self.read_concern.to_document());
        body
    }
}

/// A batch of same-type requests sent as one command.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteBatch {
    /// Command kind.
    pub request_type: WriteRequestType,
    /// Requests in processing order.
    pub requests: Vec<WriteRequest>,
}

/// A bulk write descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkWriteOperation {
    /// Target collection.
    pub namespace: CollectionNamespace,
    /// Requests in caller order.
    pub requests: Vec<WriteRequest>,
    /// Keep list order and stop at the first failure.
    pub ordered: bool,
    /// Skip document validation.
    pub bypass_document_validation: Option<bool>,
    /// Comment.
    pub comment: Option<Bson>,
    /// Variables usable in filters and updates.
    pub let_vars: Option<Document>,
    /// Write concern.
    pub write_concern: WriteConcern,
    /// Whether retryable writes were requested.
    pub retry_requested: bool,
}

impl BulkWriteOperation {
    /// Split the requests into commands.
    ///
    /// Ordered writes keep list order and group only consecutive requests
    /// of the same kind. Unordered writes are grouped by kind.
    pub fn batches(&self) -> Vec<WriteBatch> {
        let mut batches: Vec<WriteBatch> = Vec::new();
        if self.ordered {
            for request in &self.requests {
                match batches.last_mut() {
                    Some(batch) if batch.request_type == request.request_type() => {
                        batch.requests.push(request.clone());
                    }
                    _ => batches.push(WriteBatch {
                        request_type: request.request_type(),
                        requests: vec![request.clone()],
                    }),
                }
            }
        } else {
            for request_type in [
                WriteRequestType::Insert,
                WriteRequestType::Update,
                WriteRequestType::Delete,
            ] {
                let requests: Vec<_> = self
                    .requests
                    .iter()
                    .filter(|r| r.request_type() == request_type)
                    .cloned()
                    .collect();
                if !requests.is_empty() {
                    batches.push(WriteBatch { request_type, requests });
                }
            }
        }
        batches
    }

    /// Whether the runtime may retry: requested and no multi-document request.
    pub fn is_retryable(&self) -> bool {
        self.retry_requested
            && self.requests.iter().all(|r| match &r.kind {
                crate::bulk::WriteRequestKind::Update { multi, .. } => !multi,
                crate::bulk::WriteRequestKind::Delete { limit, .. } => *limit == 1,
                crate::bulk::WriteRequestKind::Insert { .. } => true,
            })
    }

    /// The command document of `batch`.
    pub fn batch_command(&self, batch: &WriteBatch) -> Document {
        let statements: Vec<Document> = batch.requests.iter().map(WriteRequest::to_statement).collect();
        let mut body = doc! {
            batch.request_type.command_name(): self.namespace.collection_name(),
            batch.request_type.statements_field(): statements,
            "ordered": self.ordered,
        };
        if batch.request_type != WriteRequestType::Delete {
            put(&mut body, "bypassDocumentValidation", self.bypass_document_validation);
        }
        put(&mut body, "comment", self.comment.clone());
        if batch.request_type != WriteRequestType::Insert {
            put(&mut body, "let", self.let_vars.clone());
        }
        put(&mut body, "writeConcern", self.write_concern.to_document());
        body
    }
}

/// Modification performed by `findAndModify`.
#[derive(Debug, Clone, PartialEq)]
pub enum FindAndModifyKind {
    /// Remove the document.
    Delete,
    /// Replace the document.
    Replace(Document),
    /// Apply an update document or pipeline.
    Update(Bson),
}

/// Rendered arguments of a `findAndModify` command.
#[derive(Debug, Clone, PartialEq)]
pub struct FindAndModifyCommand {
    /// Query filter.
    pub filter: Document,
    /// Modification.
    pub kind: FindAndModifyKind,
    /// Projection of the returned document.
    pub projection: Option<Document>,
    /// Sort.
    pub sort: Option<Document>,
    /// Insert when nothing matches.
    pub upsert: Option<bool>,
    /// Return the modified document.
    pub return_new: bool,
    /// Filters selecting array elements.
    pub array_filters: Option<Vec<Document>>,
    /// Skip document validation.
    pub bypass_document_validation: Option<bool>,
    /// Collation.
    pub collation: Option<Document>,
    /// Index hint.
    pub hint: Option<Hint>,
    /// Server-side time limit.
    pub max_time: Option<Duration>,
    /// Comment.
    pub comment: Option<Bson>,
    /// Variables usable in the filter and update.
    pub let_vars: Option<Document>,
}

impl FindAndModifyCommand {
    fn to_body(&self, collection: &str) -> Document {
        let mut body = doc! { "findAndModify": collection, "query": self.filter.clone() };
        put(&mut body, "sort", self.sort.clone());
        match &self.kind {
            FindAndModifyKind::Delete => {
                body.insert("remove", true);
            }
            FindAndModifyKind::Replace(replacement) => {
                body.insert("update", replacement.clone());
            }
            FindAndModifyKind::Update(update) => {
                body.insert("update", update.clone());
            }
        }
        if !matches!(self.kind, FindAndModifyKind::Delete) {
            body.insert("new", self.return_new);
            put(&mut body, "upsert", self.upsert);
            put(&mut body, "bypassDocumentValidation", self.bypass_document_validation);
        }
        put(&mut body, "fields", self.projection.clone());
        put(&mut body, "arrayFilters", self.array_filters.clone());
        put(&mut body, "collation", self.collation.clone());
        put(&mut body, "hint", self.hint.as_ref().map(Hint::to_bson));
        put(&mut body, "maxTimeMS", millis(self.max_time));
        put(&mut body, "comment", self.comment.clone());
        put(&mut body, "let", self.let_vars.clone());
        body
    }
}

/// A non-bulk write.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteCommand {
    /// `findAndModify`.
    FindAndModify(FindAndModifyCommand),
    /// `aggregate` ending in `$out` or `$merge`.
    AggregateToCollection(AggregateCommand),
    /// `mapReduce` writing to a collection.
    MapReduceToCollection(MapReduceCommand),
    /// `createIndexes`.
    CreateIndexes {
        /// Index specifications.
        indexes: Vec<Document>,
        /// Members that must build the index before it is ready.
        commit_quorum: Option<Bson>,
        /// Server-side time limit.
        max_time: Option<Duration>,
        /// Comment.
        comment: Option<Bson>,
    },
    /// `dropIndexes`; `"*"` drops all but `_id`.
    DropIndexes {
        /// Index name.
        name: String,
        /// Server-side time limit.
        max_time: Option<Duration>,
        /// Comment.
        comment: Option<Bson>,
    },
    /// `createSearchIndexes`.
    CreateSearchIndexes {
        /// `{ name, definition }` documents.
        indexes: Vec<Document>,
    },
    /// `updateSearchIndex`.
    UpdateSearchIndex {
        /// Index name.
        name: String,
        /// New definition.
        definition: Document,
    },
    /// `dropSearchIndex`.
    DropSearchIndex {
        /// Index name.
        name: String,
    },
}

/// A single-command write descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteCommandOperation {
    /// Target collection.
    pub namespace: CollectionNamespace,
    /// The write.
    pub command: WriteCommand,
    /// Read concern, for writes that also read.
    pub read_concern: ReadConcern,
    /// Write concern.
    pub write_concern: WriteConcern,
    /// Whether the runtime may retry the write once.
    pub retry_requested: bool,
}

impl WriteCommandOperation {
    /// Create a write descriptor with server defaults.
    pub fn new(namespace: CollectionNamespace, command: WriteCommand) -> Self {
        Self {
            namespace,
            command,
            read_concern: ReadConcern::server_default(),
            write_concern: WriteConcern::default(),
            retry_requested: false,
        }
    }

    /// The command document, without session fields.
    pub fn to_command(&self) -> Document {
        let collection = self.namespace.collection_name();
        let mut body = match &self.command {
            WriteCommand::FindAndModify(command) => command.to_body(collection),
            WriteCommand::AggregateToCollection(command) => {
                let mut body = command.to_body(collection, true);
                put(&mut body, "readConcern", self.read_concern.to_document());
                body
            }
            WriteCommand::MapReduceToCollection(command) => command.to_body(collection),
            WriteCommand::CreateIndexes {
                indexes,
                commit_quorum,
                max_time,
                comment,
            } => {
                let mut body = doc! { "createIndexes": collection, "indexes": indexes.clone() };
                put(&mut body, "commitQuorum", commit_quorum.clone());
                put(&mut body, "maxTimeMS", millis(*max_time));
                put(&mut body, "comment", comment.clone());
                body
            }
            WriteCommand::DropIndexes { name, max_time, comment } => {
                let mut body = doc! { "dropIndexes": collection, "index": name.as_str() };
                put(&mut body, "maxTimeMS", millis(*max_time));
                put(&mut body, "comment", comment.clone());
                body
            }
            WriteCommand::CreateSearchIndexes { indexes } => {
                doc! { "createSearchIndexes": collection, "indexes": indexes.clone() }
            }
            WriteCommand::UpdateSearchIndex { name, definition } => doc! {
                "updateSearchIndex": collection,
                "name": name.as_str(),
                "definition": definition.clone(),
            },
            WriteCommand::DropSearchIndex { name } => {
                doc! { "dropSearchIndex": collection, "name": name.as_str() }
            }
        };
        put(&mut body, "writeConcern", self.write_concern.to_document());
        body
    }
}

/// A write operation descriptor.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOperation {
    /// Insert, update and delete requests.
    BulkWrite(BulkWriteOperation),
    /// Any other write command.
    Command(WriteCommandOperation),
}

impl WriteOperation {
    /// Target collection.
    pub fn namespace(&self) -> &CollectionNamespace {
        match self {
            Self::BulkWrite(op) => &op.namespace,
            Self::Command(op) => &op.namespace,
        }
    }

    /// Command name, used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::BulkWrite(_) => "bulkWrite",
            Self::Command(op) => match op.command {
                WriteCommand::FindAndModify(_) => "findAndModify",
                WriteCommand::AggregateToCollection(_) => "aggregate",
                WriteCommand::MapReduceToCollection(_) => "mapReduce",
                WriteCommand::CreateIndexes { .. } => "createIndexes",
                WriteCommand::DropIndexes { .. } => "dropIndexes",
                WriteCommand::CreateSearchIndexes { .. } => "createSearchIndexes",
                WriteCommand::UpdateSearchIndex { .. } => "updateSearchIndex",
                WriteCommand::DropSearchIndex { .. } => "dropSearchIndex",
            },
        }
    }
}

/// One batch of cursor results.
#[derive(Debug, Clone, PartialEq)]
pub struct CursorBatch {
    /// Server cursor id; `0` when exhausted.
    pub cursor_id: i64,
    /// Namespace of the cursor.
    pub namespace: CollectionNamespace,
    /// Documents of the batch.
    pub documents: Vec<Document>,
}

impl CursorBatch {
    /// A batch with no open server cursor.
    pub fn exhausted(namespace: CollectionNamespace, documents: Vec<Document>) -> Self {
        Self {
            cursor_id: 0,
            namespace,
            documents,
        }
    }

    /// Parse a `{ cursor: { id, ns, firstBatch | nextBatch } }` reply.
    pub fn from_reply(reply: &Document, fallback: &CollectionNamespace) -> ClientResult<Self> {
        let cursor = reply
            .get_document("cursor")
            .map_err(|_| ClientError::execution("reply has no cursor"))?;
        let cursor_id = match cursor.get("id") {
            Some(Bson::Int64(id)) => *id,
            Some(Bson::Int32(id)) => i64::from(*id),
            _ => return Err(ClientError::execution("cursor reply has no id")),
        };
        let namespace = match cursor.get_str("ns") {
            Ok(ns) => CollectionNamespace::parse(ns)?,
            Err(_) => fallback.clone(),
        };
        let batch = cursor
            .get_array("firstBatch")
            .or_else(|_| cursor.get_array("nextBatch"))
            .map_err(|_| ClientError::execution("cursor reply has no batch"))?;
        let documents = batch
            .iter()
            .map(|value| match value {
                Bson::Document(document) => Ok(document.clone()),
                other => Err(ClientError::execution(format!(
                    "cursor batch contains a non-document {:?}",
                    other.element_type()
                ))),
            })
            .collect::<ClientResult<Vec<_>>>()?;
        Ok(Self {
            cursor_id,
            namespace,
            documents,
        })
    }
}

/// Output of an executed operation.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationOutput {
    /// First batch of a cursor.
    Cursor(CursorBatch),
    /// A count.
    Count(i64),
    /// Distinct values.
    Values(Vec<Bson>),
    /// The document returned by `findAndModify`.
    Document(Option<Document>),
    /// Counts of a bulk write.
    BulkWrite(BulkWriteOutcome),
    /// Names of created indexes.
    IndexNames(Vec<String>),
    /// The command succeeded without a payload.
    Acknowledged,
}

impl OperationOutput {
    fn unexpected(&self, expected: &str) -> ClientError {
        ClientError::execution(format!("expected {} output, got {:?}", expected, self))
    }

    /// Take the cursor batch.
    pub fn into_cursor(self) -> ClientResult<CursorBatch> {
        match self {
            Self::Cursor(batch) => Ok(batch),
            other => Err(other.unexpected("cursor")),
        }
    }

    /// Take the count.
    pub fn into_count(self) -> ClientResult<i64> {
        match self {
            Self::Count(count) => Ok(count),
            other => Err(other.unexpected("count")),
        }
    }

    /// Take the distinct values.
    pub fn into_values(self) -> ClientResult<Vec<Bson>> {
        match self {
            Self::Values(values) => Ok(values),
            other => Err(other.unexpected("values")),
        }
    }

    /// Take the returned document.
    pub fn into_document(self) -> ClientResult<Option<Document>> {
        match self {
            Self::Document(document) => Ok(document),
            other => Err(other.unexpected("document")),
        }
    }

    /// Take the bulk write outcome.
    pub fn into_bulk_write(self) -> ClientResult<BulkWriteOutcome> {
        match self {
            Self::BulkWrite(outcome) => Ok(outcome),
            other => Err(other.unexpected("bulk write")),
        }
    }

    /// Take the index names.
    pub fn into_index_names(self) -> ClientResult<Vec<String>> {
        match self {
            Self::IndexNames(names) => Ok(names),
            other => Err(other.unexpected("index names")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bulk::WriteRequestKind;
    use docforge_render::DatabaseNamespace;
    use pretty_assertions::assert_eq;

    fn namespace() -> CollectionNamespace {
        CollectionNamespace::parse("shop.orders").unwrap()
    }

    fn insert(id: usize) -> WriteRequest {
        WriteRequest {
            correlation_id: id,
            kind: WriteRequestKind::Insert { document: doc! { "_id": id as i32 } },
        }
    }

    fn delete(id: usize) -> WriteRequest {
        WriteRequest {
            correlation_id: id,
            kind: WriteRequestKind::Delete {
                filter: doc! { "_id": id as i32 },
                limit: 1,
                collation: None,
                hint: None,
            },
        }
    }

    fn bulk(ordered: bool) -> BulkWriteOperation {
        BulkWriteOperation {
            namespace: namespace(),
            requests: vec![insert(0), delete(1), insert(2)],
            ordered,
            bypass_document_validation: None,
            comment: None,
            let_vars: None,
            write_concern: WriteConcern::majority(),
            retry_requested: true,
        }
    }

    #[test]
    fn test_find_command() {
        let op = ReadOperation::new(
            namespace(),
            ReadCommand::Find(FindCommand {
                filter: doc! { "x": 1 },
                sort: Some(doc! { "x": -1 }),
                limit: Some(5),
                max_time: Some(Duration::from_secs(1)),
                ..FindCommand::default()
            }),
        )
        .with_read_concern(ReadConcern::majority());

        assert_eq!(
            op.to_command(),
            doc! {
                "find": "orders",
                "filter": { "x": 1 },
                "sort": { "x": -1 },
                "limit": 5_i64,
                "maxTimeMS": 1000_i64,
                "readConcern": { "level": "majority" },
            }
        );
    }

    #[test]
    fn test_count_documents_pipeline() {
        let op = ReadOperation::new(
            namespace(),
            ReadCommand::CountDocuments {
                filter: doc! { "a": 1 },
                skip: Some(2),
                limit: None,
                collation: None,
                hint: None,
                max_time: None,
                comment: None,
            },
        );
        assert_eq!(
            op.to_command().get_array("pipeline").unwrap().len(),
            3
        );
        assert_eq!(op.name(), "countDocuments");
    }

    #[test]
    fn test_ordered_batches_keep_runs() {
        let batches = bulk(true).batches();
        let kinds: Vec<_> = batches.iter().map(|b| b.request_type).collect();
        assert_eq!(
            kinds,
            vec![WriteRequestType::Insert, WriteRequestType::Delete, WriteRequestType::Insert]
        );
    }

    #[test]
    fn test_unordered_batches_group_by_kind() {
        let batches = bulk(false).batches();
        assert_eq!(batches.len(), 2);
        let ids: Vec<_> = batches[0].requests.iter().map(|r| r.correlation_id).collect();
        assert_eq!(ids, vec![0, 2]);
    }

    #[test]
    fn test_batch_command() {
        let op = bulk(true);
        let batches = op.batches();
        assert_eq!(
            op.batch_command(&batches[1]),
            doc! {
                "delete": "orders",
                "deletes": [{ "q": { "_id": 1 }, "limit": 1 }],
                "ordered": true,
                "writeConcern": { "w": "majority" },
            }
        );
        assert!(op.is_retryable());
    }

    #[test]
    fn test_find_and_modify_delete_omits_new() {
        let op = WriteCommandOperation::new(
            namespace(),
            WriteCommand::FindAndModify(FindAndModifyCommand {
                filter: doc! { "a": 1 },
                kind: FindAndModifyKind::Delete,
                projection: None,
                sort: None,
                upsert: None,
                return_new: false,
                array_filters: None,
                bypass_document_validation: None,
                collation: None,
                hint: None,
                max_time: None,
                comment: None,
                let_vars: None,
            }),
        );
        assert_eq!(
            op.to_command(),
            doc! { "findAndModify": "orders", "query": { "a": 1 }, "remove": true }
        );
    }

    #[test]
    fn test_cursor_reply() {
        let reply = doc! {
            "cursor": { "id": 42_i64, "ns": "shop.orders", "firstBatch": [{ "a": 1 }] },
            "ok": 1,
        };
        let fallback = DatabaseNamespace::new("x").unwrap().collection("y").unwrap();
        let batch = CursorBatch::from_reply(&reply, &fallback).unwrap();
        assert_eq!(batch.cursor_id, 42);
        assert_eq!(batch.namespace, namespace());
        assert_eq!(batch.documents, vec![doc! { "a": 1 }]);
    }
}
