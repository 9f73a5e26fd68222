//! Typed collection facade.
//!
//! Every operation follows the same shape: validate and render the caller's
//! definitions into a descriptor, pick the session, then hand the descriptor
//! to the executor. Rendering is shared by the blocking and the `_async`
//! entry points, so both send identical commands.
//!
//! ```rust,ignore
//! let people = database.collection::<Person>("people")?;
//! let ctx = OperationContext::new();
//!
//! let adults = people.count_documents(
//!     &FilterDefinition::gte("age", 18),
//!     &CountOptions::default(),
//!     &ctx,
//! )?;
//!
//! let mut cursor = people.find(
//!     &FilterDefinition::eq("name", "Ada"),
//!     &FindOptions::<Person>::default().limit(10),
//!     &ctx,
//! )?;
//! while let Some(person) = cursor.try_next()? {
//!     println!("{:?}", person);
//! }
//! ```
//!
//! Async entry points return `ClientResult<BoxFuture<..>>`: argument,
//! render and transaction-policy errors come back from the call itself,
//! only execution errors from the future.

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use bson::{Bson, Document};
use docforge_render::{
    CollectionNamespace, ExpressionTranslator, FieldDefinition, FilterDefinition, PipelineDefinition,
    ProjectionDefinition, RenderContext, RenderError, RenderedPipeline, RenderedUpdate,
    SerializerRegistry, SortDefinition, UpdateDefinition,
};
use futures::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::bulk::{
    BulkWriteException, BulkWriteResult, DeleteModel, UpdateModel, WriteModel, WriteRequest,
    WriteRequestKind, insert_request, render_update, replacement_document,
};
use crate::cluster::{Cluster, ReadBinding};
use crate::config::{ClientSettings, CollectionSettings, ReadConcern, ReadPreference, WriteConcern};
use crate::cursor::{AggregateCursor, Cursor, DeferredCursor};
use crate::error::{ClientError, ClientResult, WriteException};
use crate::executor::OperationExecutor;
use crate::index::{IndexManager, SearchIndexManager};
use crate::operation::{
    AggregateCommand, BulkWriteOperation, FindAndModifyCommand, FindAndModifyKind, FindCommand,
    MapReduceCommand, OperationOutput, ReadCommand, ReadOperation, WriteCommand,
    WriteCommandOperation, WriteOperation,
};
use crate::options::{
    AggregateOptions, BulkWriteOptions, CountOptions, DeleteOptions, DistinctOptions,
    EstimatedDocumentCountOptions, FindOneAndDeleteOptions, FindOneAndReplaceOptions,
    FindOneAndUpdateOptions, FindOptions, Hint, InsertManyOptions, InsertOneOptions, MapReduceOptions,
    ReplaceOptions, ReturnDocument, UpdateOptions,
};
use crate::results::{DeleteResult, InsertManyResult, InsertOneResult, UpdateResult};
use crate::session::{SessionHandle, SessionOptions};

/// Per-call session and cancellation.
#[derive(Debug, Clone, Default)]
pub struct OperationContext<'a> {
    /// Explicit session; an implicit one is used when `None`.
    pub session: Option<&'a SessionHandle>,
    /// Observed before any I/O starts.
    pub cancellation: CancellationToken,
}

impl<'a> OperationContext<'a> {
    /// No session, never cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run under an explicit session.
    pub fn with_session(session: &'a SessionHandle) -> Self {
        Self {
            session: Some(session),
            cancellation: CancellationToken::new(),
        }
    }

    /// Use a cancellation token.
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }
}

/// Concerns in effect for one call.
#[derive(Debug, Clone)]
pub(crate) struct CallSettings {
    pub(crate) read_preference: ReadPreference,
    pub(crate) read_concern: ReadConcern,
    pub(crate) write_concern: WriteConcern,
}

enum SessionLease<'s> {
    Implicit(SessionHandle),
    Explicit(&'s SessionHandle),
}

impl SessionLease<'_> {
    fn session(&self) -> &SessionHandle {
        match self {
            Self::Implicit(session) => session,
            Self::Explicit(session) => session,
        }
    }
}

enum AggregatePlan {
    Cursor(ReadOperation),
    ToCollection {
        write: WriteOperation,
        read: ReadOperation,
    },
}

/// A typed collection.
pub struct Collection<T> {
    namespace: CollectionNamespace,
    settings: CollectionSettings,
    client_settings: Arc<ClientSettings>,
    registry: Arc<SerializerRegistry>,
    translator: Option<Arc<dyn ExpressionTranslator>>,
    cluster: Arc<dyn Cluster>,
    executor: Arc<dyn OperationExecutor>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Collection<T> {
    fn clone(&self) -> Self {
        Self {
            namespace: self.namespace.clone(),
            settings: self.settings.clone(),
            client_settings: Arc::clone(&self.client_settings),
            registry: Arc::clone(&self.registry),
            translator: self.translator.clone(),
            cluster: Arc::clone(&self.cluster),
            executor: Arc::clone(&self.executor),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Collection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("namespace", &self.namespace)
            .field("settings", &self.settings)
            .finish()
    }
}

impl<T> Collection<T> {
    /// Create a collection over a cluster and an executor.
    pub fn new(
        namespace: CollectionNamespace,
        client_settings: Arc<ClientSettings>,
        registry: Arc<SerializerRegistry>,
        cluster: Arc<dyn Cluster>,
        executor: Arc<dyn OperationExecutor>,
    ) -> Self {
        Self {
            namespace,
            settings: client_settings.collection_settings(),
            client_settings,
            registry,
            translator: None,
            cluster,
            executor,
            _marker: PhantomData,
        }
    }

    /// The collection namespace.
    pub fn namespace(&self) -> &CollectionNamespace {
        &self.namespace
    }

    /// The effective collection settings.
    pub fn settings(&self) -> &CollectionSettings {
        &self.settings
    }

    /// Translate native expressions with `translator`.
    pub fn with_translator(&self, translator: Arc<dyn ExpressionTranslator>) -> Self {
        let mut collection = self.clone();
        collection.translator = Some(translator);
        collection
    }

    /// A copy of this collection with another read preference.
    pub fn with_read_preference(&self, read_preference: ReadPreference) -> Self {
        let mut collection = self.clone();
        collection.settings.read_preference = read_preference;
        collection
    }

    /// A copy of this collection with another read concern.
    pub fn with_read_concern(&self, read_concern: ReadConcern) -> Self {
        let mut collection = self.clone();
        collection.settings.read_concern = read_concern;
        collection
    }

    /// A copy of this collection with another write concern.
    pub fn with_write_concern(&self, write_concern: WriteConcern) -> Self {
        let mut collection = self.clone();
        collection.settings.write_concern = write_concern;
        collection
    }

    /// A view of the same collection over another document type.
    pub fn clone_with_type<U>(&self) -> Collection<U> {
        Collection {
            namespace: self.namespace.clone(),
            settings: self.settings.clone(),
            client_settings: Arc::clone(&self.client_settings),
            registry: Arc::clone(&self.registry),
            translator: self.translator.clone(),
            cluster: Arc::clone(&self.cluster),
            executor: Arc::clone(&self.executor),
            _marker: PhantomData,
        }
    }

    /// Index management.
    pub fn indexes(&self) -> IndexManager<'_, T> {
        IndexManager::new(self)
    }

    /// Search index management.
    pub fn search_indexes(&self) -> SearchIndexManager<'_, T> {
        SearchIndexManager::new(self)
    }

    // Execution plumbing shared with the index managers.

    /// Concerns for a call, enforcing the transaction constraints.
    pub(crate) fn call_settings(
        &self,
        ctx: &OperationContext<'_>,
        reading: bool,
    ) -> ClientResult<CallSettings> {
        let transaction = ctx
            .session
            .filter(|session| session.is_in_transaction())
            .map(|session| session.transaction_options().unwrap_or_default());

        let Some(transaction) = transaction else {
            return Ok(CallSettings {
                read_preference: self.settings.read_preference.clone(),
                read_concern: self.settings.read_concern,
                write_concern: self.settings.write_concern.clone(),
            });
        };

        let read_preference = transaction
            .read_preference
            .unwrap_or_else(|| self.settings.read_preference.clone());
        if reading && !read_preference.is_primary() {
            return Err(ClientError::transaction_policy(format!(
                "read preference in a transaction must be primary, not {}",
                read_preference.mode.as_str()
            )));
        }
        Ok(CallSettings {
            read_preference,
            read_concern: ReadConcern::server_default(),
            write_concern: WriteConcern::acknowledged(),
        })
    }

    pub(crate) fn read_operation(&self, command: ReadCommand, call: &CallSettings) -> ReadOperation {
        ReadOperation::new(self.namespace.clone(), command)
            .with_read_concern(call.read_concern)
            .with_retry(self.client_settings.retry_reads)
    }

    pub(crate) fn write_operation(&self, command: WriteCommand, call: &CallSettings) -> WriteOperation {
        WriteOperation::Command(WriteCommandOperation {
            namespace: self.namespace.clone(),
            command,
            read_concern: call.read_concern,
            write_concern: call.write_concern.clone(),
            retry_requested: self.client_settings.retry_writes,
        })
    }

    fn lease<'s>(&self, ctx: &OperationContext<'s>) -> ClientResult<SessionLease<'s>> {
        if ctx.cancellation.is_cancelled() {
            return Err(ClientError::Cancelled);
        }
        match ctx.session {
            Some(session) => {
                session.ensure_active()?;
                Ok(SessionLease::Explicit(session))
            }
            None => Ok(SessionLease::Implicit(
                self.cluster.start_session(SessionOptions::default(), true),
            )),
        }
    }

    pub(crate) fn execute_read(
        &self,
        ctx: &OperationContext<'_>,
        read_preference: &ReadPreference,
        operation: &ReadOperation,
    ) -> ClientResult<(OperationOutput, ReadBinding)> {
        let lease = self.lease(ctx)?;
        let binding = self.cluster.read_binding(lease.session(), read_preference)?;
        debug!(namespace = %operation.namespace, operation = operation.name(), "executing read");
        let output = self.executor.execute_read(&binding, operation, &ctx.cancellation)?;
        lease.session().mark_transaction_in_progress();
        Ok((output, binding))
    }

    pub(crate) fn execute_read_async<'a>(
        &'a self,
        ctx: OperationContext<'a>,
        read_preference: ReadPreference,
        operation: ReadOperation,
    ) -> BoxFuture<'a, ClientResult<(OperationOutput, ReadBinding)>> {
        Box::pin(async move {
            let lease = self.lease(&ctx)?;
            let binding = self.cluster.read_binding(lease.session(), &read_preference)?;
            debug!(namespace = %operation.namespace, operation = operation.name(), "executing read");
            let output = self
                .executor
                .execute_read_async(&binding, &operation, &ctx.cancellation)
                .await?;
            lease.session().mark_transaction_in_progress();
            Ok((output, binding))
        })
    }

    /// Run a write; with `fork`, also return a fork of the session it ran under.
    pub(crate) fn execute_write(
        &self,
        ctx: &OperationContext<'_>,
        operation: &WriteOperation,
        fork: bool,
    ) -> ClientResult<(OperationOutput, Option<SessionHandle>)> {
        let lease = self.lease(ctx)?;
        let output = {
            let binding = self.cluster.write_binding(lease.session())?;
            debug!(namespace = %operation.namespace(), operation = operation.name(), "executing write");
            self.executor.execute_write(&binding, operation, &ctx.cancellation)?
        };
        lease.session().mark_transaction_in_progress();
        let fork = if fork { Some(lease.session().fork()?) } else { None };
        Ok((output, fork))
    }

    pub(crate) fn execute_write_async<'a>(
        &'a self,
        ctx: OperationContext<'a>,
        operation: WriteOperation,
        fork: bool,
    ) -> BoxFuture<'a, ClientResult<(OperationOutput, Option<SessionHandle>)>> {
        Box::pin(async move {
            let lease = self.lease(&ctx)?;
            let output = {
                let binding = self.cluster.write_binding(lease.session())?;
                debug!(namespace = %operation.namespace(), operation = operation.name(), "executing write");
                self.executor
                    .execute_write_async(&binding, &operation, &ctx.cancellation)
                    .await?
            };
            lease.session().mark_transaction_in_progress();
            let fork = if fork { Some(lease.session().fork()?) } else { None };
            Ok((output, fork))
        })
    }

    pub(crate) fn cursor<R: DeserializeOwned>(
        &self,
        output: OperationOutput,
        binding: ReadBinding,
        batch_size: Option<u32>,
        ctx: &OperationContext<'_>,
    ) -> ClientResult<Cursor<R>> {
        Ok(Cursor::new(
            Arc::clone(&self.executor),
            binding,
            output.into_cursor()?,
            batch_size,
            ctx.cancellation.clone(),
        ))
    }

    fn defer<R: DeserializeOwned>(
        &self,
        fork: Option<SessionHandle>,
        read: ReadOperation,
        ctx: &OperationContext<'_>,
    ) -> ClientResult<DeferredCursor<R>> {
        let fork = fork.ok_or_else(|| ClientError::execution("write did not fork its session"))?;
        Ok(DeferredCursor::new(
            Arc::clone(&self.cluster),
            Arc::clone(&self.executor),
            fork,
            read,
            ctx.cancellation.clone(),
        ))
    }

    fn bulk_result(
        &self,
        result: ClientResult<OperationOutput>,
        request_count: usize,
    ) -> ClientResult<BulkWriteResult> {
        match result {
            Ok(output) => BulkWriteResult::from_outcome(&output.into_bulk_write()?, request_count),
            Err(ClientError::BulkWriteOperation(error)) => {
                let exception = BulkWriteException::from_operation_error(&error, request_count)?;
                warn!(
                    namespace = %self.namespace,
                    failed = exception.write_errors.len(),
                    unprocessed = exception.unprocessed_requests.len(),
                    write_concern_error = exception.write_concern_error.is_some(),
                    "bulk write partially failed"
                );
                Err(ClientError::BulkWrite(Box::new(exception)))
            }
            Err(e) => Err(e),
        }
    }

    fn bulk_operation(
        &self,
        requests: Vec<WriteRequest>,
        ordered: bool,
        bypass_document_validation: Option<bool>,
        comment: Option<Bson>,
        let_vars: Option<Document>,
        call: &CallSettings,
    ) -> WriteOperation {
        WriteOperation::BulkWrite(BulkWriteOperation {
            namespace: self.namespace.clone(),
            requests,
            ordered,
            bypass_document_validation,
            comment,
            let_vars,
            write_concern: call.write_concern.clone(),
            retry_requested: self.client_settings.retry_writes,
        })
    }

    fn run_bulk(
        &self,
        operation: WriteOperation,
        request_count: usize,
        ctx: &OperationContext<'_>,
    ) -> ClientResult<BulkWriteResult> {
        let result = self.execute_write(ctx, &operation, false).map(|(output, _)| output);
        self.bulk_result(result, request_count)
    }

    fn run_bulk_async<'a>(
        &'a self,
        operation: WriteOperation,
        request_count: usize,
        ctx: &OperationContext<'a>,
    ) -> BoxFuture<'a, ClientResult<BulkWriteResult>> {
        let write = self.execute_write_async(ctx.clone(), operation, false);
        Box::pin(async move {
            let result = write.await.map(|(output, _)| output);
            self.bulk_result(result, request_count)
        })
    }
}

/// Translate a one-request bulk failure into a single-document write error.
fn single_write(result: ClientResult<BulkWriteResult>) -> ClientResult<BulkWriteResult> {
    result.map_err(|e| match e {
        ClientError::BulkWrite(exception) => {
            ClientError::Write(Box::new(WriteException::from_bulk(&exception)))
        }
        other => other,
    })
}

/// Attach the caller's models to a correlated bulk failure.
fn with_caller_models<T: Clone + Send + Sync + 'static>(
    result: ClientResult<BulkWriteResult>,
    models: &[WriteModel<T>],
) -> ClientResult<BulkWriteResult> {
    result.map_err(|e| match e {
        ClientError::BulkWrite(exception) => {
            ClientError::BulkWrite(Box::new((*exception).with_models(models)))
        }
        other => other,
    })
}

fn count_from(output: OperationOutput) -> ClientResult<i64> {
    match output {
        OperationOutput::Count(count) => Ok(count),
        OperationOutput::Cursor(batch) => match batch.documents.first() {
            None => Ok(0),
            Some(document) => match document.get("n") {
                Some(Bson::Int32(n)) => Ok(i64::from(*n)),
                Some(Bson::Int64(n)) => Ok(*n),
                Some(Bson::Double(n)) => Ok(*n as i64),
                _ => Err(ClientError::execution("count reply has no 'n' field")),
            },
        },
        other => other.into_count(),
    }
}

fn decode_values<V: DeserializeOwned>(output: OperationOutput) -> ClientResult<Vec<V>> {
    output
        .into_values()?
        .into_iter()
        .map(|value| bson::from_bson(value).map_err(ClientError::from))
        .collect()
}

fn decode_document<R: DeserializeOwned>(output: OperationOutput) -> ClientResult<Option<R>> {
    Ok(output.into_document()?.map(bson::from_document).transpose()?)
}

fn integer(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(n) => Some(i64::from(*n)),
        Bson::Int64(n) => Some(*n),
        Bson::Double(n) if n.fract() == 0.0 => Some(*n as i64),
        _ => None,
    }
}

/// Fold stages following `$out`/`$merge` into a find, when they appear at
/// most once each in `$match`, `$sort`, `$skip`, `$limit`, `$project` order.
fn trailing_find(stages: &[Document]) -> Option<FindCommand> {
    let mut find = FindCommand::default();
    let mut phase = 0;
    for stage in stages {
        if stage.len() != 1 {
            return None;
        }
        let (name, value) = stage.iter().next()?;
        let next = match name.as_str() {
            "$match" => 1,
            "$sort" => 2,
            "$skip" => 3,
            "$limit" => 4,
            "$project" => 5,
            _ => return None,
        };
        if next <= phase {
            return None;
        }
        phase = next;
        match next {
            1 => find.filter = value.as_document()?.clone(),
            2 => find.sort = Some(value.as_document()?.clone()),
            3 => find.skip = Some(integer(value)?),
            4 => find.limit = Some(integer(value)?),
            _ => find.projection = Some(value.as_document()?.clone()),
        }
    }
    Some(find)
}

impl<T: 'static> Collection<T> {
    pub(crate) fn render_context(&self) -> RenderContext {
        let context = RenderContext::for_type::<T>(Arc::clone(&self.registry));
        match &self.translator {
            Some(translator) => context.with_translator(Arc::clone(translator)),
            None => context,
        }
    }

    fn render_projection<P: 'static>(
        &self,
        projection: Option<&ProjectionDefinition<T, P>>,
        context: &RenderContext,
        operation: &str,
    ) -> ClientResult<Option<Document>> {
        let Some(projection) = projection else {
            return Ok(None);
        };
        let rendered = projection.render(&context.for_find(true))?;
        if rendered.is_client_side() {
            return Err(RenderError::client_side_projection(operation).into());
        }
        Ok(rendered.document)
    }

    fn render_sort(
        &self,
        sort: Option<&SortDefinition<T>>,
        context: &RenderContext,
    ) -> ClientResult<Option<Document>> {
        Ok(sort.map(|s| s.render(context)).transpose()?)
    }

    fn render_requests(&self, requests: &[WriteModel<T>]) -> ClientResult<Vec<WriteRequest>>
    where
        T: Serialize,
    {
        if requests.is_empty() {
            return Err(ClientError::argument("requests must not be empty"));
        }
        let context = self.render_context();
        requests
            .iter()
            .enumerate()
            .map(|(index, model)| model.render(&context, index))
            .collect()
    }

    // count_documents

    fn prepare_count_documents(
        &self,
        filter: &FilterDefinition<T>,
        options: &CountOptions,
        call: &CallSettings,
    ) -> ClientResult<ReadOperation> {
        debug!(namespace = %self.namespace, operation = "countDocuments", "rendering operation");
        let command = ReadCommand::CountDocuments {
            filter: filter.render(&self.render_context())?,
            skip: options.skip,
            limit: options.limit,
            collation: options.collation.clone(),
            hint: options.hint.clone(),
            max_time: options.max_time,
            comment: options.comment.clone(),
        };
        Ok(self.read_operation(command, call))
    }

    /// Count the documents matching `filter`.
    pub fn count_documents(
        &self,
        filter: &FilterDefinition<T>,
        options: &CountOptions,
        ctx: &OperationContext<'_>,
    ) -> ClientResult<i64> {
        let call = self.call_settings(ctx, true)?;
        let operation = self.prepare_count_documents(filter, options, &call)?;
        let (output, _binding) = self.execute_read(ctx, &call.read_preference, &operation)?;
        count_from(output)
    }

    /// Count the documents matching `filter`.
    pub fn count_documents_async<'a>(
        &'a self,
        filter: &FilterDefinition<T>,
        options: &CountOptions,
        ctx: &OperationContext<'a>,
    ) -> ClientResult<BoxFuture<'a, ClientResult<i64>>> {
        let call = self.call_settings(ctx, true)?;
        let operation = self.prepare_count_documents(filter, options, &call)?;
        let read = self.execute_read_async(ctx.clone(), call.read_preference, operation);
        Ok(Box::pin(async move {
            let (output, _binding) = read.await?;
            count_from(output)
        }))
    }

    // estimated_document_count

    fn prepare_estimated_count(
        &self,
        options: &EstimatedDocumentCountOptions,
        call: &CallSettings,
    ) -> ReadOperation {
        debug!(namespace = %self.namespace, operation = "count", "rendering operation");
        self.read_operation(
            ReadCommand::EstimatedDocumentCount {
                max_time: options.max_time,
                comment: options.comment.clone(),
            },
            call,
        )
    }

    /// Count all documents from collection metadata.
    pub fn estimated_document_count(
        &self,
        options: &EstimatedDocumentCountOptions,
        ctx: &OperationContext<'_>,
    ) -> ClientResult<i64> {
        let call = self.call_settings(ctx, true)?;
        let operation = self.prepare_estimated_count(options, &call);
        let (output, _binding) = self.execute_read(ctx, &call.read_preference, &operation)?;
        count_from(output)
    }

    /// Count all documents from collection metadata.
    pub fn estimated_document_count_async<'a>(
        &'a self,
        options: &EstimatedDocumentCountOptions,
        ctx: &OperationContext<'a>,
    ) -> ClientResult<BoxFuture<'a, ClientResult<i64>>> {
        let call = self.call_settings(ctx, true)?;
        let operation = self.prepare_estimated_count(options, &call);
        let read = self.execute_read_async(ctx.clone(), call.read_preference, operation);
        Ok(Box::pin(async move {
            let (output, _binding) = read.await?;
            count_from(output)
        }))
    }

    // find

    fn prepare_find<P: 'static>(
        &self,
        filter: &FilterDefinition<T>,
        options: &FindOptions<T, P>,
        first_only: bool,
        call: &CallSettings,
    ) -> ClientResult<ReadOperation> {
        debug!(namespace = %self.namespace, operation = "find", "rendering operation");
        let context = self.render_context();
        let mut command = FindCommand {
            filter: filter.render(&context.for_find(true))?,
            projection: self.render_projection(options.projection.as_ref(), &context, "find")?,
            sort: self.render_sort(options.sort.as_ref(), &context)?,
            skip: options.skip,
            limit: options.limit,
            batch_size: options.batch_size,
            single_batch: options.single_batch.then_some(true),
            collation: options.collation.clone(),
            hint: options.hint.clone(),
            max_time: options.max_time,
            comment: options.comment.clone(),
            allow_disk_use: options.allow_disk_use,
            no_cursor_timeout: options.no_cursor_timeout,
            let_vars: options.let_vars.clone(),
        };
        if first_only {
            command.limit = Some(1);
            command.single_batch = Some(true);
        }
        Ok(self.read_operation(ReadCommand::Find(command), call))
    }

    /// Find the documents matching `filter`.
    pub fn find<P: DeserializeOwned + 'static>(
        &self,
        filter: &FilterDefinition<T>,
        options: &FindOptions<T, P>,
        ctx: &OperationContext<'_>,
    ) -> ClientResult<Cursor<P>> {
        let call = self.call_settings(ctx, true)?;
        let operation = self.prepare_find(filter, options, false, &call)?;
        let (output, binding) = self.execute_read(ctx, &call.read_preference, &operation)?;
        self.cursor(output, binding, operation.batch_size(), ctx)
    }

    /// Find the documents matching `filter`.
    pub fn find_async<'a, P: DeserializeOwned + 'static>(
        &'a self,
        filter: &FilterDefinition<T>,
        options: &FindOptions<T, P>,
        ctx: &OperationContext<'a>,
    ) -> ClientResult<BoxFuture<'a, ClientResult<Cursor<P>>>> {
        let call = self.call_settings(ctx, true)?;
        let operation = self.prepare_find(filter, options, false, &call)?;
        let batch_size = operation.batch_size();
        let ctx = ctx.clone();
        let read = self.execute_read_async(ctx.clone(), call.read_preference, operation);
        Ok(Box::pin(async move {
            let (output, binding) = read.await?;
            self.cursor(output, binding, batch_size, &ctx)
        }))
    }

    /// The first document matching `filter`.
    pub fn find_one<P: DeserializeOwned + 'static>(
        &self,
        filter: &FilterDefinition<T>,
        options: &FindOptions<T, P>,
        ctx: &OperationContext<'_>,
    ) -> ClientResult<Option<P>> {
        let call = self.call_settings(ctx, true)?;
        let operation = self.prepare_find(filter, options, true, &call)?;
        let (output, binding) = self.execute_read(ctx, &call.read_preference, &operation)?;
        self.cursor(output, binding, None, ctx)?.try_next()
    }

    /// The first document matching `filter`.
    pub fn find_one_async<'a, P: DeserializeOwned + Send + 'static>(
        &'a self,
        filter: &FilterDefinition<T>,
        options: &FindOptions<T, P>,
        ctx: &OperationContext<'a>,
    ) -> ClientResult<BoxFuture<'a, ClientResult<Option<P>>>> {
        let call = self.call_settings(ctx, true)?;
        let operation = self.prepare_find(filter, options, true, &call)?;
        let ctx = ctx.clone();
        let read = self.execute_read_async(ctx.clone(), call.read_preference, operation);
        Ok(Box::pin(async move {
            let (output, binding) = read.await?;
            self.cursor(output, binding, None, &ctx)?.try_next_async().await
        }))
    }

    // distinct

    fn prepare_distinct(
        &self,
        field: FieldDefinition<T>,
        filter: &FilterDefinition<T>,
        options: &DistinctOptions,
        call: &CallSettings,
    ) -> ClientResult<ReadOperation> {
        debug!(namespace = %self.namespace, operation = "distinct", "rendering operation");
        let context = self.render_context();
        let command = ReadCommand::Distinct {
            key: field.render(&context)?.field_name,
            filter: filter.render(&context)?,
            collation: options.collation.clone(),
            max_time: options.max_time,
            comment: options.comment.clone(),
        };
        Ok(self.read_operation(command, call))
    }

    /// Distinct values of `field` among the documents matching `filter`.
    pub fn distinct<V: DeserializeOwned>(
        &self,
        field: impl Into<FieldDefinition<T>>,
        filter: &FilterDefinition<T>,
        options: &DistinctOptions,
        ctx: &OperationContext<'_>,
    ) -> ClientResult<Vec<V>> {
        let call = self.call_settings(ctx, true)?;
        let operation = self.prepare_distinct(field.into(), filter, options, &call)?;
        let (output, _binding) = self.execute_read(ctx, &call.read_preference, &operation)?;
        decode_values(output)
    }

    /// Distinct values of `field` among the documents matching `filter`.
    pub fn distinct_async<'a, V: DeserializeOwned + 'a>(
        &'a self,
        field: impl Into<FieldDefinition<T>>,
        filter: &FilterDefinition<T>,
        options: &DistinctOptions,
        ctx: &OperationContext<'a>,
    ) -> ClientResult<BoxFuture<'a, ClientResult<Vec<V>>>> {
        let call = self.call_settings(ctx, true)?;
        let operation = self.prepare_distinct(field.into(), filter, options, &call)?;
        let read = self.execute_read_async(ctx.clone(), call.read_preference, operation);
        Ok(Box::pin(async move {
            let (output, _binding) = read.await?;
            decode_values(output)
        }))
    }

    // find-and-modify

    #[allow(clippy::too_many_arguments)]
    fn find_and_modify_operation(
        &self,
        filter: &FilterDefinition<T>,
        kind: FindAndModifyKind,
        projection: Option<Document>,
        sort: Option<&SortDefinition<T>>,
        return_document: ReturnDocument,
        upsert: Option<bool>,
        call: &CallSettings,
        extra: FindAndModifyExtras,
    ) -> ClientResult<WriteOperation> {
        let context = self.render_context();
        let command = FindAndModifyCommand {
            filter: filter.render(&context)?,
            kind,
            projection,
            sort: self.render_sort(sort, &context)?,
            upsert,
            return_new: return_document == ReturnDocument::After,
            array_filters: extra.array_filters,
            bypass_document_validation: extra.bypass_document_validation,
            collation: extra.collation,
            hint: extra.hint,
            max_time: extra.max_time,
            comment: extra.comment,
            let_vars: extra.let_vars,
        };
        Ok(self.write_operation(WriteCommand::FindAndModify(command), call))
    }

    fn prepare_find_one_and_delete<P: 'static>(
        &self,
        filter: &FilterDefinition<T>,
        options: &FindOneAndDeleteOptions<T, P>,
        call: &CallSettings,
    ) -> ClientResult<WriteOperation> {
        debug!(namespace = %self.namespace, operation = "findOneAndDelete", "rendering operation");
        let projection = self.render_projection(
            options.projection.as_ref(),
            &self.render_context(),
            "findAndModify",
        )?;
        self.find_and_modify_operation(
            filter,
            FindAndModifyKind::Delete,
            projection,
            options.sort.as_ref(),
            ReturnDocument::Before,
            None,
            call,
            FindAndModifyExtras {
                array_filters: None,
                bypass_document_validation: None,
                collation: options.collation.clone(),
                hint: options.hint.clone(),
                max_time: options.max_time,
                comment: options.comment.clone(),
                let_vars: options.let_vars.clone(),
            },
        )
    }

    /// Delete the first document matching `filter` and return it.
    pub fn find_one_and_delete<P: DeserializeOwned + 'static>(
        &self,
        filter: &FilterDefinition<T>,
        options: &FindOneAndDeleteOptions<T, P>,
        ctx: &OperationContext<'_>,
    ) -> ClientResult<Option<P>> {
        let call = self.call_settings(ctx, false)?;
        let operation = self.prepare_find_one_and_delete(filter, options, &call)?;
        let (output, _) = self.execute_write(ctx, &operation, false)?;
        decode_document(output)
    }

    /// Delete the first document matching `filter` and return it.
    pub fn find_one_and_delete_async<'a, P: DeserializeOwned + 'static>(
        &'a self,
        filter: &FilterDefinition<T>,
        options: &FindOneAndDeleteOptions<T, P>,
        ctx: &OperationContext<'a>,
    ) -> ClientResult<BoxFuture<'a, ClientResult<Option<P>>>> {
        let call = self.call_settings(ctx, false)?;
        let operation = self.prepare_find_one_and_delete(filter, options, &call)?;
        let write = self.execute_write_async(ctx.clone(), operation, false);
        Ok(Box::pin(async move {
            let (output, _) = write.await?;
            decode_document(output)
        }))
    }

    fn prepare_find_one_and_replace<P: 'static>(
        &self,
        filter: &FilterDefinition<T>,
        replacement: &T,
        options: &FindOneAndReplaceOptions<T, P>,
        call: &CallSettings,
    ) -> ClientResult<WriteOperation>
    where
        T: Serialize,
    {
        debug!(namespace = %self.namespace, operation = "findOneAndReplace", "rendering operation");
        let replacement = replacement_document(replacement)?;
        let projection = self.render_projection(
            options.projection.as_ref(),
            &self.render_context(),
            "findAndModify",
        )?;
        self.find_and_modify_operation(
            filter,
            FindAndModifyKind::Replace(replacement),
            projection,
            options.sort.as_ref(),
            options.return_document,
            options.upsert,
            call,
            FindAndModifyExtras {
                array_filters: None,
                bypass_document_validation: options.bypass_document_validation,
                collation: options.collation.clone(),
                hint: options.hint.clone(),
                max_time: options.max_time,
                comment: options.comment.clone(),
                let_vars: options.let_vars.clone(),
            },
        )
    }

    /// Replace the first document matching `filter` and return it.
    pub fn find_one_and_replace<P: DeserializeOwned + 'static>(
        &self,
        filter: &FilterDefinition<T>,
        replacement: &T,
        options: &FindOneAndReplaceOptions<T, P>,
        ctx: &OperationContext<'_>,
    ) -> ClientResult<Option<P>>
    where
        T: Serialize,
    {
        let call = self.call_settings(ctx, false)?;
        let operation = self.prepare_find_one_and_replace(filter, replacement, options, &call)?;
        let (output, _) = self.execute_write(ctx, &operation, false)?;
        decode_document(output)
    }

    /// Replace the first document matching `filter` and return it.
    pub fn find_one_and_replace_async<'a, P: DeserializeOwned + 'static>(
        &'a self,
        filter: &FilterDefinition<T>,
        replacement: &T,
        options: &FindOneAndReplaceOptions<T, P>,
        ctx: &OperationContext<'a>,
    ) -> ClientResult<BoxFuture<'a, ClientResult<Option<P>>>>
    where
        T: Serialize,
    {
        let call = self.call_settings(ctx, false)?;
        let operation = self.prepare_find_one_and_replace(filter, replacement, options, &call)?;
        let write = self.execute_write_async(ctx.clone(), operation, false);
        Ok(Box::pin(async move {
            let (output, _) = write.await?;
            decode_document(output)
        }))
    }

    fn prepare_find_one_and_update<P: 'static>(
        &self,
        filter: &FilterDefinition<T>,
        update: &UpdateDefinition<T>,
        options: &FindOneAndUpdateOptions<T, P>,
        call: &CallSettings,
    ) -> ClientResult<WriteOperation> {
        debug!(namespace = %self.namespace, operation = "findOneAndUpdate", "rendering operation");
        let context = self.render_context();
        let update = render_update(update, &context)?.into_bson();
        let projection =
            self.render_projection(options.projection.as_ref(), &context, "findAndModify")?;
        self.find_and_modify_operation(
            filter,
            FindAndModifyKind::Update(update),
            projection,
            options.sort.as_ref(),
            options.return_document,
            options.upsert,
            call,
            FindAndModifyExtras {
                array_filters: options.array_filters.clone(),
                bypass_document_validation: options.bypass_document_validation,
                collation: options.collation.clone(),
                hint: options.hint.clone(),
                max_time: options.max_time,
                comment: options.comment.clone(),
                let_vars: options.let_vars.clone(),
            },
        )
    }

    /// Update the first document matching `filter` and return it.
    pub fn find_one_and_update<P: DeserializeOwned + 'static>(
        &self,
        filter: &FilterDefinition<T>,
        update: &UpdateDefinition<T>,
        options: &FindOneAndUpdateOptions<T, P>,
        ctx: &OperationContext<'_>,
    ) -> ClientResult<Option<P>> {
        let call = self.call_settings(ctx, false)?;
        let operation = self.prepare_find_one_and_update(filter, update, options, &call)?;
        let (output, _) = self.execute_write(ctx, &operation, false)?;
        decode_document(output)
    }

    /// Update the first document matching `filter` and return it.
    pub fn find_one_and_update_async<'a, P: DeserializeOwned + 'static>(
        &'a self,
        filter: &FilterDefinition<T>,
        update: &UpdateDefinition<T>,
        options: &FindOneAndUpdateOptions<T, P>,
        ctx: &OperationContext<'a>,
    ) -> ClientResult<BoxFuture<'a, ClientResult<Option<P>>>> {
        let call = self.call_settings(ctx, false)?;
        let operation = self.prepare_find_one_and_update(filter, update, options, &call)?;
        let write = self.execute_write_async(ctx.clone(), operation, false);
        Ok(Box::pin(async move {
            let (output, _) = write.await?;
            decode_document(output)
        }))
    }

    // aggregate

    fn prepare_aggregate<R: 'static>(
        &self,
        pipeline: &PipelineDefinition<T, R>,
        options: &AggregateOptions,
        ctx: &OperationContext<'_>,
    ) -> ClientResult<(AggregatePlan, CallSettings)> {
        debug!(
            namespace = %self.namespace,
            operation = "aggregate",
            stages = pipeline.len(),
            "rendering operation"
        );
        let rendered = pipeline.render(&self.render_context())?;
        let terminal = rendered
            .terminal_stage_index()
            .map_err(|e| ClientError::argument(e.to_string()))?;
        let call = self.call_settings(ctx, terminal.is_none())?;
        let plan = match terminal {
            None => AggregatePlan::Cursor(self.read_operation(
                ReadCommand::Aggregate(aggregate_command(rendered.documents, options)),
                &call,
            )),
            Some(index) => self.plan_to_collection(rendered, index, options, &call)?,
        };
        Ok((plan, call))
    }

    fn plan_to_collection(
        &self,
        rendered: RenderedPipeline,
        index: usize,
        options: &AggregateOptions,
        call: &CallSettings,
    ) -> ClientResult<AggregatePlan> {
        let output = rendered.output_namespace(index, self.namespace.database())?;
        let mut documents = rendered.documents;
        let trailing = documents.split_off(index + 1);

        let write = self.write_operation(
            WriteCommand::AggregateToCollection(aggregate_command(documents, options)),
            call,
        );
        let command = match trailing_find(&trailing) {
            Some(find) => ReadCommand::Find(FindCommand {
                batch_size: options.batch_size,
                collation: options.collation.clone(),
                max_time: options.max_time,
                ..find
            }),
            None => ReadCommand::Aggregate(AggregateCommand {
                pipeline: trailing,
                batch_size: options.batch_size,
                collation: options.collation.clone(),
                max_time: options.max_time,
                ..AggregateCommand::default()
            }),
        };
        let read = ReadOperation::new(output, command)
            .with_read_concern(call.read_concern)
            .with_retry(self.client_settings.retry_reads);
        Ok(AggregatePlan::ToCollection { write, read })
    }

    /// Run an aggregation pipeline.
    ///
    /// A pipeline ending in `$out` or `$merge` writes its output collection
    /// now and returns a deferred cursor that reads it on first enumeration.
    pub fn aggregate<R: DeserializeOwned + 'static>(
        &self,
        pipeline: &PipelineDefinition<T, R>,
        options: &AggregateOptions,
        ctx: &OperationContext<'_>,
    ) -> ClientResult<AggregateCursor<R>> {
        match self.prepare_aggregate(pipeline, options, ctx)? {
            (AggregatePlan::Cursor(operation), call) => {
                let (output, binding) = self.execute_read(ctx, &call.read_preference, &operation)?;
                let cursor = self.cursor(output, binding, operation.batch_size(), ctx)?;
                Ok(AggregateCursor::Immediate(cursor))
            }
            (AggregatePlan::ToCollection { write, read }, _) => {
                let (_, fork) = self.execute_write(ctx, &write, true)?;
                Ok(AggregateCursor::Deferred(self.defer(fork, read, ctx)?))
            }
        }
    }

    /// Run an aggregation pipeline.
    pub fn aggregate_async<'a, R: DeserializeOwned + 'static>(
        &'a self,
        pipeline: &PipelineDefinition<T, R>,
        options: &AggregateOptions,
        ctx: &OperationContext<'a>,
    ) -> ClientResult<BoxFuture<'a, ClientResult<AggregateCursor<R>>>> {
        let (plan, call) = self.prepare_aggregate(pipeline, options, ctx)?;
        let ctx = ctx.clone();
        let future: BoxFuture<'a, ClientResult<AggregateCursor<R>>> = match plan {
            AggregatePlan::Cursor(operation) => {
                let batch_size = operation.batch_size();
                let read = self.execute_read_async(ctx.clone(), call.read_preference, operation);
                Box::pin(async move {
                    let (output, binding) = read.await?;
                    Ok(AggregateCursor::Immediate(self.cursor(output, binding, batch_size, &ctx)?))
                })
            }
            AggregatePlan::ToCollection { write, read } => {
                let run = self.execute_write_async(ctx.clone(), write, true);
                Box::pin(async move {
                    let (_, fork) = run.await?;
                    Ok(AggregateCursor::Deferred(self.defer(fork, read, &ctx)?))
                })
            }
        };
        Ok(future)
    }

    fn prepare_aggregate_to_collection<R: 'static>(
        &self,
        pipeline: &PipelineDefinition<T, R>,
        options: &AggregateOptions,
        ctx: &OperationContext<'_>,
    ) -> ClientResult<WriteOperation> {
        match self.prepare_aggregate(pipeline, options, ctx)? {
            (AggregatePlan::ToCollection { write, .. }, _) => Ok(write),
            (AggregatePlan::Cursor(_), _) => Err(ClientError::argument(
                "pipeline must end with an $out or $merge stage",
            )),
        }
    }

    /// Run a pipeline ending in `$out` or `$merge` without reading its output.
    pub fn aggregate_to_collection<R: 'static>(
        &self,
        pipeline: &PipelineDefinition<T, R>,
        options: &AggregateOptions,
        ctx: &OperationContext<'_>,
    ) -> ClientResult<()> {
        let operation = self.prepare_aggregate_to_collection(pipeline, options, ctx)?;
        self.execute_write(ctx, &operation, false)?;
        Ok(())
    }

    /// Run a pipeline ending in `$out` or `$merge` without reading its output.
    pub fn aggregate_to_collection_async<'a, R: 'static>(
        &'a self,
        pipeline: &PipelineDefinition<T, R>,
        options: &AggregateOptions,
        ctx: &OperationContext<'a>,
    ) -> ClientResult<BoxFuture<'a, ClientResult<()>>> {
        let operation = self.prepare_aggregate_to_collection(pipeline, options, ctx)?;
        let write = self.execute_write_async(ctx.clone(), operation, false);
        Ok(Box::pin(async move {
            write.await?;
            Ok(())
        }))
    }

    // map-reduce

    fn prepare_map_reduce(
        &self,
        map: &str,
        reduce: &str,
        options: &MapReduceOptions<T>,
        ctx: &OperationContext<'_>,
    ) -> ClientResult<(AggregatePlan, CallSettings)> {
        if map.trim().is_empty() || reduce.trim().is_empty() {
            return Err(ClientError::argument("map and reduce functions are required"));
        }
        debug!(namespace = %self.namespace, operation = "mapReduce", "rendering operation");
        let context = self.render_context();
        let output = options.output.namespace(self.namespace.database())?;
        let call = self.call_settings(ctx, output.is_none())?;
        let command = MapReduceCommand {
            map: map.to_string(),
            reduce: reduce.to_string(),
            out: options.output.to_bson(),
            query: options.filter.as_ref().map(|f| f.render(&context)).transpose()?,
            sort: self.render_sort(options.sort.as_ref(), &context)?,
            limit: options.limit,
            finalize: options.finalize.clone(),
            scope: options.scope.clone(),
            js_mode: options.js_mode,
            verbose: options.verbose,
            collation: options.collation.clone(),
            max_time: options.max_time,
            bypass_document_validation: output
                .as_ref()
                .and(options.bypass_document_validation),
        };
        let plan = match output {
            None => AggregatePlan::Cursor(self.read_operation(ReadCommand::MapReduce(command), &call)),
            Some(output) => AggregatePlan::ToCollection {
                write: self.write_operation(WriteCommand::MapReduceToCollection(command), &call),
                read: ReadOperation::new(
                    output,
                    ReadCommand::Find(FindCommand {
                        batch_size: options.batch_size,
                        ..FindCommand::default()
                    }),
                )
                .with_read_concern(call.read_concern)
                .with_retry(self.client_settings.retry_reads),
            },
        };
        Ok((plan, call))
    }

    /// Run a map-reduce; collection output is read back through a deferred cursor.
    pub fn map_reduce<R: DeserializeOwned + 'static>(
        &self,
        map: &str,
        reduce: &str,
        options: &MapReduceOptions<T>,
        ctx: &OperationContext<'_>,
    ) -> ClientResult<AggregateCursor<R>> {
        match self.prepare_map_reduce(map, reduce, options, ctx)? {
            (AggregatePlan::Cursor(operation), call) => {
                let (output, binding) = self.execute_read(ctx, &call.read_preference, &operation)?;
                Ok(AggregateCursor::Immediate(self.cursor(output, binding, None, ctx)?))
            }
            (AggregatePlan::ToCollection { write, read }, _) => {
                let (_, fork) = self.execute_write(ctx, &write, true)?;
                Ok(AggregateCursor::Deferred(self.defer(fork, read, ctx)?))
            }
        }
    }

    /// Run a map-reduce; collection output is read back through a deferred cursor.
    pub fn map_reduce_async<'a, R: DeserializeOwned + 'static>(
        &'a self,
        map: &str,
        reduce: &str,
        options: &MapReduceOptions<T>,
        ctx: &OperationContext<'a>,
    ) -> ClientResult<BoxFuture<'a, ClientResult<AggregateCursor<R>>>> {
        let (plan, call) = self.prepare_map_reduce(map, reduce, options, ctx)?;
        let ctx = ctx.clone();
        let future: BoxFuture<'a, ClientResult<AggregateCursor<R>>> = match plan {
            AggregatePlan::Cursor(operation) => {
                let read = self.execute_read_async(ctx.clone(), call.read_preference, operation);
                Box::pin(async move {
                    let (output, binding) = read.await?;
                    Ok(AggregateCursor::Immediate(self.cursor(output, binding, None, &ctx)?))
                })
            }
            AggregatePlan::ToCollection { write, read } => {
                let run = self.execute_write_async(ctx.clone(), write, true);
                Box::pin(async move {
                    let (_, fork) = run.await?;
                    Ok(AggregateCursor::Deferred(self.defer(fork, read, &ctx)?))
                })
            }
        };
        Ok(future)
    }
}

struct FindAndModifyExtras {
    array_filters: Option<Vec<Document>>,
    bypass_document_validation: Option<bool>,
    collation: Option<Document>,
    hint: Option<Hint>,
    max_time: Option<Duration>,
    comment: Option<Bson>,
    let_vars: Option<Document>,
}

fn aggregate_command(pipeline: Vec<Document>, options: &AggregateOptions) -> AggregateCommand {
    AggregateCommand {
        pipeline,
        allow_disk_use: options.allow_disk_use,
        batch_size: options.batch_size,
        bypass_document_validation: options.bypass_document_validation,
        collation: options.collation.clone(),
        comment: options.comment.clone(),
        hint: options.hint.clone(),
        let_vars: options.let_vars.clone(),
        max_time: options.max_time,
    }
}

impl<T: Serialize + 'static> Collection<T> {
    // bulk write and single-document writes

    fn prepare_bulk_write(
        &self,
        requests: &[WriteModel<T>],
        options: &BulkWriteOptions,
        ctx: &OperationContext<'_>,
    ) -> ClientResult<(WriteOperation, usize)> {
        debug!(
            namespace = %self.namespace,
            operation = "bulkWrite",
            requests = requests.len(),
            ordered = options.ordered,
            "rendering operation"
        );
        let requests = self.render_requests(requests)?;
        let call = self.call_settings(ctx, false)?;
        let count = requests.len();
        let operation = self.bulk_operation(
            requests,
            options.ordered,
            options.bypass_document_validation,
            options.comment.clone(),
            options.let_vars.clone(),
            &call,
        );
        Ok((operation, count))
    }

    /// Execute a list of writes.
    ///
    /// A partial failure is reported as [`ClientError::BulkWrite`], whose
    /// indexes are positions in `requests`.
    pub fn bulk_write(
        &self,
        requests: &[WriteModel<T>],
        options: &BulkWriteOptions,
        ctx: &OperationContext<'_>,
    ) -> ClientResult<BulkWriteResult>
    where
        T: Clone + Send + Sync,
    {
        let (operation, count) = self.prepare_bulk_write(requests, options, ctx)?;
        with_caller_models(self.run_bulk(operation, count, ctx), requests)
    }

    /// Execute a list of writes.
    pub fn bulk_write_async<'a>(
        &'a self,
        requests: &[WriteModel<T>],
        options: &BulkWriteOptions,
        ctx: &OperationContext<'a>,
    ) -> ClientResult<BoxFuture<'a, ClientResult<BulkWriteResult>>>
    where
        T: Clone + Send + Sync,
    {
        let (operation, count) = self.prepare_bulk_write(requests, options, ctx)?;
        let models = requests.to_vec();
        let run = self.run_bulk_async(operation, count, ctx);
        Ok(Box::pin(async move { with_caller_models(run.await, &models) }))
    }

    fn prepare_insert_one(
        &self,
        document: &T,
        options: &InsertOneOptions,
        ctx: &OperationContext<'_>,
    ) -> ClientResult<(WriteOperation, Bson)> {
        debug!(namespace = %self.namespace, operation = "insertOne", "rendering operation");
        let request = insert_request(document, 0)?;
        let inserted_id = request.inserted_id().cloned().unwrap_or(Bson::Null);
        let call = self.call_settings(ctx, false)?;
        let operation = self.bulk_operation(
            vec![request],
            true,
            options.bypass_document_validation,
            options.comment.clone(),
            None,
            &call,
        );
        Ok((operation, inserted_id))
    }

    /// Insert one document, generating an `_id` when it has none.
    pub fn insert_one(
        &self,
        document: &T,
        options: &InsertOneOptions,
        ctx: &OperationContext<'_>,
    ) -> ClientResult<InsertOneResult> {
        let (operation, inserted_id) = self.prepare_insert_one(document, options, ctx)?;
        let result = single_write(self.run_bulk(operation, 1, ctx))?;
        Ok(InsertOneResult {
            acknowledged: result.acknowledged,
            inserted_id,
        })
    }

    /// Insert one document, generating an `_id` when it has none.
    pub fn insert_one_async<'a>(
        &'a self,
        document: &T,
        options: &InsertOneOptions,
        ctx: &OperationContext<'a>,
    ) -> ClientResult<BoxFuture<'a, ClientResult<InsertOneResult>>> {
        let (operation, inserted_id) = self.prepare_insert_one(document, options, ctx)?;
        let run = self.run_bulk_async(operation, 1, ctx);
        Ok(Box::pin(async move {
            let result = single_write(run.await)?;
            Ok(InsertOneResult {
                acknowledged: result.acknowledged,
                inserted_id,
            })
        }))
    }

    fn prepare_insert_many(
        &self,
        documents: &[T],
        options: &InsertManyOptions,
        ctx: &OperationContext<'_>,
    ) -> ClientResult<(WriteOperation, HashMap<usize, Bson>)> {
        debug!(
            namespace = %self.namespace,
            operation = "insertMany",
            documents = documents.len(),
            "rendering operation"
        );
        if documents.is_empty() {
            return Err(ClientError::argument("documents must not be empty"));
        }
        let requests = documents
            .iter()
            .enumerate()
            .map(|(index, document)| insert_request(document, index))
            .collect::<ClientResult<Vec<_>>>()?;
        let inserted_ids = requests
            .iter()
            .filter_map(|r| r.inserted_id().map(|id| (r.correlation_id, id.clone())))
            .collect();
        let call = self.call_settings(ctx, false)?;
        let operation = self.bulk_operation(
            requests,
            options.ordered,
            options.bypass_document_validation,
            options.comment.clone(),
            None,
            &call,
        );
        Ok((operation, inserted_ids))
    }

    /// Insert many documents.
    pub fn insert_many(
        &self,
        documents: &[T],
        options: &InsertManyOptions,
        ctx: &OperationContext<'_>,
    ) -> ClientResult<InsertManyResult> {
        let (operation, inserted_ids) = self.prepare_insert_many(documents, options, ctx)?;
        let result = self.run_bulk(operation, documents.len(), ctx)?;
        Ok(InsertManyResult {
            acknowledged: result.acknowledged,
            inserted_ids,
        })
    }

    /// Insert many documents.
    pub fn insert_many_async<'a>(
        &'a self,
        documents: &[T],
        options: &InsertManyOptions,
        ctx: &OperationContext<'a>,
    ) -> ClientResult<BoxFuture<'a, ClientResult<InsertManyResult>>> {
        let (operation, inserted_ids) = self.prepare_insert_many(documents, options, ctx)?;
        let run = self.run_bulk_async(operation, documents.len(), ctx);
        Ok(Box::pin(async move {
            let result = run.await?;
            Ok(InsertManyResult {
                acknowledged: result.acknowledged,
                inserted_ids,
            })
        }))
    }

    fn prepare_single(
        &self,
        model: WriteModel<T>,
        operation_name: &'static str,
        bypass_document_validation: Option<bool>,
        comment: Option<Bson>,
        let_vars: Option<Document>,
        ctx: &OperationContext<'_>,
    ) -> ClientResult<WriteOperation> {
        debug!(namespace = %self.namespace, operation = operation_name, "rendering operation");
        let request = model.render(&self.render_context(), 0)?;
        let call = self.call_settings(ctx, false)?;
        Ok(self.bulk_operation(
            vec![request],
            true,
            bypass_document_validation,
            comment,
            let_vars,
            &call,
        ))
    }

    fn update_model(
        filter: &FilterDefinition<T>,
        update: &UpdateDefinition<T>,
        options: &UpdateOptions,
    ) -> UpdateModel<T> {
        UpdateModel {
            filter: filter.clone(),
            update: update.clone(),
            upsert: options.upsert,
            array_filters: options.array_filters.clone(),
            collation: options.collation.clone(),
            hint: options.hint.clone(),
        }
    }

    fn prepare_update(
        &self,
        filter: &FilterDefinition<T>,
        update: &UpdateDefinition<T>,
        options: &UpdateOptions,
        many: bool,
        ctx: &OperationContext<'_>,
    ) -> ClientResult<WriteOperation> {
        let model = Self::update_model(filter, update, options);
        let (model, name) = if many {
            (WriteModel::UpdateMany(model), "updateMany")
        } else {
            (WriteModel::UpdateOne(model), "updateOne")
        };
        self.prepare_single(
            model,
            name,
            options.bypass_document_validation,
            options.comment.clone(),
            options.let_vars.clone(),
            ctx,
        )
    }

    /// Update the first document matching `filter`.
    pub fn update_one(
        &self,
        filter: &FilterDefinition<T>,
        update: &UpdateDefinition<T>,
        options: &UpdateOptions,
        ctx: &OperationContext<'_>,
    ) -> ClientResult<UpdateResult> {
        let operation = self.prepare_update(filter, update, options, false, ctx)?;
        let result = single_write(self.run_bulk(operation, 1, ctx))?;
        Ok(UpdateResult::from_bulk(&result))
    }

    /// Update the first document matching `filter`.
    pub fn update_one_async<'a>(
        &'a self,
        filter: &FilterDefinition<T>,
        update: &UpdateDefinition<T>,
        options: &UpdateOptions,
        ctx: &OperationContext<'a>,
    ) -> ClientResult<BoxFuture<'a, ClientResult<UpdateResult>>> {
        let operation = self.prepare_update(filter, update, options, false, ctx)?;
        let run = self.run_bulk_async(operation, 1, ctx);
        Ok(Box::pin(async move {
            Ok(UpdateResult::from_bulk(&single_write(run.await)?))
        }))
    }

    /// Update every document matching `filter`.
    pub fn update_many(
        &self,
        filter: &FilterDefinition<T>,
        update: &UpdateDefinition<T>,
        options: &UpdateOptions,
        ctx: &OperationContext<'_>,
    ) -> ClientResult<UpdateResult> {
        let operation = self.prepare_update(filter, update, options, true, ctx)?;
        let result = single_write(self.run_bulk(operation, 1, ctx))?;
        Ok(UpdateResult::from_bulk(&result))
    }

    /// Update every document matching `filter`.
    pub fn update_many_async<'a>(
        &'a self,
        filter: &FilterDefinition<T>,
        update: &UpdateDefinition<T>,
        options: &UpdateOptions,
        ctx: &OperationContext<'a>,
    ) -> ClientResult<BoxFuture<'a, ClientResult<UpdateResult>>> {
        let operation = self.prepare_update(filter, update, options, true, ctx)?;
        let run = self.run_bulk_async(operation, 1, ctx);
        Ok(Box::pin(async move {
            Ok(UpdateResult::from_bulk(&single_write(run.await)?))
        }))
    }

    fn prepare_replace_one(
        &self,
        filter: &FilterDefinition<T>,
        replacement: &T,
        options: &ReplaceOptions,
        ctx: &OperationContext<'_>,
    ) -> ClientResult<WriteOperation> {
        debug!(namespace = %self.namespace, operation = "replaceOne", "rendering operation");
        let request = WriteRequest {
            correlation_id: 0,
            kind: WriteRequestKind::Update {
                update: RenderedUpdate::Document(replacement_document(replacement)?),
                filter: filter.render(&self.render_context())?,
                multi: false,
                upsert: options.upsert,
                array_filters: None,
                collation: options.collation.clone(),
                hint: options.hint.clone(),
            },
        };
        let call = self.call_settings(ctx, false)?;
        Ok(self.bulk_operation(
            vec![request],
            true,
            options.bypass_document_validation,
            options.comment.clone(),
            options.let_vars.clone(),
            &call,
        ))
    }

    /// Replace the first document matching `filter`.
    pub fn replace_one(
        &self,
        filter: &FilterDefinition<T>,
        replacement: &T,
        options: &ReplaceOptions,
        ctx: &OperationContext<'_>,
    ) -> ClientResult<UpdateResult> {
        let operation = self.prepare_replace_one(filter, replacement, options, ctx)?;
        let result = single_write(self.run_bulk(operation, 1, ctx))?;
        Ok(UpdateResult::from_bulk(&result))
    }

    /// Replace the first document matching `filter`.
    pub fn replace_one_async<'a>(
        &'a self,
        filter: &FilterDefinition<T>,
        replacement: &T,
        options: &ReplaceOptions,
        ctx: &OperationContext<'a>,
    ) -> ClientResult<BoxFuture<'a, ClientResult<UpdateResult>>> {
        let operation = self.prepare_replace_one(filter, replacement, options, ctx)?;
        let run = self.run_bulk_async(operation, 1, ctx);
        Ok(Box::pin(async move {
            Ok(UpdateResult::from_bulk(&single_write(run.await)?))
        }))
    }

    fn prepare_delete(
        &self,
        filter: &FilterDefinition<T>,
        options: &DeleteOptions,
        many: bool,
        ctx: &OperationContext<'_>,
    ) -> ClientResult<WriteOperation> {
        let model = DeleteModel {
            filter: filter.clone(),
            collation: options.collation.clone(),
            hint: options.hint.clone(),
        };
        let (model, name) = if many {
            (WriteModel::DeleteMany(model), "deleteMany")
        } else {
            (WriteModel::DeleteOne(model), "deleteOne")
        };
        self.prepare_single(model, name, None, options.comment.clone(), options.let_vars.clone(), ctx)
    }

    /// Delete the first document matching `filter`.
    pub fn delete_one(
        &self,
        filter: &FilterDefinition<T>,
        options: &DeleteOptions,
        ctx: &OperationContext<'_>,
    ) -> ClientResult<DeleteResult> {
        let operation = self.prepare_delete(filter, options, false, ctx)?;
        let result = single_write(self.run_bulk(operation, 1, ctx))?;
        Ok(DeleteResult::from_bulk(&result))
    }

    /// Delete the first document matching `filter`.
    pub fn delete_one_async<'a>(
        &'a self,
        filter: &FilterDefinition<T>,
        options: &DeleteOptions,
        ctx: &OperationContext<'a>,
    ) -> ClientResult<BoxFuture<'a, ClientResult<DeleteResult>>> {
        let operation = self.prepare_delete(filter, options, false, ctx)?;
        let run = self.run_bulk_async(operation, 1, ctx);
        Ok(Box::pin(async move {
            Ok(DeleteResult::from_bulk(&single_write(run.await)?))
        }))
    }

    /// Delete every document matching `filter`.
    pub fn delete_many(
        &self,
        filter: &FilterDefinition<T>,
        options: &DeleteOptions,
        ctx: &OperationContext<'_>,
    ) -> ClientResult<DeleteResult> {
        let operation = self.prepare_delete(filter, options, true, ctx)?;
        let result = single_write(self.run_bulk(operation, 1, ctx))?;
        Ok(DeleteResult::from_bulk(&result))
    }

    /// Delete every document matching `filter`.
    pub fn delete_many_async<'a>(
        &'a self,
        filter: &FilterDefinition<T>,
        options: &DeleteOptions,
        ctx: &OperationContext<'a>,
    ) -> ClientResult<BoxFuture<'a, ClientResult<DeleteResult>>> {
        let operation = self.prepare_delete(filter, options, true, ctx)?;
        let run = self.run_bulk_async(operation, 1, ctx);
        Ok(Box::pin(async move {
            Ok(DeleteResult::from_bulk(&single_write(run.await)?))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_trailing_stages_fold_into_find() {
        let find = trailing_find(&[
            doc! { "$match": { "a": 1 } },
            doc! { "$sort": { "a": -1 } },
            doc! { "$limit": 5 },
            doc! { "$project": { "a": 1 } },
        ])
        .unwrap();
        assert_eq!(find.filter, doc! { "a": 1 });
        assert_eq!(find.sort, Some(doc! { "a": -1 }));
        assert_eq!(find.limit, Some(5));
        assert_eq!(find.skip, None);
        assert_eq!(find.projection, Some(doc! { "a": 1 }));
    }

    #[test]
    fn test_trailing_stages_out_of_order_need_aggregate() {
        assert!(trailing_find(&[doc! { "$limit": 5 }, doc! { "$match": { "a": 1 } }]).is_none());
        assert!(trailing_find(&[doc! { "$match": {} }, doc! { "$match": {} }]).is_none());
        assert!(trailing_find(&[doc! { "$group": { "_id": "$a" } }]).is_none());
        assert_eq!(trailing_find(&[]), Some(FindCommand::default()));
    }

    #[test]
    fn test_count_from_reply_shapes() {
        assert_eq!(count_from(OperationOutput::Count(4)).unwrap(), 4);
        let ns = CollectionNamespace::parse("db.c").unwrap();
        let empty = crate::operation::CursorBatch::exhausted(ns.clone(), Vec::new());
        assert_eq!(count_from(OperationOutput::Cursor(empty)).unwrap(), 0);
        let batch =
            crate::operation::CursorBatch::exhausted(ns, vec![doc! { "_id": 1, "n": 12 }]);
        assert_eq!(count_from(OperationOutput::Cursor(batch)).unwrap(), 12);
    }
}
