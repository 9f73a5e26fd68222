//! Runtime adapter over the official MongoDB driver.
//!
//! [`DriverRuntime`] implements [`Cluster`] and [`OperationExecutor`] by
//! sending each descriptor's command document through
//! `Database::run_command`. Session fields (`lsid`, `$clusterTime`,
//! transaction fields) come from the facade's [`SessionHandle`]; the
//! driver's own session pool is not used.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use bson::{Bson, Document};
use mongodb::Client;
use mongodb::options::SelectionCriteria;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::bulk::{
    BulkWriteOperationError, BulkWriteOutcome, BulkWriteUpsert, WriteConcernError, WriteError,
    WriteRequestType,
};
use crate::cluster::{Cluster, ReadBinding, WriteBinding};
use crate::config::ClientSettings;
use crate::error::{ClientError, ClientResult};
use crate::executor::OperationExecutor;
use crate::operation::{
    BulkWriteOperation, CursorBatch, OperationOutput, ReadCommand, ReadOperation, WriteCommand,
    WriteCommandOperation, WriteOperation,
};
use crate::session::{SessionHandle, TransactionState};

/// Executes descriptors with a `mongodb::Client`.
#[derive(Clone)]
pub struct DriverRuntime {
    client: Client,
    settings: Arc<ClientSettings>,
    handle: Handle,
}

impl std::fmt::Debug for DriverRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverRuntime")
            .field("uri", &self.settings.uri)
            .finish()
    }
}

impl DriverRuntime {
    /// Connect with `settings`. Must be called inside a Tokio runtime.
    pub async fn connect(settings: Arc<ClientSettings>) -> ClientResult<Self> {
        let options = settings.to_client_options().await?;
        let client = Client::with_options(options)?;
        info!(uri = %settings.uri, app_name = ?settings.app_name, "driver runtime connected");
        Ok(Self {
            client,
            settings,
            handle: Handle::current(),
        })
    }

    /// Wrap an existing driver client.
    pub fn from_client(client: Client, settings: Arc<ClientSettings>, handle: Handle) -> Self {
        Self {
            client,
            settings,
            handle,
        }
    }

    /// The driver client.
    pub fn inner(&self) -> &Client {
        &self.client
    }

    fn block_on<T>(&self, future: impl Future<Output = ClientResult<T>>) -> ClientResult<T> {
        match Handle::try_current() {
            Ok(current) if current.runtime_flavor() == RuntimeFlavor::CurrentThread => {
                Err(ClientError::execution(
                    "blocking calls need a multi-threaded runtime; use the _async methods",
                ))
            }
            Ok(_) => tokio::task::block_in_place(|| self.handle.block_on(future)),
            Err(_) => self.handle.block_on(future),
        }
    }

    fn attach_session(&self, session: &SessionHandle, command: &mut Document) {
        if !session.is_implicit() || self.settings.implicit_sessions {
            command.insert("lsid", session.id().to_document());
        }
        if let Some(cluster_time) = session.cluster_time() {
            command.insert("$clusterTime", cluster_time);
        }
        if session.is_in_transaction() {
            command.insert("txnNumber", session.transaction_number());
            command.insert("autocommit", false);
            if session.transaction_state() == TransactionState::Starting {
                command.insert("startTransaction", true);
            }
        }
    }

    fn observe(&self, session: &SessionHandle, reply: &Document) {
        if let Ok(cluster_time) = reply.get_document("$clusterTime") {
            session.advance_cluster_time(cluster_time);
        }
        if let Ok(operation_time) = reply.get_timestamp("operationTime") {
            session.advance_operation_time(operation_time);
        }
    }

    async fn run_command(
        &self,
        session: &SessionHandle,
        database: &str,
        mut command: Document,
        criteria: Option<SelectionCriteria>,
        cancellation: &CancellationToken,
    ) -> ClientResult<Document> {
        if cancellation.is_cancelled() {
            return Err(ClientError::Cancelled);
        }
        self.attach_session(session, &mut command);
        let name = command.keys().next().cloned().unwrap_or_default();
        trace!(database, command = %name, session_id = %session.id(), "sending command");

        let db = self.client.database(database);
        let reply = tokio::select! {
            _ = cancellation.cancelled() => return Err(ClientError::Cancelled),
            reply = db.run_command(command, criteria) => reply?,
        };
        self.observe(session, &reply);
        Ok(reply)
    }

    async fn run_with_retry(
        &self,
        retry: bool,
        session: &SessionHandle,
        database: &str,
        command: Document,
        criteria: Option<SelectionCriteria>,
        cancellation: &CancellationToken,
    ) -> ClientResult<Document> {
        let first = self
            .run_command(session, database, command.clone(), criteria.clone(), cancellation)
            .await;
        match first {
            Err(e) if retry && e.is_retryable() => {
                debug!(database, error = %e, "retrying command once");
                self.run_command(session, database, command, criteria, cancellation)
                    .await
            }
            other => other,
        }
    }

    async fn read(
        &self,
        binding: &ReadBinding,
        operation: &ReadOperation,
        cancellation: &CancellationToken,
    ) -> ClientResult<OperationOutput> {
        let criteria = SelectionCriteria::ReadPreference(binding.read_preference().to_driver()?);
        let reply = self
            .run_with_retry(
                operation.retry_requested,
                binding.session(),
                operation.namespace.database_name(),
                operation.to_command(),
                Some(criteria),
                cancellation,
            )
            .await?;
        read_output(operation, &reply)
    }

    async fn write(
        &self,
        binding: &WriteBinding,
        operation: &WriteOperation,
        cancellation: &CancellationToken,
    ) -> ClientResult<OperationOutput> {
        match operation {
            WriteOperation::BulkWrite(bulk) => self.bulk_write(binding, bulk, cancellation).await,
            WriteOperation::Command(command) => self.command(binding, command, cancellation).await,
        }
    }

    async fn command(
        &self,
        binding: &WriteBinding,
        operation: &WriteCommandOperation,
        cancellation: &CancellationToken,
    ) -> ClientResult<OperationOutput> {
        let retry = operation.retry_requested
            && matches!(operation.command, WriteCommand::FindAndModify(_));
        let reply = self
            .run_with_retry(
                retry,
                binding.session(),
                operation.namespace.database_name(),
                operation.to_command(),
                None,
                cancellation,
            )
            .await?;
        if let Some(error) = write_concern_error(&reply)? {
            return Err(ClientError::server(error.message, error.code, Vec::new()));
        }
        command_output(&operation.command, &reply)
    }

    async fn bulk_write(
        &self,
        binding: &WriteBinding,
        operation: &BulkWriteOperation,
        cancellation: &CancellationToken,
    ) -> ClientResult<OperationOutput> {
        let retry = operation.retry_requested && operation.is_retryable();
        let database = operation.namespace.database_name();
        let mut outcome = BulkWriteOutcome {
            acknowledged: operation.write_concern.is_acknowledged(),
            ..BulkWriteOutcome::default()
        };
        let mut write_errors = Vec::new();
        let mut last_write_concern_error = None;
        let mut unprocessed_requests = Vec::new();

        let mut batches = operation.batches().into_iter();
        while let Some(batch) = batches.next() {
            let offset = outcome.processed_requests.len();
            let command = operation.batch_command(&batch);
            let reply = self
                .run_with_retry(retry, binding.session(), database, command, None, cancellation)
                .await?;

            tally(&mut outcome, batch.request_type, &reply, offset)?;
            let batch_errors = write_errors_of(&reply, offset)?;
            if let Some(error) = write_concern_error(&reply)? {
                last_write_concern_error = Some(error);
            }

            let failed_at = batch_errors.iter().map(|e| e.index - offset).min();
            write_errors.extend(batch_errors);
            match failed_at {
                Some(failed_at) if operation.ordered => {
                    let mut requests = batch.requests;
                    let rest = requests.split_off((failed_at + 1).min(requests.len()));
                    outcome.processed_requests.extend(requests);
                    unprocessed_requests.extend(rest);
                    for remaining in batches.by_ref() {
                        unprocessed_requests.extend(remaining.requests);
                    }
                }
                _ => outcome.processed_requests.extend(batch.requests),
            }
        }

        if write_errors.is_empty() && last_write_concern_error.is_none() {
            return Ok(OperationOutput::BulkWrite(outcome));
        }
        warn!(
            namespace = %operation.namespace,
            write_errors = write_errors.len(),
            unprocessed = unprocessed_requests.len(),
            "bulk write reported errors"
        );
        Err(ClientError::BulkWriteOperation(Box::new(BulkWriteOperationError {
            outcome,
            write_errors,
            write_concern_error: last_write_concern_error,
            unprocessed_requests,
        })))
    }
}

fn count(reply: &Document, key: &str) -> ClientResult<i64> {
    match reply.get(key) {
        Some(Bson::Int32(n)) => Ok(i64::from(*n)),
        Some(Bson::Int64(n)) => Ok(*n),
        Some(Bson::Double(n)) => Ok(*n as i64),
        None => Ok(0),
        Some(other) => Err(ClientError::execution(format!(
            "reply field '{}' is not a number: {}",
            key, other
        ))),
    }
}

fn documents(values: &[Bson], what: &str) -> ClientResult<Vec<Document>> {
    values
        .iter()
        .map(|value| match value {
            Bson::Document(document) => Ok(document.clone()),
            other => Err(ClientError::execution(format!(
                "{} contains a non-document {}",
                what, other
            ))),
        })
        .collect()
}

fn read_output(operation: &ReadOperation, reply: &Document) -> ClientResult<OperationOutput> {
    match &operation.command {
        ReadCommand::EstimatedDocumentCount { .. } => Ok(OperationOutput::Count(count(reply, "n")?)),
        ReadCommand::Distinct { .. } => {
            let values = reply
                .get_array("values")
                .map_err(|_| ClientError::execution("distinct reply has no values"))?;
            Ok(OperationOutput::Values(values.clone()))
        }
        ReadCommand::MapReduce(_) => {
            let results = reply
                .get_array("results")
                .map_err(|_| ClientError::execution("inline mapReduce reply has no results"))?;
            Ok(OperationOutput::Cursor(CursorBatch::exhausted(
                operation.namespace.clone(),
                documents(results, "mapReduce results")?,
            )))
        }
        _ => Ok(OperationOutput::Cursor(CursorBatch::from_reply(
            reply,
            &operation.namespace,
        )?)),
    }
}

fn command_output(command: &WriteCommand, reply: &Document) -> ClientResult<OperationOutput> {
    match command {
        WriteCommand::FindAndModify(_) => Ok(OperationOutput::Document(match reply.get("value") {
            Some(Bson::Document(document)) => Some(document.clone()),
            _ => None,
        })),
        WriteCommand::CreateSearchIndexes { .. } => {
            let created = match reply.get_array("indexesCreated") {
                Ok(created) => documents(created, "indexesCreated")?,
                Err(_) => Vec::new(),
            };
            Ok(OperationOutput::IndexNames(
                created
                    .iter()
                    .filter_map(|index| index.get_str("name").ok().map(str::to_string))
                    .collect(),
            ))
        }
        _ => Ok(OperationOutput::Acknowledged),
    }
}

fn tally(
    outcome: &mut BulkWriteOutcome,
    request_type: WriteRequestType,
    reply: &Document,
    offset: usize,
) -> ClientResult<()> {
    let n = count(reply, "n")?;
    match request_type {
        WriteRequestType::Insert => outcome.inserted_count += n,
        WriteRequestType::Delete => outcome.deleted_count += n,
        WriteRequestType::Update => {
            let upserted = match reply.get_array("upserted") {
                Ok(upserted) => documents(upserted, "upserted")?,
                Err(_) => Vec::new(),
            };
            for upsert in &upserted {
                outcome.upserts.push(BulkWriteUpsert {
                    index: offset + count(upsert, "index")? as usize,
                    id: upsert.get("_id").cloned().unwrap_or(Bson::Null),
                });
            }
            outcome.matched_count += n - upserted.len() as i64;
            outcome.modified_count += count(reply, "nModified")?;
        }
    }
    Ok(())
}

fn write_errors_of(reply: &Document, offset: usize) -> ClientResult<Vec<WriteError>> {
    let Ok(errors) = reply.get_array("writeErrors") else {
        return Ok(Vec::new());
    };
    documents(errors, "writeErrors")?
        .iter()
        .map(|error| {
            Ok(WriteError {
                index: offset + count(error, "index")? as usize,
                code: count(error, "code")? as i32,
                message: error.get_str("errmsg").unwrap_or_default().to_string(),
                details: error.get_document("errInfo").ok().cloned(),
            })
        })
        .collect()
}

fn write_concern_error(reply: &Document) -> ClientResult<Option<WriteConcernError>> {
    let Ok(error) = reply.get_document("writeConcernError") else {
        return Ok(None);
    };
    Ok(Some(WriteConcernError {
        code: count(error, "code")? as i32,
        message: error.get_str("errmsg").unwrap_or_default().to_string(),
        details: error.get_document("errInfo").ok().cloned(),
    }))
}

impl Cluster for DriverRuntime {}

#[async_trait]
impl OperationExecutor for DriverRuntime {
    fn execute_read(
        &self,
        binding: &ReadBinding,
        operation: &ReadOperation,
        cancellation: &CancellationToken,
    ) -> ClientResult<OperationOutput> {
        self.block_on(self.read(binding, operation, cancellation))
    }

    fn execute_write(
        &self,
        binding: &WriteBinding,
        operation: &WriteOperation,
        cancellation: &CancellationToken,
    ) -> ClientResult<OperationOutput> {
        self.block_on(self.write(binding, operation, cancellation))
    }

    async fn execute_read_async(
        &self,
        binding: &ReadBinding,
        operation: &ReadOperation,
        cancellation: &CancellationToken,
    ) -> ClientResult<OperationOutput> {
        self.read(binding, operation, cancellation).await
    }

    async fn execute_write_async(
        &self,
        binding: &WriteBinding,
        operation: &WriteOperation,
        cancellation: &CancellationToken,
    ) -> ClientResult<OperationOutput> {
        self.write(binding, operation, cancellation).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use docforge_render::CollectionNamespace;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_tally_update_reply() {
        let mut outcome = BulkWriteOutcome::default();
        let reply = doc! {
            "ok": 1,
            "n": 3,
            "nModified": 1,
            "upserted": [{ "index": 1, "_id": 42 }],
        };
        tally(&mut outcome, WriteRequestType::Update, &reply, 4).unwrap();
        assert_eq!(outcome.matched_count, 2);
        assert_eq!(outcome.modified_count, 1);
        assert_eq!(
            outcome.upserts,
            vec![BulkWriteUpsert {
                index: 5,
                id: Bson::Int32(42)
            }]
        );
    }

    #[test]
    fn test_write_errors_are_offset() {
        let reply = doc! {
            "ok": 1,
            "n": 1,
            "writeErrors": [{ "index": 1, "code": 11000, "errmsg": "duplicate key" }],
            "writeConcernError": { "code": 64, "errmsg": "waiting for replication timed out" },
        };
        let errors = write_errors_of(&reply, 2).unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].index, 3);
        assert_eq!(errors[0].code, 11000);
        let concern = write_concern_error(&reply).unwrap().unwrap();
        assert_eq!(concern.code, 64);
    }

    #[test]
    fn test_read_outputs() {
        let ns = CollectionNamespace::parse("shop.orders").unwrap();
        let count_op = ReadOperation::new(
            ns.clone(),
            ReadCommand::EstimatedDocumentCount {
                max_time: None,
                comment: None,
            },
        );
        assert_eq!(
            read_output(&count_op, &doc! { "n": 7, "ok": 1 }).unwrap(),
            OperationOutput::Count(7)
        );

        let find_op = ReadOperation::new(ns.clone(), ReadCommand::Find(Default::default()));
        let reply = doc! { "cursor": { "id": 0_i64, "ns": "shop.orders", "firstBatch": [{ "a": 1 }] } };
        let batch = read_output(&find_op, &reply).unwrap().into_cursor().unwrap();
        assert_eq!(batch.documents, vec![doc! { "a": 1 }]);
        assert_eq!(batch.cursor_id, 0);
    }

    #[test]
    fn test_command_outputs() {
        let command = WriteCommand::DropSearchIndex { name: "x".into() };
        assert_eq!(
            command_output(&command, &doc! { "ok": 1 }).unwrap(),
            OperationOutput::Acknowledged
        );
        let names = command_output(
            &WriteCommand::CreateSearchIndexes { indexes: vec![] },
            &doc! { "indexesCreated": [{ "id": "1", "name": "titles" }] },
        )
        .unwrap();
        assert_eq!(names, OperationOutput::IndexNames(vec!["titles".to_string()]));
    }
}
