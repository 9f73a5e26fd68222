//! Shared fixtures: a recording executor and an in-memory cluster.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use docforge::client::bulk::WriteRequestType;
use docforge::client::{
    BulkWriteOutcome, Cluster, CursorBatch, OperationExecutor, OperationOutput, ReadBinding,
    ReadOperation, SessionHandle, SessionId, SessionOptions, WriteBinding, WriteOperation,
};
use docforge::prelude::*;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Person {
    #[serde(rename = "_id")]
    pub id: i32,
    #[serde(rename = "n")]
    pub name: String,
    pub age: i32,
}

impl Person {
    pub fn new(id: i32, name: &str, age: i32) -> Self {
        Self {
            id,
            name: name.to_string(),
            age,
        }
    }
}

pub fn registry() -> Arc<SerializerRegistry> {
    let person = DocumentSerializer::builder("Person")
        .member("_id", ScalarSerializer::int32())
        .member_as("name", "n", ScalarSerializer::string())
        .member("age", ScalarSerializer::int32())
        .build();
    Arc::new(SerializerRegistry::new().with::<Person>(person))
}

/// What the executor was asked to run, and under which session.
#[derive(Debug, Clone)]
pub enum Recorded {
    Read {
        operation: ReadOperation,
        session: SessionId,
        in_transaction: bool,
    },
    Write {
        operation: WriteOperation,
        session: SessionId,
        in_transaction: bool,
    },
}

impl Recorded {
    pub fn read(&self) -> &ReadOperation {
        match self {
            Self::Read { operation, .. } => operation,
            other => panic!("expected a read, got {:?}", other),
        }
    }

    pub fn write(&self) -> &WriteOperation {
        match self {
            Self::Write { operation, .. } => operation,
            other => panic!("expected a write, got {:?}", other),
        }
    }

    pub fn session(&self) -> SessionId {
        match self {
            Self::Read { session, .. } | Self::Write { session, .. } => *session,
        }
    }
}

type ReadReply = Box<dyn FnOnce(&ReadOperation) -> ClientResult<OperationOutput> + Send>;
type WriteReply = Box<dyn FnOnce(&WriteOperation) -> ClientResult<OperationOutput> + Send>;

/// Records every descriptor and answers from scripted replies.
///
/// Unscripted reads return an exhausted empty cursor; unscripted bulk
/// writes succeed with every request processed.
#[derive(Default)]
pub struct RecordingExecutor {
    calls: Mutex<Vec<Recorded>>,
    reads: Mutex<VecDeque<ReadReply>>,
    writes: Mutex<VecDeque<WriteReply>>,
}

impl RecordingExecutor {
    pub fn calls(&self) -> Vec<Recorded> {
        self.calls.lock().clone()
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }

    pub fn reply_read(
        &self,
        reply: impl FnOnce(&ReadOperation) -> ClientResult<OperationOutput> + Send + 'static,
    ) {
        self.reads.lock().push_back(Box::new(reply));
    }

    pub fn reply_documents(&self, documents: Vec<Document>) {
        self.reply_read(move |operation| {
            Ok(OperationOutput::Cursor(CursorBatch::exhausted(
                operation.namespace.clone(),
                documents,
            )))
        });
    }

    pub fn reply_write(
        &self,
        reply: impl FnOnce(&WriteOperation) -> ClientResult<OperationOutput> + Send + 'static,
    ) {
        self.writes.lock().push_back(Box::new(reply));
    }

    fn read(&self, binding: &ReadBinding, operation: &ReadOperation) -> ClientResult<OperationOutput> {
        self.calls.lock().push(Recorded::Read {
            operation: operation.clone(),
            session: binding.session().id(),
            in_transaction: binding.session().is_in_transaction(),
        });
        match self.reads.lock().pop_front() {
            Some(reply) => reply(operation),
            None => Ok(OperationOutput::Cursor(CursorBatch::exhausted(
                operation.namespace.clone(),
                Vec::new(),
            ))),
        }
    }

    fn write(&self, binding: &WriteBinding, operation: &WriteOperation) -> ClientResult<OperationOutput> {
        self.calls.lock().push(Recorded::Write {
            operation: operation.clone(),
            session: binding.session().id(),
            in_transaction: binding.session().is_in_transaction(),
        });
        if let Some(reply) = self.writes.lock().pop_front() {
            return reply(operation);
        }
        match operation {
            WriteOperation::BulkWrite(bulk) => Ok(OperationOutput::BulkWrite(processed_all(bulk))),
            WriteOperation::Command(_) => Ok(OperationOutput::Acknowledged),
        }
    }
}

/// A successful outcome where every request ran in batch order.
pub fn processed_all(bulk: &docforge::client::BulkWriteOperation) -> BulkWriteOutcome {
    let processed: Vec<_> = bulk.batches().into_iter().flat_map(|b| b.requests).collect();
    let count = |kind: WriteRequestType| {
        processed.iter().filter(|r| r.request_type() == kind).count() as i64
    };
    BulkWriteOutcome {
        acknowledged: true,
        inserted_count: count(WriteRequestType::Insert),
        matched_count: count(WriteRequestType::Update),
        modified_count: count(WriteRequestType::Update),
        deleted_count: count(WriteRequestType::Delete),
        upserts: Vec::new(),
        processed_requests: processed,
    }
}

#[async_trait]
impl OperationExecutor for RecordingExecutor {
    fn execute_read(
        &self,
        binding: &ReadBinding,
        operation: &ReadOperation,
        _: &CancellationToken,
    ) -> ClientResult<OperationOutput> {
        self.read(binding, operation)
    }

    fn execute_write(
        &self,
        binding: &WriteBinding,
        operation: &WriteOperation,
        _: &CancellationToken,
    ) -> ClientResult<OperationOutput> {
        self.write(binding, operation)
    }

    async fn execute_read_async(
        &self,
        binding: &ReadBinding,
        operation: &ReadOperation,
        _: &CancellationToken,
    ) -> ClientResult<OperationOutput> {
        tokio::task::yield_now().await;
        self.read(binding, operation)
    }

    async fn execute_write_async(
        &self,
        binding: &WriteBinding,
        operation: &WriteOperation,
        _: &CancellationToken,
    ) -> ClientResult<OperationOutput> {
        tokio::task::yield_now().await;
        self.write(binding, operation)
    }
}

/// Counts started sessions and records ended ones.
#[derive(Default)]
pub struct MemoryCluster {
    started: AtomicUsize,
    ended: Arc<Mutex<Vec<SessionId>>>,
}

impl MemoryCluster {
    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn ended(&self) -> Vec<SessionId> {
        self.ended.lock().clone()
    }
}

impl Cluster for MemoryCluster {
    fn start_session(&self, options: SessionOptions, implicit: bool) -> SessionHandle {
        self.started.fetch_add(1, Ordering::SeqCst);
        let ended = Arc::clone(&self.ended);
        SessionHandle::with_end_hook(
            options,
            implicit,
            Arc::new(move |id: &SessionId| ended.lock().push(*id)),
        )
    }
}

pub struct Harness {
    pub client: DocforgeClient,
    pub cluster: Arc<MemoryCluster>,
    pub executor: Arc<RecordingExecutor>,
}

impl Harness {
    pub fn new() -> Self {
        let cluster = Arc::new(MemoryCluster::default());
        let executor = Arc::new(RecordingExecutor::default());
        let client = DocforgeClient::builder()
            .uri("mongodb://db.example:27017")
            .database("shop")
            .write_concern(WriteConcern::majority())
            .registry(registry())
            .build_with(cluster.clone(), executor.clone())
            .expect("valid settings");
        Self {
            client,
            cluster,
            executor,
        }
    }

    pub fn people(&self) -> Collection<Person> {
        self.client
            .default_database()
            .and_then(|db| db.collection::<Person>("people"))
            .expect("valid namespace")
    }
}
