//! Cursors over operation results.
//!
//! [`Cursor`] iterates a server cursor whose first batch has already been
//! fetched. [`DeferredCursor`] holds a read that has not run yet: the first
//! enumeration executes it under a forked session, and disposing the cursor
//! disposes the fork.

use std::collections::VecDeque;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use bson::Document;
use docforge_render::CollectionNamespace;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::cluster::{Cluster, ReadBinding};
use crate::config::ReadPreference;
use crate::error::{ClientError, ClientResult};
use crate::executor::OperationExecutor;
use crate::operation::{CursorBatch, ReadCommand, ReadOperation};
use crate::session::SessionHandle;

/// Batch-wise access to query results.
#[async_trait]
pub trait ResultCursor<T: Send>: Send {
    /// The next batch, or `None` once exhausted.
    fn next_batch(&mut self) -> ClientResult<Option<Vec<T>>>;

    /// The next batch, or `None` once exhausted.
    async fn next_batch_async(&mut self) -> ClientResult<Option<Vec<T>>>;

    /// Drain every remaining batch.
    fn to_vec(&mut self) -> ClientResult<Vec<T>> {
        let mut items = Vec::new();
        while let Some(batch) = self.next_batch()? {
            items.extend(batch);
        }
        Ok(items)
    }

    /// Drain every remaining batch.
    async fn to_vec_async(&mut self) -> ClientResult<Vec<T>> {
        let mut items = Vec::new();
        while let Some(batch) = self.next_batch_async().await? {
            items.extend(batch);
        }
        Ok(items)
    }
}

/// A cursor over an executed read.
///
/// The cursor keeps its read binding, and with it a session fork, until
/// the server cursor is exhausted or the cursor is dropped.
pub struct Cursor<T> {
    executor: Arc<dyn OperationExecutor>,
    binding: Option<ReadBinding>,
    namespace: CollectionNamespace,
    cursor_id: i64,
    batch_size: Option<u32>,
    buffer: VecDeque<Document>,
    cancellation: CancellationToken,
    _marker: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> Cursor<T> {
    /// Wrap the first batch of a read executed under `binding`.
    pub fn new(
        executor: Arc<dyn OperationExecutor>,
        binding: ReadBinding,
        first_batch: CursorBatch,
        batch_size: Option<u32>,
        cancellation: CancellationToken,
    ) -> Self {
        let mut cursor = Self {
            executor,
            binding: Some(binding),
            namespace: first_batch.namespace,
            cursor_id: first_batch.cursor_id,
            batch_size,
            buffer: first_batch.documents.into(),
            cancellation,
            _marker: PhantomData,
        };
        cursor.release_if_exhausted();
        cursor
    }

    /// Server cursor id; `0` once the server has no more results.
    pub fn id(&self) -> i64 {
        self.cursor_id
    }

    /// Namespace the cursor reads from.
    pub fn namespace(&self) -> &CollectionNamespace {
        &self.namespace
    }

    /// Whether every result has been returned.
    pub fn is_exhausted(&self) -> bool {
        self.cursor_id == 0 && self.buffer.is_empty()
    }

    fn release_if_exhausted(&mut self) {
        if self.cursor_id == 0 && self.binding.take().is_some() {
            trace!(namespace = %self.namespace, "cursor exhausted");
        }
    }

    fn get_more(&self) -> ReadOperation {
        ReadOperation::new(
            self.namespace.clone(),
            ReadCommand::GetMore {
                cursor_id: self.cursor_id,
                batch_size: self.batch_size,
            },
        )
    }

    fn absorb(&mut self, batch: CursorBatch) {
        self.cursor_id = batch.cursor_id;
        self.buffer.extend(batch.documents);
        self.release_if_exhausted();
    }

    fn binding(&self) -> ClientResult<&ReadBinding> {
        self.binding
            .as_ref()
            .ok_or_else(|| ClientError::execution("cursor has no binding"))
    }

    fn fetch(&mut self) -> ClientResult<()> {
        while self.buffer.is_empty() && self.cursor_id != 0 {
            let operation = self.get_more();
            let batch = self
                .executor
                .execute_read(self.binding()?, &operation, &self.cancellation)?
                .into_cursor()?;
            self.absorb(batch);
        }
        Ok(())
    }

    async fn fetch_async(&mut self) -> ClientResult<()> {
        while self.buffer.is_empty() && self.cursor_id != 0 {
            let operation = self.get_more();
            let batch = self
                .executor
                .execute_read_async(self.binding()?, &operation, &self.cancellation)
                .await?
                .into_cursor()?;
            self.absorb(batch);
        }
        Ok(())
    }

    fn drain(&mut self) -> ClientResult<Option<Vec<T>>> {
        if self.buffer.is_empty() {
            return Ok(None);
        }
        self.buffer
            .drain(..)
            .map(|document| bson::from_document(document).map_err(ClientError::from))
            .collect::<ClientResult<Vec<T>>>()
            .map(Some)
    }

    fn pop(&mut self) -> ClientResult<Option<T>> {
        match self.buffer.pop_front() {
            Some(document) => Ok(Some(bson::from_document(document)?)),
            None => Ok(None),
        }
    }

    /// The next document.
    pub fn try_next(&mut self) -> ClientResult<Option<T>> {
        self.fetch()?;
        self.pop()
    }

    /// The next document.
    pub async fn try_next_async(&mut self) -> ClientResult<Option<T>> {
        self.fetch_async().await?;
        self.pop()
    }
}

#[async_trait]
impl<T: DeserializeOwned + Send> ResultCursor<T> for Cursor<T> {
    fn next_batch(&mut self) -> ClientResult<Option<Vec<T>>> {
        self.fetch()?;
        self.drain()
    }

    async fn next_batch_async(&mut self) -> ClientResult<Option<Vec<T>>> {
        self.fetch_async().await?;
        self.drain()
    }
}

impl<T> fmt::Debug for Cursor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor")
            .field("namespace", &self.namespace)
            .field("cursor_id", &self.cursor_id)
            .field("buffered", &self.buffer.len())
            .finish()
    }
}

enum DeferredState<T> {
    NotStarted(ReadOperation),
    /// Held while the read is in flight. A read whose future was dropped
    /// before completing leaves the cursor here for good.
    Running,
    Completed(Cursor<T>),
    Disposed,
}

/// A cursor whose read runs on first enumeration.
///
/// The read executes at most once, against the primary, under the forked
/// session the cursor owns. The fork is disposed exactly once, by
/// [`dispose`](Self::dispose) or on drop, whether or not the read ran.
///
/// Dropping an async enumeration before its read completes leaves the
/// cursor interrupted: the fork is released and every later call fails
/// with an execution error.
pub struct DeferredCursor<T> {
    state: DeferredState<T>,
    session: Option<SessionHandle>,
    cluster: Arc<dyn Cluster>,
    executor: Arc<dyn OperationExecutor>,
    cancellation: CancellationToken,
}

impl<T: DeserializeOwned> DeferredCursor<T> {
    /// Defer `operation` under `session`, a fork owned by the cursor.
    pub fn new(
        cluster: Arc<dyn Cluster>,
        executor: Arc<dyn OperationExecutor>,
        session: SessionHandle,
        operation: ReadOperation,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            state: DeferredState::NotStarted(operation),
            session: Some(session),
            cluster,
            executor,
            cancellation,
        }
    }

    /// The deferred read, until it has started.
    pub fn operation(&self) -> Option<&ReadOperation> {
        match &self.state {
            DeferredState::NotStarted(operation) => Some(operation),
            _ => None,
        }
    }

    /// Whether the read has been issued.
    pub fn is_started(&self) -> bool {
        !matches!(self.state, DeferredState::NotStarted(_))
    }

    /// Whether the cursor has been disposed.
    pub fn is_disposed(&self) -> bool {
        matches!(self.state, DeferredState::Disposed)
    }

    fn begin(&mut self) -> ClientResult<Option<(ReadOperation, ReadBinding)>> {
        match std::mem::replace(&mut self.state, DeferredState::Running) {
            DeferredState::NotStarted(operation) => {
                let session = self.session.as_ref().ok_or(ClientError::SessionDisposed)?;
                let binding = match self.cluster.read_binding(session, &ReadPreference::primary()) {
                    Ok(binding) => binding,
                    Err(e) => {
                        self.dispose();
                        return Err(e);
                    }
                };
                debug!(
                    namespace = %operation.namespace,
                    operation = operation.name(),
                    "running deferred read"
                );
                Ok(Some((operation, binding)))
            }
            DeferredState::Running => {
                if let Some(session) = self.session.take() {
                    debug!(session_id = %session.id(), "deferred read interrupted, releasing fork");
                    session.dispose();
                }
                Err(ClientError::execution(
                    "deferred read was interrupted before completing",
                ))
            }
            DeferredState::Disposed => {
                self.state = DeferredState::Disposed;
                Err(ClientError::SessionDisposed)
            }
            completed => {
                self.state = completed;
                Ok(None)
            }
        }
    }

    fn finish(
        &mut self,
        operation: &ReadOperation,
        binding: ReadBinding,
        result: ClientResult<CursorBatch>,
    ) -> ClientResult<()> {
        match result {
            Ok(batch) => {
                self.state = DeferredState::Completed(Cursor::new(
                    Arc::clone(&self.executor),
                    binding,
                    batch,
                    operation.batch_size(),
                    self.cancellation.clone(),
                ));
                Ok(())
            }
            Err(e) => {
                drop(binding);
                self.dispose();
                Err(e)
            }
        }
    }

    fn start(&mut self) -> ClientResult<()> {
        if let Some((operation, binding)) = self.begin()? {
            let result = self
                .executor
                .execute_read(&binding, &operation, &self.cancellation)
                .and_then(|output| output.into_cursor());
            self.finish(&operation, binding, result)?;
        }
        Ok(())
    }

    async fn start_async(&mut self) -> ClientResult<()> {
        if let Some((operation, binding)) = self.begin()? {
            let executor = Arc::clone(&self.executor);
            let result = executor
                .execute_read_async(&binding, &operation, &self.cancellation)
                .await
                .and_then(|output| output.into_cursor());
            self.finish(&operation, binding, result)?;
        }
        Ok(())
    }

    fn cursor(&mut self) -> Option<&mut Cursor<T>> {
        match &mut self.state {
            DeferredState::Completed(cursor) => Some(cursor),
            _ => None,
        }
    }

    /// The next document, running the read first if needed.
    pub fn try_next(&mut self) -> ClientResult<Option<T>> {
        self.start()?;
        match self.cursor() {
            Some(cursor) => cursor.try_next(),
            None => Ok(None),
        }
    }

    /// The next document, running the read first if needed.
    pub async fn try_next_async(&mut self) -> ClientResult<Option<T>> {
        self.start_async().await?;
        match self.cursor() {
            Some(cursor) => cursor.try_next_async().await,
            None => Ok(None),
        }
    }
}

impl<T> DeferredCursor<T> {
    /// Release the cursor and dispose its session fork. Repeated calls are
    /// no-ops.
    pub fn dispose(&mut self) {
        self.state = DeferredState::Disposed;
        if let Some(session) = self.session.take() {
            trace!(session_id = %session.id(), "deferred cursor disposed");
            session.dispose();
        }
    }
}

#[async_trait]
impl<T: DeserializeOwned + Send> ResultCursor<T> for DeferredCursor<T> {
    fn next_batch(&mut self) -> ClientResult<Option<Vec<T>>> {
        self.start()?;
        match self.cursor() {
            Some(cursor) => cursor.next_batch(),
            None => Ok(None),
        }
    }

    async fn next_batch_async(&mut self) -> ClientResult<Option<Vec<T>>> {
        self.start_async().await?;
        match self.cursor() {
            Some(cursor) => cursor.next_batch_async().await,
            None => Ok(None),
        }
    }
}

impl<T> Drop for DeferredCursor<T> {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl<T> fmt::Debug for DeferredCursor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.state {
            DeferredState::NotStarted(_) => "NotStarted",
            DeferredState::Running => "Running",
            DeferredState::Completed(_) => "Completed",
            DeferredState::Disposed => "Disposed",
        };
        f.debug_struct("DeferredCursor").field("state", &state).finish()
    }
}

/// Results of `aggregate`: a cursor for ordinary pipelines, a deferred
/// cursor over the output collection for `$out`/`$merge` pipelines.
#[derive(Debug)]
pub enum AggregateCursor<T> {
    /// The pipeline returned a cursor.
    Immediate(Cursor<T>),
    /// The pipeline wrote a collection that is read on first enumeration.
    Deferred(DeferredCursor<T>),
}

impl<T> AggregateCursor<T> {
    /// Whether results come from an output collection.
    pub fn is_deferred(&self) -> bool {
        matches!(self, Self::Deferred(_))
    }

    /// Release the cursor.
    pub fn dispose(&mut self) {
        match self {
            Self::Immediate(cursor) => {
                cursor.binding = None;
                cursor.buffer.clear();
            }
            Self::Deferred(cursor) => cursor.dispose(),
        }
    }
}

impl<T: DeserializeOwned> AggregateCursor<T> {
    /// The next document.
    pub fn try_next(&mut self) -> ClientResult<Option<T>> {
        match self {
            Self::Immediate(cursor) => cursor.try_next(),
            Self::Deferred(cursor) => cursor.try_next(),
        }
    }

    /// The next document.
    pub async fn try_next_async(&mut self) -> ClientResult<Option<T>> {
        match self {
            Self::Immediate(cursor) => cursor.try_next_async().await,
            Self::Deferred(cursor) => cursor.try_next_async().await,
        }
    }
}

#[async_trait]
impl<T: DeserializeOwned + Send> ResultCursor<T> for AggregateCursor<T> {
    fn next_batch(&mut self) -> ClientResult<Option<Vec<T>>> {
        match self {
            Self::Immediate(cursor) => cursor.next_batch(),
            Self::Deferred(cursor) => cursor.next_batch(),
        }
    }

    async fn next_batch_async(&mut self) -> ClientResult<Option<Vec<T>>> {
        match self {
            Self::Immediate(cursor) => cursor.next_batch_async().await,
            Self::Deferred(cursor) => cursor.next_batch_async().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::WriteBinding;
    use crate::operation::{FindCommand, OperationOutput, WriteOperation};
    use crate::session::SessionOptions;
    use bson::doc;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct LocalCluster;

    impl Cluster for LocalCluster {}

    /// Serves a first batch of two documents, then one more through getMore.
    #[derive(Default)]
    struct PagedExecutor {
        reads: Mutex<Vec<String>>,
    }

    impl PagedExecutor {
        fn serve(&self, operation: &ReadOperation) -> ClientResult<OperationOutput> {
            self.reads.lock().push(operation.name().to_string());
            let batch = match operation.command {
                ReadCommand::GetMore { .. } => CursorBatch {
                    cursor_id: 0,
                    namespace: operation.namespace.clone(),
                    documents: vec![doc! { "n": 3 }],
                },
                _ => CursorBatch {
                    cursor_id: 7,
                    namespace: operation.namespace.clone(),
                    documents: vec![doc! { "n": 1 }, doc! { "n": 2 }],
                },
            };
            Ok(OperationOutput::Cursor(batch))
        }
    }

    #[async_trait]
    impl OperationExecutor for PagedExecutor {
        fn execute_read(
            &self,
            _binding: &ReadBinding,
            operation: &ReadOperation,
            _cancellation: &CancellationToken,
        ) -> ClientResult<OperationOutput> {
            self.serve(operation)
        }

        fn execute_write(
            &self,
            _binding: &WriteBinding,
            _operation: &WriteOperation,
            _cancellation: &CancellationToken,
        ) -> ClientResult<OperationOutput> {
            Ok(OperationOutput::Acknowledged)
        }

        async fn execute_read_async(
            &self,
            _binding: &ReadBinding,
            operation: &ReadOperation,
            _cancellation: &CancellationToken,
        ) -> ClientResult<OperationOutput> {
            self.serve(operation)
        }

        async fn execute_write_async(
            &self,
            _binding: &WriteBinding,
            _operation: &WriteOperation,
            _cancellation: &CancellationToken,
        ) -> ClientResult<OperationOutput> {
            Ok(OperationOutput::Acknowledged)
        }
    }

    #[derive(Debug, serde::Deserialize, PartialEq)]
    struct Row {
        n: i32,
    }

    fn find() -> ReadOperation {
        ReadOperation::new(
            CollectionNamespace::parse("db.out").unwrap(),
            ReadCommand::Find(FindCommand::default()),
        )
    }

    fn deferred(
        executor: &Arc<PagedExecutor>,
        ended: &Arc<AtomicUsize>,
    ) -> (SessionHandle, DeferredCursor<Row>) {
        let ended = Arc::clone(ended);
        let session = SessionHandle::with_end_hook(
            SessionOptions::default(),
            true,
            Arc::new(move |_| {
                ended.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let cursor = DeferredCursor::new(
            Arc::new(LocalCluster),
            executor.clone(),
            session.fork().unwrap(),
            find(),
            CancellationToken::new(),
        );
        (session, cursor)
    }

    #[test]
    fn test_cursor_follows_get_more() {
        let executor = Arc::new(PagedExecutor::default());
        let (session, mut cursor) = deferred(&executor, &Arc::new(AtomicUsize::new(0)));
        session.dispose();

        let rows = cursor.to_vec().unwrap();
        assert_eq!(rows, vec![Row { n: 1 }, Row { n: 2 }, Row { n: 3 }]);
        assert_eq!(*executor.reads.lock(), vec!["find", "getMore"]);
    }

    #[test]
    fn test_deferred_read_runs_once_on_first_enumeration() {
        let executor = Arc::new(PagedExecutor::default());
        let (_session, mut cursor) = deferred(&executor, &Arc::new(AtomicUsize::new(0)));
        assert!(!cursor.is_started());
        assert!(executor.reads.lock().is_empty());

        assert_eq!(cursor.try_next().unwrap(), Some(Row { n: 1 }));
        assert_eq!(cursor.try_next().unwrap(), Some(Row { n: 2 }));
        assert!(cursor.is_started());
        assert_eq!(*executor.reads.lock(), vec!["find"]);
    }

    #[test]
    fn test_fork_outlives_call_until_disposed() {
        let executor = Arc::new(PagedExecutor::default());
        let ended = Arc::new(AtomicUsize::new(0));
        let (session, mut cursor) = deferred(&executor, &ended);

        // The implicit session ends with its call; the fork keeps it alive.
        session.dispose();
        assert_eq!(ended.load(Ordering::SeqCst), 0);

        cursor.dispose();
        cursor.dispose();
        drop(cursor);
        assert_eq!(ended.load(Ordering::SeqCst), 1);
        assert!(executor.reads.lock().is_empty());
    }

    #[test]
    fn test_disposed_cursor_rejects_enumeration() {
        let executor = Arc::new(PagedExecutor::default());
        let (_session, mut cursor) = deferred(&executor, &Arc::new(AtomicUsize::new(0)));
        cursor.dispose();
        assert!(matches!(cursor.try_next(), Err(ClientError::SessionDisposed)));
        assert!(executor.reads.lock().is_empty());
    }

    /// An async read that never resolves.
    struct StalledExecutor;

    #[async_trait]
    impl OperationExecutor for StalledExecutor {
        fn execute_read(
            &self,
            _binding: &ReadBinding,
            _operation: &ReadOperation,
            _cancellation: &CancellationToken,
        ) -> ClientResult<OperationOutput> {
            Err(ClientError::execution("stalled"))
        }

        fn execute_write(
            &self,
            _binding: &WriteBinding,
            _operation: &WriteOperation,
            _cancellation: &CancellationToken,
        ) -> ClientResult<OperationOutput> {
            Ok(OperationOutput::Acknowledged)
        }

        async fn execute_read_async(
            &self,
            _binding: &ReadBinding,
            _operation: &ReadOperation,
            _cancellation: &CancellationToken,
        ) -> ClientResult<OperationOutput> {
            std::future::pending().await
        }

        async fn execute_write_async(
            &self,
            _binding: &WriteBinding,
            _operation: &WriteOperation,
            _cancellation: &CancellationToken,
        ) -> ClientResult<OperationOutput> {
            Ok(OperationOutput::Acknowledged)
        }
    }

    #[test]
    fn test_dropped_read_leaves_cursor_interrupted() {
        use futures::FutureExt;

        let ended = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ended);
        let session = SessionHandle::with_end_hook(
            SessionOptions::default(),
            true,
            Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let mut cursor = DeferredCursor::<Row>::new(
            Arc::new(LocalCluster),
            Arc::new(StalledExecutor),
            session.fork().unwrap(),
            find(),
            CancellationToken::new(),
        );
        session.dispose();

        // Poll the read once, then drop it while it is still pending.
        assert!(cursor.try_next_async().now_or_never().is_none());
        assert!(cursor.is_started());
        assert!(!cursor.is_disposed());
        assert_eq!(ended.load(Ordering::SeqCst), 0);

        let err = cursor.try_next().unwrap_err();
        assert!(matches!(err, ClientError::Execution { .. }));
        assert!(err.to_string().contains("interrupted"));
        assert_eq!(ended.load(Ordering::SeqCst), 1);

        // Terminal: later calls keep failing and the fork is not released twice.
        assert!(matches!(cursor.next_batch(), Err(ClientError::Execution { .. })));
        drop(cursor);
        assert_eq!(ended.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_deferred_cursor_async() {
        let executor = Arc::new(PagedExecutor::default());
        let (_session, mut cursor) = deferred(&executor, &Arc::new(AtomicUsize::new(0)));
        let rows = cursor.to_vec_async().await.unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(*executor.reads.lock(), vec!["find", "getMore"]);
    }
}
