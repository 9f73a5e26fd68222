//! Session handles.
//!
//! A session is shared state (causal-consistency metadata and transaction
//! bookkeeping) reached through one or more [`SessionHandle`]s. Each handle
//! is disposed independently; the session itself ends when its last handle
//! is disposed.
//!
//! ```rust,ignore
//! let session = client.start_session(SessionOptions::default());
//! let fork = session.fork()?;
//! session.dispose();
//! assert!(!fork.is_ended());
//! drop(fork); // ends the session
//! ```

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bson::{Bson, Document, Timestamp, doc};
use parking_lot::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::{ReadConcern, ReadPreference, WriteConcern};
use crate::error::{ClientError, ClientResult};

/// Identifier of a logical session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    /// A fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying UUID.
    pub fn uuid(&self) -> Uuid {
        self.0
    }

    /// Render the `lsid` document.
    pub fn to_document(&self) -> Document {
        doc! { "id": Bson::from(bson::Uuid::from(self.0)) }
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Options of a transaction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionOptions {
    /// Read concern of the transaction.
    pub read_concern: Option<ReadConcern>,
    /// Write concern of the commit.
    pub write_concern: Option<WriteConcern>,
    /// Read preference of reads in the transaction.
    pub read_preference: Option<ReadPreference>,
    /// Maximum commit time.
    pub max_commit_time: Option<Duration>,
}

/// Options of a session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOptions {
    /// Causally consistent reads.
    pub causal_consistency: bool,
    /// Snapshot reads.
    pub snapshot: bool,
    /// Transaction options used when a transaction is started without any.
    pub default_transaction_options: Option<TransactionOptions>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            causal_consistency: true,
            snapshot: false,
            default_transaction_options: None,
        }
    }
}

/// Transaction state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// No transaction has been started.
    None,
    /// Started; no operation has run yet.
    Starting,
    /// At least one operation has run.
    InProgress,
    /// Committed.
    Committed,
    /// Aborted.
    Aborted,
}

/// Callback invoked once when a session ends.
pub type SessionEndHook = Arc<dyn Fn(&SessionId) + Send + Sync>;

struct SessionCore {
    cluster_time: Option<Document>,
    operation_time: Option<Timestamp>,
    transaction_state: TransactionState,
    transaction_options: Option<TransactionOptions>,
    transaction_number: i64,
    live_handles: usize,
    ended: bool,
}

struct SessionShared {
    id: SessionId,
    implicit: bool,
    options: SessionOptions,
    core: Mutex<SessionCore>,
    on_end: Option<SessionEndHook>,
}

/// A handle to a logical session.
///
/// Handles are disposed exactly once, explicitly through [`dispose`] or on
/// drop. Disposing a fork never ends a session that other handles still use.
///
/// [`dispose`]: SessionHandle::dispose
pub struct SessionHandle {
    shared: Arc<SessionShared>,
    disposed: AtomicBool,
    forked: bool,
}

impl SessionHandle {
    /// Start a session.
    pub fn new(options: SessionOptions, implicit: bool) -> Self {
        Self::start(options, implicit, None)
    }

    /// Start a session that reports its end to `on_end`.
    pub fn with_end_hook(options: SessionOptions, implicit: bool, on_end: SessionEndHook) -> Self {
        Self::start(options, implicit, Some(on_end))
    }

    fn start(options: SessionOptions, implicit: bool, on_end: Option<SessionEndHook>) -> Self {
        let id = SessionId::new();
        if implicit {
            debug!(session_id = %id, "implicit session started");
        } else {
            info!(session_id = %id, causal_consistency = options.causal_consistency, "session started");
        }
        let core = SessionCore {
            cluster_time: None,
            operation_time: None,
            transaction_state: TransactionState::None,
            transaction_options: None,
            transaction_number: 0,
            live_handles: 1,
            ended: false,
        };
        Self {
            shared: Arc::new(SessionShared {
                id,
                implicit,
                options,
                core: Mutex::new(core),
                on_end,
            }),
            disposed: AtomicBool::new(false),
            forked: false,
        }
    }

    /// The session id.
    pub fn id(&self) -> SessionId {
        self.shared.id
    }

    /// Whether the facade started this session for a single call.
    pub fn is_implicit(&self) -> bool {
        self.shared.implicit
    }

    /// Whether this handle was produced by [`fork`](Self::fork).
    pub fn is_fork(&self) -> bool {
        self.forked
    }

    /// The session options.
    pub fn options(&self) -> &SessionOptions {
        &self.shared.options
    }

    /// Whether this handle has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Whether the session ended because every handle was disposed.
    pub fn is_ended(&self) -> bool {
        self.shared.core.lock().ended
    }

    /// Fail when this handle has been disposed.
    pub fn ensure_active(&self) -> ClientResult<()> {
        if self.is_disposed() {
            return Err(ClientError::SessionDisposed);
        }
        Ok(())
    }

    /// Create another handle to the same session.
    pub fn fork(&self) -> ClientResult<SessionHandle> {
        self.ensure_active()?;
        self.shared.core.lock().live_handles += 1;
        Ok(SessionHandle {
            shared: Arc::clone(&self.shared),
            disposed: AtomicBool::new(false),
            forked: true,
        })
    }

    /// Dispose this handle. Repeated calls are no-ops.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let ended = {
            let mut core = self.shared.core.lock();
            core.live_handles = core.live_handles.saturating_sub(1);
            if core.live_handles == 0 && !core.ended {
                core.ended = true;
                true
            } else {
                false
            }
        };
        if ended {
            debug!(session_id = %self.shared.id, implicit = self.shared.implicit, "session ended");
            if let Some(on_end) = &self.shared.on_end {
                on_end(&self.shared.id);
            }
        }
    }

    /// Whether a transaction is starting or in progress.
    pub fn is_in_transaction(&self) -> bool {
        matches!(
            self.shared.core.lock().transaction_state,
            TransactionState::Starting | TransactionState::InProgress
        )
    }

    /// Current transaction state.
    pub fn transaction_state(&self) -> TransactionState {
        self.shared.core.lock().transaction_state
    }

    /// Options of the current or last transaction.
    pub fn transaction_options(&self) -> Option<TransactionOptions> {
        self.shared.core.lock().transaction_options.clone()
    }

    /// Number of the current or last transaction.
    pub fn transaction_number(&self) -> i64 {
        self.shared.core.lock().transaction_number
    }

    /// Start a transaction.
    pub fn start_transaction(&self, options: Option<TransactionOptions>) -> ClientResult<()> {
        self.ensure_active()?;
        if self.shared.options.snapshot {
            return Err(ClientError::transaction_policy(
                "transactions are not supported in snapshot sessions",
            ));
        }
        let options = options.or_else(|| self.shared.options.default_transaction_options.clone());
        if let Some(write_concern) = options.as_ref().and_then(|o| o.write_concern.as_ref()) {
            if !write_concern.is_acknowledged() {
                return Err(ClientError::transaction_policy(
                    "transactions do not support unacknowledged write concerns",
                ));
            }
        }

        let mut core = self.shared.core.lock();
        if matches!(
            core.transaction_state,
            TransactionState::Starting | TransactionState::InProgress
        ) {
            return Err(ClientError::transaction_policy("transaction already in progress"));
        }
        core.transaction_number += 1;
        core.transaction_state = TransactionState::Starting;
        core.transaction_options = options;
        debug!(session_id = %self.shared.id, txn_number = core.transaction_number, "transaction started");
        Ok(())
    }

    /// Record that an operation ran inside the starting transaction.
    pub fn mark_transaction_in_progress(&self) {
        let mut core = self.shared.core.lock();
        if core.transaction_state == TransactionState::Starting {
            core.transaction_state = TransactionState::InProgress;
        }
    }

    /// Commit the current transaction. Committing again is allowed.
    pub fn commit_transaction(&self) -> ClientResult<()> {
        self.ensure_active()?;
        let mut core = self.shared.core.lock();
        match core.transaction_state {
            TransactionState::Starting
            | TransactionState::InProgress
            | TransactionState::Committed => {
                core.transaction_state = TransactionState::Committed;
                Ok(())
            }
            TransactionState::None => Err(ClientError::transaction_policy("no transaction started")),
            TransactionState::Aborted => Err(ClientError::transaction_policy(
                "cannot commit after abort_transaction",
            )),
        }
    }

    /// Abort the current transaction.
    pub fn abort_transaction(&self) -> ClientResult<()> {
        self.ensure_active()?;
        let mut core = self.shared.core.lock();
        match core.transaction_state {
            TransactionState::Starting | TransactionState::InProgress => {
                core.transaction_state = TransactionState::Aborted;
                Ok(())
            }
            TransactionState::None => Err(ClientError::transaction_policy("no transaction started")),
            TransactionState::Committed => Err(ClientError::transaction_policy(
                "cannot abort after commit_transaction",
            )),
            TransactionState::Aborted => Err(ClientError::transaction_policy(
                "abort_transaction already called",
            )),
        }
    }

    /// Latest cluster time seen by the session.
    pub fn cluster_time(&self) -> Option<Document> {
        self.shared.core.lock().cluster_time.clone()
    }

    /// Advance the cluster time; older values are ignored.
    pub fn advance_cluster_time(&self, cluster_time: &Document) {
        let mut core = self.shared.core.lock();
        let newer = match &core.cluster_time {
            None => true,
            Some(current) => cluster_timestamp(cluster_time) > cluster_timestamp(current),
        };
        if newer {
            core.cluster_time = Some(cluster_time.clone());
        }
    }

    /// Latest operation time seen by the session.
    pub fn operation_time(&self) -> Option<Timestamp> {
        self.shared.core.lock().operation_time
    }

    /// Advance the operation time; older values are ignored.
    pub fn advance_operation_time(&self, operation_time: Timestamp) {
        let mut core = self.shared.core.lock();
        let newer = match core.operation_time {
            None => true,
            Some(current) => timestamp_key(operation_time) > timestamp_key(current),
        };
        if newer {
            core.operation_time = Some(operation_time);
        }
    }
}

fn timestamp_key(ts: Timestamp) -> (u32, u32) {
    (ts.time, ts.increment)
}

fn cluster_timestamp(cluster_time: &Document) -> Option<(u32, u32)> {
    cluster_time.get_timestamp("clusterTime").ok().map(timestamp_key)
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.shared.id)
            .field("implicit", &self.shared.implicit)
            .field("forked", &self.forked)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_session(ended: &Arc<AtomicUsize>) -> SessionHandle {
        let ended = Arc::clone(ended);
        SessionHandle::with_end_hook(
            SessionOptions::default(),
            false,
            Arc::new(move |_| {
                ended.fetch_add(1, Ordering::SeqCst);
            }),
        )
    }

    #[test]
    fn test_fork_shares_state() {
        let session = SessionHandle::new(SessionOptions::default(), false);
        let fork = session.fork().unwrap();
        assert_eq!(fork.id(), session.id());
        assert!(fork.is_fork());

        fork.advance_operation_time(Timestamp { time: 5, increment: 1 });
        assert_eq!(session.operation_time(), Some(Timestamp { time: 5, increment: 1 }));
    }

    #[test]
    fn test_fork_disposal_is_independent() {
        let ended = Arc::new(AtomicUsize::new(0));
        let session = counting_session(&ended);
        let fork = session.fork().unwrap();

        fork.dispose();
        fork.dispose();
        assert!(fork.is_disposed());
        assert!(!session.is_disposed());
        assert!(!session.is_ended());
        assert_eq!(ended.load(Ordering::SeqCst), 0);

        session.dispose();
        assert!(session.is_ended());
        assert_eq!(ended.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_last_handle_ends_session() {
        let ended = Arc::new(AtomicUsize::new(0));
        let session = counting_session(&ended);
        let fork = session.fork().unwrap();
        drop(session);
        assert!(!fork.is_ended());
        drop(fork);
        assert_eq!(ended.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_disposed_handle_cannot_fork() {
        let session = SessionHandle::new(SessionOptions::default(), true);
        session.dispose();
        assert!(matches!(session.fork(), Err(ClientError::SessionDisposed)));
    }

    #[test]
    fn test_transaction_transitions() {
        let session = SessionHandle::new(SessionOptions::default(), false);
        assert!(session.commit_transaction().is_err());

        session.start_transaction(None).unwrap();
        assert!(session.is_in_transaction());
        assert_eq!(session.transaction_number(), 1);
        assert!(session.start_transaction(None).unwrap_err().is_transaction_policy());

        session.mark_transaction_in_progress();
        assert_eq!(session.transaction_state(), TransactionState::InProgress);
        session.commit_transaction().unwrap();
        session.commit_transaction().unwrap();
        assert!(session.abort_transaction().is_err());

        session.start_transaction(None).unwrap();
        session.abort_transaction().unwrap();
        assert!(session.abort_transaction().is_err());
        assert_eq!(session.transaction_number(), 2);
    }

    #[test]
    fn test_unacknowledged_transaction_rejected() {
        let session = SessionHandle::new(SessionOptions::default(), false);
        let options = TransactionOptions {
            write_concern: Some(WriteConcern::unacknowledged()),
            ..TransactionOptions::default()
        };
        assert!(session.start_transaction(Some(options)).is_err());
        assert!(!session.is_in_transaction());
    }

    #[test]
    fn test_cluster_time_only_advances() {
        let session = SessionHandle::new(SessionOptions::default(), false);
        let newer = doc! { "clusterTime": Timestamp { time: 10, increment: 2 } };
        let older = doc! { "clusterTime": Timestamp { time: 10, increment: 1 } };
        session.advance_cluster_time(&newer);
        session.advance_cluster_time(&older);
        assert_eq!(session.cluster_time(), Some(newer));
    }
}
