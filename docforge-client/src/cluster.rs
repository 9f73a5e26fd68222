//! Cluster contract and bindings.

use tracing::trace;

use crate::config::ReadPreference;
use crate::error::ClientResult;
use crate::session::{SessionHandle, SessionOptions};

/// Scoped read access to the cluster under a session.
///
/// The binding owns a fork of the session, released when it is dropped.
#[derive(Debug)]
pub struct ReadBinding {
    session: SessionHandle,
    read_preference: ReadPreference,
}

impl ReadBinding {
    /// Bind a fork of `session` with a read preference.
    pub fn new(session: &SessionHandle, read_preference: ReadPreference) -> ClientResult<Self> {
        Ok(Self {
            session: session.fork()?,
            read_preference,
        })
    }

    /// The bound session.
    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    /// The read preference used for server selection.
    pub fn read_preference(&self) -> &ReadPreference {
        &self.read_preference
    }
}

impl Drop for ReadBinding {
    fn drop(&mut self) {
        trace!(session_id = %self.session.id(), "read binding released");
    }
}

/// Scoped read/write access to the primary under a session.
#[derive(Debug)]
pub struct WriteBinding {
    session: SessionHandle,
}

impl WriteBinding {
    /// Bind a fork of `session`.
    pub fn new(session: &SessionHandle) -> ClientResult<Self> {
        Ok(Self {
            session: session.fork()?,
        })
    }

    /// The bound session.
    pub fn session(&self) -> &SessionHandle {
        &self.session
    }
}

impl Drop for WriteBinding {
    fn drop(&mut self) {
        trace!(session_id = %self.session.id(), "write binding released");
    }
}

/// Session and binding provider.
///
/// Bindings default to forks of the session; implementations pinning
/// servers or connections override them.
pub trait Cluster: Send + Sync {
    /// Start a session; `implicit` sessions are scoped to one facade call.
    fn start_session(&self, options: SessionOptions, implicit: bool) -> SessionHandle {
        SessionHandle::new(options, implicit)
    }

    /// Acquire a read binding.
    fn read_binding(
        &self,
        session: &SessionHandle,
        read_preference: &ReadPreference,
    ) -> ClientResult<ReadBinding> {
        ReadBinding::new(session, read_preference.clone())
    }

    /// Acquire a write binding.
    fn write_binding(&self, session: &SessionHandle) -> ClientResult<WriteBinding> {
        WriteBinding::new(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct LocalCluster;

    impl Cluster for LocalCluster {}

    #[test]
    fn test_binding_holds_fork_until_dropped() {
        let cluster = LocalCluster;
        let session = cluster.start_session(SessionOptions::default(), true);
        let binding = cluster.read_binding(&session, &ReadPreference::primary()).unwrap();
        assert!(binding.session().is_fork());

        session.dispose();
        assert!(!binding.session().is_ended());
        drop(binding);
        assert!(session.is_ended());
    }

    #[test]
    fn test_binding_requires_live_session() {
        let cluster = LocalCluster;
        let session = cluster.start_session(SessionOptions::default(), false);
        session.dispose();
        assert!(cluster.write_binding(&session).is_err());
    }
}
