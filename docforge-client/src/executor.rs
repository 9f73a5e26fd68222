//! Operation executor contract.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::cluster::{ReadBinding, WriteBinding};
use crate::error::ClientResult;
use crate::operation::{OperationOutput, ReadOperation, WriteOperation};

/// Executes operation descriptors against the cluster.
///
/// The blocking and non-blocking methods receive the same descriptors; the
/// facade never builds a descriptor differently for one path. A bulk write
/// that partially fails is reported as
/// [`ClientError::BulkWriteOperation`](crate::ClientError::BulkWriteOperation)
/// with indexes in the executor's processing order.
#[async_trait]
pub trait OperationExecutor: Send + Sync {
    /// Execute a read, blocking the calling thread.
    fn execute_read(
        &self,
        binding: &ReadBinding,
        operation: &ReadOperation,
        cancellation: &CancellationToken,
    ) -> ClientResult<OperationOutput>;

    /// Execute a write, blocking the calling thread.
    fn execute_write(
        &self,
        binding: &WriteBinding,
        operation: &WriteOperation,
        cancellation: &CancellationToken,
    ) -> ClientResult<OperationOutput>;

    /// Execute a read.
    async fn execute_read_async(
        &self,
        binding: &ReadBinding,
        operation: &ReadOperation,
        cancellation: &CancellationToken,
    ) -> ClientResult<OperationOutput>;

    /// Execute a write.
    async fn execute_write_async(
        &self,
        binding: &WriteBinding,
        operation: &WriteOperation,
        cancellation: &CancellationToken,
    ) -> ClientResult<OperationOutput>;
}
