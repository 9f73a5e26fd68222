//! # docforge-client
//!
//! Typed collection facade over an operation executor.
//!
//! This crate provides:
//! - Typed collections with blocking and async entry points for every operation
//! - Client, collection and per-call settings (read preference, read and write concerns)
//! - Forkable session handles, cluster bindings and transaction bookkeeping
//! - Operation descriptors and the executor contract that runs them
//! - Eager and deferred cursors
//! - Bulk writes with correlation of partial failures back to caller requests
//! - Index and search index management
//! - A runtime adapter over the official MongoDB driver
//!
//! ## Example
//!
//! ```rust,ignore
//! use docforge_client::prelude::*;
//!
//! let client = DocforgeClient::builder()
//!     .uri("mongodb://localhost:27017")
//!     .database("shop")
//!     .registry(registry)
//!     .build()
//!     .await?;
//!
//! let orders = client.default_database()?.collection::<Order>("orders")?;
//! let ctx = OperationContext::new();
//!
//! let pipeline = PipelineDefinition::<Order, Order>::new()
//!     .append(stages::match_stage(FilterDefinition::eq("status", "open")))
//!     .append(stages::out(CollectionNamespace::parse("shop.open_orders")?, None));
//!
//! // Runs the $out now; reads `open_orders` on first enumeration.
//! let mut cursor = orders.aggregate(&pipeline, &AggregateOptions::default(), &ctx)?;
//! while let Some(order) = cursor.try_next_async().await? {
//!     println!("{:?}", order);
//! }
//! ```

pub mod bulk;
pub mod client;
pub mod cluster;
pub mod collection;
pub mod config;
pub mod cursor;
pub mod error;
pub mod executor;
pub mod index;
pub mod logging;
pub mod operation;
pub mod options;
pub mod results;
pub mod session;
pub mod transport;

pub use bulk::{
    BulkWriteException, BulkWriteOperationError, BulkWriteOutcome, BulkWriteResult,
    BulkWriteUpsert, DeleteModel, InsertOneModel, ReplaceOneModel, UpdateModel, WriteConcernError,
    WriteError, WriteModel, WriteRequest, WriteRequestKind, WriteRequestType,
};
pub use client::{Database, DocforgeClient, DocforgeClientBuilder};
pub use cluster::{Cluster, ReadBinding, WriteBinding};
pub use collection::{Collection, OperationContext};
pub use config::{
    Acknowledgment, ClientSettings, ClientSettingsBuilder, CollectionSettings, ReadConcern,
    ReadConcernLevel, ReadPreference, ReadPreferenceMode, WriteConcern,
};
pub use cursor::{AggregateCursor, Cursor, DeferredCursor, ResultCursor};
pub use error::{ClientError, ClientResult, WriteException};
pub use executor::OperationExecutor;
pub use index::{
    IndexManager, IndexModel, IndexOptions, SearchIndexManager, SearchIndexModel,
    generate_index_name,
};
pub use operation::{
    AggregateCommand, BulkWriteOperation, CursorBatch, FindAndModifyCommand, FindAndModifyKind,
    FindCommand, MapReduceCommand, OperationOutput, ReadCommand, ReadOperation, WriteBatch,
    WriteCommand, WriteCommandOperation, WriteOperation,
};
pub use options::*;
pub use results::{DeleteResult, InsertManyResult, InsertOneResult, UpdateResult};
pub use session::{
    SessionEndHook, SessionHandle, SessionId, SessionOptions, TransactionOptions, TransactionState,
};
pub use transport::DriverRuntime;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::bulk::{BulkWriteException, BulkWriteResult, WriteModel};
    pub use crate::client::{Database, DocforgeClient, DocforgeClientBuilder};
    pub use crate::collection::{Collection, OperationContext};
    pub use crate::config::{ClientSettings, ReadConcern, ReadPreference, WriteConcern};
    pub use crate::cursor::{AggregateCursor, Cursor, ResultCursor};
    pub use crate::error::{ClientError, ClientResult};
    pub use crate::index::{IndexModel, IndexOptions, SearchIndexModel};
    pub use crate::options::*;
    pub use crate::results::{DeleteResult, InsertManyResult, InsertOneResult, UpdateResult};
    pub use crate::session::{SessionHandle, SessionOptions, TransactionOptions};
    pub use docforge_render::prelude::*;
    pub use tokio_util::sync::CancellationToken;
}
