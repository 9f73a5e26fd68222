//! # docforge
//!
//! Typed command rendering and deferred execution for document-database
//! collections.
//!
//! docforge provides:
//! - Filter, projection, sort, update and pipeline definitions rendered
//!   against per-type serializers ([`render`])
//! - A typed collection facade with blocking and async entry points
//!   ([`client`])
//! - Forkable sessions and deferred cursors for `$out`/`$merge` pipelines
//! - Bulk writes whose partial failures map back to the caller's requests
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use docforge::prelude::*;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Serialize, Deserialize)]
//! struct Person {
//!     name: String,
//!     age: i32,
//! }
//!
//! #[tokio::main(flavor = "multi_thread")]
//! async fn main() -> Result<(), ClientError> {
//!     let person = DocumentSerializer::builder("Person")
//!         .member_as("name", "n", ScalarSerializer::string())
//!         .member("age", ScalarSerializer::int32())
//!         .build();
//!     let registry = Arc::new(SerializerRegistry::new().with::<Person>(person));
//!
//!     let client = DocforgeClient::builder()
//!         .uri("mongodb://localhost:27017")
//!         .database("app")
//!         .registry(registry)
//!         .build()
//!         .await?;
//!     let people = client.default_database()?.collection::<Person>("people")?;
//!
//!     let ctx = OperationContext::new();
//!     let adults = people
//!         .count_documents_async(&FilterDefinition::gte("age", 18), &CountOptions::default(), &ctx)?
//!         .await?;
//!     println!("{} adults", adults);
//!     Ok(())
//! }
//! ```
//!
//! ## Logging
//!
//! Operations emit `tracing` events. With the `tracing-subscriber` feature,
//! [`client::logging::init`] installs a subscriber configured from
//! `DOCFORGE_DEBUG`, `DOCFORGE_LOG_LEVEL` and `DOCFORGE_LOG_FORMAT`.

pub use docforge_client as client;
pub use docforge_render as render;

pub use docforge_client::{
    AggregateCursor, ClientError, ClientResult, ClientSettings, Collection, Cursor, Database,
    DocforgeClient, OperationContext, SessionHandle,
};
pub use docforge_render::{RenderContext, RenderError, RenderResult, SerializerRegistry};

/// Prelude for convenient imports.
pub mod prelude {
    pub use docforge_client::prelude::*;
}
