//! Client and database handles.

use std::sync::Arc;

use docforge_render::{DatabaseNamespace, SerializerRegistry};
use tracing::info;

use crate::cluster::Cluster;
use crate::collection::Collection;
use crate::config::{ClientSettings, ReadConcern, ReadPreference, WriteConcern};
use crate::error::{ClientError, ClientResult};
use crate::executor::OperationExecutor;
use crate::session::{SessionHandle, SessionOptions};
use crate::transport::DriverRuntime;

/// Entry point: settings, serializers, a cluster and an executor.
///
/// Cloning is cheap; clones share everything.
#[derive(Clone)]
pub struct DocforgeClient {
    settings: Arc<ClientSettings>,
    registry: Arc<SerializerRegistry>,
    cluster: Arc<dyn Cluster>,
    executor: Arc<dyn OperationExecutor>,
}

impl DocforgeClient {
    /// Assemble a client from its parts.
    pub fn new(
        settings: ClientSettings,
        registry: Arc<SerializerRegistry>,
        cluster: Arc<dyn Cluster>,
        executor: Arc<dyn OperationExecutor>,
    ) -> Self {
        Self {
            settings: Arc::new(settings),
            registry,
            cluster,
            executor,
        }
    }

    /// Connect to a deployment through the MongoDB driver.
    pub async fn connect(settings: ClientSettings, registry: Arc<SerializerRegistry>) -> ClientResult<Self> {
        let settings = Arc::new(settings);
        let runtime = Arc::new(DriverRuntime::connect(Arc::clone(&settings)).await?);
        info!(
            uri = %settings.uri,
            default_database = ?settings.default_database,
            "docforge client created"
        );
        Ok(Self {
            settings,
            registry,
            cluster: runtime.clone(),
            executor: runtime,
        })
    }

    /// Create a builder for the client.
    pub fn builder() -> DocforgeClientBuilder {
        DocforgeClientBuilder::new()
    }

    /// Client settings.
    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    /// Serializer registry shared by every collection.
    pub fn registry(&self) -> &Arc<SerializerRegistry> {
        &self.registry
    }

    /// A database by name.
    pub fn database(&self, name: &str) -> ClientResult<Database> {
        Ok(Database {
            namespace: DatabaseNamespace::new(name)?,
            client: self.clone(),
        })
    }

    /// The database named in the settings.
    pub fn default_database(&self) -> ClientResult<Database> {
        let name = self
            .settings
            .default_database
            .as_deref()
            .ok_or_else(|| ClientError::config("no default database configured"))?;
        self.database(name)
    }

    /// Start an explicit session.
    pub fn start_session(&self, options: SessionOptions) -> SessionHandle {
        self.cluster.start_session(options, false)
    }
}

impl std::fmt::Debug for DocforgeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocforgeClient")
            .field("settings", &self.settings)
            .finish()
    }
}

/// A database of a client.
#[derive(Debug, Clone)]
pub struct Database {
    namespace: DatabaseNamespace,
    client: DocforgeClient,
}

impl Database {
    /// Database name.
    pub fn name(&self) -> &str {
        self.namespace.name()
    }

    /// Database namespace.
    pub fn namespace(&self) -> &DatabaseNamespace {
        &self.namespace
    }

    /// The owning client.
    pub fn client(&self) -> &DocforgeClient {
        &self.client
    }

    /// A typed collection inheriting the client defaults.
    pub fn collection<T>(&self, name: &str) -> ClientResult<Collection<T>> {
        let client = &self.client;
        Ok(Collection::new(
            self.namespace.collection(name)?,
            Arc::clone(&client.settings),
            Arc::clone(&client.registry),
            Arc::clone(&client.cluster),
            Arc::clone(&client.executor),
        ))
    }
}

/// Builder for [`DocforgeClient`].
#[derive(Default)]
pub struct DocforgeClientBuilder {
    uri: Option<String>,
    database: Option<String>,
    app_name: Option<String>,
    read_preference: Option<ReadPreference>,
    read_concern: Option<ReadConcern>,
    write_concern: Option<WriteConcern>,
    retry_reads: Option<bool>,
    retry_writes: Option<bool>,
    registry: Option<Arc<SerializerRegistry>>,
}

impl DocforgeClientBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connection URI.
    pub fn uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    /// Set the default database.
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Set the application name.
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = Some(name.into());
        self
    }

    /// Set the default read preference.
    pub fn read_preference(mut self, read_preference: ReadPreference) -> Self {
        self.read_preference = Some(read_preference);
        self
    }

    /// Set the default read concern.
    pub fn read_concern(mut self, read_concern: ReadConcern) -> Self {
        self.read_concern = Some(read_concern);
        self
    }

    /// Set the default write concern.
    pub fn write_concern(mut self, write_concern: WriteConcern) -> Self {
        self.write_concern = Some(write_concern);
        self
    }

    /// Request retryable reads.
    pub fn retry_reads(mut self, enabled: bool) -> Self {
        self.retry_reads = Some(enabled);
        self
    }

    /// Request retryable writes.
    pub fn retry_writes(mut self, enabled: bool) -> Self {
        self.retry_writes = Some(enabled);
        self
    }

    /// Use a serializer registry.
    pub fn registry(mut self, registry: Arc<SerializerRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Validate the settings.
    pub fn settings(&self) -> ClientResult<ClientSettings> {
        let mut builder = ClientSettings::builder();
        if let Some(uri) = &self.uri {
            builder = builder.uri(uri.clone());
        }
        if let Some(database) = &self.database {
            builder = builder.default_database(database.clone());
        }
        if let Some(app_name) = &self.app_name {
            builder = builder.app_name(app_name.clone());
        }
        if let Some(read_preference) = &self.read_preference {
            builder = builder.read_preference(read_preference.clone());
        }
        if let Some(read_concern) = self.read_concern {
            builder = builder.read_concern(read_concern);
        }
        if let Some(write_concern) = &self.write_concern {
            builder = builder.write_concern(write_concern.clone());
        }
        if let Some(enabled) = self.retry_reads {
            builder = builder.retry_reads(enabled);
        }
        if let Some(enabled) = self.retry_writes {
            builder = builder.retry_writes(enabled);
        }
        builder.build()
    }

    fn take_registry(&mut self) -> Arc<SerializerRegistry> {
        self.registry
            .take()
            .unwrap_or_else(|| Arc::new(SerializerRegistry::default()))
    }

    /// Build a client over a custom cluster and executor.
    pub fn build_with(
        mut self,
        cluster: Arc<dyn Cluster>,
        executor: Arc<dyn OperationExecutor>,
    ) -> ClientResult<DocforgeClient> {
        let settings = self.settings()?;
        let registry = self.take_registry();
        Ok(DocforgeClient::new(settings, registry, cluster, executor))
    }

    /// Connect through the MongoDB driver.
    pub async fn build(mut self) -> ClientResult<DocforgeClient> {
        let settings = self.settings()?;
        let registry = self.take_registry();
        DocforgeClient::connect(settings, registry).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;

    use crate::cluster::{ReadBinding, WriteBinding};
    use crate::operation::{OperationOutput, ReadOperation, WriteOperation};

    struct LocalCluster;

    impl Cluster for LocalCluster {}

    struct NoopExecutor;

    #[async_trait]
    impl OperationExecutor for NoopExecutor {
        fn execute_read(
            &self,
            _: &ReadBinding,
            _: &ReadOperation,
            _: &CancellationToken,
        ) -> ClientResult<OperationOutput> {
            Ok(OperationOutput::Acknowledged)
        }

        fn execute_write(
            &self,
            _: &WriteBinding,
            _: &WriteOperation,
            _: &CancellationToken,
        ) -> ClientResult<OperationOutput> {
            Ok(OperationOutput::Acknowledged)
        }

        async fn execute_read_async(
            &self,
            _: &ReadBinding,
            _: &ReadOperation,
            _: &CancellationToken,
        ) -> ClientResult<OperationOutput> {
            Ok(OperationOutput::Acknowledged)
        }

        async fn execute_write_async(
            &self,
            _: &WriteBinding,
            _: &WriteOperation,
            _: &CancellationToken,
        ) -> ClientResult<OperationOutput> {
            Ok(OperationOutput::Acknowledged)
        }
    }

    fn client() -> DocforgeClient {
        DocforgeClient::builder()
            .uri("mongodb://db.example:27017")
            .database("shop")
            .write_concern(WriteConcern::majority())
            .build_with(Arc::new(LocalCluster), Arc::new(NoopExecutor))
            .unwrap()
    }

    #[test]
    fn test_collection_inherits_client_defaults() {
        let orders = client()
            .default_database()
            .unwrap()
            .collection::<bson::Document>("orders")
            .unwrap();
        assert_eq!(orders.namespace().full_name(), "shop.orders");
        assert_eq!(orders.settings().write_concern, WriteConcern::majority());

        let relaxed = orders.with_write_concern(WriteConcern::acknowledged());
        assert_eq!(relaxed.settings().write_concern, WriteConcern::acknowledged());
        assert_eq!(orders.settings().write_concern, WriteConcern::majority());
    }

    #[test]
    fn test_invalid_names_rejected() {
        let client = client();
        assert!(client.database("bad.name").is_err());
        assert!(client.database("shop").unwrap().collection::<bson::Document>("").is_err());
    }

    #[test]
    fn test_builder_rejects_bad_uri() {
        assert!(DocforgeClient::builder().uri("http://nope").settings().is_err());
    }

    #[test]
    fn test_explicit_sessions_are_not_implicit() {
        let session = client().start_session(SessionOptions::default());
        assert!(!session.is_implicit());
    }
}
