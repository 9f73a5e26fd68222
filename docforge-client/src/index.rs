//! Index and search index management.

use std::time::Duration;

use bson::{Bson, Document, doc};
use docforge_render::IndexKeysDefinition;
use futures::future::BoxFuture;
use tracing::debug;

use crate::collection::{Collection, OperationContext};
use crate::cursor::Cursor;
use crate::error::{ClientError, ClientResult};
use crate::operation::{
    AggregateCommand, OperationOutput, ReadCommand, ReadOperation, WriteCommand, WriteOperation,
};
use crate::options::{AggregateOptions, CreateIndexOptions, DropIndexOptions, ListIndexesOptions};

/// Options of a single index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexOptions {
    /// Index name; generated from the keys when unset.
    pub name: Option<String>,
    /// Reject duplicate keys.
    pub unique: Option<bool>,
    /// Skip documents missing the indexed fields.
    pub sparse: Option<bool>,
    /// Build in the background.
    pub background: Option<bool>,
    /// Hide the index from the query planner.
    pub hidden: Option<bool>,
    /// TTL of documents.
    pub expire_after: Option<Duration>,
    /// Only index documents matching this filter.
    pub partial_filter_expression: Option<Document>,
    /// Collation.
    pub collation: Option<Document>,
    /// Text index field weights.
    pub weights: Option<Document>,
    /// Text index default language.
    pub default_language: Option<String>,
    /// Field holding a document's text language.
    pub language_override: Option<String>,
    /// Text index version.
    pub text_index_version: Option<i32>,
    /// 2dsphere index version.
    pub sphere_2d_index_version: Option<i32>,
    /// 2d index precision.
    pub bits: Option<i32>,
    /// 2d index lower bound.
    pub min: Option<f64>,
    /// 2d index upper bound.
    pub max: Option<f64>,
    /// Fields covered by a wildcard index.
    pub wildcard_projection: Option<Document>,
    /// Storage engine options.
    pub storage_engine: Option<Document>,
    /// Index format version.
    pub version: Option<i32>,
}

impl IndexOptions {
    /// Set the name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Reject duplicate keys.
    pub fn unique(mut self, unique: bool) -> Self {
        self.unique = Some(unique);
        self
    }

    /// Skip documents missing the indexed fields.
    pub fn sparse(mut self, sparse: bool) -> Self {
        self.sparse = Some(sparse);
        self
    }

    /// Expire documents after `ttl`.
    pub fn expire_after(mut self, ttl: Duration) -> Self {
        self.expire_after = Some(ttl);
        self
    }

    /// Only index documents matching `filter`.
    pub fn partial_filter_expression(mut self, filter: Document) -> Self {
        self.partial_filter_expression = Some(filter);
        self
    }

    fn append_to(&self, spec: &mut Document) {
        fn put(spec: &mut Document, key: &str, value: Option<impl Into<Bson>>) {
            if let Some(value) = value {
                spec.insert(key, value.into());
            }
        }
        put(spec, "unique", self.unique);
        put(spec, "sparse", self.sparse);
        put(spec, "background", self.background);
        put(spec, "hidden", self.hidden);
        put(
            spec,
            "expireAfterSeconds",
            self.expire_after.map(|ttl| ttl.as_secs() as i64),
        );
        put(spec, "partialFilterExpression", self.partial_filter_expression.clone());
        put(spec, "collation", self.collation.clone());
        put(spec, "weights", self.weights.clone());
        put(spec, "default_language", self.default_language.clone());
        put(spec, "language_override", self.language_override.clone());
        put(spec, "textIndexVersion", self.text_index_version);
        put(spec, "2dsphereIndexVersion", self.sphere_2d_index_version);
        put(spec, "bits", self.bits);
        put(spec, "min", self.min);
        put(spec, "max", self.max);
        put(spec, "wildcardProjection", self.wildcard_projection.clone());
        put(spec, "storageEngine", self.storage_engine.clone());
        put(spec, "v", self.version);
    }
}

/// Keys and options of an index to create.
pub struct IndexModel<T> {
    /// Index keys.
    pub keys: IndexKeysDefinition<T>,
    /// Index options.
    pub options: IndexOptions,
}

impl<T> IndexModel<T> {
    /// An index over `keys` with default options.
    pub fn new(keys: IndexKeysDefinition<T>) -> Self {
        Self {
            keys,
            options: IndexOptions::default(),
        }
    }

    /// Set the options.
    pub fn with_options(mut self, options: IndexOptions) -> Self {
        self.options = options;
        self
    }
}

impl<T> Clone for IndexModel<T> {
    fn clone(&self) -> Self {
        Self {
            keys: self.keys.clone(),
            options: self.options.clone(),
        }
    }
}

/// Default index name: `field_value` pairs joined with `_`, e.g. `a_1_b_-1`.
pub fn generate_index_name(keys: &Document) -> String {
    keys.iter()
        .map(|(field, value)| {
            let value = match value {
                Bson::Int32(n) => n.to_string(),
                Bson::Int64(n) => n.to_string(),
                Bson::Double(n) if n.fract() == 0.0 => (*n as i64).to_string(),
                Bson::String(s) => s.clone(),
                other => other.to_string().replace(' ', "_"),
            };
            format!("{}_{}", field, value)
        })
        .collect::<Vec<_>>()
        .join("_")
}

fn index_spec<T: 'static>(collection: &Collection<T>, model: &IndexModel<T>) -> ClientResult<Document> {
    let keys = model.keys.render(&collection.render_context())?;
    if keys.is_empty() {
        return Err(ClientError::argument("index keys must not be empty"));
    }
    let name = model
        .options
        .name
        .clone()
        .unwrap_or_else(|| generate_index_name(&keys));
    let mut spec = doc! { "key": keys, "name": name };
    model.options.append_to(&mut spec);
    Ok(spec)
}

fn spec_names(specs: &[Document]) -> Vec<String> {
    specs
        .iter()
        .filter_map(|spec| spec.get_str("name").ok().map(str::to_string))
        .collect()
}

/// Index management of a collection.
///
/// ```rust,ignore
/// let name = people.indexes().create_one(
///     &IndexModel::new(IndexKeysDefinition::ascending("age")),
///     &CreateIndexOptions::default(),
///     &OperationContext::new(),
/// )?;
/// assert_eq!(name, "age_1");
/// ```
pub struct IndexManager<'c, T> {
    collection: &'c Collection<T>,
}

impl<'c, T> IndexManager<'c, T> {
    pub(crate) fn new(collection: &'c Collection<T>) -> Self {
        Self { collection }
    }
}

impl<'c, T: 'static> IndexManager<'c, T> {
    fn prepare_create(
        &self,
        models: &[IndexModel<T>],
        options: &CreateIndexOptions,
        ctx: &OperationContext<'_>,
    ) -> ClientResult<(WriteOperation, Vec<String>)> {
        if models.is_empty() {
            return Err(ClientError::argument("at least one index model is required"));
        }
        let specs = models
            .iter()
            .map(|model| index_spec(self.collection, model))
            .collect::<ClientResult<Vec<_>>>()?;
        let names = spec_names(&specs);
        debug!(
            namespace = %self.collection.namespace(),
            operation = "createIndexes",
            indexes = ?names,
            "rendering operation"
        );
        let call = self.collection.call_settings(ctx, false)?;
        let command = WriteCommand::CreateIndexes {
            indexes: specs,
            commit_quorum: options.commit_quorum.clone(),
            max_time: options.max_time,
            comment: options.comment.clone(),
        };
        Ok((self.collection.write_operation(command, &call), names))
    }

    /// Create one index and return its name.
    pub fn create_one(
        &self,
        model: &IndexModel<T>,
        options: &CreateIndexOptions,
        ctx: &OperationContext<'_>,
    ) -> ClientResult<String> {
        let mut names = self.create_many(std::slice::from_ref(model), options, ctx)?;
        names
            .pop()
            .ok_or_else(|| ClientError::execution("no index name was produced"))
    }

    /// Create one index and return its name.
    pub fn create_one_async<'a>(
        &'a self,
        model: &IndexModel<T>,
        options: &CreateIndexOptions,
        ctx: &OperationContext<'a>,
    ) -> ClientResult<BoxFuture<'a, ClientResult<String>>> {
        let create = self.create_many_async(std::slice::from_ref(model), options, ctx)?;
        Ok(Box::pin(async move {
            let mut names = create.await?;
            names
                .pop()
                .ok_or_else(|| ClientError::execution("no index name was produced"))
        }))
    }

    /// Create several indexes and return their names.
    pub fn create_many(
        &self,
        models: &[IndexModel<T>],
        options: &CreateIndexOptions,
        ctx: &OperationContext<'_>,
    ) -> ClientResult<Vec<String>> {
        let (operation, names) = self.prepare_create(models, options, ctx)?;
        self.collection.execute_write(ctx, &operation, false)?;
        Ok(names)
    }

    /// Create several indexes and return their names.
    pub fn create_many_async<'a>(
        &'a self,
        models: &[IndexModel<T>],
        options: &CreateIndexOptions,
        ctx: &OperationContext<'a>,
    ) -> ClientResult<BoxFuture<'a, ClientResult<Vec<String>>>> {
        let (operation, names) = self.prepare_create(models, options, ctx)?;
        let write = self.collection.execute_write_async(ctx.clone(), operation, false);
        Ok(Box::pin(async move {
            write.await?;
            Ok(names)
        }))
    }

    fn prepare_drop(
        &self,
        name: &str,
        options: &DropIndexOptions,
        ctx: &OperationContext<'_>,
    ) -> ClientResult<WriteOperation> {
        debug!(
            namespace = %self.collection.namespace(),
            operation = "dropIndexes",
            index = name,
            "rendering operation"
        );
        let call = self.collection.call_settings(ctx, false)?;
        let command = WriteCommand::DropIndexes {
            name: name.to_string(),
            max_time: options.max_time,
            comment: options.comment.clone(),
        };
        Ok(self.collection.write_operation(command, &call))
    }

    fn check_drop_name(name: &str) -> ClientResult<()> {
        if name.is_empty() {
            return Err(ClientError::argument("index name must not be empty"));
        }
        if name == "*" {
            return Err(ClientError::argument("use drop_all to drop every index"));
        }
        Ok(())
    }

    /// Drop the index called `name`.
    pub fn drop_one(
        &self,
        name: &str,
        options: &DropIndexOptions,
        ctx: &OperationContext<'_>,
    ) -> ClientResult<()> {
        Self::check_drop_name(name)?;
        let operation = self.prepare_drop(name, options, ctx)?;
        self.collection.execute_write(ctx, &operation, false)?;
        Ok(())
    }

    /// Drop the index called `name`.
    pub fn drop_one_async<'a>(
        &'a self,
        name: &str,
        options: &DropIndexOptions,
        ctx: &OperationContext<'a>,
    ) -> ClientResult<BoxFuture<'a, ClientResult<()>>> {
        Self::check_drop_name(name)?;
        let operation = self.prepare_drop(name, options, ctx)?;
        let write = self.collection.execute_write_async(ctx.clone(), operation, false);
        Ok(Box::pin(async move {
            write.await?;
            Ok(())
        }))
    }

    /// Drop every index except `_id`.
    pub fn drop_all(&self, options: &DropIndexOptions, ctx: &OperationContext<'_>) -> ClientResult<()> {
        let operation = self.prepare_drop("*", options, ctx)?;
        self.collection.execute_write(ctx, &operation, false)?;
        Ok(())
    }

    /// Drop every index except `_id`.
    pub fn drop_all_async<'a>(
        &'a self,
        options: &DropIndexOptions,
        ctx: &OperationContext<'a>,
    ) -> ClientResult<BoxFuture<'a, ClientResult<()>>> {
        let operation = self.prepare_drop("*", options, ctx)?;
        let write = self.collection.execute_write_async(ctx.clone(), operation, false);
        Ok(Box::pin(async move {
            write.await?;
            Ok(())
        }))
    }

    fn prepare_list(
        &self,
        options: &ListIndexesOptions,
        ctx: &OperationContext<'_>,
    ) -> ClientResult<(ReadOperation, crate::collection::CallSettings)> {
        debug!(namespace = %self.collection.namespace(), operation = "listIndexes", "rendering operation");
        let call = self.collection.call_settings(ctx, true)?;
        let command = ReadCommand::ListIndexes {
            batch_size: options.batch_size,
            comment: options.comment.clone(),
        };
        Ok((self.collection.read_operation(command, &call), call))
    }

    /// List the index specifications.
    pub fn list(
        &self,
        options: &ListIndexesOptions,
        ctx: &OperationContext<'_>,
    ) -> ClientResult<Cursor<Document>> {
        let (operation, call) = self.prepare_list(options, ctx)?;
        let (output, binding) =
            self.collection
                .execute_read(ctx, &call.read_preference, &operation)?;
        self.collection
            .cursor(output, binding, options.batch_size, ctx)
    }

    /// List the index specifications.
    pub fn list_async<'a>(
        &'a self,
        options: &ListIndexesOptions,
        ctx: &OperationContext<'a>,
    ) -> ClientResult<BoxFuture<'a, ClientResult<Cursor<Document>>>> {
        let (operation, call) = self.prepare_list(options, ctx)?;
        let batch_size = options.batch_size;
        let ctx = ctx.clone();
        let collection = self.collection;
        let read = collection.execute_read_async(ctx.clone(), call.read_preference, operation);
        Ok(Box::pin(async move {
            let (output, binding) = read.await?;
            collection.cursor(output, binding, batch_size, &ctx)
        }))
    }
}

/// An Atlas Search index definition.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchIndexModel {
    /// Index name; the server uses `default` when unset.
    pub name: Option<String>,
    /// Index definition.
    pub definition: Document,
}

impl SearchIndexModel {
    /// A named search index.
    pub fn new(name: impl Into<String>, definition: Document) -> Self {
        Self {
            name: Some(name.into()),
            definition,
        }
    }

    /// The server's default search index.
    pub fn unnamed(definition: Document) -> Self {
        Self {
            name: None,
            definition,
        }
    }

    fn to_document(&self) -> Document {
        let mut document = doc! { "definition": self.definition.clone() };
        if let Some(name) = &self.name {
            document.insert("name", name.as_str());
        }
        document
    }

    fn effective_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| "default".to_string())
    }
}

/// Search index management of a collection.
pub struct SearchIndexManager<'c, T> {
    collection: &'c Collection<T>,
}

fn require_name(name: &str) -> ClientResult<()> {
    if name.is_empty() {
        return Err(ClientError::argument("search index name must not be empty"));
    }
    Ok(())
}

fn created_names(output: OperationOutput, fallback: Vec<String>) -> Vec<String> {
    match output {
        OperationOutput::IndexNames(names) if !names.is_empty() => names,
        _ => fallback,
    }
}

impl<'c, T> SearchIndexManager<'c, T> {
    pub(crate) fn new(collection: &'c Collection<T>) -> Self {
        Self { collection }
    }

    fn write(&self, command: WriteCommand, ctx: &OperationContext<'_>) -> ClientResult<WriteOperation> {
        let call = self.collection.call_settings(ctx, false)?;
        Ok(self.collection.write_operation(command, &call))
    }

    fn prepare_create(
        &self,
        models: &[SearchIndexModel],
        ctx: &OperationContext<'_>,
    ) -> ClientResult<(WriteOperation, Vec<String>)> {
        if models.is_empty() {
            return Err(ClientError::argument("at least one search index model is required"));
        }
        debug!(
            namespace = %self.collection.namespace(),
            operation = "createSearchIndexes",
            indexes = models.len(),
            "rendering operation"
        );
        let names = models.iter().map(SearchIndexModel::effective_name).collect();
        let command = WriteCommand::CreateSearchIndexes {
            indexes: models.iter().map(SearchIndexModel::to_document).collect(),
        };
        Ok((self.write(command, ctx)?, names))
    }

    /// Create one search index and return its name.
    pub fn create_one(
        &self,
        model: &SearchIndexModel,
        ctx: &OperationContext<'_>,
    ) -> ClientResult<String> {
        let mut names = self.create_many(std::slice::from_ref(model), ctx)?;
        names
            .pop()
            .ok_or_else(|| ClientError::execution("no search index name was produced"))
    }

    /// Create one search index and return its name.
    pub fn create_one_async<'a>(
        &'a self,
        model: &SearchIndexModel,
        ctx: &OperationContext<'a>,
    ) -> ClientResult<BoxFuture<'a, ClientResult<String>>> {
        let create = self.create_many_async(std::slice::from_ref(model), ctx)?;
        Ok(Box::pin(async move {
            let mut names = create.await?;
            names
                .pop()
                .ok_or_else(|| ClientError::execution("no search index name was produced"))
        }))
    }

    /// Create several search indexes and return their names.
    pub fn create_many(
        &self,
        models: &[SearchIndexModel],
        ctx: &OperationContext<'_>,
    ) -> ClientResult<Vec<String>> {
        let (operation, names) = self.prepare_create(models, ctx)?;
        let (output, _) = self.collection.execute_write(ctx, &operation, false)?;
        Ok(created_names(output, names))
    }

    /// Create several search indexes and return their names.
    pub fn create_many_async<'a>(
        &'a self,
        models: &[SearchIndexModel],
        ctx: &OperationContext<'a>,
    ) -> ClientResult<BoxFuture<'a, ClientResult<Vec<String>>>> {
        let (operation, names) = self.prepare_create(models, ctx)?;
        let write = self.collection.execute_write_async(ctx.clone(), operation, false);
        Ok(Box::pin(async move {
            let (output, _) = write.await?;
            Ok(created_names(output, names))
        }))
    }

    fn prepare_update(
        &self,
        name: &str,
        definition: Document,
        ctx: &OperationContext<'_>,
    ) -> ClientResult<WriteOperation> {
        require_name(name)?;
        debug!(
            namespace = %self.collection.namespace(),
            operation = "updateSearchIndex",
            index = name,
            "rendering operation"
        );
        self.write(
            WriteCommand::UpdateSearchIndex {
                name: name.to_string(),
                definition,
            },
            ctx,
        )
    }

    /// Replace the definition of the search index `name`.
    pub fn update(
        &self,
        name: &str,
        definition: Document,
        ctx: &OperationContext<'_>,
    ) -> ClientResult<()> {
        let operation = self.prepare_update(name, definition, ctx)?;
        self.collection.execute_write(ctx, &operation, false)?;
        Ok(())
    }

    /// Replace the definition of the search index `name`.
    pub fn update_async<'a>(
        &'a self,
        name: &str,
        definition: Document,
        ctx: &OperationContext<'a>,
    ) -> ClientResult<BoxFuture<'a, ClientResult<()>>> {
        let operation = self.prepare_update(name, definition, ctx)?;
        let write = self.collection.execute_write_async(ctx.clone(), operation, false);
        Ok(Box::pin(async move {
            write.await?;
            Ok(())
        }))
    }

    fn prepare_drop(&self, name: &str, ctx: &OperationContext<'_>) -> ClientResult<WriteOperation> {
        require_name(name)?;
        debug!(
            namespace = %self.collection.namespace(),
            operation = "dropSearchIndex",
            index = name,
            "rendering operation"
        );
        self.write(WriteCommand::DropSearchIndex { name: name.to_string() }, ctx)
    }

    /// Drop the search index `name`.
    pub fn drop_one(&self, name: &str, ctx: &OperationContext<'_>) -> ClientResult<()> {
        let operation = self.prepare_drop(name, ctx)?;
        self.collection.execute_write(ctx, &operation, false)?;
        Ok(())
    }

    /// Drop the search index `name`.
    pub fn drop_one_async<'a>(
        &'a self,
        name: &str,
        ctx: &OperationContext<'a>,
    ) -> ClientResult<BoxFuture<'a, ClientResult<()>>> {
        let operation = self.prepare_drop(name, ctx)?;
        let write = self.collection.execute_write_async(ctx.clone(), operation, false);
        Ok(Box::pin(async move {
            write.await?;
            Ok(())
        }))
    }

    fn prepare_list(
        &self,
        name: Option<&str>,
        options: &AggregateOptions,
        ctx: &OperationContext<'_>,
    ) -> ClientResult<(ReadOperation, crate::collection::CallSettings)> {
        debug!(
            namespace = %self.collection.namespace(),
            operation = "listSearchIndexes",
            "rendering operation"
        );
        let stage = match name {
            Some(name) => {
                require_name(name)?;
                doc! { "$listSearchIndexes": { "name": name } }
            }
            None => doc! { "$listSearchIndexes": {} },
        };
        let call = self.collection.call_settings(ctx, true)?;
        let command = ReadCommand::Aggregate(AggregateCommand {
            pipeline: vec![stage],
            batch_size: options.batch_size,
            collation: options.collation.clone(),
            comment: options.comment.clone(),
            max_time: options.max_time,
            ..AggregateCommand::default()
        });
        Ok((self.collection.read_operation(command, &call), call))
    }

    /// List search indexes, or only the one called `name`.
    pub fn list(
        &self,
        name: Option<&str>,
        options: &AggregateOptions,
        ctx: &OperationContext<'_>,
    ) -> ClientResult<Cursor<Document>> {
        let (operation, call) = self.prepare_list(name, options, ctx)?;
        let (output, binding) =
            self.collection
                .execute_read(ctx, &call.read_preference, &operation)?;
        self.collection
            .cursor(output, binding, options.batch_size, ctx)
    }

    /// List search indexes, or only the one called `name`.
    pub fn list_async<'a>(
        &'a self,
        name: Option<&str>,
        options: &AggregateOptions,
        ctx: &OperationContext<'a>,
    ) -> ClientResult<BoxFuture<'a, ClientResult<Cursor<Document>>>> {
        let (operation, call) = self.prepare_list(name, options, ctx)?;
        let batch_size = options.batch_size;
        let ctx = ctx.clone();
        let collection = self.collection;
        let read = collection.execute_read_async(ctx.clone(), call.read_preference, operation);
        Ok(Box::pin(async move {
            let (output, binding) = read.await?;
            collection.cursor(output, binding, batch_size, &ctx)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_generate_index_name() {
        assert_eq!(generate_index_name(&doc! { "a": 1, "b": -1 }), "a_1_b_-1");
        assert_eq!(generate_index_name(&doc! { "loc": "2dsphere" }), "loc_2dsphere");
        assert_eq!(generate_index_name(&doc! { "$**": 1 }), "$**_1");
        assert_eq!(generate_index_name(&doc! { "x": 1.0 }), "x_1");
    }

    #[test]
    fn test_index_options_rendering() {
        let mut spec = doc! { "key": { "at": 1 }, "name": "ttl" };
        IndexOptions::default()
            .unique(true)
            .expire_after(Duration::from_secs(3600))
            .partial_filter_expression(doc! { "active": true })
            .append_to(&mut spec);
        assert_eq!(
            spec,
            doc! {
                "key": { "at": 1 },
                "name": "ttl",
                "unique": true,
                "expireAfterSeconds": 3600_i64,
                "partialFilterExpression": { "active": true },
            }
        );
    }

    #[test]
    fn test_search_index_model_document() {
        let named = SearchIndexModel::new("titles", doc! { "mappings": { "dynamic": true } });
        assert_eq!(
            named.to_document(),
            doc! { "definition": { "mappings": { "dynamic": true } }, "name": "titles" }
        );
        let unnamed = SearchIndexModel::unnamed(doc! {});
        assert_eq!(unnamed.effective_name(), "default");
        assert!(!unnamed.to_document().contains_key("name"));
    }

    #[test]
    fn test_created_names_prefer_server_reply() {
        assert_eq!(
            created_names(OperationOutput::IndexNames(vec!["s".into()]), vec!["default".into()]),
            vec!["s".to_string()]
        );
        assert_eq!(
            created_names(OperationOutput::Acknowledged, vec!["default".into()]),
            vec!["default".to_string()]
        );
    }
}
