//! Database and collection namespaces.

use std::fmt;

use crate::error::{RenderError, RenderResult};

/// A database name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DatabaseNamespace {
    name: String,
}

impl DatabaseNamespace {
    /// Create a database namespace, validating the name.
    pub fn new(name: impl Into<String>) -> RenderResult<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(RenderError::invalid_argument("database name cannot be empty"));
        }
        let invalid = name
            .chars()
            .find(|c| matches!(c, '.' | '$' | '/' | '\\' | ' ' | '"' | '\0'));
        if let Some(c) = invalid {
            return Err(RenderError::invalid_argument(format!(
                "database name '{}' contains invalid character '{}'",
                name, c
            )));
        }
        Ok(Self { name })
    }

    /// The database name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Namespace of a collection in this database.
    pub fn collection(&self, name: impl Into<String>) -> RenderResult<CollectionNamespace> {
        CollectionNamespace::new(self.clone(), name)
    }

    /// Namespace used for database-level commands.
    pub fn command_namespace(&self) -> CollectionNamespace {
        CollectionNamespace {
            database: self.clone(),
            collection: "$cmd".to_string(),
        }
    }
}

impl fmt::Display for DatabaseNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// A fully qualified collection name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionNamespace {
    database: DatabaseNamespace,
    collection: String,
}

impl CollectionNamespace {
    /// Create a collection namespace, validating the collection name.
    pub fn new(database: DatabaseNamespace, collection: impl Into<String>) -> RenderResult<Self> {
        let collection = collection.into();
        if collection.is_empty() {
            return Err(RenderError::invalid_argument("collection name cannot be empty"));
        }
        if collection.contains('\0') {
            return Err(RenderError::invalid_argument(
                "collection name cannot contain a null character",
            ));
        }
        Ok(Self {
            database,
            collection,
        })
    }

    /// Parse `database.collection`.
    pub fn parse(full_name: &str) -> RenderResult<Self> {
        let (database, collection) = full_name.split_once('.').ok_or_else(|| {
            RenderError::invalid_argument(format!("'{}' is not a full collection name", full_name))
        })?;
        Self::new(DatabaseNamespace::new(database)?, collection)
    }

    /// The database part.
    pub fn database(&self) -> &DatabaseNamespace {
        &self.database
    }

    /// The database name.
    pub fn database_name(&self) -> &str {
        self.database.name()
    }

    /// The collection name.
    pub fn collection_name(&self) -> &str {
        &self.collection
    }

    /// `database.collection`.
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.database.name(), self.collection)
    }
}

impl fmt::Display for CollectionNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database.name(), self.collection)
    }
}
