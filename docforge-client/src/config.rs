//! Client and collection settings.

use std::time::Duration;

use bson::{Bson, Document, doc};
use mongodb::options::ClientOptions;

use crate::error::{ClientError, ClientResult};

/// Read preference mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadPreferenceMode {
    /// Read from primary only.
    #[default]
    Primary,
    /// Read from primary preferred, fallback to secondary.
    PrimaryPreferred,
    /// Read from secondary only.
    Secondary,
    /// Read from secondary preferred, fallback to primary.
    SecondaryPreferred,
    /// Read from nearest member.
    Nearest,
}

impl ReadPreferenceMode {
    /// Wire name of the mode.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::PrimaryPreferred => "primaryPreferred",
            Self::Secondary => "secondary",
            Self::SecondaryPreferred => "secondaryPreferred",
            Self::Nearest => "nearest",
        }
    }
}

/// Read preference with optional tag sets and staleness bound.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReadPreference {
    /// Selection mode.
    pub mode: ReadPreferenceMode,
    /// Tag sets, tried in order.
    pub tag_sets: Vec<Document>,
    /// Maximum replication lag of eligible secondaries.
    pub max_staleness: Option<Duration>,
}

impl ReadPreference {
    /// Create a read preference for a mode.
    pub fn new(mode: ReadPreferenceMode) -> Self {
        Self {
            mode,
            tag_sets: Vec::new(),
            max_staleness: None,
        }
    }

    /// Primary only.
    pub fn primary() -> Self {
        Self::new(ReadPreferenceMode::Primary)
    }

    /// Primary preferred.
    pub fn primary_preferred() -> Self {
        Self::new(ReadPreferenceMode::PrimaryPreferred)
    }

    /// Secondary only.
    pub fn secondary() -> Self {
        Self::new(ReadPreferenceMode::Secondary)
    }

    /// Secondary preferred.
    pub fn secondary_preferred() -> Self {
        Self::new(ReadPreferenceMode::SecondaryPreferred)
    }

    /// Nearest member.
    pub fn nearest() -> Self {
        Self::new(ReadPreferenceMode::Nearest)
    }

    /// Add a tag set.
    pub fn with_tag_set(mut self, tags: Document) -> Self {
        self.tag_sets.push(tags);
        self
    }

    /// Bound the replication lag.
    pub fn with_max_staleness(mut self, staleness: Duration) -> Self {
        self.max_staleness = Some(staleness);
        self
    }

    /// Whether only the primary is eligible.
    pub fn is_primary(&self) -> bool {
        self.mode == ReadPreferenceMode::Primary
    }

    /// Render the `$readPreference` document.
    pub fn to_document(&self) -> Document {
        let mut document = doc! { "mode": self.mode.as_str() };
        if !self.tag_sets.is_empty() {
            document.insert(
                "tags",
                self.tag_sets.iter().cloned().map(Bson::Document).collect::<Vec<_>>(),
            );
        }
        if let Some(staleness) = self.max_staleness {
            document.insert("maxStalenessSeconds", staleness.as_secs() as i64);
        }
        document
    }

    pub(crate) fn to_driver(&self) -> ClientResult<mongodb::options::ReadPreference> {
        use mongodb::options::{ReadPreference as Driver, ReadPreferenceOptions, TagSet};

        let tag_sets = self
            .tag_sets
            .iter()
            .map(|tags| {
                tags.iter()
                    .map(|(k, v)| match v {
                        Bson::String(s) => Ok((k.clone(), s.clone())),
                        other => Err(ClientError::config(format!(
                            "tag '{}' must be a string, got {}",
                            k, other
                        ))),
                    })
                    .collect::<ClientResult<TagSet>>()
            })
            .collect::<ClientResult<Vec<_>>>()?;

        let options = ReadPreferenceOptions::builder()
            .tag_sets((!tag_sets.is_empty()).then_some(tag_sets))
            .max_staleness(self.max_staleness)
            .build();

        Ok(match self.mode {
            ReadPreferenceMode::Primary => Driver::Primary,
            ReadPreferenceMode::PrimaryPreferred => Driver::PrimaryPreferred { options },
            ReadPreferenceMode::Secondary => Driver::Secondary { options },
            ReadPreferenceMode::SecondaryPreferred => Driver::SecondaryPreferred { options },
            ReadPreferenceMode::Nearest => Driver::Nearest { options },
        })
    }
}

/// Read concern level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadConcernLevel {
    /// Local.
    Local,
    /// Available.
    Available,
    /// Majority.
    Majority,
    /// Linearizable.
    Linearizable,
    /// Snapshot.
    Snapshot,
}

impl ReadConcernLevel {
    fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Available => "available",
            Self::Majority => "majority",
            Self::Linearizable => "linearizable",
            Self::Snapshot => "snapshot",
        }
    }
}

/// Read concern; the server default when no level is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReadConcern {
    /// Level, if any.
    pub level: Option<ReadConcernLevel>,
}

impl ReadConcern {
    /// Server default.
    pub fn server_default() -> Self {
        Self::default()
    }

    /// Read concern with a level.
    pub fn level(level: ReadConcernLevel) -> Self {
        Self { level: Some(level) }
    }

    /// Majority read concern.
    pub fn majority() -> Self {
        Self::level(ReadConcernLevel::Majority)
    }

    /// Whether the server default applies.
    pub fn is_server_default(&self) -> bool {
        self.level.is_none()
    }

    /// Render the `readConcern` document, `None` for the server default.
    pub fn to_document(&self) -> Option<Document> {
        self.level.map(|level| doc! { "level": level.as_str() })
    }
}

/// The `w` component of a write concern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acknowledgment {
    /// Acknowledge from the specified number of nodes.
    Nodes(u32),
    /// Acknowledge from a majority of nodes.
    Majority,
    /// Custom tag set.
    Custom(String),
}

/// Write concern; the server default when nothing is set.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WriteConcern {
    /// Acknowledgment requirement.
    pub w: Option<Acknowledgment>,
    /// Wait for the journal.
    pub journal: Option<bool>,
    /// Replication timeout.
    pub w_timeout: Option<Duration>,
}

impl WriteConcern {
    /// Acknowledged writes with server defaults.
    pub fn acknowledged() -> Self {
        Self::default()
    }

    /// Fire-and-forget writes.
    pub fn unacknowledged() -> Self {
        Self {
            w: Some(Acknowledgment::Nodes(0)),
            ..Self::default()
        }
    }

    /// Acknowledge from `n` nodes.
    pub fn nodes(n: u32) -> Self {
        Self {
            w: Some(Acknowledgment::Nodes(n)),
            ..Self::default()
        }
    }

    /// Acknowledge from a majority.
    pub fn majority() -> Self {
        Self {
            w: Some(Acknowledgment::Majority),
            ..Self::default()
        }
    }

    /// Set the journal flag.
    pub fn with_journal(mut self, journal: bool) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Set the replication timeout.
    pub fn with_w_timeout(mut self, timeout: Duration) -> Self {
        self.w_timeout = Some(timeout);
        self
    }

    /// Whether the server acknowledges writes.
    pub fn is_acknowledged(&self) -> bool {
        !matches!(self.w, Some(Acknowledgment::Nodes(0))) || self.journal == Some(true)
    }

    /// Whether nothing is set.
    pub fn is_server_default(&self) -> bool {
        self.w.is_none() && self.journal.is_none() && self.w_timeout.is_none()
    }

    /// Render the `writeConcern` document, `None` for the server default.
    pub fn to_document(&self) -> Option<Document> {
        if self.is_server_default() {
            return None;
        }
        let mut document = Document::new();
        match &self.w {
            Some(Acknowledgment::Nodes(n)) => {
                document.insert("w", *n as i32);
            }
            Some(Acknowledgment::Majority) => {
                document.insert("w", "majority");
            }
            Some(Acknowledgment::Custom(tag)) => {
                document.insert("w", tag.as_str());
            }
            None => {}
        }
        if let Some(journal) = self.journal {
            document.insert("j", journal);
        }
        if let Some(timeout) = self.w_timeout {
            document.insert("wtimeout", timeout.as_millis() as i64);
        }
        Some(document)
    }

    fn to_driver(&self) -> mongodb::options::WriteConcern {
        use mongodb::options::Acknowledgment as Driver;

        let w = self.w.as_ref().map(|w| match w {
            Acknowledgment::Nodes(n) => Driver::Nodes(*n),
            Acknowledgment::Majority => Driver::Majority,
            Acknowledgment::Custom(tag) => Driver::Custom(tag.clone()),
        });
        mongodb::options::WriteConcern::builder()
            .w(w)
            .journal(self.journal)
            .w_timeout(self.w_timeout)
            .build()
    }
}

/// Client-wide settings.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// Connection URI.
    pub uri: String,
    /// Application name (shown in server logs).
    pub app_name: Option<String>,
    /// Database used when none is named.
    pub default_database: Option<String>,
    /// Default read preference.
    pub read_preference: ReadPreference,
    /// Default read concern.
    pub read_concern: ReadConcern,
    /// Default write concern.
    pub write_concern: WriteConcern,
    /// Request retryable reads.
    pub retry_reads: bool,
    /// Request retryable writes.
    pub retry_writes: bool,
    /// Start an implicit session for calls without one.
    pub implicit_sessions: bool,
    /// Connection timeout.
    pub connect_timeout: Option<Duration>,
    /// Server selection timeout.
    pub server_selection_timeout: Option<Duration>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            uri: "mongodb://localhost:27017".to_string(),
            app_name: Some("docforge".to_string()),
            default_database: None,
            read_preference: ReadPreference::primary(),
            read_concern: ReadConcern::default(),
            write_concern: WriteConcern::default(),
            retry_reads: true,
            retry_writes: true,
            implicit_sessions: true,
            connect_timeout: Some(Duration::from_secs(10)),
            server_selection_timeout: Some(Duration::from_secs(30)),
        }
    }
}

impl ClientSettings {
    /// Settings for a URI with defaults for everything else.
    pub fn from_uri(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            ..Self::default()
        }
    }

    /// Create a builder for settings.
    pub fn builder() -> ClientSettingsBuilder {
        ClientSettingsBuilder::new()
    }

    /// Collection defaults inherited from these settings.
    pub fn collection_settings(&self) -> CollectionSettings {
        CollectionSettings {
            read_preference: self.read_preference.clone(),
            read_concern: self.read_concern,
            write_concern: self.write_concern.clone(),
        }
    }

    /// Convert to driver options.
    pub async fn to_client_options(&self) -> ClientResult<ClientOptions> {
        let mut options = ClientOptions::parse(&self.uri)
            .await
            .map_err(|e| ClientError::config(format!("failed to parse URI: {}", e)))?;

        if let Some(ref app_name) = self.app_name {
            options.app_name = Some(app_name.clone());
        }
        if let Some(ref database) = self.default_database {
            options.default_database = Some(database.clone());
        }
        if let Some(timeout) = self.connect_timeout {
            options.connect_timeout = Some(timeout);
        }
        if let Some(timeout) = self.server_selection_timeout {
            options.server_selection_timeout = Some(timeout);
        }

        options.selection_criteria = Some(mongodb::options::SelectionCriteria::ReadPreference(
            self.read_preference.to_driver()?,
        ));
        if let Some(level) = self.read_concern.level {
            options.read_concern = Some(mongodb::options::ReadConcern::custom(level.as_str().to_string()));
        }
        if !self.write_concern.is_server_default() {
            options.write_concern = Some(self.write_concern.to_driver());
        }
        options.retry_reads = Some(self.retry_reads);
        options.retry_writes = Some(self.retry_writes);

        Ok(options)
    }
}

/// Builder for client settings.
#[derive(Debug, Default)]
pub struct ClientSettingsBuilder {
    uri: Option<String>,
    app_name: Option<String>,
    default_database: Option<String>,
    read_preference: Option<ReadPreference>,
    read_concern: Option<ReadConcern>,
    write_concern: Option<WriteConcern>,
    retry_reads: Option<bool>,
    retry_writes: Option<bool>,
    implicit_sessions: Option<bool>,
    connect_timeout: Option<Duration>,
    server_selection_timeout: Option<Duration>,
}

impl ClientSettingsBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connection URI.
    pub fn uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    /// Set the application name.
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = Some(name.into());
        self
    }

    /// Set the default database.
    pub fn default_database(mut self, database: impl Into<String>) -> Self {
        self.default_database = Some(database.into());
        self
    }

    /// Set the read preference.
    pub fn read_preference(mut self, pref: ReadPreference) -> Self {
        self.read_preference = Some(pref);
        self
    }

    /// Set the read concern.
    pub fn read_concern(mut self, concern: ReadConcern) -> Self {
        self.read_concern = Some(concern);
        self
    }

    /// Set the write concern.
    pub fn write_concern(mut self, wc: WriteConcern) -> Self {
        self.write_concern = Some(wc);
        self
    }

    /// Enable or disable retry reads.
    pub fn retry_reads(mut self, enabled: bool) -> Self {
        self.retry_reads = Some(enabled);
        self
    }

    /// Enable or disable retry writes.
    pub fn retry_writes(mut self, enabled: bool) -> Self {
        self.retry_writes = Some(enabled);
        self
    }

    /// Enable or disable implicit sessions.
    pub fn implicit_sessions(mut self, enabled: bool) -> Self {
        self.implicit_sessions = Some(enabled);
        self
    }

    /// Set the connection timeout.
    pub fn connect_timeout(mut self, duration: Duration) -> Self {
        self.connect_timeout = Some(duration);
        self
    }

    /// Set the server selection timeout.
    pub fn server_selection_timeout(mut self, duration: Duration) -> Self {
        self.server_selection_timeout = Some(duration);
        self
    }

    /// Build the settings.
    pub fn build(self) -> ClientResult<ClientSettings> {
        let defaults = ClientSettings::default();
        let uri = self.uri.unwrap_or(defaults.uri);
        if !uri.starts_with("mongodb://") && !uri.starts_with("mongodb+srv://") {
            return Err(ClientError::config(format!("unsupported URI scheme in '{}'", uri)));
        }
        if let Some(database) = &self.default_database {
            docforge_render::DatabaseNamespace::new(database.as_str())
                .map_err(|e| ClientError::config(e.to_string()))?;
        }

        Ok(ClientSettings {
            uri,
            app_name: self.app_name.or(defaults.app_name),
            default_database: self.default_database,
            read_preference: self.read_preference.unwrap_or(defaults.read_preference),
            read_concern: self.read_concern.unwrap_or(defaults.read_concern),
            write_concern: self.write_concern.unwrap_or(defaults.write_concern),
            retry_reads: self.retry_reads.unwrap_or(defaults.retry_reads),
            retry_writes: self.retry_writes.unwrap_or(defaults.retry_writes),
            implicit_sessions: self.implicit_sessions.unwrap_or(defaults.implicit_sessions),
            connect_timeout: self.connect_timeout.or(defaults.connect_timeout),
            server_selection_timeout: self
                .server_selection_timeout
                .or(defaults.server_selection_timeout),
        })
    }
}

/// Per-collection overrides of the client defaults.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CollectionSettings {
    /// Read preference.
    pub read_preference: ReadPreference,
    /// Read concern.
    pub read_concern: ReadConcern,
    /// Write concern.
    pub write_concern: WriteConcern,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_builder() {
        let settings = ClientSettings::builder()
            .uri("mongodb://db.example:27017")
            .app_name("reports")
            .default_database("shop")
            .retry_reads(false)
            .build()
            .unwrap();

        assert_eq!(settings.app_name, Some("reports".to_string()));
        assert!(!settings.retry_reads);
        assert!(settings.retry_writes);
        assert!(settings.implicit_sessions);
        assert!(settings.read_preference.is_primary());
    }

    #[test]
    fn test_settings_builder_rejects_bad_input() {
        assert!(ClientSettings::builder().uri("postgres://x").build().is_err());
        assert!(ClientSettings::builder().default_database("a.b").build().is_err());
    }

    #[test]
    fn test_write_concern() {
        assert!(WriteConcern::acknowledged().is_acknowledged());
        assert_eq!(WriteConcern::acknowledged().to_document(), None);
        assert!(!WriteConcern::unacknowledged().is_acknowledged());
        assert_eq!(
            WriteConcern::majority()
                .with_journal(true)
                .with_w_timeout(Duration::from_millis(500))
                .to_document(),
            Some(doc! { "w": "majority", "j": true, "wtimeout": 500_i64 })
        );
    }

    #[test]
    fn test_read_preference_document() {
        let pref = ReadPreference::secondary()
            .with_tag_set(doc! { "dc": "east" })
            .with_max_staleness(Duration::from_secs(120));
        assert_eq!(
            pref.to_document(),
            doc! { "mode": "secondary", "tags": [ { "dc": "east" } ], "maxStalenessSeconds": 120_i64 }
        );
        assert!(!pref.is_primary());
    }

    #[test]
    fn test_collection_settings_inherit() {
        let settings = ClientSettings::builder()
            .read_concern(ReadConcern::majority())
            .build()
            .unwrap();
        let collection = settings.collection_settings();
        assert_eq!(collection.read_concern, ReadConcern::majority());
        assert_eq!(collection.read_concern.to_document(), Some(doc! { "level": "majority" }));
    }
}
