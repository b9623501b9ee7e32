//! mongo_migrate configuration, express in toml.
//!
//! Basic configuration file example:
//! ```toml
//! [src]
//! url = "mongodb://localhost:27017"
//! db = "app"
//!
//! [dst]
//! url = "mongodb://localhost:27018"
//! db = "app_copy"
//!
//! [migrate]
//! batch_size = 1000
//! colls = ["users", "logs"]
//! collection_concurrent = 1
//! timeout_secs = 1800
//! collection_timeout_secs = 1800
//! ```
//!
//! Every value can also be given on the command line, which takes precedence
//! over the file. Use [SyncerConfig::overlay] to merge them and
//! [SyncerConfig::resolve] to get the final [MigrateConf].
use crate::error::{MigrateError, Result};
use crate::{DEFAULT_BATCH_SIZE, DEFAULT_TIMEOUT_SECS};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Migration configuration as read from file or command line, every value is optional.
#[derive(Deserialize, Debug, Default, Clone)]
pub struct SyncerConfig {
    /// source database.
    #[serde(default)]
    pub src: Endpoint,
    /// target database.
    #[serde(default)]
    pub dst: Endpoint,
    /// migration tuning.
    #[serde(default)]
    pub migrate: MigrateSection,
}

/// One side of the migration.
#[derive(Deserialize, Debug, Default, Clone)]
pub struct Endpoint {
    /// mongodb url, begins with 'mongodb://' or 'mongodb+srv://'.
    pub url: Option<String>,
    /// database name.
    pub db: Option<String>,
}

/// `[migrate]` section.
#[derive(Deserialize, Debug, Default, Clone)]
pub struct MigrateSection {
    /// how many documents are inserted in one bulk insert.
    pub batch_size: Option<usize>,
    /// collections to migrate, default it None, which means migrate all collections.
    pub colls: Option<Vec<String>>,
    /// how many collections will be migrated concurrently.
    pub collection_concurrent: Option<usize>,
    /// deadline of the whole run, in seconds.
    pub timeout_secs: Option<u64>,
    /// deadline of one collection, in seconds.
    pub collection_timeout_secs: Option<u64>,
}

impl SyncerConfig {
    /// load configuration from toml file at `path`.
    pub fn from_path(path: impl AsRef<Path>) -> Result<SyncerConfig> {
        let path = path.as_ref();
        let config_error = |detail: String| MigrateError::ConfigFile {
            path: path.display().to_string(),
            detail,
        };
        let data = std::fs::read(path).map_err(|e| config_error(e.to_string()))?;
        toml::from_slice(&data).map_err(|e| config_error(e.to_string()))
    }

    /// merge `higher` on top of self, values set in `higher` win.
    pub fn overlay(self, higher: SyncerConfig) -> SyncerConfig {
        SyncerConfig {
            src: Endpoint {
                url: higher.src.url.or(self.src.url),
                db: higher.src.db.or(self.src.db),
            },
            dst: Endpoint {
                url: higher.dst.url.or(self.dst.url),
                db: higher.dst.db.or(self.dst.db),
            },
            migrate: MigrateSection {
                batch_size: higher.migrate.batch_size.or(self.migrate.batch_size),
                colls: higher.migrate.colls.or(self.migrate.colls),
                collection_concurrent: higher
                    .migrate
                    .collection_concurrent
                    .or(self.migrate.collection_concurrent),
                timeout_secs: higher.migrate.timeout_secs.or(self.migrate.timeout_secs),
                collection_timeout_secs: higher
                    .migrate
                    .collection_timeout_secs
                    .or(self.migrate.collection_timeout_secs),
            },
        }
    }

    /// fill defaults and produce migration configuration.
    ///
    /// Missing required values become empty strings, [MigrateConf::validate] reports them.
    pub fn resolve(self) -> MigrateConf {
        let mut conf = MigrateConf::new(
            self.src.url.unwrap_or_default(),
            self.dst.url.unwrap_or_default(),
            self.src.db.unwrap_or_default(),
            self.dst.db.unwrap_or_default(),
        );
        conf.colls = self.migrate.colls;
        if let Some(batch_size) = self.migrate.batch_size {
            conf.batch_size = batch_size;
        }
        if let Some(concurrent) = self.migrate.collection_concurrent {
            conf.collection_concurrent = concurrent;
        }
        if let Some(secs) = self.migrate.timeout_secs {
            conf.timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.migrate.collection_timeout_secs {
            conf.collection_timeout = Duration::from_secs(secs);
        }
        conf
    }
}

/// Resolved migration configuration.
#[derive(Debug, Clone)]
pub struct MigrateConf {
    src_uri: String,
    dst_uri: String,
    src_db: String,
    dst_db: String,
    colls: Option<Vec<String>>,
    batch_size: usize,
    collection_concurrent: usize,
    timeout: Duration,
    collection_timeout: Duration,
}

impl MigrateConf {
    /// create configuration with default batch size, timeouts, and serial collection migration.
    pub fn new(src_uri: String, dst_uri: String, src_db: String, dst_db: String) -> Self {
        MigrateConf {
            src_uri,
            dst_uri,
            src_db,
            dst_db,
            colls: None,
            batch_size: DEFAULT_BATCH_SIZE,
            collection_concurrent: 1,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            collection_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    /// set documents per bulk insert.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// restrict migration to `colls`.
    pub fn with_colls(mut self, colls: Vec<String>) -> Self {
        self.colls = Some(colls);
        self
    }

    /// set how many collections are migrated at the same time.
    pub fn with_collection_concurrent(mut self, concurrent: usize) -> Self {
        self.collection_concurrent = concurrent;
        self
    }

    /// set run deadline and per collection deadline.
    pub fn with_timeouts(mut self, timeout: Duration, collection_timeout: Duration) -> Self {
        self.timeout = timeout;
        self.collection_timeout = collection_timeout;
        self
    }

    /// get source mongodb uri.
    pub fn get_src_uri(&self) -> &str {
        &self.src_uri
    }

    /// get target mongodb uri.
    pub fn get_dst_uri(&self) -> &str {
        &self.dst_uri
    }

    /// get source database name.
    pub fn get_src_db(&self) -> &str {
        &self.src_db
    }

    /// get target database name.
    pub fn get_dst_db(&self) -> &str {
        &self.dst_db
    }

    /// get collections to migrate, None means all collections.
    pub fn get_colls(&self) -> Option<&[String]> {
        self.colls.as_deref()
    }

    /// get documents per bulk insert.
    pub fn get_batch_size(&self) -> usize {
        self.batch_size
    }

    /// get how many collections are migrated concurrently.
    pub fn get_collection_concurrent(&self) -> usize {
        self.collection_concurrent
    }

    /// get deadline of the whole run.
    pub fn get_timeout(&self) -> Duration {
        self.timeout
    }

    /// get deadline of a single collection.
    pub fn get_collection_timeout(&self) -> Duration {
        self.collection_timeout
    }

    /// Check configuration, it must be called before connecting to any database.
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("src.url", &self.src_uri),
            ("dst.url", &self.dst_uri),
            ("src.db", &self.src_db),
            ("dst.db", &self.dst_db),
        ];
        for (key, value) in required.iter() {
            if value.trim().is_empty() {
                return Err(MigrateError::Configuration(format!("{} is required", key)));
            }
        }

        if same_server(&self.src_uri, &self.dst_uri) && self.src_db.trim() == self.dst_db.trim() {
            return Err(MigrateError::Configuration(
                "source and target cannot be the same database".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(MigrateError::Configuration(
                "migrate.batch_size must be at least 1".to_string(),
            ));
        }
        if self.collection_concurrent == 0 {
            return Err(MigrateError::Configuration(
                "migrate.collection_concurrent must be at least 1".to_string(),
            ));
        }
        if self.timeout.is_zero() || self.collection_timeout.is_zero() {
            return Err(MigrateError::Configuration(
                "migrate timeouts must be at least 1 second".to_string(),
            ));
        }
        if let Some(colls) = &self.colls {
            if colls.iter().any(|c| c.trim().is_empty()) {
                return Err(MigrateError::Configuration(
                    "migrate.colls contains an empty collection name".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// whether two connection strings address the same server, `mongodb://h:1` and
/// `mongodb://h:1/` only differ by the empty database path.
fn same_server(a: &str, b: &str) -> bool {
    let normalize = |uri: &str| uri.trim().trim_end_matches('/').to_string();
    normalize(a) == normalize(b)
}
