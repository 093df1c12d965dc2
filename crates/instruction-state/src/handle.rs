//! SurrealDB connection handle.
//!
//! The store can live in memory (tests, one-shot CLI runs), in a local
//! `surrealkv://` file, or on a remote server reached over WebSocket. Every
//! constructor applies the schema before handing out the handle.

use crate::error::StateError;
use crate::migrations;
use crate::Result;
use surrealdb::engine::any::Any;
use surrealdb::opt::auth::{Database, Root};
use surrealdb::Surreal;
use tracing::{info, instrument};

const DEFAULT_NAMESPACE: &str = "instructions";
const DEFAULT_DATABASE: &str = "builds";

/// Who the handle signs in as on a remote server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Root user, may define schema in any namespace
    Root { username: String, password: String },
    /// User scoped to the configured namespace and database
    Database { username: String, password: String },
}

/// A remote SurrealDB server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    /// `ws://` or `wss://` endpoint
    pub endpoint: String,
    pub credentials: Credentials,
    pub namespace: String,
    pub database: String,
}

impl RemoteConfig {
    /// Remote config for a database-scoped user in the default namespace.
    pub fn new(
        endpoint: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            credentials: Credentials::Database {
                username: username.into(),
                password: password.into(),
            },
            namespace: DEFAULT_NAMESPACE.to_string(),
            database: DEFAULT_DATABASE.to_string(),
        }
    }

    pub fn with_namespace(mut self, ns: impl Into<String>) -> Self {
        self.namespace = ns.into();
        self
    }

    pub fn with_database(mut self, db: impl Into<String>) -> Self {
        self.database = db.into();
        self
    }

    /// Sign in as root with the same username and password.
    pub fn as_root(mut self) -> Self {
        if let Credentials::Database { username, password } = self.credentials {
            self.credentials = Credentials::Root { username, password };
        }
        self
    }
}

/// Where [`SurrealHandle::connect`] should connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectTarget {
    Memory,
    /// Any engine URL (`mem://`, `surrealkv://path`, `ws://host`) without auth
    Url(String),
    Remote(RemoteConfig),
}

impl ConnectTarget {
    /// Resolve the target from the process environment.
    ///
    /// - `SURREALDB_ENDPOINT` selects a remote server and then requires
    ///   `SURREALDB_USERNAME` and `SURREALDB_PASSWORD`; `SURREALDB_NAMESPACE`,
    ///   `SURREALDB_DATABASE` and `SURREALDB_ROOT=true` are optional.
    /// - otherwise `SURREALDB_URL` is used as-is,
    /// - otherwise the store is in memory.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(endpoint) = lookup("SURREALDB_ENDPOINT") {
            let required = |key: &str| {
                lookup(key).ok_or_else(|| {
                    StateError::Config(format!("{} must be set with SURREALDB_ENDPOINT", key))
                })
            };
            let mut config = RemoteConfig::new(
                endpoint,
                required("SURREALDB_USERNAME")?,
                required("SURREALDB_PASSWORD")?,
            );
            if let Some(ns) = lookup("SURREALDB_NAMESPACE") {
                config = config.with_namespace(ns);
            }
            if let Some(db) = lookup("SURREALDB_DATABASE") {
                config = config.with_database(db);
            }
            if lookup("SURREALDB_ROOT").is_some_and(|v| v.eq_ignore_ascii_case("true")) {
                config = config.as_root();
            }
            return Ok(ConnectTarget::Remote(config));
        }

        Ok(match lookup("SURREALDB_URL") {
            Some(url) => ConnectTarget::Url(url),
            None => ConnectTarget::Memory,
        })
    }
}

/// SurrealDB connection handle
#[derive(Clone)]
pub struct SurrealHandle {
    db: Surreal<Any>,
}

impl SurrealHandle {
    /// In-memory database with the schema applied
    pub async fn setup_db() -> Result<Self> {
        Self::connect(ConnectTarget::Memory).await
    }

    /// Connect to whatever the environment points at (see
    /// [`ConnectTarget::from_env`]).
    pub async fn setup_from_env() -> Result<Self> {
        Self::connect(ConnectTarget::from_env()?).await
    }

    pub async fn connect_url(url: &str) -> Result<Self> {
        Self::connect(ConnectTarget::Url(url.to_string())).await
    }

    #[instrument(skip_all)]
    pub async fn connect(target: ConnectTarget) -> Result<Self> {
        let db = match target {
            ConnectTarget::Memory => {
                info!("Connecting to SurrealDB (in-memory)");
                Self::open("mem://", DEFAULT_NAMESPACE, DEFAULT_DATABASE).await?
            }
            ConnectTarget::Url(url) => {
                info!(%url, "Connecting to SurrealDB");
                Self::open(&url, DEFAULT_NAMESPACE, DEFAULT_DATABASE).await?
            }
            ConnectTarget::Remote(config) => Self::open_remote(&config).await?,
        };

        migrations::init_schema(&db).await?;
        info!("SurrealDB connected and schema initialized");
        Ok(SurrealHandle { db })
    }

    async fn open(url: &str, namespace: &str, database: &str) -> Result<Surreal<Any>> {
        let db = surrealdb::engine::any::connect(url)
            .await
            .map_err(|e| StateError::Connection(format!("Failed to connect to {}: {}", url, e)))?;
        db.use_ns(namespace)
            .use_db(database)
            .await
            .map_err(|e| StateError::Connection(e.to_string()))?;
        Ok(db)
    }

    async fn open_remote(config: &RemoteConfig) -> Result<Surreal<Any>> {
        info!(
            endpoint = %config.endpoint,
            namespace = %config.namespace,
            database = %config.database,
            root = matches!(config.credentials, Credentials::Root { .. }),
            "Connecting to remote SurrealDB"
        );

        let db = surrealdb::engine::any::connect(&config.endpoint)
            .await
            .map_err(|e| {
                StateError::Connection(format!("Failed to connect to {}: {}", config.endpoint, e))
            })?;

        let signed_in = match &config.credentials {
            Credentials::Root { username, password } => {
                db.signin(Root { username, password }).await.map(|_| ())
            }
            Credentials::Database { username, password } => db
                .signin(Database {
                    namespace: &config.namespace,
                    database: &config.database,
                    username,
                    password,
                })
                .await
                .map(|_| ()),
        };
        signed_in.map_err(|e| StateError::Connection(format!("Authentication failed: {}", e)))?;

        db.use_ns(&config.namespace)
            .use_db(&config.database)
            .await
            .map_err(|e| {
                StateError::Connection(format!("Failed to select namespace/database: {}", e))
            })?;
        Ok(db)
    }

    pub(crate) fn db(&self) -> &Surreal<Any> {
        &self.db
    }
}
