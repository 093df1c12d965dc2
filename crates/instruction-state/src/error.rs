//! Error types for instruction-state

use thiserror::Error;

/// Errors raised while connecting to or initialising the SurrealDB backend
#[derive(Error, Debug)]
pub enum StateError {
    /// Database connection error
    #[error("Database connection failed: {0}")]
    Connection(String),

    /// Database query error
    #[error("Database query failed: {0}")]
    Query(String),

    /// Schema setup error
    #[error("Schema setup failed: {0}")]
    SchemaSetup(String),

    /// Incomplete or contradictory connection settings
    #[error("Invalid database configuration: {0}")]
    Config(String),
}

impl From<surrealdb::Error> for StateError {
    fn from(err: surrealdb::Error) -> Self {
        StateError::Query(err.to_string())
    }
}

/// Errors returned by `ContentStore` implementations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("build not found: {build_id}")]
    BuildNotFound { build_id: String },

    #[error("instruction not found: {instruction_id}")]
    InstructionNotFound { instruction_id: String },

    #[error("instruction version not found: {version_id}")]
    VersionNotFound { version_id: String },

    #[error("build content not found: build {build_id}, instruction {instruction_id}")]
    ContentNotFound {
        build_id: String,
        instruction_id: String,
    },

    #[error("build {build_id} already pins instruction {instruction_id}")]
    DuplicateContent {
        build_id: String,
        instruction_id: String,
    },

    #[error("build number {build_number} already issued for organization {org_id}")]
    DuplicateBuildNumber { org_id: String, build_number: u64 },

    /// The org's main build changed between read and promotion
    #[error("main build for organization {org_id} moved: expected {expected:?}, found {actual:?}")]
    MainMoved {
        org_id: String,
        expected: Option<String>,
        actual: Option<String>,
    },

    /// Failure produced on purpose by the in-memory fake
    #[error("injected failure: {0}")]
    InjectedFailure(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<surrealdb::Error> for StorageError {
    fn from(err: surrealdb::Error) -> Self {
        StorageError::Backend(err.to_string())
    }
}
