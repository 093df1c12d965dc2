//! Instruction-State: Persistence for Instruction Builds
//!
//! This crate owns every row the build engine reads or writes: instructions,
//! their immutable versions, builds and the build content pins.
//!
//! ## Layer 0 - Data/Persistence
//!
//! Focus: Data integrity, transactionality, and the per-organization
//! invariants (unique build numbers, a single main build).
//!
//! ## Key Components
//!
//! - `ContentStore`: backend-agnostic async trait consumed by the engine
//! - `MemoryContentStore`: in-memory fake for tests
//! - `SurrealHandle` / `SurrealContentStore`: SurrealDB connection and backend

mod error;
pub mod fakes;
mod handle;
mod migrations;
mod schema;
pub mod storage_traits;
pub mod surreal_store;

pub use error::{StateError, StorageError};
pub use handle::{ConnectTarget, Credentials, RemoteConfig, SurrealHandle};
pub use schema::{
    Build, BuildContent, BuildContentEntry, BuildId, BuildSource, BuildStatus, Instruction,
    InstructionId, InstructionReference, InstructionSource, InstructionVersion, LoadMode, OrgId,
    VersionDraft, VersionId,
};
pub use storage_traits::{
    BuildPage, ContentStore, Page, StorageResult, DEFAULT_PER_PAGE, MAX_PER_PAGE,
};
pub use surreal_store::SurrealContentStore;

/// Result type for connection and schema setup
pub type Result<T> = std::result::Result<T, StateError>;
