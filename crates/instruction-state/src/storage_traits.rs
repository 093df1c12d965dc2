//! Storage trait definitions for instruction builds
//!
//! `ContentStore` is the transactional boundary every build operation runs
//! against. It exposes row-level primitives (get/insert/update/delete) plus
//! the few composite operations that must be atomic:
//! - `next_build_number`: race-safe per-organization counter
//! - `bulk_copy_contents`: wholesale snapshot duplication
//! - `promote_build`: demote + promote + publish pointers, guarded by a
//!   compare-and-swap on the observed main build
//!
//! The trait is async and backend-agnostic. An in-memory fake lives in the
//! `fakes` module; `SurrealContentStore` is the SurrealDB implementation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::schema::{
    Build, BuildContent, BuildContentEntry, BuildId, BuildStatus, Instruction, InstructionId,
    InstructionVersion, OrgId, VersionDraft, VersionId,
};

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// Pagination
// ---------------------------------------------------------------------------

pub const DEFAULT_PER_PAGE: u64 = 20;
pub const MAX_PER_PAGE: u64 = 100;

/// Page request for list queries (1-indexed, `per_page` clamped to 1..=100)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    page: u64,
    per_page: u64,
}

impl Page {
    pub fn new(page: Option<u64>, per_page: Option<u64>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            per_page: per_page.unwrap_or(DEFAULT_PER_PAGE).clamp(1, MAX_PER_PAGE),
        }
    }

    pub fn page(&self) -> u64 {
        self.page
    }

    pub fn per_page(&self) -> u64 {
        self.per_page
    }

    /// Number of rows to skip
    pub fn offset(&self) -> u64 {
        (self.page - 1) * self.per_page
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(None, None)
    }
}

/// One page of builds plus pagination metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildPage {
    pub items: Vec<Build>,
    pub page: u64,
    pub per_page: u64,
    pub total: u64,
    pub pages: u64,
    pub has_next: bool,
    pub has_prev: bool,
}

impl BuildPage {
    pub fn new(items: Vec<Build>, page: &Page, total: u64) -> Self {
        let pages = total.div_ceil(page.per_page());
        Self {
            items,
            page: page.page(),
            per_page: page.per_page(),
            total,
            pages,
            has_next: page.page() < pages,
            has_prev: page.page() > 1,
        }
    }
}

// ---------------------------------------------------------------------------
// ContentStore
// ---------------------------------------------------------------------------

/// Transactional store for instructions, versions, builds and build contents.
///
/// Guarantees expected from every implementation:
/// - `next_build_number` never hands out the same number twice for an org,
///   and numbers increase strictly.
/// - `promote_build` is atomic: after it returns, exactly the promoted build
///   has `is_main = true` for the org and every instruction it pins points
///   at the pinned version. It fails with `MainMoved` (and changes nothing)
///   when the org's main is not `expected_main`.
/// - `bulk_copy_contents` copies all rows or none.
/// - Instruction versions are immutable once created.
#[async_trait]
pub trait ContentStore: Send + Sync {
    // ----- instructions (authoring side) -----

    /// Persist a new instruction.
    async fn insert_instruction(&self, instruction: Instruction) -> StorageResult<Instruction>;

    /// Fetch an instruction, including soft-deleted ones.
    async fn get_instruction(&self, id: &InstructionId) -> StorageResult<Option<Instruction>>;

    /// Create the next version of an instruction; the store assigns the id
    /// and `version_number`.
    async fn create_version(
        &self,
        instruction_id: &InstructionId,
        draft: VersionDraft,
    ) -> StorageResult<InstructionVersion>;

    async fn get_version(&self, id: &VersionId) -> StorageResult<Option<InstructionVersion>>;

    /// Set the soft-delete marker. No-op if already deleted.
    async fn soft_delete_instruction(&self, id: &InstructionId) -> StorageResult<()>;

    /// Clear the soft-delete marker. No-op if not deleted.
    async fn restore_instruction(&self, id: &InstructionId) -> StorageResult<()>;

    /// Point an instruction at its live version.
    async fn set_instruction_current_version(
        &self,
        id: &InstructionId,
        version_id: &VersionId,
    ) -> StorageResult<()>;

    // ----- builds -----

    /// Issue the next build number for an organization (starts at 1).
    async fn next_build_number(&self, org_id: &OrgId) -> StorageResult<u64>;

    async fn insert_build(&self, build: &Build) -> StorageResult<()>;

    /// Overwrite a build's mutable fields. `is_main` is ignored; only
    /// `promote_build` may flip it.
    async fn update_build(&self, build: &Build) -> StorageResult<()>;

    async fn get_build(&self, id: &BuildId) -> StorageResult<Option<Build>>;

    async fn get_main_build(&self, org_id: &OrgId) -> StorageResult<Option<Build>>;

    /// List builds newest first, optionally filtered by status.
    async fn list_builds(
        &self,
        org_id: &OrgId,
        status: Option<BuildStatus>,
        page: &Page,
    ) -> StorageResult<BuildPage>;

    /// Atomically make `build_id` the org's main build and publish its pins.
    async fn promote_build(
        &self,
        org_id: &OrgId,
        build_id: &BuildId,
        expected_main: Option<&BuildId>,
    ) -> StorageResult<Build>;

    // ----- build contents -----

    /// All content rows of a build joined with version and instruction,
    /// ordered by instruction id.
    async fn list_build_contents(&self, build_id: &BuildId)
        -> StorageResult<Vec<BuildContentEntry>>;

    async fn get_build_content(
        &self,
        build_id: &BuildId,
        instruction_id: &InstructionId,
    ) -> StorageResult<Option<BuildContent>>;

    /// Fails with `DuplicateContent` if the instruction is already pinned.
    async fn insert_build_content(&self, content: &BuildContent) -> StorageResult<()>;

    /// Re-pin an existing row. Fails with `ContentNotFound` if absent.
    async fn update_build_content(
        &self,
        build_id: &BuildId,
        instruction_id: &InstructionId,
        version_id: &VersionId,
    ) -> StorageResult<()>;

    /// Returns whether a row was deleted.
    async fn delete_build_content(
        &self,
        build_id: &BuildId,
        instruction_id: &InstructionId,
    ) -> StorageResult<bool>;

    /// Copy every content row of `src` into `dst`, returning the row count.
    async fn bulk_copy_contents(&self, src: &BuildId, dst: &BuildId) -> StorageResult<u64>;
}
