//! SurrealDB-backed ContentStore implementation
//!
//! Rows are stored through private `Db*` records that carry SurrealDB
//! datetimes and integer columns, converting to/from `schema` types at the
//! boundary. Our own ids live in `*_id` columns so they never collide with
//! SurrealDB record ids.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use surrealdb::sql::Datetime as SurrealDatetime;
use tracing::{debug, instrument, warn};

use crate::error::StorageError;
use crate::schema::*;
use crate::storage_traits::{BuildPage, ContentStore, Page, StorageResult};
use crate::SurrealHandle;

fn to_utc(value: SurrealDatetime) -> DateTime<Utc> {
    DateTime::<Utc>::from(value)
}

fn backend(err: surrealdb::Error) -> StorageError {
    StorageError::Backend(err.to_string())
}

/// Attempts for a transaction that keeps losing optimistic commit races.
const MAX_TX_ATTEMPTS: u32 = 64;
const TX_BACKOFF_BASE_MS: u64 = 1;

/// A transaction that lost a commit race against a concurrent writer of the
/// same record. Nothing was written and running it again is safe.
fn is_commit_conflict(err: &surrealdb::Error) -> bool {
    err.to_string().contains("can be retried")
}

/// Capped exponential backoff with a little jitter so racing writers spread out.
async fn conflict_backoff(attempt: u32) {
    let jitter = u64::from(Utc::now().timestamp_subsec_micros() % 4);
    let delay = TX_BACKOFF_BASE_MS * 2u64.pow(attempt.min(4)) + jitter;
    tokio::time::sleep(Duration::from_millis(delay)).await;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DbInstruction {
    instruction_id: String,
    org_id: String,
    current_version_id: Option<String>,
    source: InstructionSource,
    deleted_at: Option<SurrealDatetime>,
    created_at: SurrealDatetime,
    updated_at: SurrealDatetime,
}

impl From<&Instruction> for DbInstruction {
    fn from(i: &Instruction) -> Self {
        Self {
            instruction_id: i.id.0.clone(),
            org_id: i.org_id.0.clone(),
            current_version_id: i.current_version_id.as_ref().map(|v| v.0.clone()),
            source: i.source,
            deleted_at: i.deleted_at.map(SurrealDatetime::from),
            created_at: SurrealDatetime::from(i.created_at),
            updated_at: SurrealDatetime::from(i.updated_at),
        }
    }
}

impl DbInstruction {
    fn into_instruction(self) -> Instruction {
        Instruction {
            id: InstructionId(self.instruction_id),
            org_id: OrgId(self.org_id),
            current_version_id: self.current_version_id.map(VersionId),
            source: self.source,
            deleted_at: self.deleted_at.map(to_utc),
            created_at: to_utc(self.created_at),
            updated_at: to_utc(self.updated_at),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DbVersion {
    version_id: String,
    instruction_id: String,
    version_number: i64,
    text: String,
    title: String,
    status: String,
    category: Option<String>,
    load_mode: LoadMode,
    references: Vec<InstructionReference>,
    created_at: SurrealDatetime,
}

impl From<&InstructionVersion> for DbVersion {
    fn from(v: &InstructionVersion) -> Self {
        Self {
            version_id: v.id.0.clone(),
            instruction_id: v.instruction_id.0.clone(),
            version_number: v.version_number as i64,
            text: v.text.clone(),
            title: v.title.clone(),
            status: v.status.clone(),
            category: v.category.clone(),
            load_mode: v.load_mode,
            references: v.references.clone(),
            created_at: SurrealDatetime::from(v.created_at),
        }
    }
}

impl DbVersion {
    fn into_version(self) -> InstructionVersion {
        InstructionVersion {
            id: VersionId(self.version_id),
            instruction_id: InstructionId(self.instruction_id),
            version_number: self.version_number.max(0) as u64,
            text: self.text,
            title: self.title,
            status: self.status,
            category: self.category,
            load_mode: self.load_mode,
            references: self.references,
            created_at: to_utc(self.created_at),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DbBuild {
    build_id: String,
    org_id: String,
    build_number: i64,
    status: BuildStatus,
    is_main: bool,
    source: BuildSource,
    base_build_id: Option<String>,
    source_build_id: Option<String>,
    branch_label: Option<String>,
    added_count: i64,
    modified_count: i64,
    removed_count: i64,
    total_instructions: i64,
    title: String,
    created_by: Option<String>,
    submitted_at: Option<SurrealDatetime>,
    approved_by: Option<String>,
    approved_at: Option<SurrealDatetime>,
    rejected_by: Option<String>,
    rejected_at: Option<SurrealDatetime>,
    rejection_reason: Option<String>,
    promoted_at: Option<SurrealDatetime>,
    created_at: SurrealDatetime,
    updated_at: SurrealDatetime,
}

impl From<&Build> for DbBuild {
    fn from(b: &Build) -> Self {
        Self {
            build_id: b.id.0.clone(),
            org_id: b.org_id.0.clone(),
            build_number: b.build_number as i64,
            status: b.status,
            is_main: b.is_main,
            source: b.source,
            base_build_id: b.base_build_id.as_ref().map(|id| id.0.clone()),
            source_build_id: b.source_build_id.as_ref().map(|id| id.0.clone()),
            branch_label: b.branch_label.clone(),
            added_count: b.added_count as i64,
            modified_count: b.modified_count as i64,
            removed_count: b.removed_count as i64,
            total_instructions: b.total_instructions as i64,
            title: b.title.clone(),
            created_by: b.created_by.clone(),
            submitted_at: b.submitted_at.map(SurrealDatetime::from),
            approved_by: b.approved_by.clone(),
            approved_at: b.approved_at.map(SurrealDatetime::from),
            rejected_by: b.rejected_by.clone(),
            rejected_at: b.rejected_at.map(SurrealDatetime::from),
            rejection_reason: b.rejection_reason.clone(),
            promoted_at: b.promoted_at.map(SurrealDatetime::from),
            created_at: SurrealDatetime::from(b.created_at),
            updated_at: SurrealDatetime::from(b.updated_at),
        }
    }
}

impl DbBuild {
    fn into_build(self) -> Build {
        Build {
            id: BuildId(self.build_id),
            org_id: OrgId(self.org_id),
            build_number: self.build_number.max(0) as u64,
            status: self.status,
            is_main: self.is_main,
            source: self.source,
            base_build_id: self.base_build_id.map(BuildId),
            source_build_id: self.source_build_id.map(BuildId),
            branch_label: self.branch_label,
            added_count: self.added_count.max(0) as u64,
            modified_count: self.modified_count.max(0) as u64,
            removed_count: self.removed_count.max(0) as u64,
            total_instructions: self.total_instructions.max(0) as u64,
            title: self.title,
            created_by: self.created_by,
            submitted_at: self.submitted_at.map(to_utc),
            approved_by: self.approved_by,
            approved_at: self.approved_at.map(to_utc),
            rejected_by: self.rejected_by,
            rejected_at: self.rejected_at.map(to_utc),
            rejection_reason: self.rejection_reason,
            promoted_at: self.promoted_at.map(to_utc),
            created_at: to_utc(self.created_at),
            updated_at: to_utc(self.updated_at),
        }
    }
}

/// Mutable build columns. `is_main` is deliberately absent.
#[derive(Debug, Clone, Serialize)]
struct DbBuildUpdate {
    status: BuildStatus,
    base_build_id: Option<String>,
    source_build_id: Option<String>,
    branch_label: Option<String>,
    added_count: i64,
    modified_count: i64,
    removed_count: i64,
    total_instructions: i64,
    title: String,
    submitted_at: Option<SurrealDatetime>,
    approved_by: Option<String>,
    approved_at: Option<SurrealDatetime>,
    rejected_by: Option<String>,
    rejected_at: Option<SurrealDatetime>,
    rejection_reason: Option<String>,
    promoted_at: Option<SurrealDatetime>,
    updated_at: SurrealDatetime,
}

impl From<&Build> for DbBuildUpdate {
    fn from(b: &Build) -> Self {
        let row = DbBuild::from(b);
        Self {
            status: row.status,
            base_build_id: row.base_build_id,
            source_build_id: row.source_build_id,
            branch_label: row.branch_label,
            added_count: row.added_count,
            modified_count: row.modified_count,
            removed_count: row.removed_count,
            total_instructions: row.total_instructions,
            title: row.title,
            submitted_at: row.submitted_at,
            approved_by: row.approved_by,
            approved_at: row.approved_at,
            rejected_by: row.rejected_by,
            rejected_at: row.rejected_at,
            rejection_reason: row.rejection_reason,
            promoted_at: row.promoted_at,
            updated_at: SurrealDatetime::from(Utc::now()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DbBuildContent {
    build_id: String,
    instruction_id: String,
    instruction_version_id: String,
    created_at: SurrealDatetime,
}

impl From<&BuildContent> for DbBuildContent {
    fn from(c: &BuildContent) -> Self {
        Self {
            build_id: c.build_id.0.clone(),
            instruction_id: c.instruction_id.0.clone(),
            instruction_version_id: c.instruction_version_id.0.clone(),
            created_at: SurrealDatetime::from(c.created_at),
        }
    }
}

impl DbBuildContent {
    fn into_content(self) -> BuildContent {
        BuildContent {
            build_id: BuildId(self.build_id),
            instruction_id: InstructionId(self.instruction_id),
            instruction_version_id: VersionId(self.instruction_version_id),
            created_at: to_utc(self.created_at),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CounterRow {
    last: i64,
}

#[derive(Debug, Deserialize)]
struct CountRow {
    total: i64,
}

/// Build numbers come from one counter record per organization.
const NEXT_NUMBER_SQL: &str =
    "UPSERT type::thing('build_counters', $org) SET last = (last ?? 0) + 1 RETURN AFTER";

/// Demote, promote and publish pointers in one transaction.
///
/// The org's main build id lives in a single `main_builds` record that every
/// promote reads and rewrites, so two racing promotes touch the same key and
/// the later commit fails instead of both flipping `is_main`. The THROW aborts
/// everything when the main is not the one the caller observed.
const PROMOTE_SQL: &str = r#"
    BEGIN TRANSACTION;
    LET $pointer = type::thing('main_builds', $org);
    LET $observed = array::first((SELECT VALUE build_id FROM $pointer)) ?? '';
    IF $observed != $expected { THROW 'main_moved'; };
    IF array::len((SELECT VALUE build_id FROM builds WHERE build_id = $build AND org_id = $org)) = 0 { THROW 'build_missing'; };
    UPSERT $pointer SET build_id = $build, updated_at = time::now();
    UPDATE builds SET is_main = false, updated_at = time::now() WHERE org_id = $org AND is_main = true;
    UPDATE builds SET is_main = true, promoted_at = time::now(), updated_at = time::now() WHERE build_id = $build;
    LET $pins = (SELECT instruction_id, instruction_version_id FROM build_contents WHERE build_id = $build);
    FOR $pin IN $pins {
        UPDATE instructions SET current_version_id = $pin.instruction_version_id, updated_at = time::now() WHERE instruction_id = $pin.instruction_id;
    };
    COMMIT TRANSACTION;
"#;

/// SurrealDB-backed implementation of [`ContentStore`].
#[derive(Clone)]
pub struct SurrealContentStore {
    handle: Arc<SurrealHandle>,
}

impl SurrealContentStore {
    pub fn new(handle: Arc<SurrealHandle>) -> Self {
        Self { handle }
    }

    /// Create an in-memory instance for testing.
    pub async fn in_memory() -> crate::Result<Self> {
        let handle = SurrealHandle::setup_db().await?;
        Ok(Self::new(Arc::new(handle)))
    }

    async fn select_builds(
        &self,
        sql: &'static str,
        key: &'static str,
        value: String,
    ) -> StorageResult<Vec<Build>> {
        let mut result = self
            .handle
            .db()
            .query(sql)
            .bind((key, value))
            .await
            .map_err(backend)?;
        let rows: Vec<DbBuild> = result.take(0).map_err(backend)?;
        Ok(rows.into_iter().map(DbBuild::into_build).collect())
    }
}

#[async_trait]
impl ContentStore for SurrealContentStore {
    #[instrument(skip(self, instruction), fields(instruction_id = %instruction.id))]
    async fn insert_instruction(&self, instruction: Instruction) -> StorageResult<Instruction> {
        let created: Option<DbInstruction> = self
            .handle
            .db()
            .create("instructions")
            .content(DbInstruction::from(&instruction))
            .await
            .map_err(backend)?;

        created
            .map(DbInstruction::into_instruction)
            .ok_or_else(|| StorageError::Backend("failed to create instruction".to_string()))
    }

    #[instrument(skip(self), fields(instruction_id = %id))]
    async fn get_instruction(&self, id: &InstructionId) -> StorageResult<Option<Instruction>> {
        let mut result = self
            .handle
            .db()
            .query("SELECT * FROM instructions WHERE instruction_id = $id")
            .bind(("id", id.0.clone()))
            .await
            .map_err(backend)?;

        let rows: Vec<DbInstruction> = result.take(0).map_err(backend)?;
        Ok(rows.into_iter().next().map(DbInstruction::into_instruction))
    }

    #[instrument(skip(self, draft), fields(instruction_id = %instruction_id))]
    async fn create_version(
        &self,
        instruction_id: &InstructionId,
        draft: VersionDraft,
    ) -> StorageResult<InstructionVersion> {
        if self.get_instruction(instruction_id).await?.is_none() {
            return Err(StorageError::InstructionNotFound {
                instruction_id: instruction_id.0.clone(),
            });
        }

        let mut result = self
            .handle
            .db()
            .query(
                "SELECT VALUE version_number FROM instruction_versions \
                 WHERE instruction_id = $id ORDER BY version_number DESC LIMIT 1",
            )
            .bind(("id", instruction_id.0.clone()))
            .await
            .map_err(backend)?;
        let latest: Vec<i64> = result.take(0).map_err(backend)?;
        let next = latest.first().copied().unwrap_or(0).max(0) as u64 + 1;

        // The unique (instruction_id, version_number) index rejects a racing writer.
        let version = InstructionVersion::from_draft(instruction_id.clone(), next, draft);
        let created: Option<DbVersion> = self
            .handle
            .db()
            .create("instruction_versions")
            .content(DbVersion::from(&version))
            .await
            .map_err(backend)?;

        debug!(version_number = next, "Instruction version created");
        created
            .map(DbVersion::into_version)
            .ok_or_else(|| StorageError::Backend("failed to create instruction version".to_string()))
    }

    #[instrument(skip(self), fields(version_id = %id))]
    async fn get_version(&self, id: &VersionId) -> StorageResult<Option<InstructionVersion>> {
        let mut result = self
            .handle
            .db()
            .query("SELECT * FROM instruction_versions WHERE version_id = $id")
            .bind(("id", id.0.clone()))
            .await
            .map_err(backend)?;

        let rows: Vec<DbVersion> = result.take(0).map_err(backend)?;
        Ok(rows.into_iter().next().map(DbVersion::into_version))
    }

    #[instrument(skip(self), fields(instruction_id = %id))]
    async fn soft_delete_instruction(&self, id: &InstructionId) -> StorageResult<()> {
        let instruction =
            self.get_instruction(id)
                .await?
                .ok_or_else(|| StorageError::InstructionNotFound {
                    instruction_id: id.0.clone(),
                })?;
        if instruction.is_deleted() {
            return Ok(());
        }

        let now = SurrealDatetime::from(Utc::now());
        self.handle
            .db()
            .query("UPDATE instructions SET deleted_at = $now, updated_at = $now WHERE instruction_id = $id")
            .bind(("now", now))
            .bind(("id", id.0.clone()))
            .await
            .and_then(|response| response.check())
            .map_err(backend)?;
        Ok(())
    }

    #[instrument(skip(self), fields(instruction_id = %id))]
    async fn restore_instruction(&self, id: &InstructionId) -> StorageResult<()> {
        let instruction =
            self.get_instruction(id)
                .await?
                .ok_or_else(|| StorageError::InstructionNotFound {
                    instruction_id: id.0.clone(),
                })?;
        if !instruction.is_deleted() {
            return Ok(());
        }

        self.handle
            .db()
            .query("UPDATE instructions SET deleted_at = NONE, updated_at = time::now() WHERE instruction_id = $id")
            .bind(("id", id.0.clone()))
            .await
            .and_then(|response| response.check())
            .map_err(backend)?;
        Ok(())
    }

    #[instrument(skip(self), fields(instruction_id = %id, version_id = %version_id))]
    async fn set_instruction_current_version(
        &self,
        id: &InstructionId,
        version_id: &VersionId,
    ) -> StorageResult<()> {
        let mut result = self
            .handle
            .db()
            .query(
                "UPDATE instructions SET current_version_id = $version, updated_at = time::now() \
                 WHERE instruction_id = $id RETURN AFTER",
            )
            .bind(("version", version_id.0.clone()))
            .bind(("id", id.0.clone()))
            .await
            .map_err(backend)?;

        let updated: Vec<DbInstruction> = result.take(0).map_err(backend)?;
        if updated.is_empty() {
            return Err(StorageError::InstructionNotFound {
                instruction_id: id.0.clone(),
            });
        }
        Ok(())
    }

    #[instrument(skip(self), fields(org_id = %org_id))]
    async fn next_build_number(&self, org_id: &OrgId) -> StorageResult<u64> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let outcome = self
                .handle
                .db()
                .query(NEXT_NUMBER_SQL)
                .bind(("org", org_id.0.clone()))
                .await
                .and_then(|response| response.check());

            match outcome {
                Ok(mut result) => {
                    let rows: Vec<CounterRow> = result.take(0).map_err(backend)?;
                    return rows
                        .into_iter()
                        .next()
                        .map(|row| row.last.max(1) as u64)
                        .ok_or_else(|| {
                            StorageError::Backend("build counter upsert returned nothing".to_string())
                        });
                }
                Err(err) if is_commit_conflict(&err) && attempt < MAX_TX_ATTEMPTS => {
                    debug!(attempt, "build counter commit conflict, retrying");
                    conflict_backoff(attempt).await;
                }
                Err(err) => return Err(backend(err)),
            }
        }
    }

    #[instrument(skip(self, build), fields(build_id = %build.id, build_number = build.build_number))]
    async fn insert_build(&self, build: &Build) -> StorageResult<()> {
        let mut record = DbBuild::from(build);
        record.is_main = false;

        let created: Option<DbBuild> = self
            .handle
            .db()
            .create("builds")
            .content(record)
            .await
            .map_err(|e| {
                let message = e.to_string();
                if message.contains("idx_build_org_number") {
                    StorageError::DuplicateBuildNumber {
                        org_id: build.org_id.0.clone(),
                        build_number: build.build_number,
                    }
                } else {
                    StorageError::Backend(message)
                }
            })?;

        created
            .map(|_| ())
            .ok_or_else(|| StorageError::Backend("failed to create build".to_string()))
    }

    #[instrument(skip(self, build), fields(build_id = %build.id))]
    async fn update_build(&self, build: &Build) -> StorageResult<()> {
        let mut result = self
            .handle
            .db()
            .query("UPDATE builds MERGE $patch WHERE build_id = $id RETURN AFTER")
            .bind(("patch", DbBuildUpdate::from(build)))
            .bind(("id", build.id.0.clone()))
            .await
            .map_err(backend)?;

        let updated: Vec<DbBuild> = result.take(0).map_err(backend)?;
        if updated.is_empty() {
            return Err(StorageError::BuildNotFound {
                build_id: build.id.0.clone(),
            });
        }
        Ok(())
    }

    #[instrument(skip(self), fields(build_id = %id))]
    async fn get_build(&self, id: &BuildId) -> StorageResult<Option<Build>> {
        let builds = self
            .select_builds("SELECT * FROM builds WHERE build_id = $id", "id", id.0.clone())
            .await?;
        Ok(builds.into_iter().next())
    }

    #[instrument(skip(self), fields(org_id = %org_id))]
    async fn get_main_build(&self, org_id: &OrgId) -> StorageResult<Option<Build>> {
        let builds = self
            .select_builds(
                "SELECT * FROM builds WHERE org_id = $org AND is_main = true",
                "org",
                org_id.0.clone(),
            )
            .await?;
        if builds.len() > 1 {
            warn!(count = builds.len(), "More than one main build found");
        }
        Ok(builds.into_iter().next())
    }

    #[instrument(skip(self, page), fields(org_id = %org_id))]
    async fn list_builds(
        &self,
        org_id: &OrgId,
        status: Option<BuildStatus>,
        page: &Page,
    ) -> StorageResult<BuildPage> {
        let status_filter = status.map(|s| s.as_str().to_string()).unwrap_or_default();

        let mut result = self
            .handle
            .db()
            .query(
                "SELECT * FROM builds WHERE org_id = $org AND ($status = '' OR status = $status) \
                 ORDER BY build_number DESC LIMIT $limit START $start",
            )
            .query(
                "SELECT count() AS total FROM builds \
                 WHERE org_id = $org AND ($status = '' OR status = $status) GROUP ALL",
            )
            .bind(("org", org_id.0.clone()))
            .bind(("status", status_filter))
            .bind(("limit", page.per_page() as i64))
            .bind(("start", page.offset() as i64))
            .await
            .map_err(backend)?;

        let rows: Vec<DbBuild> = result.take(0).map_err(backend)?;
        let counts: Vec<CountRow> = result.take(1).map_err(backend)?;
        let total = counts.first().map(|c| c.total.max(0) as u64).unwrap_or(0);

        let items = rows.into_iter().map(DbBuild::into_build).collect();
        Ok(BuildPage::new(items, page, total))
    }

    #[instrument(skip(self), fields(org_id = %org_id, build_id = %build_id))]
    async fn promote_build(
        &self,
        org_id: &OrgId,
        build_id: &BuildId,
        expected_main: Option<&BuildId>,
    ) -> StorageResult<Build> {
        let mut attempt = 0;
        let outcome = loop {
            attempt += 1;
            let outcome = self
                .handle
                .db()
                .query(PROMOTE_SQL)
                .bind(("org", org_id.0.clone()))
                .bind(("build", build_id.0.clone()))
                .bind((
                    "expected",
                    expected_main.map(|id| id.0.clone()).unwrap_or_default(),
                ))
                .await
                .and_then(|response| response.check());

            // A lost commit race is re-run; the rerun sees the winner's
            // pointer and reports MainMoved through the THROW.
            match outcome {
                Err(err) if is_commit_conflict(&err) && attempt < MAX_TX_ATTEMPTS => {
                    debug!(attempt, "promote commit conflict, retrying");
                    conflict_backoff(attempt).await;
                }
                other => break other,
            }
        };

        if let Err(err) = outcome {
            // The transaction rolled back; classify the failure from fresh reads.
            let actual = self.get_main_build(org_id).await?.map(|b| b.id);
            if actual.as_ref() != expected_main {
                return Err(StorageError::MainMoved {
                    org_id: org_id.0.clone(),
                    expected: expected_main.map(|id| id.0.clone()),
                    actual: actual.map(|id| id.0),
                });
            }
            return match self.get_build(build_id).await? {
                Some(build) if build.org_id == *org_id => Err(backend(err)),
                _ => Err(StorageError::BuildNotFound {
                    build_id: build_id.0.clone(),
                }),
            };
        }

        self.get_build(build_id)
            .await?
            .ok_or_else(|| StorageError::BuildNotFound {
                build_id: build_id.0.clone(),
            })
    }

    #[instrument(skip(self), fields(build_id = %build_id))]
    async fn list_build_contents(
        &self,
        build_id: &BuildId,
    ) -> StorageResult<Vec<BuildContentEntry>> {
        let mut result = self
            .handle
            .db()
            .query("SELECT * FROM build_contents WHERE build_id = $build ORDER BY instruction_id")
            .query(
                "SELECT * FROM instruction_versions WHERE version_id INSIDE \
                 (SELECT VALUE instruction_version_id FROM build_contents WHERE build_id = $build)",
            )
            .query(
                "SELECT * FROM instructions WHERE instruction_id INSIDE \
                 (SELECT VALUE instruction_id FROM build_contents WHERE build_id = $build)",
            )
            .bind(("build", build_id.0.clone()))
            .await
            .map_err(backend)?;

        let contents: Vec<DbBuildContent> = result.take(0).map_err(backend)?;
        let versions: Vec<DbVersion> = result.take(1).map_err(backend)?;
        let instructions: Vec<DbInstruction> = result.take(2).map_err(backend)?;

        let versions: HashMap<String, InstructionVersion> = versions
            .into_iter()
            .map(|v| (v.version_id.clone(), v.into_version()))
            .collect();
        let instructions: HashMap<String, Instruction> = instructions
            .into_iter()
            .map(|i| (i.instruction_id.clone(), i.into_instruction()))
            .collect();

        contents
            .into_iter()
            .map(|row| {
                let content = row.into_content();
                let version = versions
                    .get(&content.instruction_version_id.0)
                    .cloned()
                    .ok_or_else(|| StorageError::VersionNotFound {
                        version_id: content.instruction_version_id.0.clone(),
                    })?;
                let instruction = instructions
                    .get(&content.instruction_id.0)
                    .cloned()
                    .ok_or_else(|| StorageError::InstructionNotFound {
                        instruction_id: content.instruction_id.0.clone(),
                    })?;
                Ok(BuildContentEntry {
                    content,
                    version,
                    instruction,
                })
            })
            .collect()
    }

    #[instrument(skip(self), fields(build_id = %build_id, instruction_id = %instruction_id))]
    async fn get_build_content(
        &self,
        build_id: &BuildId,
        instruction_id: &InstructionId,
    ) -> StorageResult<Option<BuildContent>> {
        let mut result = self
            .handle
            .db()
            .query("SELECT * FROM build_contents WHERE build_id = $build AND instruction_id = $instruction")
            .bind(("build", build_id.0.clone()))
            .bind(("instruction", instruction_id.0.clone()))
            .await
            .map_err(backend)?;

        let rows: Vec<DbBuildContent> = result.take(0).map_err(backend)?;
        Ok(rows.into_iter().next().map(DbBuildContent::into_content))
    }

    #[instrument(skip(self, content), fields(build_id = %content.build_id, instruction_id = %content.instruction_id))]
    async fn insert_build_content(&self, content: &BuildContent) -> StorageResult<()> {
        if self.get_build(&content.build_id).await?.is_none() {
            return Err(StorageError::BuildNotFound {
                build_id: content.build_id.0.clone(),
            });
        }

        let created: Option<DbBuildContent> = self
            .handle
            .db()
            .create("build_contents")
            .content(DbBuildContent::from(content))
            .await
            .map_err(|e| {
                let message = e.to_string();
                if message.contains("idx_content_pin") {
                    StorageError::DuplicateContent {
                        build_id: content.build_id.0.clone(),
                        instruction_id: content.instruction_id.0.clone(),
                    }
                } else {
                    StorageError::Backend(message)
                }
            })?;

        created
            .map(|_| ())
            .ok_or_else(|| StorageError::Backend("failed to create build content".to_string()))
    }

    #[instrument(skip(self), fields(build_id = %build_id, instruction_id = %instruction_id))]
    async fn update_build_content(
        &self,
        build_id: &BuildId,
        instruction_id: &InstructionId,
        version_id: &VersionId,
    ) -> StorageResult<()> {
        let mut result = self
            .handle
            .db()
            .query(
                "UPDATE build_contents SET instruction_version_id = $version \
                 WHERE build_id = $build AND instruction_id = $instruction RETURN AFTER",
            )
            .bind(("version", version_id.0.clone()))
            .bind(("build", build_id.0.clone()))
            .bind(("instruction", instruction_id.0.clone()))
            .await
            .map_err(backend)?;

        let updated: Vec<DbBuildContent> = result.take(0).map_err(backend)?;
        if updated.is_empty() {
            return Err(StorageError::ContentNotFound {
                build_id: build_id.0.clone(),
                instruction_id: instruction_id.0.clone(),
            });
        }
        Ok(())
    }

    #[instrument(skip(self), fields(build_id = %build_id, instruction_id = %instruction_id))]
    async fn delete_build_content(
        &self,
        build_id: &BuildId,
        instruction_id: &InstructionId,
    ) -> StorageResult<bool> {
        let mut result = self
            .handle
            .db()
            .query(
                "DELETE FROM build_contents \
                 WHERE build_id = $build AND instruction_id = $instruction RETURN BEFORE",
            )
            .bind(("build", build_id.0.clone()))
            .bind(("instruction", instruction_id.0.clone()))
            .await
            .map_err(backend)?;

        let deleted: Vec<DbBuildContent> = result.take(0).map_err(backend)?;
        Ok(!deleted.is_empty())
    }

    #[instrument(skip(self), fields(src = %src, dst = %dst))]
    async fn bulk_copy_contents(&self, src: &BuildId, dst: &BuildId) -> StorageResult<u64> {
        for id in [src, dst] {
            if self.get_build(id).await?.is_none() {
                return Err(StorageError::BuildNotFound {
                    build_id: id.0.clone(),
                });
            }
        }

        let classify = |e: surrealdb::Error| {
            let message = e.to_string();
            if message.contains("idx_content_pin") {
                StorageError::DuplicateContent {
                    build_id: dst.0.clone(),
                    instruction_id: String::new(),
                }
            } else {
                StorageError::Backend(message)
            }
        };

        // A single INSERT statement copies all rows or none.
        let mut result = self
            .handle
            .db()
            .query(
                "INSERT INTO build_contents \
                 (SELECT $dst AS build_id, instruction_id, instruction_version_id, time::now() AS created_at \
                  FROM build_contents WHERE build_id = $src)",
            )
            .bind(("src", src.0.clone()))
            .bind(("dst", dst.0.clone()))
            .await
            .map_err(classify)?;

        let copied: Vec<DbBuildContent> = result.take(0).map_err(classify)?;
        debug!(count = copied.len(), "Build contents copied");
        Ok(copied.len() as u64)
    }
}
