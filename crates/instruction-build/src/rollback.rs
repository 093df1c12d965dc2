//! Forward-only rollback.
//!
//! Rolling back never re-promotes an old build. It creates a new build with
//! a copy of the target's pins, approves it and promotes it, so history only
//! grows. Instructions the target pins that were soft-deleted since are
//! restored first.

use instruction_state::{
    Build, BuildId, BuildSource, BuildStatus, ContentStore, InstructionId, OrgId,
};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::diff::{diff_snapshots, snapshot_of, Snapshot};
use crate::error::{BuildError, Result};
use crate::lifecycle::{CopyPolicy, NewBuild};
use crate::obs::emit_build_rolled_back;
use crate::service::BuildService;
use crate::title::refresh_title;

/// Result of [`BuildService::rollback`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackOutcome {
    /// The new main build carrying the target's snapshot
    pub build: Build,
    pub target_build_id: BuildId,
    /// Instructions whose soft-delete marker was cleared
    pub restored_instructions: Vec<InstructionId>,
}

impl<S: ContentStore> BuildService<S> {
    /// Restore the organization's live content to the snapshot of
    /// `target_id`, which must be an approved build of `org_id`.
    ///
    /// The new build's counters describe the change relative to the main
    /// build it replaces.
    #[instrument(skip(self), fields(org_id = %org_id, target = %target_id))]
    pub async fn rollback(
        &self,
        org_id: &OrgId,
        target_id: &BuildId,
        user: &str,
    ) -> Result<RollbackOutcome> {
        let target = self.get_build(target_id).await?;
        if target.org_id != *org_id {
            return Err(BuildError::WrongOrganization {
                build_id: target.id,
                org_id: org_id.clone(),
            });
        }
        if target.status != BuildStatus::Approved {
            return Err(BuildError::NotApproved {
                build_id: target.id,
                status: target.status,
            });
        }

        let entries = self.store().list_build_contents(&target.id).await?;
        let mut restored = Vec::new();
        for entry in entries.iter().filter(|e| e.instruction.is_deleted()) {
            self.store()
                .restore_instruction(&entry.instruction.id)
                .await?;
            restored.push(entry.instruction.id.clone());
        }

        let main = self.store().get_main_build(org_id).await?;
        let current: Snapshot = match &main {
            Some(main) => self.load_snapshot(&main.id).await?,
            None => Snapshot::new(),
        };

        let request = NewBuild::new(org_id.clone(), BuildSource::Rollback)
            .empty()
            .with_created_by(user);
        let mut build = self
            .create_seeded(request, None, CopyPolicy::Required)
            .await?;
        let copied = self.copy_snapshot(&target, &build).await?;

        let restored_snapshot = snapshot_of(&entries);
        let change = diff_snapshots(&current, &restored_snapshot);
        build.source_build_id = Some(target.id.clone());
        build.total_instructions = copied;
        build.added_count = change.added.len() as u64;
        build.modified_count = change.modified.len() as u64;
        build.removed_count = change.removed.len() as u64;
        refresh_title(&mut build);

        self.auto_approve(&mut build, user).await?;
        let promoted = self
            .promote_over(&build, main.as_ref().map(|m| &m.id))
            .await?;

        emit_build_rolled_back(&promoted, &target.id, restored.len());
        Ok(RollbackOutcome {
            build: promoted,
            target_build_id: target.id,
            restored_instructions: restored,
        })
    }
}
