//! Draft editor: pin, re-pin and unpin instructions in an editable build.

use chrono::Utc;
use instruction_state::{Build, BuildContent, BuildId, ContentStore, InstructionId, VersionId};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::error::{BuildError, EntityKind, Result};
use crate::obs::emit_content_changed;
use crate::service::BuildService;
use crate::title::refresh_title;

/// Effect of a single edit on the build's snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditOutcome {
    /// The instruction was not pinned before
    Added,
    /// The instruction was re-pinned to another version
    Modified,
    /// Already pinned to the requested version
    Unchanged,
    Removed,
    /// Removal of an instruction the build did not pin
    NotPinned,
}

impl EditOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            EditOutcome::Added => "added",
            EditOutcome::Modified => "modified",
            EditOutcome::Unchanged => "unchanged",
            EditOutcome::Removed => "removed",
            EditOutcome::NotPinned => "not_pinned",
        }
    }
}

/// The build after an edit, with what the edit did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditResult {
    pub build: Build,
    pub outcome: EditOutcome,
}

impl<S: ContentStore> BuildService<S> {
    /// Pin `instruction_id` at `version_id` in an editable build.
    ///
    /// A new pin bumps `added_count` and `total_instructions`; re-pinning to
    /// a different version bumps `modified_count`. Pinning the version that
    /// is already pinned changes nothing.
    #[instrument(skip(self), fields(build_id = %build_id, instruction_id = %instruction_id))]
    pub async fn add_instruction(
        &self,
        build_id: &BuildId,
        instruction_id: &InstructionId,
        version_id: &VersionId,
    ) -> Result<EditResult> {
        let build = self.get_build(build_id).await?;
        self.pin(build, instruction_id, version_id).await
    }

    /// Unpin `instruction_id` from an editable build.
    ///
    /// Bumps `removed_count` and decrements `total_instructions` when a pin
    /// existed; otherwise the build is returned unchanged.
    #[instrument(skip(self), fields(build_id = %build_id, instruction_id = %instruction_id))]
    pub async fn remove_instruction(
        &self,
        build_id: &BuildId,
        instruction_id: &InstructionId,
    ) -> Result<EditResult> {
        let build = self.get_build(build_id).await?;
        self.unpin(build, instruction_id).await
    }

    pub(crate) async fn pin(
        &self,
        mut build: Build,
        instruction_id: &InstructionId,
        version_id: &VersionId,
    ) -> Result<EditResult> {
        ensure_editable(&build)?;

        let instruction = match self.store().get_instruction(instruction_id).await? {
            Some(i) if i.org_id == build.org_id => i,
            _ => return Err(BuildError::not_found(EntityKind::Instruction, instruction_id)),
        };
        let version = self
            .store()
            .get_version(version_id)
            .await?
            .ok_or_else(|| BuildError::not_found(EntityKind::InstructionVersion, version_id))?;
        if version.instruction_id != instruction.id {
            return Err(BuildError::VersionMismatch {
                instruction_id: instruction.id,
                version_id: version.id,
            });
        }

        let existing = self
            .store()
            .get_build_content(&build.id, instruction_id)
            .await?;
        let outcome = match existing {
            Some(row) if row.instruction_version_id == *version_id => {
                return Ok(EditResult {
                    build,
                    outcome: EditOutcome::Unchanged,
                })
            }
            Some(_) => {
                self.store()
                    .update_build_content(&build.id, instruction_id, version_id)
                    .await?;
                build.modified_count += 1;
                EditOutcome::Modified
            }
            None => {
                let row = BuildContent::new(
                    build.id.clone(),
                    instruction_id.clone(),
                    version_id.clone(),
                );
                self.store().insert_build_content(&row).await?;
                build.added_count += 1;
                build.total_instructions += 1;
                EditOutcome::Added
            }
        };

        self.save_edit(&mut build, instruction_id, outcome).await?;
        Ok(EditResult { build, outcome })
    }

    pub(crate) async fn unpin(
        &self,
        mut build: Build,
        instruction_id: &InstructionId,
    ) -> Result<EditResult> {
        ensure_editable(&build)?;

        let deleted = self
            .store()
            .delete_build_content(&build.id, instruction_id)
            .await?;
        if !deleted {
            return Ok(EditResult {
                build,
                outcome: EditOutcome::NotPinned,
            });
        }

        build.removed_count += 1;
        build.total_instructions = build.total_instructions.saturating_sub(1);
        self.save_edit(&mut build, instruction_id, EditOutcome::Removed)
            .await?;
        Ok(EditResult {
            build,
            outcome: EditOutcome::Removed,
        })
    }

    async fn save_edit(
        &self,
        build: &mut Build,
        instruction_id: &InstructionId,
        outcome: EditOutcome,
    ) -> Result<()> {
        refresh_title(build);
        build.updated_at = Utc::now();
        self.store().update_build(build).await?;
        emit_content_changed(&build.id, instruction_id, outcome.as_str());
        Ok(())
    }
}

fn ensure_editable(build: &Build) -> Result<()> {
    if build.status.is_editable() {
        Ok(())
    } else {
        Err(BuildError::NotEditable {
            build_id: build.id.clone(),
            status: build.status,
        })
    }
}
