//! Build lifecycle: creation and the approval state machine.
//!
//! ```text
//! draft -> pending_approval -> approved -> (main)
//!                           \-> rejected
//! ```
//!
//! Status only moves forward. `is_main` is independent of status: any
//! approved build that is not main may be promoted, including one that was
//! main before and got replaced.

use chrono::Utc;
use instruction_state::{Build, BuildId, BuildSource, BuildStatus, ContentStore, OrgId};
use tracing::instrument;

use crate::error::{describe_state, BuildError, Result};
use crate::obs::{emit_build_created, emit_build_promoted, emit_build_transition, emit_copy_failed};
use crate::service::BuildService;
use crate::title::refresh_title;

/// Parameters for [`BuildService::create_build`].
#[derive(Debug, Clone)]
pub struct NewBuild {
    pub org_id: OrgId,
    pub source: BuildSource,
    /// Seed the build with the current main build's pins
    pub copy_from_main: bool,
    pub branch_label: Option<String>,
    pub created_by: Option<String>,
}

impl NewBuild {
    /// A build that starts from the organization's main build.
    pub fn new(org_id: OrgId, source: BuildSource) -> Self {
        Self {
            org_id,
            source,
            copy_from_main: true,
            branch_label: None,
            created_by: None,
        }
    }

    /// Start from an empty snapshot instead of main.
    pub fn empty(mut self) -> Self {
        self.copy_from_main = false;
        self
    }

    pub fn with_branch_label(mut self, label: impl Into<String>) -> Self {
        self.branch_label = Some(label.into());
        self
    }

    pub fn with_created_by(mut self, user: impl Into<String>) -> Self {
        self.created_by = Some(user.into());
        self
    }
}

/// What to do when seeding a new build from another one fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CopyPolicy {
    /// Log and keep the (empty) build
    BestEffort,
    /// Propagate the failure
    Required,
}

impl<S: ContentStore> BuildService<S> {
    /// Create a draft build with the next build number for the organization.
    ///
    /// When `copy_from_main` is set and the org has a main build, the new
    /// build records it as `base_build_id` and receives a copy of its pins.
    /// A failed copy is logged and the build is returned empty.
    #[instrument(skip(self, request), fields(org_id = %request.org_id, source = %request.source))]
    pub async fn create_build(&self, request: NewBuild) -> Result<Build> {
        let seed = if request.copy_from_main {
            self.store().get_main_build(&request.org_id).await?
        } else {
            None
        };
        self.create_seeded(request, seed.as_ref(), CopyPolicy::BestEffort)
            .await
    }

    /// Create a build seeded from `seed` (if any) under the given copy policy.
    pub(crate) async fn create_seeded(
        &self,
        request: NewBuild,
        seed: Option<&Build>,
        policy: CopyPolicy,
    ) -> Result<Build> {
        let number = self.store().next_build_number(&request.org_id).await?;

        let mut build = Build::new(request.org_id, number, request.source);
        build.branch_label = request.branch_label;
        build.created_by = request.created_by;
        build.base_build_id = seed.map(|s| s.id.clone());
        refresh_title(&mut build);
        self.store().insert_build(&build).await?;

        if let Some(seed) = seed {
            match self.copy_snapshot(seed, &build).await {
                Ok(copied) => {
                    build.total_instructions = copied;
                    build.updated_at = Utc::now();
                    self.store().update_build(&build).await?;
                }
                Err(err) if policy == CopyPolicy::BestEffort => {
                    emit_copy_failed(&build.id, &seed.id, &err);
                }
                Err(err) => return Err(err),
            }
        }

        emit_build_created(&build);
        Ok(build)
    }

    /// `draft -> pending_approval`.
    #[instrument(skip(self), fields(build_id = %build_id))]
    pub async fn submit_build(&self, build_id: &BuildId) -> Result<Build> {
        let mut build = self.get_build(build_id).await?;
        if build.status != BuildStatus::Draft {
            return Err(BuildError::NotEditable {
                build_id: build.id,
                status: build.status,
            });
        }

        let now = Utc::now();
        build.status = BuildStatus::PendingApproval;
        build.submitted_at = Some(now);
        build.updated_at = now;
        self.store().update_build(&build).await?;
        emit_build_transition(&build.id, BuildStatus::Draft, build.status);
        Ok(build)
    }

    /// `pending_approval -> approved`, recording the approver.
    #[instrument(skip(self), fields(build_id = %build_id))]
    pub async fn approve_build(&self, build_id: &BuildId, approver: &str) -> Result<Build> {
        let mut build = self.get_build(build_id).await?;
        if build.status != BuildStatus::PendingApproval {
            return Err(self.invalid(&build, "approve"));
        }

        let now = Utc::now();
        build.status = BuildStatus::Approved;
        build.approved_by = Some(approver.to_string());
        build.approved_at = Some(now);
        build.updated_at = now;
        self.store().update_build(&build).await?;
        emit_build_transition(&build.id, BuildStatus::PendingApproval, build.status);
        Ok(build)
    }

    /// `pending_approval -> rejected`. Terminal.
    #[instrument(skip(self, reason), fields(build_id = %build_id))]
    pub async fn reject_build(
        &self,
        build_id: &BuildId,
        reviewer: &str,
        reason: Option<&str>,
    ) -> Result<Build> {
        let mut build = self.get_build(build_id).await?;
        if build.status != BuildStatus::PendingApproval {
            return Err(self.invalid(&build, "reject"));
        }

        let now = Utc::now();
        build.status = BuildStatus::Rejected;
        build.rejected_by = Some(reviewer.to_string());
        build.rejected_at = Some(now);
        build.rejection_reason = reason.map(str::to_string);
        build.updated_at = now;
        self.store().update_build(&build).await?;
        emit_build_transition(&build.id, BuildStatus::PendingApproval, build.status);
        Ok(build)
    }

    /// Make an approved build the organization's main build.
    ///
    /// Demotes the previous main and points every pinned instruction at its
    /// pinned version, atomically. Fails with `Conflict` when the main build
    /// changes between the read and the swap.
    #[instrument(skip(self), fields(build_id = %build_id))]
    pub async fn promote_build(&self, build_id: &BuildId) -> Result<Build> {
        let build = self.get_build(build_id).await?;
        let main = self.store().get_main_build(&build.org_id).await?;
        self.promote_over(&build, main.as_ref().map(|m| &m.id)).await
    }

    /// Promote `build` if the org's main build is still `expected_main`.
    pub(crate) async fn promote_over(
        &self,
        build: &Build,
        expected_main: Option<&BuildId>,
    ) -> Result<Build> {
        if build.status != BuildStatus::Approved || build.is_main {
            return Err(self.invalid(build, "promote"));
        }

        let promoted = self
            .store()
            .promote_build(&build.org_id, &build.id, expected_main)
            .await?;
        emit_build_promoted(&promoted, expected_main);
        Ok(promoted)
    }

    /// Approve a build produced by an orchestrator, skipping human review.
    pub(crate) async fn auto_approve(&self, build: &mut Build, approver: &str) -> Result<()> {
        if !build.status.is_editable() {
            return Err(self.invalid(build, "approve"));
        }

        let from = build.status;
        let now = Utc::now();
        build.status = BuildStatus::Approved;
        build.submitted_at.get_or_insert(now);
        build.approved_by = Some(approver.to_string());
        build.approved_at = Some(now);
        build.updated_at = now;
        self.store().update_build(build).await?;
        emit_build_transition(&build.id, from, build.status);
        Ok(())
    }

    fn invalid(&self, build: &Build, action: &'static str) -> BuildError {
        BuildError::InvalidTransition {
            build_id: build.id.clone(),
            action,
            state: describe_state(build.status, build.is_main),
        }
    }
}
