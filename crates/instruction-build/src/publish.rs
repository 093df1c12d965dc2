//! Publish orchestration with auto-merge.
//!
//! A build is *fresh* when the organization's main build is still the one it
//! was seeded from (or when there is no base or no main). Fresh builds are
//! promoted directly. A *stale* build was seeded from an older main: its own
//! delta against its base is replayed onto a new merge build seeded from the
//! current main, and the merge build is promoted instead. Concurrent edits
//! that landed on main after the base are preserved; where both sides touched
//! the same instruction, the stale build's edit wins.

use instruction_state::{Build, BuildId, BuildSource, BuildStatus, ContentStore};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::diff::{diff_snapshots, BuildDiff};
use crate::error::{BuildError, Result};
use crate::lifecycle::{CopyPolicy, NewBuild};
use crate::obs::{emit_build_merged, emit_build_published, emit_publish_conflict};
use crate::service::BuildService;

/// Result of [`BuildService::publish`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishOutcome {
    /// The build that is now main: the requested build or its merge build
    pub build: Build,
    /// Whether a merge build was created
    pub merged: bool,
    /// Delta replayed onto the merge build, if any
    pub replayed: Option<BuildDiff>,
}

impl<S: ContentStore> BuildService<S> {
    /// Submit and approve (as needed) and promote `build_id`, merging it onto
    /// the current main build first if it is stale.
    ///
    /// Fails with `Rejected` for rejected builds, `AlreadyPublished` for
    /// builds whose content already went live, and `Conflict` if the main
    /// build moves while the merge is being prepared. An approved build that
    /// never went live (for example after a `Conflict`) is published again
    /// against the current main.
    #[instrument(skip(self), fields(build_id = %build_id))]
    pub async fn publish(&self, build_id: &BuildId, user: &str) -> Result<PublishOutcome> {
        let build = self.get_build(build_id).await?;
        let build = match build.status {
            BuildStatus::Rejected => return Err(BuildError::Rejected(build.id)),
            BuildStatus::Approved if build.is_main || build.promoted_at.is_some() => {
                return Err(BuildError::AlreadyPublished(build.id))
            }
            BuildStatus::Approved => build,
            BuildStatus::Draft => {
                self.submit_build(&build.id).await?;
                self.approve_build(&build.id, user).await?
            }
            BuildStatus::PendingApproval => self.approve_build(&build.id, user).await?,
        };

        let main = self.store().get_main_build(&build.org_id).await?;
        let stale = match (main, build.base_build_id.clone()) {
            (Some(main), Some(base)) if main.id != base => Ok((base, main)),
            (main, _) => Err(main),
        };

        match stale {
            Ok((base_id, main)) => self.merge_and_promote(build, &base_id, main, user).await,
            Err(main) => {
                let expected = main.as_ref().map(|m| &m.id);
                let promoted = self.promote_over(&build, expected).await?;
                emit_build_published(&build.org_id, &build.id, &promoted.id, false);
                Ok(PublishOutcome {
                    build: promoted,
                    merged: false,
                    replayed: None,
                })
            }
        }
    }

    async fn merge_and_promote(
        &self,
        mut build: Build,
        base_id: &BuildId,
        main: Build,
        user: &str,
    ) -> Result<PublishOutcome> {
        self.get_build(base_id).await?;
        let base = self.load_snapshot(base_id).await?;
        let own = self.load_snapshot(&build.id).await?;
        let delta = diff_snapshots(&base, &own);
        debug!(
            base = %base_id,
            main = %main.id,
            changes = delta.change_count(),
            "replaying stale build onto main"
        );

        // Give up early if main moved while the delta was computed; the final
        // promote re-checks under the store's compare-and-swap.
        let current = self.store().get_main_build(&build.org_id).await?;
        if current.as_ref().map(|b| &b.id) != Some(&main.id) {
            let actual = current.map(|b| b.id);
            emit_publish_conflict(&build.org_id, Some(&main.id), actual.as_ref());
            return Err(BuildError::Conflict {
                org_id: build.org_id.clone(),
                expected: Some(main.id.clone()),
                actual,
            });
        }

        let request = NewBuild::new(build.org_id.clone(), BuildSource::Merge).with_created_by(user);
        let mut merged = self
            .create_seeded(request, Some(&main), CopyPolicy::Required)
            .await?;
        merged.source_build_id = Some(build.id.clone());

        for (instruction_id, version_id) in &delta.added {
            merged = self.pin(merged, instruction_id, version_id).await?.build;
        }
        for pin in &delta.modified {
            merged = self
                .pin(merged, &pin.instruction_id, &pin.to_version_id)
                .await?
                .build;
        }
        for instruction_id in delta.removed.keys() {
            merged = self.unpin(merged, instruction_id).await?.build;
        }

        self.auto_approve(&mut merged, user).await?;
        let promoted = self
            .promote_over(&merged, Some(&main.id))
            .await
            .map_err(|err| {
                if let BuildError::Conflict {
                    org_id,
                    expected,
                    actual,
                } = &err
                {
                    emit_publish_conflict(org_id, expected.as_ref(), actual.as_ref());
                }
                err
            })?;

        // The requested build went live through the merge build.
        build.promoted_at = promoted.promoted_at;
        self.store().update_build(&build).await?;

        emit_build_merged(
            &promoted.id,
            &build.id,
            delta.added.len(),
            delta.modified.len(),
            delta.removed.len(),
        );
        emit_build_published(&build.org_id, &build.id, &promoted.id, true);
        Ok(PublishOutcome {
            build: promoted,
            merged: true,
            replayed: Some(delta),
        })
    }
}
