//! Structured observability hooks for build lifecycle events.
//!
//! Every state change the engine makes is reported through one of the
//! `emit_*` functions below, so log pipelines can key on the `event` field:
//!
//! - `build.created`, `build.transition`, `build.promoted`
//! - `build.content_changed`
//! - `build.published`, `build.merged`, `build.rolled_back`
//! - `build.copy_failed` and `build.publish_conflict` (warn level)
//!
//! Verbosity follows `RUST_LOG`; see [`crate::telemetry::init_tracing`].

use instruction_state::{Build, BuildId, BuildStatus, InstructionId, OrgId};
use tracing::{info, warn};

/// Emit event: a build row was created.
pub fn emit_build_created(build: &Build) {
    info!(
        event = "build.created",
        org_id = %build.org_id,
        build_id = %build.id,
        build_number = build.build_number,
        source = %build.source,
        base_build_id = ?build.base_build_id.as_ref().map(|b| b.as_str()),
        total_instructions = build.total_instructions,
    );
}

/// Emit event: a status transition was persisted.
pub fn emit_build_transition(build_id: &BuildId, from: BuildStatus, to: BuildStatus) {
    info!(event = "build.transition", build_id = %build_id, from = %from, to = %to);
}

/// Emit event: a build became the organization's main build.
pub fn emit_build_promoted(build: &Build, previous_main: Option<&BuildId>) {
    info!(
        event = "build.promoted",
        org_id = %build.org_id,
        build_id = %build.id,
        build_number = build.build_number,
        previous_main = ?previous_main.map(|b| b.as_str()),
    );
}

/// Emit event: one instruction pin was added, re-pinned or removed.
pub fn emit_content_changed(build_id: &BuildId, instruction_id: &InstructionId, change: &str) {
    info!(
        event = "build.content_changed",
        build_id = %build_id,
        instruction_id = %instruction_id,
        change = change,
    );
}

/// Emit event: publish finished, either directly or through a merge build.
pub fn emit_build_published(org_id: &OrgId, requested: &BuildId, live: &BuildId, merged: bool) {
    info!(
        event = "build.published",
        org_id = %org_id,
        build_id = %requested,
        live_build_id = %live,
        merged = merged,
    );
}

/// Emit event: a stale build's delta was replayed onto a merge build.
pub fn emit_build_merged(
    merged: &BuildId,
    source: &BuildId,
    added: usize,
    modified: usize,
    removed: usize,
) {
    info!(
        event = "build.merged",
        build_id = %merged,
        source_build_id = %source,
        added = added,
        modified = modified,
        removed = removed,
    );
}

/// Emit event: a rollback build was promoted.
pub fn emit_build_rolled_back(build: &Build, target: &BuildId, restored: usize) {
    info!(
        event = "build.rolled_back",
        org_id = %build.org_id,
        build_id = %build.id,
        target_build_id = %target,
        restored_instructions = restored,
    );
}

/// Emit event: copy-on-create failed; the new build stays empty (warning level).
pub fn emit_copy_failed(build_id: &BuildId, src: &BuildId, error: &dyn std::fmt::Display) {
    warn!(
        event = "build.copy_failed",
        build_id = %build_id,
        source_build_id = %src,
        error = %error,
    );
}

/// Emit event: the main build moved during publish (warning level).
pub fn emit_publish_conflict(
    org_id: &OrgId,
    expected: Option<&BuildId>,
    actual: Option<&BuildId>,
) {
    warn!(
        event = "build.publish_conflict",
        org_id = %org_id,
        expected = ?expected.map(|b| b.as_str()),
        actual = ?actual.map(|b| b.as_str()),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use instruction_state::BuildSource;

    #[test]
    fn emitters_do_not_panic_without_subscriber() {
        let build = Build::new(OrgId::from("acme"), 1, BuildSource::User);
        emit_build_created(&build);
        emit_build_transition(&build.id, BuildStatus::Draft, BuildStatus::PendingApproval);
        emit_build_promoted(&build, None);
        emit_copy_failed(&build.id, &BuildId::from("b-0"), &"boom");
        emit_publish_conflict(&build.org_id, Some(&build.id), None);
    }
}
