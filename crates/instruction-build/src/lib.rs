//! Instruction-Build: Staged Deployment of Instruction Corpora
//!
//! Builds are numbered, full snapshots of an organization's instructions.
//! Exactly one approved build per organization is *main*: the set of
//! instruction versions currently served.
//!
//! ## Layer 1 - Build Engine
//!
//! Focus: the approval state machine, snapshot diffing, publish with
//! auto-merge of stale builds, and forward-only rollback. All persistence
//! goes through [`instruction_state::ContentStore`].
//!
//! ## Key Components
//!
//! - [`BuildService`]: every build operation, generic over the store
//! - [`diff_snapshots`] / [`detailed_diff_entries`]: pure snapshot diffs
//! - [`build_title`]: display titles derived from change counters
//! - [`obs`] / [`telemetry`]: structured events and subscriber setup

pub mod diff;
pub mod editor;
pub mod error;
pub mod lifecycle;
pub mod obs;
pub mod publish;
pub mod rollback;
pub mod service;
mod snapshot;
pub mod telemetry;
pub mod title;

pub use diff::{
    changed_fields, detailed_diff_entries, diff_snapshots, snapshot_of, BuildDiff, ChangedField,
    DetailedBuildDiff, DetailedChange, ModifiedPin, Snapshot,
};
pub use editor::{EditOutcome, EditResult};
pub use error::{BuildError, EntityKind, Result};
pub use lifecycle::NewBuild;
pub use obs::{
    emit_build_created, emit_build_merged, emit_build_promoted, emit_build_published,
    emit_build_rolled_back, emit_build_transition, emit_content_changed, emit_copy_failed,
    emit_publish_conflict,
};
pub use publish::PublishOutcome;
pub use rollback::RollbackOutcome;
pub use service::BuildService;
pub use telemetry::{init_tracing, LogFormat};
pub use title::{build_title, refresh_title};
