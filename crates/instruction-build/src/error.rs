//! Error taxonomy for build operations.

use instruction_state::{BuildId, BuildStatus, InstructionId, OrgId, StorageError, VersionId};

/// Kind of entity a lookup failed to find.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Build,
    Instruction,
    InstructionVersion,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            EntityKind::Build => "build",
            EntityKind::Instruction => "instruction",
            EntityKind::InstructionVersion => "instruction version",
        })
    }
}

/// Errors produced by the build engine.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// Missing, or owned by a different organization.
    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: String },

    #[error("build {build_id} is not editable in status {status}; create a new build instead")]
    NotEditable {
        build_id: BuildId,
        status: BuildStatus,
    },

    #[error("cannot {action} build {build_id}: current status is {state}")]
    InvalidTransition {
        build_id: BuildId,
        action: &'static str,
        state: String,
    },

    #[error("build {0} is already published; use rollback to revert instead")]
    AlreadyPublished(BuildId),

    #[error("build {0} was rejected and cannot be published")]
    Rejected(BuildId),

    #[error("rollback target {build_id} is not approved (status {status})")]
    NotApproved {
        build_id: BuildId,
        status: BuildStatus,
    },

    #[error("build {build_id} does not belong to organization {org_id}")]
    WrongOrganization { build_id: BuildId, org_id: OrgId },

    #[error("version {version_id} does not belong to instruction {instruction_id}")]
    VersionMismatch {
        instruction_id: InstructionId,
        version_id: VersionId,
    },

    /// The org's main build moved underneath the operation. Safe to retry.
    #[error(
        "main build for organization {org_id} moved (expected {expected:?}, found {actual:?}); retry the operation"
    )]
    Conflict {
        org_id: OrgId,
        expected: Option<BuildId>,
        actual: Option<BuildId>,
    },

    #[error("storage error: {0}")]
    Storage(StorageError),
}

impl BuildError {
    pub fn not_found(kind: EntityKind, id: impl std::fmt::Display) -> Self {
        BuildError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Whether re-running the whole operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BuildError::Conflict { .. })
    }
}

impl From<StorageError> for BuildError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::MainMoved {
                org_id,
                expected,
                actual,
            } => BuildError::Conflict {
                org_id: OrgId(org_id),
                expected: expected.map(BuildId),
                actual: actual.map(BuildId),
            },
            StorageError::BuildNotFound { build_id } => {
                BuildError::not_found(EntityKind::Build, build_id)
            }
            StorageError::InstructionNotFound { instruction_id } => {
                BuildError::not_found(EntityKind::Instruction, instruction_id)
            }
            StorageError::VersionNotFound { version_id } => {
                BuildError::not_found(EntityKind::InstructionVersion, version_id)
            }
            other => BuildError::Storage(other),
        }
    }
}

/// Human-readable lifecycle state used in transition errors.
pub(crate) fn describe_state(status: BuildStatus, is_main: bool) -> String {
    if is_main {
        format!("{} (main)", status)
    } else {
        status.to_string()
    }
}

/// Result type for build operations.
pub type Result<T> = std::result::Result<T, BuildError>;
