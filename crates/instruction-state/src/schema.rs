//! Record definitions for instruction builds
//!
//! Tables:
//! - instructions: Stable-identity content items (with a live version pointer)
//! - instruction_versions: Immutable snapshots of instruction content
//! - builds: Numbered, full snapshots with an approval lifecycle
//! - build_contents: Pins of one instruction to one version inside one build

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Generate a new random identifier
            pub fn new() -> Self {
                $name(uuid::Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                $name(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                $name(value)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

string_id!(
    /// Tenant that owns instructions and builds
    OrgId
);
string_id!(
    /// Unique identifier for a build
    BuildId
);
string_id!(
    /// Stable identity of an instruction across all its versions
    InstructionId
);
string_id!(
    /// Unique identifier for an immutable instruction version
    VersionId
);

// ---------------------------------------------------------------------------
// Instructions
// ---------------------------------------------------------------------------

/// Where an instruction originated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstructionSource {
    User,
    Git,
    Ai,
}

/// Instruction record. The live content is whatever `current_version_id`
/// points at; it only moves when a build containing it is promoted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    pub id: InstructionId,
    pub org_id: OrgId,
    pub current_version_id: Option<VersionId>,
    pub source: InstructionSource,
    /// Soft-delete marker
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Instruction {
    pub fn new(org_id: OrgId, source: InstructionSource) -> Self {
        let now = Utc::now();
        Self {
            id: InstructionId::new(),
            org_id,
            current_version_id: None,
            source,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// How the downstream pipeline loads an instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadMode {
    #[default]
    Always,
    Intelligent,
    Disabled,
}

impl LoadMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadMode::Always => "always",
            LoadMode::Intelligent => "intelligent",
            LoadMode::Disabled => "disabled",
        }
    }
}

/// Link from an instruction version to some external object (table, model, file)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InstructionReference {
    pub object_type: String,
    pub object_id: String,
}

impl InstructionReference {
    pub fn new(object_type: impl Into<String>, object_id: impl Into<String>) -> Self {
        Self {
            object_type: object_type.into(),
            object_id: object_id.into(),
        }
    }
}

/// Content of a version before the store assigns it an id and number
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VersionDraft {
    pub text: String,
    pub title: String,
    pub status: String,
    pub category: Option<String>,
    pub load_mode: LoadMode,
    pub references: Vec<InstructionReference>,
}

impl VersionDraft {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            status: "published".to_string(),
            ..Self::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = status.into();
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_load_mode(mut self, load_mode: LoadMode) -> Self {
        self.load_mode = load_mode;
        self
    }

    pub fn with_reference(mut self, reference: InstructionReference) -> Self {
        self.references.push(reference);
        self
    }
}

/// Immutable snapshot of one instruction's content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstructionVersion {
    pub id: VersionId,
    pub instruction_id: InstructionId,
    /// Monotonic per instruction, starting at 1
    pub version_number: u64,
    pub text: String,
    pub title: String,
    pub status: String,
    pub category: Option<String>,
    pub load_mode: LoadMode,
    pub references: Vec<InstructionReference>,
    pub created_at: DateTime<Utc>,
}

impl InstructionVersion {
    pub fn from_draft(instruction_id: InstructionId, version_number: u64, draft: VersionDraft) -> Self {
        Self {
            id: VersionId::new(),
            instruction_id,
            version_number,
            text: draft.text,
            title: draft.title,
            status: draft.status,
            category: draft.category,
            load_mode: draft.load_mode,
            references: draft.references,
            created_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Builds
// ---------------------------------------------------------------------------

/// Approval status of a build. `is_main` is tracked separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    Draft,
    PendingApproval,
    Approved,
    Rejected,
}

impl BuildStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildStatus::Draft => "draft",
            BuildStatus::PendingApproval => "pending_approval",
            BuildStatus::Approved => "approved",
            BuildStatus::Rejected => "rejected",
        }
    }

    /// Contents may only change while a build is a draft or awaiting approval
    pub fn is_editable(&self) -> bool {
        matches!(self, BuildStatus::Draft | BuildStatus::PendingApproval)
    }
}

impl std::fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BuildStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "draft" => Ok(BuildStatus::Draft),
            "pending_approval" => Ok(BuildStatus::PendingApproval),
            "approved" => Ok(BuildStatus::Approved),
            "rejected" => Ok(BuildStatus::Rejected),
            other => Err(format!("unknown build status: {}", other)),
        }
    }
}

/// What produced a build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildSource {
    User,
    Git,
    Ai,
    Merge,
    Rollback,
}

impl BuildSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildSource::User => "user",
            BuildSource::Git => "git",
            BuildSource::Ai => "ai",
            BuildSource::Merge => "merge",
            BuildSource::Rollback => "rollback",
        }
    }
}

impl std::fmt::Display for BuildSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BuildSource {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "user" => Ok(BuildSource::User),
            "git" => Ok(BuildSource::Git),
            "ai" => Ok(BuildSource::Ai),
            "merge" => Ok(BuildSource::Merge),
            "rollback" => Ok(BuildSource::Rollback),
            other => Err(format!("unknown build source: {}", other)),
        }
    }
}

/// A numbered, complete snapshot of instruction pins for one organization.
///
/// Builds form an append-only DAG: `base_build_id` points at the main build
/// this one branched from, `source_build_id` at the build a merge or rollback
/// was derived from. Past builds are never rewritten, only superseded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Build {
    pub id: BuildId,
    pub org_id: OrgId,
    pub build_number: u64,
    pub status: BuildStatus,
    pub is_main: bool,
    pub source: BuildSource,
    pub base_build_id: Option<BuildId>,
    pub source_build_id: Option<BuildId>,
    pub branch_label: Option<String>,

    // Display counters. Titles only, never merge input.
    pub added_count: u64,
    pub modified_count: u64,
    pub removed_count: u64,
    pub total_instructions: u64,
    pub title: String,

    pub created_by: Option<String>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejected_by: Option<String>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    /// When this build's content went live, directly or through a merge build
    pub promoted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Build {
    /// Create a fresh draft record (not yet persisted)
    pub fn new(org_id: OrgId, build_number: u64, source: BuildSource) -> Self {
        let now = Utc::now();
        Self {
            id: BuildId::new(),
            org_id,
            build_number,
            status: BuildStatus::Draft,
            is_main: false,
            source,
            base_build_id: None,
            source_build_id: None,
            branch_label: None,
            added_count: 0,
            modified_count: 0,
            removed_count: 0,
            total_instructions: 0,
            title: String::new(),
            created_by: None,
            submitted_at: None,
            approved_by: None,
            approved_at: None,
            rejected_by: None,
            rejected_at: None,
            rejection_reason: None,
            promoted_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Join row pinning one instruction to one version within one build
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildContent {
    pub build_id: BuildId,
    pub instruction_id: InstructionId,
    pub instruction_version_id: VersionId,
    pub created_at: DateTime<Utc>,
}

impl BuildContent {
    pub fn new(build_id: BuildId, instruction_id: InstructionId, version_id: VersionId) -> Self {
        Self {
            build_id,
            instruction_id,
            instruction_version_id: version_id,
            created_at: Utc::now(),
        }
    }
}

/// A content row joined with its version payload and owning instruction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildContentEntry {
    pub content: BuildContent,
    pub version: InstructionVersion,
    pub instruction: Instruction,
}
