//! Snapshot diffing between builds.
//!
//! A build's snapshot is the set of `(instruction, version)` pins it holds.
//! Diffing two snapshots is pure: instructions only in the new snapshot are
//! `added`, only in the old one `removed`, and pinned to different versions
//! `modified`. Unchanged pins never appear.

use std::collections::{BTreeMap, HashMap};

use instruction_state::{
    BuildContentEntry, BuildId, ContentStore, InstructionId, InstructionReference,
    InstructionVersion, OrgId, VersionId,
};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::error::Result;
use crate::service::BuildService;

/// Pins of one build keyed by instruction, ordered by instruction id.
pub type Snapshot = BTreeMap<InstructionId, VersionId>;

/// Reduce joined content rows to their pins.
pub fn snapshot_of(entries: &[BuildContentEntry]) -> Snapshot {
    entries
        .iter()
        .map(|e| {
            (
                e.content.instruction_id.clone(),
                e.content.instruction_version_id.clone(),
            )
        })
        .collect()
}

/// One instruction pinned to different versions on each side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModifiedPin {
    pub instruction_id: InstructionId,
    pub from_version_id: VersionId,
    pub to_version_id: VersionId,
}

/// Compact difference between two snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildDiff {
    /// Pins present only in the new snapshot
    pub added: Snapshot,
    /// Pins present only in the old snapshot
    pub removed: Snapshot,
    pub modified: Vec<ModifiedPin>,
}

impl BuildDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }

    pub fn change_count(&self) -> usize {
        self.added.len() + self.removed.len() + self.modified.len()
    }
}

/// Diff `old` against `new`.
pub fn diff_snapshots(old: &Snapshot, new: &Snapshot) -> BuildDiff {
    let mut diff = BuildDiff::default();

    for (instruction_id, to_version) in new {
        match old.get(instruction_id) {
            None => {
                diff.added
                    .insert(instruction_id.clone(), to_version.clone());
            }
            Some(from_version) if from_version != to_version => {
                diff.modified.push(ModifiedPin {
                    instruction_id: instruction_id.clone(),
                    from_version_id: from_version.clone(),
                    to_version_id: to_version.clone(),
                });
            }
            Some(_) => {}
        }
    }

    for (instruction_id, from_version) in old {
        if !new.contains_key(instruction_id) {
            diff.removed
                .insert(instruction_id.clone(), from_version.clone());
        }
    }

    diff
}

// ---------------------------------------------------------------------------
// Detailed diff
// ---------------------------------------------------------------------------

/// Version field that differs between two pins of the same instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangedField {
    Text,
    Title,
    Status,
    Category,
    LoadMode,
    References,
}

/// Fields whose values differ between `from` and `to`, in declaration order.
pub fn changed_fields(from: &InstructionVersion, to: &InstructionVersion) -> Vec<ChangedField> {
    let mut fields = Vec::new();
    if from.text != to.text {
        fields.push(ChangedField::Text);
    }
    if from.title != to.title {
        fields.push(ChangedField::Title);
    }
    if from.status != to.status {
        fields.push(ChangedField::Status);
    }
    if from.category != to.category {
        fields.push(ChangedField::Category);
    }
    if from.load_mode != to.load_mode {
        fields.push(ChangedField::LoadMode);
    }
    if from.references != to.references {
        fields.push(ChangedField::References);
    }
    fields
}

/// Count references present only in `to` (added) and only in `from` (removed).
fn reference_changes(
    from: &[InstructionReference],
    to: &[InstructionReference],
) -> (usize, usize) {
    let added = to.iter().filter(|r| !from.contains(r)).count();
    let removed = from.iter().filter(|r| !to.contains(r)).count();
    (added, removed)
}

/// A diff entry enriched with the full version payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailedChange {
    pub instruction_id: InstructionId,
    /// Version on the old side; `None` for additions
    pub from: Option<InstructionVersion>,
    /// Version on the new side; `None` for removals
    pub to: Option<InstructionVersion>,
    /// Only populated for modifications
    pub changed_fields: Vec<ChangedField>,
    pub references_added: usize,
    pub references_removed: usize,
}

/// Difference between two builds with version payloads attached.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetailedBuildDiff {
    pub added: Vec<DetailedChange>,
    pub removed: Vec<DetailedChange>,
    pub modified: Vec<DetailedChange>,
}

impl DetailedBuildDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }
}

/// Diff two sets of joined content rows, attaching version payloads.
pub fn detailed_diff_entries(
    old: &[BuildContentEntry],
    new: &[BuildContentEntry],
) -> DetailedBuildDiff {
    let versions: HashMap<&VersionId, &InstructionVersion> = old
        .iter()
        .chain(new.iter())
        .map(|e| (&e.version.id, &e.version))
        .collect();
    let lookup = |id: &VersionId| versions.get(id).map(|v| (*v).clone());

    let compact = diff_snapshots(&snapshot_of(old), &snapshot_of(new));
    let mut detailed = DetailedBuildDiff::default();

    for (instruction_id, version_id) in &compact.added {
        let to = lookup(version_id);
        let references_added = to.as_ref().map_or(0, |v| v.references.len());
        detailed.added.push(DetailedChange {
            instruction_id: instruction_id.clone(),
            from: None,
            to,
            changed_fields: Vec::new(),
            references_added,
            references_removed: 0,
        });
    }

    for (instruction_id, version_id) in &compact.removed {
        let from = lookup(version_id);
        let references_removed = from.as_ref().map_or(0, |v| v.references.len());
        detailed.removed.push(DetailedChange {
            instruction_id: instruction_id.clone(),
            from,
            to: None,
            changed_fields: Vec::new(),
            references_added: 0,
            references_removed,
        });
    }

    for pin in &compact.modified {
        let from = lookup(&pin.from_version_id);
        let to = lookup(&pin.to_version_id);
        let (fields, (references_added, references_removed)) = match (&from, &to) {
            (Some(f), Some(t)) => (
                changed_fields(f, t),
                reference_changes(&f.references, &t.references),
            ),
            _ => (Vec::new(), (0, 0)),
        };
        detailed.modified.push(DetailedChange {
            instruction_id: pin.instruction_id.clone(),
            from,
            to,
            changed_fields: fields,
            references_added,
            references_removed,
        });
    }

    detailed
}

impl<S: ContentStore> BuildService<S> {
    /// Compact diff of build `a` (old) against build `b` (new).
    #[instrument(skip(self), fields(a = %a, b = %b))]
    pub async fn diff(&self, a: &BuildId, b: &BuildId) -> Result<BuildDiff> {
        self.get_build(a).await?;
        self.get_build(b).await?;
        let old = self.load_snapshot(a).await?;
        let new = self.load_snapshot(b).await?;
        Ok(diff_snapshots(&old, &new))
    }

    /// Diff of build `a` against build `b` with full version payloads.
    #[instrument(skip(self), fields(a = %a, b = %b))]
    pub async fn detailed_diff(&self, a: &BuildId, b: &BuildId) -> Result<DetailedBuildDiff> {
        self.get_build(a).await?;
        self.get_build(b).await?;
        let old = self.store().list_build_contents(a).await?;
        let new = self.store().list_build_contents(b).await?;
        Ok(detailed_diff_entries(&old, &new))
    }

    /// Org-scoped compact diff; builds of other organizations are not found.
    #[instrument(skip(self), fields(org_id = %org_id, a = %a, b = %b))]
    pub async fn diff_builds(&self, org_id: &OrgId, a: &BuildId, b: &BuildId) -> Result<BuildDiff> {
        self.get_build_for_org(org_id, a).await?;
        self.get_build_for_org(org_id, b).await?;
        let old = self.load_snapshot(a).await?;
        let new = self.load_snapshot(b).await?;
        Ok(diff_snapshots(&old, &new))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(pairs: &[(&str, &str)]) -> Snapshot {
        pairs
            .iter()
            .map(|(i, v)| (InstructionId::from(*i), VersionId::from(*v)))
            .collect()
    }

    #[test]
    fn identical_snapshots_produce_empty_diff() {
        let s = snap(&[("x", "x1"), ("y", "y1")]);
        let diff = diff_snapshots(&s, &s);
        assert!(diff.is_empty());
        assert_eq!(diff.change_count(), 0);
    }

    #[test]
    fn classifies_added_removed_and_modified() {
        let old = snap(&[("x", "x1"), ("y", "y1"), ("z", "z1")]);
        let new = snap(&[("x", "x1"), ("y", "y2"), ("w", "w1")]);
        let diff = diff_snapshots(&old, &new);

        assert_eq!(diff.added, snap(&[("w", "w1")]));
        assert_eq!(diff.removed, snap(&[("z", "z1")]));
        assert_eq!(
            diff.modified,
            vec![ModifiedPin {
                instruction_id: InstructionId::from("y"),
                from_version_id: VersionId::from("y1"),
                to_version_id: VersionId::from("y2"),
            }]
        );
    }

    #[test]
    fn reversing_sides_swaps_added_and_removed() {
        let old = snap(&[("x", "x1")]);
        let new = snap(&[("y", "y1")]);
        let forward = diff_snapshots(&old, &new);
        let backward = diff_snapshots(&new, &old);
        assert_eq!(forward.added, backward.removed);
        assert_eq!(forward.removed, backward.added);
    }

    #[test]
    fn empty_side_is_all_additions() {
        let new = snap(&[("x", "x1"), ("y", "y1")]);
        let diff = diff_snapshots(&Snapshot::new(), &new);
        assert_eq!(diff.added.len(), 2);
        assert!(diff.removed.is_empty());
        assert!(diff.modified.is_empty());
    }

    #[test]
    fn reference_changes_counts_both_directions() {
        let a = InstructionReference::new("table", "orders");
        let b = InstructionReference::new("table", "customers");
        let c = InstructionReference::new("metric", "revenue");
        let (added, removed) = reference_changes(&[a.clone(), b], &[a, c]);
        assert_eq!((added, removed), (1, 1));
    }
}
