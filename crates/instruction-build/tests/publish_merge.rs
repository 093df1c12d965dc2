mod common;

use std::sync::Mutex;

use async_trait::async_trait;
use common::*;
use instruction_build::{BuildError, BuildService, NewBuild};
use instruction_state::fakes::MemoryContentStore;
use instruction_state::{
    Build, BuildContent, BuildContentEntry, BuildId, BuildPage, BuildSource, BuildStatus,
    ContentStore, Instruction, InstructionId, InstructionSource, InstructionVersion, OrgId, Page,
    StorageResult, VersionDraft, VersionId,
};

// ---------------------------------------------------------------------------
// Fresh path
// ---------------------------------------------------------------------------

#[tokio::test]
async fn fresh_publish_promotes_the_build_itself() {
    let svc = service();
    let acme = org("acme");
    let (a, a1) = instruction(&svc, &acme, "a").await;
    let (b, b1) = instruction(&svc, &acme, "b").await;
    let main = publish_with(&svc, &acme, &[(&a, &a1)]).await;

    let draft = draft_with(&svc, &acme, &[(&b, &b1)]).await;
    assert_eq!(draft.base_build_id.as_ref(), Some(&main.id));

    let outcome = svc.publish(&draft.id, "alice").await.unwrap();
    assert!(!outcome.merged);
    assert!(outcome.replayed.is_none());
    assert_eq!(outcome.build.id, draft.id);
    assert!(outcome.build.is_main);
    assert_eq!(outcome.build.approved_by.as_deref(), Some("alice"));

    let live = svc.store().list_build_contents(&draft.id).await.unwrap();
    let pins: Vec<_> = live.iter().map(|e| e.content.instruction_id.clone()).collect();
    assert_eq!(pins.len(), 2);
    assert!(pins.contains(&a) && pins.contains(&b));
    assert_eq!(current_version(&svc, &b).await, Some(b1));
}

#[tokio::test]
async fn first_publish_of_org_has_no_main_to_merge_with() {
    let svc = service();
    let acme = org("acme");
    let (a, a1) = instruction(&svc, &acme, "a").await;

    let outcome = svc
        .publish(&draft_with(&svc, &acme, &[(&a, &a1)]).await.id, "alice")
        .await
        .unwrap();
    assert!(!outcome.merged);
    assert_eq!(svc.store().main_build_count(&acme), 1);
}

#[tokio::test]
async fn pending_build_is_approved_by_publisher() {
    let svc = service();
    let build = draft_with(&svc, &org("acme"), &[]).await;
    svc.submit_build(&build.id).await.unwrap();

    let outcome = svc.publish(&build.id, "carol").await.unwrap();
    assert_eq!(outcome.build.status, BuildStatus::Approved);
    assert_eq!(outcome.build.approved_by.as_deref(), Some("carol"));
}

#[tokio::test]
async fn build_without_base_replaces_main() {
    let svc = service();
    let acme = org("acme");
    let (a, a1) = instruction(&svc, &acme, "a").await;
    let (b, b1) = instruction(&svc, &acme, "b").await;
    publish_with(&svc, &acme, &[(&a, &a1)]).await;

    let mut snapshot = svc
        .create_build(NewBuild::new(acme.clone(), BuildSource::Git).empty())
        .await
        .unwrap();
    snapshot = svc.add_instruction(&snapshot.id, &b, &b1).await.unwrap().build;

    let outcome = svc.publish(&snapshot.id, "sync").await.unwrap();
    assert!(!outcome.merged);
    let live = svc.store().list_build_contents(&outcome.build.id).await.unwrap();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].content.instruction_id, b);
}

#[tokio::test]
async fn published_and_rejected_builds_cannot_be_published() {
    let svc = service();
    let acme = org("acme");
    let live = publish_with(&svc, &acme, &[]).await;
    let err = svc.publish(&live.id, "alice").await.unwrap_err();
    assert!(matches!(err, BuildError::AlreadyPublished(_)));
    assert!(err.to_string().contains("rollback"));

    let rejected = draft_with(&svc, &acme, &[]).await;
    svc.submit_build(&rejected.id).await.unwrap();
    svc.reject_build(&rejected.id, "bob", None).await.unwrap();
    let err = svc.publish(&rejected.id, "alice").await.unwrap_err();
    assert!(matches!(err, BuildError::Rejected(_)));
}

// ---------------------------------------------------------------------------
// Stale path
// ---------------------------------------------------------------------------

struct StaleSetup {
    svc: Service,
    acme: OrgId,
    ids: [InstructionId; 4],
    base: Build,
    main: Build,
    /// Draft copied from `base` while it was main, untouched since
    draft: Build,
    b2: VersionId,
}

/// base X = {a:v1, b:v1}; a draft branches from X; then main advances to
/// {a:v1, b:v2, c:v1}.
async fn stale_setup() -> StaleSetup {
    let svc = service();
    let acme = org("acme");
    let (a, a1) = instruction(&svc, &acme, "a").await;
    let (b, b1) = instruction(&svc, &acme, "b v1").await;
    let (c, c1) = instruction(&svc, &acme, "c").await;
    let (d, _) = instruction(&svc, &acme, "d").await;
    let base = publish_with(&svc, &acme, &[(&a, &a1), (&b, &b1)]).await;
    let draft = draft_with(&svc, &acme, &[]).await;
    assert_eq!(draft.base_build_id.as_ref(), Some(&base.id));
    assert_eq!(draft.total_instructions, 2);

    let b2 = new_version(&svc, &b, "b v2").await;
    let main = publish_with(&svc, &acme, &[(&b, &b2), (&c, &c1)]).await;

    StaleSetup {
        svc,
        acme,
        ids: [a, b, c, d],
        base,
        main,
        draft,
        b2,
    }
}

async fn live_pins(svc: &Service, build: &BuildId) -> Vec<(InstructionId, VersionId)> {
    svc.store()
        .list_build_contents(build)
        .await
        .unwrap()
        .into_iter()
        .map(|e| (e.content.instruction_id, e.content.instruction_version_id))
        .collect()
}

#[tokio::test]
async fn stale_publish_layers_own_changes_over_main_drift() {
    let setup = stale_setup().await;
    let svc = &setup.svc;
    let [a, b, c, d] = setup.ids.clone();
    let d1 = new_version(svc, &d, "d v1").await;

    let draft = setup.draft.clone();
    assert_ne!(draft.base_build_id.as_ref(), Some(&setup.main.id));
    assert_eq!(draft.base_build_id.as_ref(), Some(&setup.base.id));
    svc.add_instruction(&draft.id, &d, &d1).await.unwrap();

    let outcome = svc.publish(&draft.id, "alice").await.unwrap();
    assert!(outcome.merged);
    let merged = &outcome.build;
    assert_ne!(merged.id, draft.id);
    assert_eq!(merged.source, BuildSource::Merge);
    assert_eq!(merged.source_build_id.as_ref(), Some(&draft.id));
    assert_eq!(merged.base_build_id.as_ref(), Some(&setup.main.id));
    assert!(merged.is_main);
    assert_eq!(merged.title, "Merged: Added 1 instruction");

    let replayed = outcome.replayed.unwrap();
    assert_eq!(replayed.added.len(), 1);
    assert!(replayed.modified.is_empty());
    assert!(replayed.removed.is_empty());

    let pins = live_pins(svc, &merged.id).await;
    let version_of = |id: &InstructionId| pins.iter().find(|(i, _)| i == id).map(|(_, v)| v.clone());
    assert_eq!(pins.len(), 4);
    assert!(version_of(&a).is_some());
    assert_eq!(version_of(&b), Some(setup.b2.clone()));
    assert!(version_of(&c).is_some());
    assert_eq!(version_of(&d), Some(d1));

    let requested = svc.get_build(&draft.id).await.unwrap();
    assert_eq!(requested.status, BuildStatus::Approved);
    assert!(!requested.is_main);
    assert!(requested.promoted_at.is_some());
    assert!(matches!(
        svc.publish(&draft.id, "alice").await.unwrap_err(),
        BuildError::AlreadyPublished(_)
    ));
}

#[tokio::test]
async fn stale_publish_last_editor_wins_on_same_instruction() {
    let setup = stale_setup().await;
    let svc = &setup.svc;
    let [_, b, _, _] = setup.ids.clone();
    let b3 = new_version(svc, &b, "b v3").await;

    let draft = setup.draft.clone();
    svc.add_instruction(&draft.id, &b, &b3).await.unwrap();

    let outcome = svc.publish(&draft.id, "alice").await.unwrap();
    assert!(outcome.merged);
    let pins = live_pins(svc, &outcome.build.id).await;
    assert!(pins.contains(&(b.clone(), b3.clone())));
    assert_eq!(current_version(svc, &b).await, Some(b3));
}

#[tokio::test]
async fn stale_publish_replays_removals() {
    let setup = stale_setup().await;
    let svc = &setup.svc;
    let [a, _, c, _] = setup.ids.clone();

    let draft = setup.draft.clone();
    svc.remove_instruction(&draft.id, &a).await.unwrap();

    let outcome = svc.publish(&draft.id, "alice").await.unwrap();
    let pins = live_pins(svc, &outcome.build.id).await;
    assert!(pins.iter().all(|(i, _)| *i != a));
    assert!(pins.iter().any(|(i, _)| *i == c));
    assert_eq!(outcome.build.removed_count, 1);
}

#[tokio::test]
async fn stale_publish_with_no_own_changes_keeps_main_content() {
    let setup = stale_setup().await;
    let svc = &setup.svc;

    let draft = setup.draft.clone();
    let outcome = svc.publish(&draft.id, "alice").await.unwrap();

    assert!(outcome.merged);
    assert_eq!(outcome.build.title, "Merged: Empty build");
    assert_eq!(
        live_pins(svc, &outcome.build.id).await,
        live_pins(svc, &setup.main.id).await
    );
}

// ---------------------------------------------------------------------------
// Main moving mid-publish
// ---------------------------------------------------------------------------

/// Store that promotes a rival build the first time a snapshot is copied
/// after being armed, simulating a concurrent publish.
#[derive(Default)]
struct RacingStore {
    inner: MemoryContentStore,
    rival: Mutex<Option<(OrgId, BuildId)>>,
}

impl RacingStore {
    fn arm(&self, org_id: &OrgId, rival: &BuildId) {
        *self.rival.lock().unwrap() = Some((org_id.clone(), rival.clone()));
    }
}

#[async_trait]
impl ContentStore for RacingStore {
    async fn insert_instruction(&self, instruction: Instruction) -> StorageResult<Instruction> {
        self.inner.insert_instruction(instruction).await
    }
    async fn get_instruction(&self, id: &InstructionId) -> StorageResult<Option<Instruction>> {
        self.inner.get_instruction(id).await
    }
    async fn create_version(
        &self,
        instruction_id: &InstructionId,
        draft: VersionDraft,
    ) -> StorageResult<InstructionVersion> {
        self.inner.create_version(instruction_id, draft).await
    }
    async fn get_version(&self, id: &VersionId) -> StorageResult<Option<InstructionVersion>> {
        self.inner.get_version(id).await
    }
    async fn soft_delete_instruction(&self, id: &InstructionId) -> StorageResult<()> {
        self.inner.soft_delete_instruction(id).await
    }
    async fn restore_instruction(&self, id: &InstructionId) -> StorageResult<()> {
        self.inner.restore_instruction(id).await
    }
    async fn set_instruction_current_version(
        &self,
        id: &InstructionId,
        version_id: &VersionId,
    ) -> StorageResult<()> {
        self.inner.set_instruction_current_version(id, version_id).await
    }
    async fn next_build_number(&self, org_id: &OrgId) -> StorageResult<u64> {
        self.inner.next_build_number(org_id).await
    }
    async fn insert_build(&self, build: &Build) -> StorageResult<()> {
        self.inner.insert_build(build).await
    }
    async fn update_build(&self, build: &Build) -> StorageResult<()> {
        self.inner.update_build(build).await
    }
    async fn get_build(&self, id: &BuildId) -> StorageResult<Option<Build>> {
        self.inner.get_build(id).await
    }
    async fn get_main_build(&self, org_id: &OrgId) -> StorageResult<Option<Build>> {
        self.inner.get_main_build(org_id).await
    }
    async fn list_builds(
        &self,
        org_id: &OrgId,
        status: Option<BuildStatus>,
        page: &Page,
    ) -> StorageResult<BuildPage> {
        self.inner.list_builds(org_id, status, page).await
    }
    async fn promote_build(
        &self,
        org_id: &OrgId,
        build_id: &BuildId,
        expected_main: Option<&BuildId>,
    ) -> StorageResult<Build> {
        self.inner.promote_build(org_id, build_id, expected_main).await
    }
    async fn list_build_contents(
        &self,
        build_id: &BuildId,
    ) -> StorageResult<Vec<BuildContentEntry>> {
        self.inner.list_build_contents(build_id).await
    }
    async fn get_build_content(
        &self,
        build_id: &BuildId,
        instruction_id: &InstructionId,
    ) -> StorageResult<Option<BuildContent>> {
        self.inner.get_build_content(build_id, instruction_id).await
    }
    async fn insert_build_content(&self, content: &BuildContent) -> StorageResult<()> {
        self.inner.insert_build_content(content).await
    }
    async fn update_build_content(
        &self,
        build_id: &BuildId,
        instruction_id: &InstructionId,
        version_id: &VersionId,
    ) -> StorageResult<()> {
        self.inner
            .update_build_content(build_id, instruction_id, version_id)
            .await
    }
    async fn delete_build_content(
        &self,
        build_id: &BuildId,
        instruction_id: &InstructionId,
    ) -> StorageResult<bool> {
        self.inner.delete_build_content(build_id, instruction_id).await
    }
    async fn bulk_copy_contents(&self, src: &BuildId, dst: &BuildId) -> StorageResult<u64> {
        let rival = self.rival.lock().unwrap().take();
        if let Some((org_id, rival)) = rival {
            let main = self.inner.get_main_build(&org_id).await?.map(|b| b.id);
            self.inner
                .promote_build(&org_id, &rival, main.as_ref())
                .await?;
        }
        self.inner.bulk_copy_contents(src, dst).await
    }
}

#[tokio::test]
async fn main_moving_during_merge_is_a_retryable_conflict() {
    let svc = BuildService::new(RacingStore::default());
    let acme = org("acme");
    let instruction = svc
        .store()
        .insert_instruction(Instruction::new(acme.clone(), InstructionSource::User))
        .await
        .unwrap();
    let v1 = svc
        .store()
        .create_version(&instruction.id, VersionDraft::new("v1"))
        .await
        .unwrap();

    let base = svc
        .create_build(NewBuild::new(acme.clone(), BuildSource::User))
        .await
        .unwrap();
    svc.add_instruction(&base.id, &instruction.id, &v1.id).await.unwrap();
    svc.publish(&base.id, "alice").await.unwrap();

    let stale = svc
        .create_build(NewBuild::new(acme.clone(), BuildSource::User))
        .await
        .unwrap();
    let rival = svc
        .create_build(NewBuild::new(acme.clone(), BuildSource::User))
        .await
        .unwrap();
    svc.submit_build(&rival.id).await.unwrap();
    svc.approve_build(&rival.id, "bob").await.unwrap();
    let interim = svc
        .create_build(NewBuild::new(acme.clone(), BuildSource::User))
        .await
        .unwrap();
    let interim = svc.publish(&interim.id, "bob").await.unwrap().build;

    // `stale` is now behind main; the rival lands while its merge is built.
    svc.store().arm(&acme, &rival.id);
    let err = svc.publish(&stale.id, "alice").await.unwrap_err();
    assert!(err.is_retryable());
    assert!(matches!(
        err,
        BuildError::Conflict { ref expected, ref actual, .. }
            if expected.as_ref() == Some(&interim.id) && actual.as_ref() == Some(&rival.id)
    ));

    let main = svc.get_main_build(&acme).await.unwrap().unwrap();
    assert_eq!(main.id, rival.id);
    assert_eq!(svc.store().inner.main_build_count(&acme), 1);

    // Retrying recomputes against the rival as the new main.
    let retried = svc.publish(&stale.id, "alice").await.unwrap();
    assert!(retried.merged);
    assert_eq!(retried.build.base_build_id.as_ref(), Some(&rival.id));
    assert!(retried.build.is_main);
}
