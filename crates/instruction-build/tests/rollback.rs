mod common;

use common::*;
use instruction_build::BuildError;
use instruction_state::{BuildSource, BuildStatus, ContentStore};

#[tokio::test]
async fn rollback_restores_target_snapshot_as_new_main() {
    let svc = service();
    let acme = org("acme");
    let (a, a1) = instruction(&svc, &acme, "a v1").await;
    let (b, b1) = instruction(&svc, &acme, "b").await;
    let target = publish_with(&svc, &acme, &[(&a, &a1), (&b, &b1)]).await;

    let a2 = new_version(&svc, &a, "a v2").await;
    let draft = draft_with(&svc, &acme, &[(&a, &a2)]).await;
    svc.remove_instruction(&draft.id, &b).await.unwrap();
    let current = svc.publish(&draft.id, "alice").await.unwrap().build;
    assert_eq!(current_version(&svc, &a).await, Some(a2));

    let outcome = svc.rollback(&acme, &target.id, "ops").await.unwrap();
    let build = &outcome.build;

    assert_eq!(outcome.target_build_id, target.id);
    assert!(build.is_main);
    assert_eq!(build.source, BuildSource::Rollback);
    assert_eq!(build.status, BuildStatus::Approved);
    assert_eq!(build.approved_by.as_deref(), Some("ops"));
    assert_eq!(build.source_build_id.as_ref(), Some(&target.id));
    assert!(build.base_build_id.is_none());
    assert!(build.build_number > current.build_number);
    assert_eq!(build.total_instructions, 2);
    assert_eq!(
        (build.added_count, build.modified_count, build.removed_count),
        (1, 1, 0)
    );
    assert_eq!(build.title, "Rollback: Added 1, Modified 1 instruction");

    assert!(svc.diff(&target.id, &build.id).await.unwrap().is_empty());
    assert_eq!(current_version(&svc, &a).await, Some(a1));
    assert!(!svc.get_build(&current.id).await.unwrap().is_main);
    assert_eq!(svc.store().main_build_count(&acme), 1);
}

#[tokio::test]
async fn rollback_never_mutates_the_target() {
    let svc = service();
    let acme = org("acme");
    let (a, a1) = instruction(&svc, &acme, "a").await;
    let target = publish_with(&svc, &acme, &[(&a, &a1)]).await;
    publish_with(&svc, &acme, &[]).await;
    let before = svc.get_build(&target.id).await.unwrap();

    let first = svc.rollback(&acme, &target.id, "ops").await.unwrap();
    let second = svc.rollback(&acme, &target.id, "ops").await.unwrap();

    assert!(second.build.build_number > first.build.build_number);
    let after = svc.get_build(&target.id).await.unwrap();
    assert_eq!(after.build_number, before.build_number);
    assert_eq!(after.status, before.status);
    assert!(!after.is_main);
    assert_eq!(
        svc.list_build_contents(&target.id).await.unwrap().len(),
        1
    );
}

#[tokio::test]
async fn rollback_undeletes_instructions_pinned_by_target() {
    let svc = service();
    let acme = org("acme");
    let (gone, gone_v1) = instruction(&svc, &acme, "deleted later").await;
    let target = publish_with(&svc, &acme, &[(&gone, &gone_v1)]).await;

    let draft = draft_with(&svc, &acme, &[]).await;
    svc.remove_instruction(&draft.id, &gone).await.unwrap();
    svc.publish(&draft.id, "alice").await.unwrap();
    svc.store().soft_delete_instruction(&gone).await.unwrap();

    let outcome = svc.rollback(&acme, &target.id, "ops").await.unwrap();

    assert_eq!(outcome.restored_instructions, vec![gone.clone()]);
    let instruction = svc.store().get_instruction(&gone).await.unwrap().unwrap();
    assert!(!instruction.is_deleted());
    let pinned = svc
        .store()
        .get_build_content(&outcome.build.id, &gone)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(pinned.instruction_version_id, gone_v1);
}

#[tokio::test]
async fn rollback_requires_approved_target() {
    let svc = service();
    let acme = org("acme");
    let draft = draft_with(&svc, &acme, &[]).await;

    let err = svc.rollback(&acme, &draft.id, "ops").await.unwrap_err();
    assert!(matches!(
        err,
        BuildError::NotApproved { status: BuildStatus::Draft, .. }
    ));
    assert_eq!(svc.store().main_build_count(&acme), 0);
}

#[tokio::test]
async fn rollback_rejects_foreign_target() {
    let svc = service();
    let target = publish_with(&svc, &org("globex"), &[]).await;

    let err = svc
        .rollback(&org("acme"), &target.id, "ops")
        .await
        .unwrap_err();
    assert!(matches!(err, BuildError::WrongOrganization { .. }));
}

#[tokio::test]
async fn rollback_copy_failure_aborts_without_new_main() {
    let svc = service();
    let acme = org("acme");
    let (a, a1) = instruction(&svc, &acme, "a").await;
    let target = publish_with(&svc, &acme, &[(&a, &a1)]).await;
    let current = publish_with(&svc, &acme, &[]).await;

    svc.store().fail_bulk_copy(true);
    let err = svc.rollback(&acme, &target.id, "ops").await.unwrap_err();
    svc.store().fail_bulk_copy(false);

    assert!(matches!(err, BuildError::Storage(_)));
    let main = svc.get_main_build(&acme).await.unwrap().unwrap();
    assert_eq!(main.id, current.id);
}
