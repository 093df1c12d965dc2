//! Shared fixtures for build engine tests.

#![allow(dead_code)]

use instruction_build::{BuildService, NewBuild};
use instruction_state::fakes::MemoryContentStore;
use instruction_state::{
    Build, BuildSource, ContentStore, Instruction, InstructionId, InstructionSource, OrgId,
    VersionDraft, VersionId,
};

pub type Service = BuildService<MemoryContentStore>;

pub fn service() -> Service {
    BuildService::new(MemoryContentStore::new())
}

pub fn org(name: &str) -> OrgId {
    OrgId::from(name)
}

/// Create an instruction with a first version and return both ids.
pub async fn instruction(svc: &Service, org_id: &OrgId, text: &str) -> (InstructionId, VersionId) {
    let instruction = svc
        .store()
        .insert_instruction(Instruction::new(org_id.clone(), InstructionSource::User))
        .await
        .unwrap();
    let version = new_version(svc, &instruction.id, text).await;
    (instruction.id, version)
}

/// Create another version of an existing instruction.
pub async fn new_version(svc: &Service, instruction_id: &InstructionId, text: &str) -> VersionId {
    svc.store()
        .create_version(instruction_id, VersionDraft::new(text).with_title(text))
        .await
        .unwrap()
        .id
}

/// Create a draft build seeded from main and pin the given versions.
pub async fn draft_with(svc: &Service, org_id: &OrgId, pins: &[(&InstructionId, &VersionId)]) -> Build {
    let mut build = svc
        .create_build(NewBuild::new(org_id.clone(), BuildSource::User))
        .await
        .unwrap();
    for (instruction_id, version_id) in pins {
        build = svc
            .add_instruction(&build.id, instruction_id, version_id)
            .await
            .unwrap()
            .build;
    }
    build
}

/// Create, fill and publish a build; returns the new main build.
pub async fn publish_with(svc: &Service, org_id: &OrgId, pins: &[(&InstructionId, &VersionId)]) -> Build {
    let build = draft_with(svc, org_id, pins).await;
    svc.publish(&build.id, "alice").await.unwrap().build
}

/// Live version pointer of an instruction.
pub async fn current_version(svc: &Service, instruction_id: &InstructionId) -> Option<VersionId> {
    svc.store()
        .get_instruction(instruction_id)
        .await
        .unwrap()
        .unwrap()
        .current_version_id
}
