//! In-memory fake for the content store (testing only)
//!
//! `MemoryContentStore` keeps every table behind a single mutex, which makes
//! each trait call trivially atomic and linearizable per organization.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::StorageError;
use crate::schema::*;
use crate::storage_traits::*;

#[derive(Debug, Default)]
struct Tables {
    instructions: HashMap<InstructionId, Instruction>,
    versions: HashMap<VersionId, InstructionVersion>,
    builds: HashMap<BuildId, Build>,
    /// build -> (instruction -> row), ordered by instruction id
    contents: HashMap<BuildId, BTreeMap<InstructionId, BuildContent>>,
    build_counters: HashMap<OrgId, u64>,
    fail_bulk_copy: bool,
}

impl Tables {
    fn main_of(&self, org_id: &OrgId) -> Option<&Build> {
        self.builds
            .values()
            .find(|b| b.org_id == *org_id && b.is_main)
    }

    fn build_mut(&mut self, id: &BuildId) -> StorageResult<&mut Build> {
        self.builds
            .get_mut(id)
            .ok_or_else(|| StorageError::BuildNotFound {
                build_id: id.0.clone(),
            })
    }

    fn instruction_mut(&mut self, id: &InstructionId) -> StorageResult<&mut Instruction> {
        self.instructions
            .get_mut(id)
            .ok_or_else(|| StorageError::InstructionNotFound {
                instruction_id: id.0.clone(),
            })
    }
}

/// In-memory content store backed by `HashMap`s under one lock.
#[derive(Debug, Default)]
pub struct MemoryContentStore {
    tables: Mutex<Tables>,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `bulk_copy_contents` call fail until reset.
    pub fn fail_bulk_copy(&self, fail: bool) {
        self.tables.lock().unwrap().fail_bulk_copy = fail;
    }

    /// Number of builds with `is_main = true` for an organization.
    pub fn main_build_count(&self, org_id: &OrgId) -> usize {
        let tables = self.tables.lock().unwrap();
        tables
            .builds
            .values()
            .filter(|b| b.org_id == *org_id && b.is_main)
            .count()
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn insert_instruction(&self, instruction: Instruction) -> StorageResult<Instruction> {
        let mut tables = self.tables.lock().unwrap();
        tables
            .instructions
            .insert(instruction.id.clone(), instruction.clone());
        Ok(instruction)
    }

    async fn get_instruction(&self, id: &InstructionId) -> StorageResult<Option<Instruction>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables.instructions.get(id).cloned())
    }

    async fn create_version(
        &self,
        instruction_id: &InstructionId,
        draft: VersionDraft,
    ) -> StorageResult<InstructionVersion> {
        let mut tables = self.tables.lock().unwrap();
        if !tables.instructions.contains_key(instruction_id) {
            return Err(StorageError::InstructionNotFound {
                instruction_id: instruction_id.0.clone(),
            });
        }
        let next = tables
            .versions
            .values()
            .filter(|v| v.instruction_id == *instruction_id)
            .map(|v| v.version_number)
            .max()
            .unwrap_or(0)
            + 1;
        let version = InstructionVersion::from_draft(instruction_id.clone(), next, draft);
        tables.versions.insert(version.id.clone(), version.clone());
        Ok(version)
    }

    async fn get_version(&self, id: &VersionId) -> StorageResult<Option<InstructionVersion>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables.versions.get(id).cloned())
    }

    async fn soft_delete_instruction(&self, id: &InstructionId) -> StorageResult<()> {
        let mut tables = self.tables.lock().unwrap();
        let instruction = tables.instruction_mut(id)?;
        if instruction.deleted_at.is_none() {
            let now = Utc::now();
            instruction.deleted_at = Some(now);
            instruction.updated_at = now;
        }
        Ok(())
    }

    async fn restore_instruction(&self, id: &InstructionId) -> StorageResult<()> {
        let mut tables = self.tables.lock().unwrap();
        let instruction = tables.instruction_mut(id)?;
        if instruction.deleted_at.is_some() {
            instruction.deleted_at = None;
            instruction.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn set_instruction_current_version(
        &self,
        id: &InstructionId,
        version_id: &VersionId,
    ) -> StorageResult<()> {
        let mut tables = self.tables.lock().unwrap();
        let instruction = tables.instruction_mut(id)?;
        instruction.current_version_id = Some(version_id.clone());
        instruction.updated_at = Utc::now();
        Ok(())
    }

    async fn next_build_number(&self, org_id: &OrgId) -> StorageResult<u64> {
        let mut tables = self.tables.lock().unwrap();
        let counter = tables.build_counters.entry(org_id.clone()).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }

    async fn insert_build(&self, build: &Build) -> StorageResult<()> {
        let mut tables = self.tables.lock().unwrap();
        let duplicate = tables
            .builds
            .values()
            .any(|b| b.org_id == build.org_id && b.build_number == build.build_number);
        if duplicate {
            return Err(StorageError::DuplicateBuildNumber {
                org_id: build.org_id.0.clone(),
                build_number: build.build_number,
            });
        }
        let mut record = build.clone();
        record.is_main = false;
        tables.builds.insert(record.id.clone(), record);
        Ok(())
    }

    async fn update_build(&self, build: &Build) -> StorageResult<()> {
        let mut tables = self.tables.lock().unwrap();
        let existing = tables.build_mut(&build.id)?;
        let is_main = existing.is_main;
        *existing = build.clone();
        existing.is_main = is_main;
        existing.updated_at = Utc::now();
        Ok(())
    }

    async fn get_build(&self, id: &BuildId) -> StorageResult<Option<Build>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables.builds.get(id).cloned())
    }

    async fn get_main_build(&self, org_id: &OrgId) -> StorageResult<Option<Build>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables.main_of(org_id).cloned())
    }

    async fn list_builds(
        &self,
        org_id: &OrgId,
        status: Option<BuildStatus>,
        page: &Page,
    ) -> StorageResult<BuildPage> {
        let tables = self.tables.lock().unwrap();
        let mut builds: Vec<Build> = tables
            .builds
            .values()
            .filter(|b| b.org_id == *org_id)
            .filter(|b| status.map(|s| b.status == s).unwrap_or(true))
            .cloned()
            .collect();
        builds.sort_by(|a, b| b.build_number.cmp(&a.build_number));

        let total = builds.len() as u64;
        let items = builds
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.per_page() as usize)
            .collect();
        Ok(BuildPage::new(items, page, total))
    }

    async fn promote_build(
        &self,
        org_id: &OrgId,
        build_id: &BuildId,
        expected_main: Option<&BuildId>,
    ) -> StorageResult<Build> {
        let mut tables = self.tables.lock().unwrap();

        let current = tables.main_of(org_id).map(|b| b.id.clone());
        if current.as_ref() != expected_main {
            return Err(StorageError::MainMoved {
                org_id: org_id.0.clone(),
                expected: expected_main.map(|id| id.0.clone()),
                actual: current.map(|id| id.0),
            });
        }

        match tables.builds.get(build_id) {
            Some(b) if b.org_id == *org_id => {}
            _ => {
                return Err(StorageError::BuildNotFound {
                    build_id: build_id.0.clone(),
                })
            }
        }

        // Validate every pointer target before mutating anything.
        let pins: Vec<(InstructionId, VersionId)> = tables
            .contents
            .get(build_id)
            .map(|rows| {
                rows.values()
                    .map(|c| (c.instruction_id.clone(), c.instruction_version_id.clone()))
                    .collect()
            })
            .unwrap_or_default();
        if let Some((missing, _)) = pins
            .iter()
            .find(|(id, _)| !tables.instructions.contains_key(id))
        {
            return Err(StorageError::InstructionNotFound {
                instruction_id: missing.0.clone(),
            });
        }

        let now = Utc::now();
        if let Some(previous) = current {
            let previous = tables.build_mut(&previous)?;
            previous.is_main = false;
            previous.updated_at = now;
        }
        for (instruction_id, version_id) in pins {
            let instruction = tables.instruction_mut(&instruction_id)?;
            instruction.current_version_id = Some(version_id);
            instruction.updated_at = now;
        }
        let build = tables.build_mut(build_id)?;
        build.is_main = true;
        build.promoted_at = Some(now);
        build.updated_at = now;
        Ok(build.clone())
    }

    async fn list_build_contents(
        &self,
        build_id: &BuildId,
    ) -> StorageResult<Vec<BuildContentEntry>> {
        let tables = self.tables.lock().unwrap();
        let Some(rows) = tables.contents.get(build_id) else {
            return Ok(Vec::new());
        };
        rows.values()
            .map(|content| {
                let version = tables
                    .versions
                    .get(&content.instruction_version_id)
                    .cloned()
                    .ok_or_else(|| StorageError::VersionNotFound {
                        version_id: content.instruction_version_id.0.clone(),
                    })?;
                let instruction = tables
                    .instructions
                    .get(&content.instruction_id)
                    .cloned()
                    .ok_or_else(|| StorageError::InstructionNotFound {
                        instruction_id: content.instruction_id.0.clone(),
                    })?;
                Ok(BuildContentEntry {
                    content: content.clone(),
                    version,
                    instruction,
                })
            })
            .collect()
    }

    async fn get_build_content(
        &self,
        build_id: &BuildId,
        instruction_id: &InstructionId,
    ) -> StorageResult<Option<BuildContent>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .contents
            .get(build_id)
            .and_then(|rows| rows.get(instruction_id))
            .cloned())
    }

    async fn insert_build_content(&self, content: &BuildContent) -> StorageResult<()> {
        let mut tables = self.tables.lock().unwrap();
        if !tables.builds.contains_key(&content.build_id) {
            return Err(StorageError::BuildNotFound {
                build_id: content.build_id.0.clone(),
            });
        }
        let rows = tables.contents.entry(content.build_id.clone()).or_default();
        if rows.contains_key(&content.instruction_id) {
            return Err(StorageError::DuplicateContent {
                build_id: content.build_id.0.clone(),
                instruction_id: content.instruction_id.0.clone(),
            });
        }
        rows.insert(content.instruction_id.clone(), content.clone());
        Ok(())
    }

    async fn update_build_content(
        &self,
        build_id: &BuildId,
        instruction_id: &InstructionId,
        version_id: &VersionId,
    ) -> StorageResult<()> {
        let mut tables = self.tables.lock().unwrap();
        let row = tables
            .contents
            .get_mut(build_id)
            .and_then(|rows| rows.get_mut(instruction_id))
            .ok_or_else(|| StorageError::ContentNotFound {
                build_id: build_id.0.clone(),
                instruction_id: instruction_id.0.clone(),
            })?;
        row.instruction_version_id = version_id.clone();
        Ok(())
    }

    async fn delete_build_content(
        &self,
        build_id: &BuildId,
        instruction_id: &InstructionId,
    ) -> StorageResult<bool> {
        let mut tables = self.tables.lock().unwrap();
        Ok(tables
            .contents
            .get_mut(build_id)
            .and_then(|rows| rows.remove(instruction_id))
            .is_some())
    }

    async fn bulk_copy_contents(&self, src: &BuildId, dst: &BuildId) -> StorageResult<u64> {
        let mut tables = self.tables.lock().unwrap();
        if tables.fail_bulk_copy {
            return Err(StorageError::InjectedFailure(format!(
                "bulk copy {} -> {}",
                src, dst
            )));
        }
        for id in [src, dst] {
            if !tables.builds.contains_key(id) {
                return Err(StorageError::BuildNotFound {
                    build_id: id.0.clone(),
                });
            }
        }

        let now = Utc::now();
        let copied: Vec<BuildContent> = tables
            .contents
            .get(src)
            .map(|rows| {
                rows.values()
                    .map(|c| BuildContent {
                        build_id: dst.clone(),
                        instruction_id: c.instruction_id.clone(),
                        instruction_version_id: c.instruction_version_id.clone(),
                        created_at: now,
                    })
                    .collect()
            })
            .unwrap_or_default();

        let target = tables.contents.entry(dst.clone()).or_default();
        if let Some(clash) = copied.iter().find(|c| target.contains_key(&c.instruction_id)) {
            return Err(StorageError::DuplicateContent {
                build_id: dst.0.clone(),
                instruction_id: clash.instruction_id.0.clone(),
            });
        }
        let count = copied.len() as u64;
        for row in copied {
            target.insert(row.instruction_id.clone(), row);
        }
        Ok(count)
    }
}
