//! Entry point of the build engine.
//!
//! `BuildService` wraps a [`ContentStore`] and exposes every build operation.
//! The operations themselves live next to their concern (`lifecycle`,
//! `editor`, `diff`, `publish`, `rollback`); this module holds the shared
//! lookups.

use std::sync::Arc;

use instruction_state::{
    Build, BuildContentEntry, BuildId, BuildPage, BuildStatus, ContentStore, OrgId, Page,
};
use tracing::instrument;

use crate::error::{BuildError, EntityKind, Result};

/// Build engine over a storage backend.
///
/// Cloning is cheap and clones share the store, so one service can be handed
/// to several tasks.
pub struct BuildService<S> {
    store: Arc<S>,
}

impl<S> Clone for BuildService<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: ContentStore> BuildService<S> {
    pub fn new(store: S) -> Self {
        Self::from_shared(Arc::new(store))
    }

    /// Build a service over a store that other code also holds.
    pub fn from_shared(store: Arc<S>) -> Self {
        Self { store }
    }

    /// The underlying store, for authoring operations outside the engine.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Fetch a build or fail with `NotFound`.
    pub async fn get_build(&self, id: &BuildId) -> Result<Build> {
        self.store
            .get_build(id)
            .await?
            .ok_or_else(|| BuildError::not_found(EntityKind::Build, id))
    }

    /// Fetch a build owned by `org_id`; builds of other orgs are reported as
    /// not found.
    pub async fn get_build_for_org(&self, org_id: &OrgId, id: &BuildId) -> Result<Build> {
        match self.store.get_build(id).await? {
            Some(build) if build.org_id == *org_id => Ok(build),
            _ => Err(BuildError::not_found(EntityKind::Build, id)),
        }
    }

    pub async fn get_main_build(&self, org_id: &OrgId) -> Result<Option<Build>> {
        Ok(self.store.get_main_build(org_id).await?)
    }

    #[instrument(skip(self, page), fields(org_id = %org_id))]
    pub async fn list_builds(
        &self,
        org_id: &OrgId,
        status: Option<BuildStatus>,
        page: &Page,
    ) -> Result<BuildPage> {
        Ok(self.store.list_builds(org_id, status, page).await?)
    }

    /// Content rows of a build joined with version and instruction.
    pub async fn list_build_contents(&self, id: &BuildId) -> Result<Vec<BuildContentEntry>> {
        self.get_build(id).await?;
        Ok(self.store.list_build_contents(id).await?)
    }
}
