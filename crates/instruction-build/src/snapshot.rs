//! Snapshot copier: seeds a new build with another build's pins.

use instruction_state::{Build, BuildId, ContentStore};
use tracing::debug;

use crate::diff::{snapshot_of, Snapshot};
use crate::error::{BuildError, Result};
use crate::service::BuildService;

impl<S: ContentStore> BuildService<S> {
    /// Copy every pin of `src` into `dst` in one atomic store call.
    ///
    /// Both builds must belong to the same organization; `dst` must not pin
    /// any of the copied instructions yet.
    pub(crate) async fn copy_snapshot(&self, src: &Build, dst: &Build) -> Result<u64> {
        if src.org_id != dst.org_id {
            return Err(BuildError::WrongOrganization {
                build_id: src.id.clone(),
                org_id: dst.org_id.clone(),
            });
        }
        let copied = self.store().bulk_copy_contents(&src.id, &dst.id).await?;
        debug!(src = %src.id, dst = %dst.id, copied, "copied build snapshot");
        Ok(copied)
    }

    /// Pins of a build keyed by instruction.
    pub(crate) async fn load_snapshot(&self, build_id: &BuildId) -> Result<Snapshot> {
        let entries = self.store().list_build_contents(build_id).await?;
        Ok(snapshot_of(&entries))
    }
}
