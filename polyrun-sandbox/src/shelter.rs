//! Scoped R isolation contexts

use crate::runtime::{RCapture, RSandbox, ShelterId};
use crate::Result;

/// An isolation scope acquired for one unit of work.
///
/// Call [`Shelter::release`] when done. A shelter dropped without release
/// (for example when the owning future is cancelled) queues its purge on the
/// sandbox instead.
pub struct Shelter<'a> {
    sandbox: &'a mut dyn RSandbox,
    id: ShelterId,
    released: bool,
}

impl<'a> Shelter<'a> {
    pub async fn acquire(sandbox: &'a mut dyn RSandbox) -> Result<Shelter<'a>> {
        let id = sandbox.create_shelter().await?;
        tracing::trace!(shelter = %id, "Shelter acquired");
        Ok(Self {
            sandbox,
            id,
            released: false,
        })
    }

    pub fn id(&self) -> ShelterId {
        self.id
    }

    pub async fn capture(&mut self, code: &str) -> Result<RCapture> {
        self.sandbox.capture_r(self.id, code).await
    }

    /// Purge everything the shelter owns
    pub async fn release(mut self) -> Result<()> {
        let outcome = self.sandbox.purge_shelter(self.id).await;
        self.released = true;
        tracing::trace!(shelter = %self.id, ok = outcome.is_ok(), "Shelter released");
        outcome
    }
}

impl Drop for Shelter<'_> {
    fn drop(&mut self) {
        if !self.released {
            tracing::warn!(shelter = %self.id, "Shelter dropped without release, deferring purge");
            self.sandbox.defer_purge(self.id);
        }
    }
}
