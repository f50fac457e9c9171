//! Photo collaborator seam
//!
//! Photo metadata lives outside this engine. The orchestrator only
//! needs a hook to poke after log records land, so the collaborator
//! sits behind an object-safe trait.

use async_trait::async_trait;

use crate::error::EngineError;

/// External photo indexer, invoked once after each sync run
#[async_trait]
pub trait PhotoEventProvider: Send + Sync {
    /// Reconcile photo metadata against the freshly synced records.
    /// Returns how many photos were processed.
    async fn sync_photos(&self) -> Result<usize, EngineError>;
}

/// Provider that does nothing, for setups without photo handling
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPhotoProvider;

#[async_trait]
impl PhotoEventProvider for NoopPhotoProvider {
    async fn sync_photos(&self) -> Result<usize, EngineError> {
        Ok(0)
    }
}
