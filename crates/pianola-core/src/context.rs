//! Audio readiness handshake.
//!
//! Before anything can sound, the host audio subsystem has to be resumed.
//! [`AudioContext`] is that seam; hosts with no such step use
//! [`ImmediateAudioContext`].

use crate::error::Result;
use async_trait::async_trait;

/// The host audio subsystem the engine must resume before playing.
#[async_trait]
pub trait AudioContext: Send + Sync {
    /// Resume (or unlock) audio output. May be called again after a failure.
    async fn resume(&self) -> Result<()>;
}

/// An audio context that is always ready.
#[derive(Clone, Copy, Debug, Default)]
pub struct ImmediateAudioContext;

#[async_trait]
impl AudioContext for ImmediateAudioContext {
    async fn resume(&self) -> Result<()> {
        Ok(())
    }
}
