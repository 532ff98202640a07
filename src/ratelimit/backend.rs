//! Admission backend trait for abstracting local and distributed implementations.

use async_trait::async_trait;

use super::decision::Decision;

/// Trait for admission backends.
///
/// This trait abstracts over both the in-memory `LocalLimiter` and the
/// store-backed `DistributedLimiter` so the facade can hold either.
/// Implementations must be total: every call yields a decision.
#[async_trait]
pub trait AdmissionBackend: Send + Sync {
    /// Decide whether `caller` may make one more request.
    async fn admit(&self, caller: &str) -> Decision;
}
