use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

/// The data-store driver the supervisor manages.
///
/// Implementations fail on network or authentication errors; the supervisor
/// owns retry, timeout and cancellation.
#[async_trait]
pub trait DataStore: Send + Sync + 'static {
    /// Live connection handle, cheap to clone (a pool or client)
    type Handle: Clone + Send + Sync + 'static;

    async fn connect(&self) -> Result<Self::Handle>;

    /// Round-trip a trivial query, returning its latency
    async fn ping(&self, handle: &Self::Handle) -> Result<Duration>;

    async fn close(&self, handle: Self::Handle);
}
