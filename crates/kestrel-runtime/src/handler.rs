//! Host-side refresh execution

use async_trait::async_trait;
use kestrel_core::KestrelResult;
use kestrel_intake::RefreshAction;

/// Implemented by the host application. Called once per planned action.
///
/// An error is logged and does not stop the remaining actions of the batch.
#[async_trait]
pub trait RefreshHandler: Send + Sync {
    async fn refresh(&self, action: RefreshAction) -> KestrelResult<()>;
}
