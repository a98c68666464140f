//! Built-in lane handlers
//!
//! - **Likes**: per-target lane, last write wins, one write per target
//! - **Notifications**: batchable lane, dismiss dominates seen, one write per cycle

pub mod likes;
pub mod notifications;

use std::future::Future;
use std::sync::Arc;

use tracing::warn;

use crate::backend::SyncBackend;
use crate::config::RetryPolicy;
use crate::error::Result;
use crate::registry::ActionRegistry;

pub use likes::LikeHandler;
pub use notifications::NotificationHandler;

/// Register the like and notification handlers.
///
/// Idempotent: returns `true` only if something was newly registered.
pub fn initialize_sync_handlers(
    registry: &ActionRegistry,
    backend: Arc<dyn SyncBackend>,
    retry: RetryPolicy,
) -> bool {
    let likes = registry.register(Arc::new(LikeHandler::new(
        Arc::clone(&backend),
        retry.clone(),
    )));
    let notifications = registry.register(Arc::new(NotificationHandler::new(backend, retry)));
    likes || notifications
}

/// Run a backend write under the retry policy.
///
/// Returns the final result and how many attempts were made.
pub(crate) async fn with_retry<F, Fut>(policy: &RetryPolicy, target_key: &str, mut op: F) -> (Result<()>, u32)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op().await {
            Ok(()) => return (Ok(()), attempt),
            Err(e) if attempt < max_attempts && e.is_transient() => {
                let delay = policy.backoff_for(attempt);
                warn!(
                    target_key,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Write failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return (Err(e), attempt),
        }
    }
}
