//! Bounded retry for provider calls
//!
//! Only idempotent requests are retried: reads, and creates guarded by an
//! existence check. Updates and deletes are issued once.

use crate::error::Result;
use crate::provider::{CloudProvider, Outputs, RetryConfig};
use std::future::Future;
use stratus_core::ResourceNode;
use tracing::warn;

/// Run `operation` until it succeeds, fails permanently, or attempts run out
pub async fn with_retry<T, F, Fut>(config: &RetryConfig, what: &str, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < config.max_attempts => {
                let delay = config.delay_for(attempt);
                warn!(
                    operation = what,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Existence check with retries
pub async fn read_with_retry(
    provider: &dyn CloudProvider,
    config: &RetryConfig,
    node: &ResourceNode,
    recorded: Option<&Outputs>,
) -> Result<Option<Outputs>> {
    with_retry(config, "read", move || provider.read(node, recorded)).await
}

/// Create a resource, retrying only while it is still absent
///
/// Before each retry the resource is looked up again; if an earlier attempt
/// actually succeeded, its outputs are returned instead of creating twice.
pub async fn create_if_absent<F, Fut>(
    provider: &dyn CloudProvider,
    config: &RetryConfig,
    node: &ResourceNode,
    mut create: F,
) -> Result<Outputs>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Outputs>>,
{
    let mut attempt = 1;
    loop {
        match create().await {
            Ok(outputs) => return Ok(outputs),
            Err(e) if e.is_transient() && attempt < config.max_attempts => {
                let delay = config.delay_for(attempt);
                warn!(
                    node = %node.name,
                    attempt,
                    error = %e,
                    "Create failed transiently, re-checking existence"
                );
                tokio::time::sleep(delay).await;
                if let Some(existing) = read_with_retry(provider, config, node, None).await? {
                    return Ok(existing);
                }
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
