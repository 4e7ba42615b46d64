use crate::config::MessagingConfig;
use crate::error::{AppError, Result};
use backon::{ExponentialBuilder, Retryable};
use std::time::Duration;

/// Retries a store operation on transient database errors with bounded
/// exponential backoff, then surfaces `StoreUnavailable`. Authorization and
/// not-found errors pass through untouched and are never retried.
pub(crate) async fn transient<T, F, Fut>(config: &MessagingConfig, op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let strategy = ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(config.store_retry_min_delay_ms))
        .with_max_times(config.store_retry_attempts);

    let result = op
        .retry(strategy)
        .when(|e| matches!(e, AppError::Database(_) | AppError::StoreUnavailable))
        .notify(|e, duration| {
            tracing::warn!(error = %e, backoff = ?duration, "Transient store error, retrying");
        })
        .await;

    result.map_err(|e| match e {
        AppError::Database(source) => {
            tracing::error!(error = %source, "Store unavailable after retries");
            AppError::StoreUnavailable
        }
        other => other,
    })
}
