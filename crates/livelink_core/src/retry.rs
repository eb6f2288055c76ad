//! Retry loop for adapter calls.

use crate::config::RetryConfig;
use crate::error::{AdapterResult, InterfaceError};
use std::future::Future;
use tracing::{debug, warn};

/// Runs `call` until it succeeds, fails terminally, or runs out of retries.
///
/// Transient errors sleep for [`RetryConfig::delay_for_attempt`] before the
/// next call. The error returned after the last retry is the last transient
/// error seen.
pub(crate) async fn run_with_retry<T, F, Fut>(
    config: &RetryConfig,
    operation: &'static str,
    mut call: F,
) -> Result<T, InterfaceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AdapterResult<T>>,
{
    let mut retries: u32 = 0;
    loop {
        let error = match call().await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        if error.is_terminal() {
            debug!(operation, code = error.code, message = %error.message, "terminal adapter error");
            return Err(error);
        }

        if !config.allows_retry(retries) {
            warn!(operation, retries, code = error.code, "retries exhausted");
            return Err(error);
        }

        retries += 1;
        let delay = config.delay_for_attempt(retries);
        debug!(operation, attempt = retries, code = error.code, ?delay, "transient adapter error, retrying");
        tokio::time::sleep(delay).await;
    }
}
