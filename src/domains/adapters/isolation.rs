//! Crash isolation for adapter code.
//!
//! Every call into an adapter runs on its own task under a deadline. A
//! panic stays inside that task and comes back as a [`RegistryError`]. On
//! timeout the task is detached, not aborted: it may still finish, and its
//! result is dropped.

use std::any::Any;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Duration;

use super::error::{AdapterResult, RegistryError};

/// Run an adapter future in isolation with a deadline.
pub(crate) async fn isolate<T, Fut>(
    backend_id: &str,
    timeout: Duration,
    operation: Fut,
) -> Result<T, RegistryError>
where
    Fut: Future<Output = AdapterResult<T>> + Send + 'static,
    T: Send + 'static,
{
    let handle = tokio::spawn(operation);

    match tokio::time::timeout(timeout, handle).await {
        Ok(Ok(Ok(value))) => Ok(value),
        Ok(Ok(Err(err))) => Err(RegistryError::execution(backend_id, err.message())),
        Ok(Err(join_err)) => {
            let message = if join_err.is_panic() {
                format!("adapter panicked: {}", panic_message(join_err.into_panic()))
            } else {
                "adapter task was cancelled".to_string()
            };
            Err(RegistryError::execution(backend_id, message))
        }
        Err(_) => Err(RegistryError::timeout(backend_id, timeout.as_millis())),
    }
}

/// Run synchronous adapter code, converting a panic into an error.
pub(crate) fn isolate_sync<T>(
    backend_id: &str,
    operation: impl FnOnce() -> AdapterResult<T>,
) -> Result<T, RegistryError> {
    match catch_unwind(AssertUnwindSafe(operation)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(RegistryError::execution(backend_id, err.message())),
        Err(payload) => Err(RegistryError::execution(
            backend_id,
            format!("adapter panicked: {}", panic_message(payload)),
        )),
    }
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
