//! Post-mutation polling. The array acknowledges a command before the
//! object is visible in `show` output, so reconcilers poll on a fixed
//! schedule after every create.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{DriverError, Result};

pub(crate) const CREATE_WAITS: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(3),
];

/// Clones materialize only once the copy job finishes, so the schedule is
/// stretched well past the create-path one.
pub(crate) const CLONE_WAITS: [Duration; 6] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(4),
    Duration::from_secs(8),
    Duration::from_secs(15),
    Duration::from_secs(30),
];

pub(crate) async fn sleep(cancel: &CancellationToken, wait: Duration) -> Result<()> {
    if wait.is_zero() {
        return Ok(());
    }
    tokio::select! {
        _ = cancel.cancelled() => Err(DriverError::Interrupted),
        _ = tokio::time::sleep(wait) => Ok(()),
    }
}

/// Polls `find` once per schedule slot until it yields a value. Returns
/// `NotFound` for `kind` when the schedule runs out.
pub(crate) async fn wait_for<T, F, Fut>(
    cancel: &CancellationToken,
    waits: &[Duration],
    kind: &'static str,
    mut find: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    for (i, wait) in waits.iter().enumerate() {
        if let Some(found) = find().await? {
            return Ok(found);
        }
        if i < waits.len() - 1 {
            sleep(cancel, *wait).await?;
        }
    }
    Err(DriverError::NotFound { kind })
}
