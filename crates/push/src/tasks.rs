use futures_util::StreamExt;
use futures_util::stream::FuturesUnordered;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::PushError;

/// Waits for every task, in completion order.
///
/// The first failure cancels `cancel` so the remaining tasks stop, and is
/// returned without waiting for them.
pub(crate) async fn join_all_or_cancel<T>(
    tasks: Vec<JoinHandle<Result<T, PushError>>>,
    cancel: &CancellationToken,
) -> Result<Vec<T>, PushError> {
    let mut pending: FuturesUnordered<_> = tasks.into_iter().collect();
    let mut done = Vec::with_capacity(pending.len());

    while let Some(joined) = pending.next().await {
        match joined.map_err(PushError::from).and_then(|r| r) {
            Ok(value) => done.push(value),
            Err(e) => {
                cancel.cancel();
                return Err(e);
            }
        }
    }
    Ok(done)
}
