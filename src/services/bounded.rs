//! Bounded fan-out with early exit.
//!
//! Runs one future per input under a semaphore, consumes results in
//! completion order and aborts everything still pending once enough
//! accepted results have been collected.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Run `fetch` for every input with at most `concurrency` in flight.
///
/// Results for which `accept` returns `Some` are kept until `wanted` of them
/// have been collected; the remaining tasks are then cancelled. Returned pairs
/// carry the input position and are in completion order.
pub async fn collect_until<I, T, U, F, Fut, A>(
    inputs: Vec<I>,
    concurrency: usize,
    wanted: usize,
    fetch: F,
    mut accept: A,
) -> Vec<(usize, U)>
where
    I: Send + 'static,
    T: Send + 'static,
    F: Fn(I) -> Fut,
    Fut: Future<Output = T> + Send + 'static,
    A: FnMut(T) -> Option<U>,
{
    let mut accepted = Vec::new();
    if inputs.is_empty() || wanted == 0 {
        return accepted;
    }

    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut join_set = JoinSet::new();

    for (position, input) in inputs.into_iter().enumerate() {
        let semaphore = semaphore.clone();
        let future = fetch(input);
        join_set.spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok();
            (position, future.await)
        });
    }

    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((position, result)) => {
                if let Some(value) = accept(result) {
                    accepted.push((position, value));
                }
            }
            Err(e) => {
                tracing::error!("Fan-out task failed: {}", e);
            }
        }

        if accepted.len() >= wanted {
            break;
        }
    }

    // Aborts tasks still waiting for a permit as well as in-flight ones
    join_set.shutdown().await;
    accepted
}
