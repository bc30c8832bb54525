//! Bounded-Concurrency Fetch Executor
//!
//! Fan-out helper for reading many segment files to answer one logical
//! query. Runs at most `concurrency` futures at a time and returns
//! results in the original input order, so callers can zip results back
//! against inputs regardless of completion order.
//!
//! The mapped future is infallible by construction: callers absorb
//! their own errors into a safe default (an empty collection) so that
//! one corrupt segment never blanks the whole read.

use futures::stream::{self, StreamExt};
use std::future::Future;

/// Map `items` through `f` with at most `concurrency` futures in flight.
///
/// `results[i]` always corresponds to `items[i]`. No ordering is implied
/// between separate calls.
pub async fn map_concurrent<I, T, F, Fut, R>(items: I, concurrency: usize, f: F) -> Vec<R>
where
    I: IntoIterator<Item = T>,
    F: Fn(T) -> Fut,
    Fut: Future<Output = R>,
{
    // buffered() polls up to `concurrency` futures and yields in order
    stream::iter(items.into_iter().map(f))
        .buffered(concurrency.max(1))
        .collect()
        .await
}
