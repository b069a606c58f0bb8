//! Bounded-concurrency fan-out.
//!
//! A fixed set of workers pulls indices from a shared cursor and each result
//! is written back at its input index, so output order never depends on
//! which item finished first. Workers run as futures on the caller's task;
//! nothing is spawned.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use futures_util::future::join_all;

/// What a failing item does to the rest of the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Stop handing out new items and return the first error.
    FailFast,
    /// Keep going; every item gets its own result.
    Degrade,
}

#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    concurrency: usize,
}

impl WorkerPool {
    /// A pool of `concurrency` workers. Zero is treated as one.
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Runs `op` over every item with at most `concurrency` in flight.
    ///
    /// With [`ErrorPolicy::FailFast`] the error of the lowest-indexed failed
    /// item is returned; items not yet started when it failed are skipped.
    /// With [`ErrorPolicy::Degrade`] the outer result is always `Ok` and
    /// holds one result per input, in input order.
    pub async fn run<'a, I, T, E, F, Fut>(
        &self,
        items: &'a [I],
        policy: ErrorPolicy,
        op: F,
    ) -> Result<Vec<Result<T, E>>, E>
    where
        F: Fn(usize, &'a I) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let slots = self.drive(items, policy, op).await;

        match policy {
            ErrorPolicy::FailFast => {
                let mut values = Vec::with_capacity(slots.len());
                // Unstarted items (None) are skipped; the failure that
                // stopped them is returned instead.
                for slot in slots.into_iter().flatten() {
                    match slot {
                        Ok(value) => values.push(Ok(value)),
                        Err(e) => return Err(e),
                    }
                }
                Ok(values)
            }
            ErrorPolicy::Degrade => Ok(slots.into_iter().flatten().collect()),
        }
    }

    /// Fail-fast map: all values in input order, or the first error.
    pub async fn try_map<'a, I, T, E, F, Fut>(&self, items: &'a [I], op: F) -> Result<Vec<T>, E>
    where
        F: Fn(usize, &'a I) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run(items, ErrorPolicy::FailFast, op)
            .await?
            .into_iter()
            .collect()
    }

    /// Degrading map: a failed item is replaced by `fallback(item, error)`.
    pub async fn map_or_else<'a, I, T, E, F, Fut, D>(
        &self,
        items: &'a [I],
        op: F,
        fallback: D,
    ) -> Vec<T>
    where
        F: Fn(usize, &'a I) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        D: Fn(&'a I, E) -> T,
    {
        self.drive(items, ErrorPolicy::Degrade, op)
            .await
            .into_iter()
            .zip(items)
            .filter_map(|(slot, item)| slot.map(|r| r.unwrap_or_else(|e| fallback(item, e))))
            .collect()
    }

    /// One slot per input; `None` marks an item never started.
    async fn drive<'a, I, T, E, F, Fut>(
        &self,
        items: &'a [I],
        policy: ErrorPolicy,
        op: F,
    ) -> Vec<Option<Result<T, E>>>
    where
        F: Fn(usize, &'a I) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let cursor = AtomicUsize::new(0);
        let stop = AtomicBool::new(false);
        let workers = self.concurrency.min(items.len());

        let worker = |worker_id: usize| {
            let (cursor, stop, op) = (&cursor, &stop, &op);
            async move {
                let mut produced = Vec::new();
                while !stop.load(Ordering::SeqCst) {
                    let index = cursor.fetch_add(1, Ordering::SeqCst);
                    let Some(item) = items.get(index) else {
                        break;
                    };
                    let result = op(index, item).await;
                    if result.is_err() && policy == ErrorPolicy::FailFast {
                        stop.store(true, Ordering::SeqCst);
                    }
                    produced.push((index, result));
                }
                tracing::trace!(worker_id, handled = produced.len(), "worker drained");
                produced
            }
        };

        let mut slots: Vec<Option<Result<T, E>>> = (0..items.len()).map(|_| None).collect();
        for (index, result) in join_all((0..workers).map(worker)).await.into_iter().flatten() {
            slots[index] = Some(result);
        }
        slots
    }
}
