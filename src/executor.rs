// SPDX-License-Identifier: GPL-3.0-or-later
//! A fixed-fanout, column-stride work partitioner.
//!
//! Every whole-image operation in this crate that has a parallel variant
//! (greyscale, difference, segment, pixel counting, GMM classify/update/
//! normalise/synthesise, median synthesise/update) splits its work across a
//! small, fixed number of OS threads by assigning each worker every Pth
//! index, column, pixel, or byte, starting at its own offset. Because the
//! destination touched by a given index is touched by exactly one worker,
//! workers never need to synchronize with each other or with the caller
//! until they join.
//!
//! There is no long-lived thread pool here: each call to [`Executor::for_each`]
//! or [`Executor::for_each_fold`] spawns `parallelism` threads and joins all
//! of them before returning. Thread creation and thread join are the only
//! suspension points.
use std::thread;

use tracing::trace;

use crate::error::{Error, Result};

/// Default worker fan-out, matching the original implementation's
/// hard-coded `NUM_THREADS`.
pub const DEFAULT_PARALLELISM: usize = 4;

/// A fixed-fanout work partitioner.
///
/// `parallelism` is set once, at construction, and every operation driven
/// through this executor uses that many workers (or fewer, if the work is
/// smaller than the fan-out, a worker given no indices simply does
/// nothing). Operations remain correct for any `parallelism >= 1` and any
/// input size.
#[derive(Copy, Clone, Debug)]
pub struct Executor {
    parallelism: usize,
}

impl Executor {
    /// Build an executor with the given worker fan-out. `parallelism` is
    /// clamped to at least 1.
    pub fn new(parallelism: usize) -> Self {
        Self {
            parallelism: parallelism.max(1),
        }
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    fn worker_count(&self, len: usize) -> usize {
        self.parallelism.min(len.max(1))
    }

    /// Run `work` once for every index in `0..len`, partitioned by stride:
    /// worker `i` handles indices `{i, i + P, i + 2P, ...}`.
    ///
    /// `work` must only touch storage reserved for the index it is called
    /// with; the executor relies on that disjointness to avoid
    /// synchronizing workers. Returns before all workers have joined is
    /// never observable: `for_each` itself blocks until every worker does.
    pub fn for_each<F>(&self, len: usize, work: F) -> Result<()>
    where
        F: Fn(usize) + Sync,
    {
        let parallelism = self.worker_count(len);
        trace!(len, parallelism, "partitioning work by stride");
        thread::scope(|scope| {
            let work = &work;
            let handles: Vec<_> = (0..parallelism)
                .map(|step| {
                    scope.spawn(move || {
                        let mut index = step;
                        while index < len {
                            work(index);
                            index += parallelism;
                        }
                    })
                })
                .collect();
            join_all(handles, parallelism)
        })
    }

    /// Like [`Self::for_each`], but each worker accumulates into its own
    /// copy of `identity` (via `work`), and the per-worker accumulators are
    /// folded together with `combine` after every worker has joined.
    pub fn for_each_fold<T, F, C>(&self, len: usize, identity: T, work: F, combine: C) -> Result<T>
    where
        T: Send + Clone,
        F: Fn(usize, &mut T) + Sync,
        C: Fn(T, T) -> T,
    {
        let parallelism = self.worker_count(len);
        trace!(len, parallelism, "partitioning fold by stride");
        let partials = thread::scope(|scope| {
            let work = &work;
            let handles: Vec<_> = (0..parallelism)
                .map(|step| {
                    let mut acc = identity.clone();
                    scope.spawn(move || {
                        let mut index = step;
                        while index < len {
                            work(index, &mut acc);
                            index += parallelism;
                        }
                        acc
                    })
                })
                .collect();
            join_all_values(handles, parallelism)
        })?;
        Ok(partials.into_iter().fold(identity, combine))
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::new(DEFAULT_PARALLELISM)
    }
}

fn join_all(handles: Vec<thread::ScopedJoinHandle<'_, ()>>, total: usize) -> Result<()> {
    let mut failure = None;
    for (index, handle) in handles.into_iter().enumerate() {
        if handle.join().is_err() && failure.is_none() {
            failure = Some(Error::WorkerFailure {
                index,
                total,
                reason: "worker thread panicked before joining".to_string(),
            });
        }
    }
    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn join_all_values<T>(handles: Vec<thread::ScopedJoinHandle<'_, T>>, total: usize) -> Result<Vec<T>> {
    let mut values = Vec::with_capacity(handles.len());
    let mut failure = None;
    for (index, handle) in handles.into_iter().enumerate() {
        match handle.join() {
            Ok(value) => values.push(value),
            Err(_) => {
                if failure.is_none() {
                    failure = Some(Error::WorkerFailure {
                        index,
                        total,
                        reason: "worker thread panicked before joining".to_string(),
                    });
                }
            }
        }
    }
    match failure {
        Some(e) => Err(e),
        None => Ok(values),
    }
}

/// A raw-pointer handle to a mutable slice's backing storage, for sharing
/// disjoint write access across the worker closures passed to
/// [`Executor::for_each`].
///
/// Plain `&mut [T]` can't be split along a non-contiguous stride with safe
/// APIs, so this crate uses a small `unsafe` handle instead: every caller
/// that constructs one is responsible for only ever writing indices that no
/// other concurrently-running worker also writes.
pub(crate) struct StridedMut<T>(*mut T, usize);

// SAFETY: the pointer is only ever dereferenced through `write`/`with_mut`,
// both of which push the aliasing obligation onto the caller.
unsafe impl<T> Send for StridedMut<T> {}
unsafe impl<T> Sync for StridedMut<T> {}

impl<T> Clone for StridedMut<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for StridedMut<T> {}

impl<T> StridedMut<T> {
    pub(crate) fn new(slice: &mut [T]) -> Self {
        Self(slice.as_mut_ptr(), slice.len())
    }

    /// Overwrite the element at `index`.
    ///
    /// # Safety
    /// `index` must be in bounds, and no other holder of this handle may
    /// concurrently read or write the same `index`.
    pub(crate) unsafe fn write(&self, index: usize, value: T) {
        debug_assert!(index < self.1);
        self.0.add(index).write(value);
    }

    /// Run `f` with a mutable reference to the element at `index`.
    ///
    /// # Safety
    /// Same obligation as [`Self::write`].
    pub(crate) unsafe fn with_mut<R>(&self, index: usize, f: impl FnOnce(&mut T) -> R) -> R {
        debug_assert!(index < self.1);
        f(&mut *self.0.add(index))
    }
}

#[cfg(test)]
mod test {
    use super::{Executor, StridedMut};

    #[test]
    fn for_each_touches_every_index() {
        let executor = Executor::new(4);
        let mut output = vec![0u32; 37];
        {
            let handle = StridedMut::new(&mut output);
            executor
                .for_each(output.len(), |i| unsafe {
                    handle.write(i, (i * i) as u32);
                })
                .unwrap();
        }
        for (i, value) in output.iter().enumerate() {
            assert_eq!(*value, (i * i) as u32);
        }
    }

    #[test]
    fn for_each_with_more_workers_than_work() {
        let executor = Executor::new(8);
        let mut output = vec![0u8; 3];
        {
            let handle = StridedMut::new(&mut output);
            executor
                .for_each(output.len(), |i| unsafe {
                    handle.write(i, 1);
                })
                .unwrap();
        }
        assert_eq!(output, vec![1, 1, 1]);
    }

    #[test]
    fn for_each_fold_sums_partials() {
        let executor = Executor::new(4);
        let total = executor
            .for_each_fold(
                100,
                0u64,
                |i, acc| *acc += i as u64,
                |a, b| a + b,
            )
            .unwrap();
        assert_eq!(total, (0..100u64).sum::<u64>());
    }

    #[test]
    fn sequential_and_parallel_agree() {
        let len = 513;
        let sequential: Vec<u32> = (0..len as u32).map(|i| i.wrapping_mul(31)).collect();

        let mut parallel = vec![0u32; len];
        {
            let handle = StridedMut::new(&mut parallel);
            Executor::new(4)
                .for_each(len, |i| unsafe {
                    handle.write(i, (i as u32).wrapping_mul(31));
                })
                .unwrap();
        }
        assert_eq!(sequential, parallel);
    }
}
