//! Worker-pool helpers.
//!
//! Thin wrappers over rayon that fall back to a plain loop on the calling
//! thread when parallelism is switched off with [`set_parallelize`]. Closures
//! only ever receive disjoint mutable slices, so no locking is involved.

use core::sync::atomic::{AtomicBool, Ordering};

use rayon::prelude::*;

static PARALLELIZE: AtomicBool = AtomicBool::new(true);

/// Enables or disables the worker pool for every layer and network.
pub fn set_parallelize(on: bool) {
    PARALLELIZE.store(on, Ordering::Relaxed);
}

pub fn parallelize() -> bool {
    PARALLELIZE.load(Ordering::Relaxed)
}

/// Splits `n_samples` over at most `n_workers` workers.
///
/// Returns `(workers, samples_per_worker)`; the last worker may get fewer
/// samples. A single sample (or a single worker) is never partitioned.
pub fn partition(n_samples: usize, n_workers: usize) -> (usize, usize) {
    if n_samples <= 1 || n_workers <= 1 {
        return (1, n_samples.max(1));
    }
    let workers = n_workers.min(n_samples);
    let per = n_samples.div_ceil(workers);
    (n_samples.div_ceil(per), per)
}

/// Runs `f(index, item)` for every item, one task per item.
pub fn for_each_worker<T, F>(items: &mut [T], f: F)
where
    T: Send,
    F: Fn(usize, &mut T) + Sync + Send,
{
    if parallelize() && items.len() > 1 {
        items.par_iter_mut().enumerate().for_each(|(i, t)| f(i, t));
    } else {
        items.iter_mut().enumerate().for_each(|(i, t)| f(i, t));
    }
}

/// Runs `f(offset, chunk)` over consecutive chunks of at most `grain`
/// elements.
pub fn for_each_chunk<T, F>(items: &mut [T], grain: usize, f: F)
where
    T: Send,
    F: Fn(usize, &mut [T]) + Sync + Send,
{
    let grain = grain.max(1);
    if parallelize() && items.len() > grain {
        items
            .par_chunks_mut(grain)
            .enumerate()
            .for_each(|(k, chunk)| f(k * grain, chunk));
    } else {
        items
            .chunks_mut(grain)
            .enumerate()
            .for_each(|(k, chunk)| f(k * grain, chunk));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_covers_every_sample() {
        assert_eq!(partition(1, 8), (1, 1));
        assert_eq!(partition(10, 1), (1, 10));
        assert_eq!(partition(10, 4), (4, 3));
        assert_eq!(partition(3, 8), (3, 1));
        // 9 samples over 4 workers: 3 per worker, the fourth would be empty
        assert_eq!(partition(9, 4), (3, 3));
    }

    #[test]
    fn chunks_see_their_offsets() {
        let mut v = vec![0usize; 10];
        for_each_chunk(&mut v, 3, |offset, chunk| {
            for (k, x) in chunk.iter_mut().enumerate() {
                *x = offset + k;
            }
        });
        assert_eq!(v, (0..10).collect::<Vec<_>>());
    }
}
