//! Chunked parallel iteration over an index range.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use tokio_util::sync::CancellationToken;

/// A fixed-width worker pool for data-parallel phases of a scheduling cycle.
///
/// Work is handed out in contiguous index chunks; cancellation is observed at
/// chunk boundaries, so a callback that has started is always run to
/// completion.
pub struct Parallelizer {
    parallelism: usize,
}

impl Default for Parallelizer {
    fn default() -> Self {
        let parallelism = thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1);
        Self::new(parallelism)
    }
}

impl Parallelizer {
    pub fn new(parallelism: usize) -> Self {
        Self {
            parallelism: parallelism.max(1),
        }
    }

    /// Runs `work(i)` for every `i in 0..pieces` across the pool, stopping
    /// early once `cancel` fires.
    pub fn until<F>(&self, cancel: &CancellationToken, pieces: usize, work: F)
    where
        F: Fn(usize) + Sync,
    {
        if pieces == 0 || cancel.is_cancelled() {
            return;
        }
        let workers = self.parallelism.min(pieces);
        let chunk = chunk_size(pieces, workers);
        let next = AtomicUsize::new(0);
        let next = &next;
        let work = &work;
        thread::scope(|s| {
            for _ in 0..workers {
                s.spawn(move || loop {
                    if cancel.is_cancelled() {
                        return;
                    }
                    let start = next.fetch_add(chunk, Ordering::Relaxed);
                    if start >= pieces {
                        return;
                    }
                    for i in start..pieces.min(start + chunk) {
                        work(i);
                    }
                });
            }
        });
    }
}

/// Chunks sized near `sqrt(pieces)` keep the queue contended rarely while
/// still spreading uneven work across the pool.
fn chunk_size(pieces: usize, workers: usize) -> usize {
    let candidate = (pieces as f64).sqrt() as usize;
    candidate.min(pieces / workers + 1).max(1)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicI64;

    use super::*;

    #[test]
    fn test_every_index_is_visited_once() {
        let parallelizer = Parallelizer::new(4);
        let sum = AtomicI64::new(0);
        parallelizer.until(&CancellationToken::new(), 1000, |i| {
            sum.fetch_add(i as i64, Ordering::Relaxed);
        });
        assert_eq!(sum.into_inner(), 999 * 1000 / 2);
    }

    #[test]
    fn test_single_worker_pool() {
        let parallelizer = Parallelizer::new(1);
        let count = AtomicI64::new(0);
        parallelizer.until(&CancellationToken::new(), 17, |_| {
            count.fetch_add(1, Ordering::Relaxed);
        });
        assert_eq!(count.into_inner(), 17);
    }

    #[test]
    fn test_cancelled_token_runs_nothing() {
        let parallelizer = Parallelizer::new(4);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let count = AtomicI64::new(0);
        parallelizer.until(&cancel, 100, |_| {
            count.fetch_add(1, Ordering::Relaxed);
        });
        assert_eq!(count.into_inner(), 0);
    }

    #[test]
    fn test_zero_pieces() {
        Parallelizer::new(4).until(&CancellationToken::new(), 0, |_| {
            panic!("callback must not run");
        });
    }

    #[test]
    fn test_chunk_size_bounds() {
        assert_eq!(chunk_size(1, 1), 1);
        assert_eq!(chunk_size(100, 4), 10);
        // Never larger than an even share per worker, never zero.
        assert!(chunk_size(10_000, 100) <= 10_000 / 100 + 1);
        assert_eq!(chunk_size(3, 16), 1);
    }
}
