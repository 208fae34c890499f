use std::sync::atomic::{AtomicUsize, Ordering};

/// The two completion counters of a pass.
///
/// `blobs_completed` runs up to the pre-scanned blob total and decides when
/// intermediate channels may be closed. `workers_exhausted` runs up to the
/// pool size and decides when the sink may stop servicing.
#[derive(Debug)]
pub struct CompletionBarrier {
    total_blobs: usize,
    workers: usize,
    blobs_completed: AtomicUsize,
    workers_exhausted: AtomicUsize,
}

impl CompletionBarrier {
    pub fn new(total_blobs: usize, workers: usize) -> Self {
        Self {
            total_blobs,
            workers,
            blobs_completed: AtomicUsize::new(0),
            workers_exhausted: AtomicUsize::new(0),
        }
    }

    /// Records one blob completion. Returns the new count and whether this
    /// call was the one that reached the total.
    pub fn blob_done(&self) -> (usize, bool) {
        let count = self.blobs_completed.fetch_add(1, Ordering::AcqRel) + 1;
        (count, count == self.total_blobs)
    }

    /// Records one terminal token; true exactly once, for the last worker.
    pub fn worker_exhausted(&self) -> bool {
        self.workers_exhausted.fetch_add(1, Ordering::AcqRel) + 1 == self.workers
    }

    pub fn total_blobs(&self) -> usize {
        self.total_blobs
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn blobs_completed(&self) -> usize {
        self.blobs_completed.load(Ordering::Acquire)
    }

    pub fn workers_exhausted(&self) -> usize {
        self.workers_exhausted.load(Ordering::Acquire)
    }

    /// True once every pre-scanned blob has been accounted for. A file with
    /// no blobs is drained from the start.
    pub fn is_drained(&self) -> bool {
        self.blobs_completed() >= self.total_blobs
    }

    pub fn all_exhausted(&self) -> bool {
        self.workers_exhausted() >= self.workers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_the_crossing_exactly_once() {
        let barrier = CompletionBarrier::new(3, 2);

        assert_eq!(barrier.blob_done(), (1, false));
        assert_eq!(barrier.blob_done(), (2, false));
        assert_eq!(barrier.blob_done(), (3, true));
        assert!(barrier.is_drained());

        assert!(!barrier.worker_exhausted());
        assert!(!barrier.all_exhausted());
        assert!(barrier.worker_exhausted());
        assert!(barrier.all_exhausted());
    }

    #[test]
    fn empty_file_is_drained_up_front() {
        let barrier = CompletionBarrier::new(0, 4);
        assert!(barrier.is_drained());
        assert!(!barrier.all_exhausted());
    }

    #[test]
    fn counts_hold_under_contention() {
        let barrier = CompletionBarrier::new(4000, 8);
        let crossings = AtomicUsize::new(0);

        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..500 {
                        if barrier.blob_done().1 {
                            crossings.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                    barrier.worker_exhausted();
                });
            }
        });

        assert_eq!(barrier.blobs_completed(), 4000);
        assert_eq!(barrier.workers_exhausted(), 8);
        assert_eq!(crossings.into_inner(), 1);
    }
}
