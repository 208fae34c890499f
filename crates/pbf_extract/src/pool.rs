//! Fan-out of one pass over the container.
//!
//! One reader thread frames blobs into a bounded queue, `workers` threads
//! decode the blobs of the wanted kind and run the pass's work function, one
//! sink thread serialises the records. The calling thread counts completed
//! blobs against the pre-scanned total.

use std::io::Read;
use std::panic;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use log::{debug, info};
use pbfblob::{BlobDecoder, BlobKind, BlobReader, DecodedBlock, RawBlob};

use crate::barrier::CompletionBarrier;
use crate::error::ExtractError;
use crate::progress::Tick;
use crate::sink::{self, Control, Sink};

const RECORD_QUEUE: usize = 4096;

/// What one pass reads and how it decodes.
#[derive(Debug, Clone)]
pub struct Pass<'a> {
    pub name: &'static str,
    pub wanted: BlobKind,
    pub total_blobs: usize,
    pub decoder: BlobDecoder<'a>,
}

/// Counters observed at the end of a pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassStats {
    pub blobs_total: usize,
    pub blobs_completed: usize,
    pub blobs_decoded: usize,
    pub workers: usize,
    pub workers_exhausted: usize,
    pub records: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    workers: usize,
    queue_depth: usize,
    progress_every: usize,
}

impl WorkerPool {
    pub fn new(workers: usize, progress_every: usize) -> Self {
        let workers = workers.max(1);
        Self {
            workers,
            queue_depth: workers * 2,
            progress_every,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Runs one pass to completion.
    ///
    /// `work` gets every decoded blob of the wanted kind and may send any
    /// number of records; blobs of other kinds are skipped but still count
    /// as completed. `on_drained` runs once, on the calling thread, as soon
    /// as every pre-scanned blob has completed (immediately for an empty
    /// container).
    pub fn run<R, T, S, W, C>(
        &self,
        pass: &Pass<'_>,
        blobs: BlobReader<R>,
        work: W,
        sink: &mut S,
        on_drained: C,
    ) -> Result<PassStats, ExtractError>
    where
        R: Read + Send,
        T: Send,
        S: Sink<T> + Send,
        W: Fn(DecodedBlock, &Sender<T>) -> Result<(), ExtractError> + Sync,
        C: FnOnce(),
    {
        let barrier = CompletionBarrier::new(pass.total_blobs, self.workers);
        let abort = AtomicBool::new(false);
        let decoded = AtomicUsize::new(0);

        let (blob_tx, blob_rx) = bounded::<pbfblob::Result<RawBlob>>(self.queue_depth);
        let (record_tx, record_rx) = bounded::<T>(RECORD_QUEUE);
        let (control_tx, control_rx) = unbounded::<Control>();
        let (done_tx, done_rx) = unbounded::<()>();

        let records = thread::scope(|s| {
            s.spawn(move || {
                for item in blobs {
                    let failed = item.is_err();
                    if blob_tx.send(item).is_err() || failed {
                        break;
                    }
                }
            });

            for worker in 0..self.workers {
                let blobs = blob_rx.clone();
                let records = record_tx.clone();
                let control = control_tx.clone();
                let done = done_tx.clone();
                let (work, abort, decoded) = (&work, &abort, &decoded);

                s.spawn(move || {
                    let outcome = drain(pass, &blobs, work, &records, &done, abort, decoded);
                    let token = match outcome {
                        Ok(()) => Control::Exhausted { worker },
                        Err(err) => {
                            abort.store(true, Ordering::Relaxed);
                            Control::Failed(err)
                        }
                    };
                    let _ = control.send(token);
                });
            }
            drop((blob_rx, record_tx, control_tx, done_tx));

            let barrier = &barrier;
            let service =
                s.spawn(move || sink::service(pass.name, sink, record_rx, control_rx, barrier));

            let mut on_drained = Some(on_drained);
            if barrier.is_drained() {
                if let Some(f) = on_drained.take() {
                    f();
                }
            }

            let tick = Tick::new(self.progress_every);
            for () in done_rx.iter() {
                let (count, crossed) = barrier.blob_done();
                if tick.should(count) {
                    info!(
                        "{}: Complete: {}, Remaining: {} ({:.0} blobs/s)",
                        pass.name,
                        count,
                        pass.total_blobs.saturating_sub(count),
                        tick.rate(count)
                    );
                }
                if crossed {
                    if let Some(f) = on_drained.take() {
                        f();
                    }
                }
            }

            let records = service.join().unwrap_or_else(|p| panic::resume_unwind(p));
            info!("{}: finished in {:.2}s", pass.name, tick.elapsed_secs());
            records
        })?;

        let stats = PassStats {
            blobs_total: pass.total_blobs,
            blobs_completed: barrier.blobs_completed(),
            blobs_decoded: decoded.load(Ordering::Relaxed),
            workers: self.workers,
            workers_exhausted: barrier.workers_exhausted(),
            records,
        };
        debug!("{}: {:?}", pass.name, stats);

        if stats.blobs_completed != stats.blobs_total {
            return Err(ExtractError::BlobCountMismatch {
                pass: pass.name,
                completed: stats.blobs_completed,
                expected: stats.blobs_total,
            });
        }

        Ok(stats)
    }
}

/// One worker: pull until the queue closes or another worker failed. A done
/// token goes out for every blob taken, decoded or skipped.
fn drain<T, W>(
    pass: &Pass<'_>,
    blobs: &Receiver<pbfblob::Result<RawBlob>>,
    work: &W,
    records: &Sender<T>,
    done: &Sender<()>,
    abort: &AtomicBool,
    decoded: &AtomicUsize,
) -> Result<(), ExtractError>
where
    W: Fn(DecodedBlock, &Sender<T>) -> Result<(), ExtractError>,
{
    for item in blobs.iter() {
        if abort.load(Ordering::Relaxed) {
            break;
        }

        let blob = item.map_err(ExtractError::BlobHeader)?;
        if blob.kind == pass.wanted {
            let block = pass.decoder.decode(&blob).map_err(|e| match blob.kind {
                BlobKind::Header => ExtractError::HeaderDecode(e),
                _ => ExtractError::DataDecode(e),
            })?;
            decoded.fetch_add(1, Ordering::Relaxed);
            work(block, records)?;
        }

        if done.send(()).is_err() {
            break;
        }
    }

    Ok(())
}
