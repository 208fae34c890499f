//! The single writer of a pass: multiplexes worker results and worker
//! control tokens, serialises rows, flushes in batches.

use std::io::{self, BufWriter, Write};

use crossbeam_channel::{never, select, Receiver};
use log::debug;

use crate::barrier::CompletionBarrier;
use crate::error::ExtractError;

/// Worker -> sink control tokens.
#[derive(Debug)]
pub enum Control {
    /// The worker found the blob stream closed and exited.
    Exhausted { worker: usize },
    /// The worker hit a fatal error; the pass is over.
    Failed(ExtractError),
}

/// Consumer of one pass's records.
pub trait Sink<T> {
    fn accept(&mut self, item: T) -> Result<(), ExtractError>;

    fn flush(&mut self) -> Result<(), ExtractError> {
        Ok(())
    }
}

/// One line of a comma separated table.
pub trait Row {
    fn write_row<W: Write>(&self, out: &mut W) -> io::Result<()>;
}

/// Buffered table output, flushed every `flush_every` rows.
pub struct TableWriter<W: Write> {
    out: BufWriter<W>,
    flush_every: usize,
    rows: u64,
}

impl<W: Write> TableWriter<W> {
    pub fn new(out: W, flush_every: usize) -> Self {
        Self {
            out: BufWriter::with_capacity(256 * 1024, out),
            flush_every: flush_every.max(1),
            rows: 0,
        }
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Flushes and hands back the underlying writer.
    pub fn finish(self) -> Result<W, ExtractError> {
        self.out
            .into_inner()
            .map_err(|e| ExtractError::WriteOutput(e.into_error()))
    }
}

impl<T: Row, W: Write> Sink<T> for TableWriter<W> {
    fn accept(&mut self, item: T) -> Result<(), ExtractError> {
        item.write_row(&mut self.out)?;
        self.rows += 1;
        if self.rows % self.flush_every as u64 == 0 {
            self.out.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), ExtractError> {
        Ok(self.out.flush()?)
    }
}

/// Services `records` and `control` until every worker has reported
/// exhaustion, then drains what is still queued. `select!` picks uniformly
/// among ready operations, so a stream of records cannot starve the control
/// tokens. Returns the number of records accepted.
pub fn service<T, S: Sink<T>>(
    pass: &'static str,
    sink: &mut S,
    records: Receiver<T>,
    control: Receiver<Control>,
    barrier: &CompletionBarrier,
) -> Result<u64, ExtractError> {
    let closed = never::<T>();
    let mut records_open = true;
    let mut accepted = 0u64;

    loop {
        let live = if records_open { &records } else { &closed };

        select! {
            recv(live) -> msg => match msg {
                Ok(item) => {
                    sink.accept(item)?;
                    accepted += 1;
                }
                Err(_) => records_open = false,
            },
            recv(control) -> msg => match msg {
                Ok(Control::Exhausted { worker }) => {
                    sink.flush()?;
                    debug!("{pass}: worker {worker} returned, {accepted} records so far");

                    if barrier.worker_exhausted() {
                        for item in records.try_iter() {
                            sink.accept(item)?;
                            accepted += 1;
                        }
                        sink.flush()?;
                        return Ok(accepted);
                    }
                }
                Ok(Control::Failed(err)) => return Err(err),
                Err(_) => return Err(ExtractError::WorkerLost(pass)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    struct Line(u32);

    impl Row for Line {
        fn write_row<W: Write>(&self, out: &mut W) -> io::Result<()> {
            writeln!(out, "{}", self.0)
        }
    }

    /// Counts flushes so batching is observable.
    #[derive(Default)]
    struct FlushCounter {
        buf: Vec<u8>,
        flushes: usize,
    }

    impl Write for FlushCounter {
        fn write(&mut self, data: &[u8]) -> io::Result<usize> {
            self.buf.extend_from_slice(data);
            Ok(data.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            self.flushes += 1;
            Ok(())
        }
    }

    #[test]
    fn table_writer_flushes_in_batches() {
        let mut table = TableWriter::new(FlushCounter::default(), 2);
        for i in 0..5 {
            table.accept(Line(i)).unwrap();
        }
        assert_eq!(table.rows(), 5);

        let counter = table.finish().unwrap();
        assert_eq!(String::from_utf8(counter.buf).unwrap(), "0\n1\n2\n3\n4\n");
        assert_eq!(counter.flushes, 2);
    }

    #[test]
    fn drains_records_queued_behind_the_last_terminal_token() {
        let (rec_tx, rec_rx) = unbounded();
        let (ctl_tx, ctl_rx) = unbounded();
        let barrier = CompletionBarrier::new(0, 2);

        for i in 0..100 {
            rec_tx.send(Line(i)).unwrap();
        }
        ctl_tx.send(Control::Exhausted { worker: 0 }).unwrap();
        ctl_tx.send(Control::Exhausted { worker: 1 }).unwrap();

        let mut table = TableWriter::new(Vec::new(), 10);
        let accepted = service("test", &mut table, rec_rx, ctl_rx, &barrier).unwrap();

        assert_eq!(accepted, 100);
        assert!(barrier.all_exhausted());
        let text = String::from_utf8(table.finish().unwrap()).unwrap();
        assert_eq!(text.lines().count(), 100);
        drop(rec_tx);
    }

    #[test]
    fn worker_failure_ends_the_pass() {
        let (_rec_tx, rec_rx) = unbounded::<Line>();
        let (ctl_tx, ctl_rx) = unbounded();
        let barrier = CompletionBarrier::new(1, 2);

        ctl_tx.send(Control::Exhausted { worker: 0 }).unwrap();
        ctl_tx
            .send(Control::Failed(ExtractError::UnsupportedFeature("x".into())))
            .unwrap();

        let mut table = TableWriter::new(Vec::new(), 10);
        let err = service("test", &mut table, rec_rx, ctl_rx, &barrier).unwrap_err();
        assert_eq!(err.exit_code(), 5);
    }

    #[test]
    fn vanished_workers_are_an_error() {
        let (rec_tx, rec_rx) = unbounded::<Line>();
        let (ctl_tx, ctl_rx) = unbounded();
        let barrier = CompletionBarrier::new(1, 2);
        drop(rec_tx);
        drop(ctl_tx);

        let mut table = TableWriter::new(Vec::new(), 10);
        assert!(matches!(
            service("test", &mut table, rec_rx, ctl_rx, &barrier),
            Err(ExtractError::WorkerLost("test"))
        ));
    }
}
