//! Bounded producer / worker pool / single sink pipeline.
//!
//! One reader pushes rows into a bounded queue, `jobs` workers transform
//! them and a single sink consumes the results. The first failure cancels
//! every stage; workers and the sink keep draining their queues after
//! cancellation so nobody stays blocked on a full channel.

use std::fmt;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, Sender, bounded};
use tracing::{debug, warn};

use crate::dialect::Row;
use crate::error::DwcaError;

const QUEUE_PER_JOB: usize = 64;

/// Shared cooperative shutdown flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Keeps the first real failure; cancellation only fills an empty slot.
#[derive(Debug, Default)]
pub struct FirstError(Mutex<Option<DwcaError>>);

impl FirstError {
    pub fn record(&self, err: DwcaError) {
        let mut slot = match self.0.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        match slot.as_ref() {
            None => *slot = Some(err),
            Some(current) if current.is_cancelled() && !err.is_cancelled() => *slot = Some(err),
            Some(_) => {
                if !err.is_cancelled() {
                    debug!(error = %err, "discarding error after the first failure");
                }
            }
        }
    }

    pub fn take(&self) -> Option<DwcaError> {
        match self.0.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Streaming,
    Draining,
    Completed,
    Failed,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Idle => "idle",
            PipelineState::Streaming => "streaming",
            PipelineState::Draining => "draining",
            PipelineState::Completed => "completed",
            PipelineState::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineReport {
    /// Rows handed to the workers.
    pub read: u64,
    /// Items accepted by the sink.
    pub written: u64,
}

pub struct Pipeline {
    stage: &'static str,
    jobs: usize,
    cancel: CancelToken,
    state: PipelineState,
}

impl Pipeline {
    pub fn new(stage: &'static str, jobs: usize, cancel: CancelToken) -> Self {
        Self {
            stage,
            jobs: jobs.max(1),
            cancel,
            state: PipelineState::Idle,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    fn transition(&mut self, next: PipelineState) {
        debug!(stage = self.stage, from = %self.state, to = %next, "pipeline state");
        self.state = next;
    }

    /// Runs the pipeline to completion.
    ///
    /// `produce` feeds rows and returns how many it sent. `make_worker` is
    /// called once per worker thread, so per-worker resources such as a
    /// pooled parser are acquired there and held for the whole run.
    /// Output order is whatever order workers finish in.
    pub fn run<O, P, F, T, K>(
        &mut self,
        produce: P,
        make_worker: F,
        sink: K,
    ) -> Result<PipelineReport, DwcaError>
    where
        O: Send,
        P: FnOnce(&Sender<Row>, &CancelToken) -> Result<u64, DwcaError>,
        F: Fn() -> Result<T, DwcaError> + Sync,
        T: FnMut(Row) -> Result<O, DwcaError>,
        K: FnMut(O) -> Result<(), DwcaError> + Send,
    {
        let capacity = self.jobs * QUEUE_PER_JOB;
        let (row_tx, row_rx) = bounded::<Row>(capacity);
        let (out_tx, out_rx) = bounded::<O>(capacity);
        let first = FirstError::default();
        let cancel = self.cancel.clone();
        let stage = self.stage;
        let jobs = self.jobs;

        self.transition(PipelineState::Streaming);
        let mut draining = false;
        let report = thread::scope(|scope| {
            let workers: Vec<_> = (0..jobs)
                .map(|_| {
                    let rx = row_rx.clone();
                    let tx = out_tx.clone();
                    let (cancel, first, make_worker) = (&cancel, &first, &make_worker);
                    scope.spawn(move || work(rx, tx, cancel, first, make_worker))
                })
                .collect();
            drop(row_rx);
            drop(out_tx);

            let (cancel_ref, first_ref) = (&cancel, &first);
            let writer = scope.spawn(move || drain_into(out_rx, sink, cancel_ref, first_ref));

            let read = match produce(&row_tx, &cancel) {
                Ok(read) => read,
                Err(err) => {
                    first.record(err);
                    cancel.cancel();
                    0
                }
            };
            drop(row_tx);
            if cancel.is_cancelled() {
                draining = true;
            }

            for worker in workers {
                if worker.join().is_err() {
                    first.record(DwcaError::WorkerPanic(stage));
                    cancel.cancel();
                }
            }
            let written = match writer.join() {
                Ok(written) => written,
                Err(_) => {
                    first.record(DwcaError::WorkerPanic(stage));
                    0
                }
            };
            PipelineReport { read, written }
        });
        if draining {
            self.transition(PipelineState::Draining);
        }

        match first.take() {
            Some(err) => {
                self.transition(PipelineState::Failed);
                warn!(stage, error = %err, category = %err.category(), "pipeline failed");
                Err(DwcaError::Pipeline {
                    stage,
                    source: Box::new(err),
                })
            }
            None => {
                self.transition(PipelineState::Completed);
                debug!(stage, read = report.read, written = report.written, "pipeline done");
                Ok(report)
            }
        }
    }
}

fn work<O, F, T>(
    rx: Receiver<Row>,
    tx: Sender<O>,
    cancel: &CancelToken,
    first: &FirstError,
    make_worker: &F,
) where
    F: Fn() -> Result<T, DwcaError>,
    T: FnMut(Row) -> Result<O, DwcaError>,
{
    let mut transform = match make_worker() {
        Ok(transform) => Some(transform),
        Err(err) => {
            first.record(err);
            cancel.cancel();
            None
        }
    };

    // keep receiving after cancellation so the producer never blocks
    for row in rx.iter() {
        if cancel.is_cancelled() {
            continue;
        }
        let Some(transform) = transform.as_mut() else {
            continue;
        };
        match transform(row) {
            Ok(item) => {
                if tx.send(item).is_err() {
                    cancel.cancel();
                }
            }
            Err(err) => {
                first.record(err);
                cancel.cancel();
            }
        }
    }
}

fn drain_into<O, K>(rx: Receiver<O>, mut sink: K, cancel: &CancelToken, first: &FirstError) -> u64
where
    K: FnMut(O) -> Result<(), DwcaError>,
{
    let mut written = 0;
    for item in rx.iter() {
        if cancel.is_cancelled() {
            continue;
        }
        match sink(item) {
            Ok(()) => written += 1,
            Err(err) => {
                first.record(err);
                cancel.cancel();
            }
        }
    }
    written
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn numbers(count: usize) -> impl FnOnce(&Sender<Row>, &CancelToken) -> Result<u64, DwcaError> {
        move |tx, cancel| {
            let mut sent = 0;
            for i in 0..count {
                if cancel.is_cancelled() {
                    return Err(DwcaError::Cancelled);
                }
                tx.send(vec![i.to_string()]).map_err(|_| DwcaError::Cancelled)?;
                sent += 1;
            }
            Ok(sent)
        }
    }

    #[test]
    fn every_row_reaches_the_sink() {
        for jobs in [1, 3, 8] {
            let mut seen = Vec::new();
            let mut pipeline = Pipeline::new("test", jobs, CancelToken::new());
            let report = pipeline
                .run(
                    numbers(1000),
                    || Ok(|row: Row| Ok(row[0].parse::<u32>().unwrap_or_default())),
                    |value| {
                        seen.push(value);
                        Ok(())
                    },
                )
                .unwrap();
            assert_eq!(report, PipelineReport { read: 1000, written: 1000 });
            seen.sort_unstable();
            assert_eq!(seen, (0..1000).collect::<Vec<u32>>());
            assert_eq!(pipeline.state(), PipelineState::Completed);
        }
    }

    #[test]
    fn first_worker_error_wins_and_nothing_hangs() {
        let mut pipeline = Pipeline::new("test", 4, CancelToken::new());
        let err = pipeline
            .run(
                numbers(50_000),
                || {
                    Ok(|row: Row| {
                        if row[0] == "10" {
                            return Err(DwcaError::NoCoreData);
                        }
                        Ok(row)
                    })
                },
                |_| Ok(()),
            )
            .unwrap_err();
        assert_matches!(err.root(), DwcaError::NoCoreData);
        assert_eq!(pipeline.state(), PipelineState::Failed);
    }

    #[test]
    fn sink_error_cancels_workers() {
        let mut pipeline = Pipeline::new("test", 2, CancelToken::new());
        let err = pipeline
            .run(
                numbers(10_000),
                || Ok(|row: Row| Ok(row)),
                |_| Err(DwcaError::Filesystem("disk full".to_string())),
            )
            .unwrap_err();
        assert_matches!(err.root(), DwcaError::Filesystem(_));
    }

    #[test]
    fn external_cancel_is_reported_as_cancelled() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut pipeline = Pipeline::new("test", 2, cancel);
        let err = pipeline
            .run(numbers(10), || Ok(|row: Row| Ok(row)), |_| Ok(()))
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn real_error_replaces_cancellation() {
        let first = FirstError::default();
        first.record(DwcaError::Cancelled);
        first.record(DwcaError::NoCoreData);
        first.record(DwcaError::UnsupportedNameShape);
        assert_matches!(first.take(), Some(DwcaError::NoCoreData));
    }
}
