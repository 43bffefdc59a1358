// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Single-producer / many-consumer range dispatch.
//!
//! The driver publishes one [`RangeJob`] at a time and bumps the dispatch
//! token; workers idling on the token adopt the job and claim fixed-size
//! chunks from it until the claim space is exhausted. Claiming is a single
//! relaxed `fetch_add` (only uniqueness of the returned index matters);
//! completion is an acquire-release countdown so every chunk's side effects
//! are visible to the driver before it moves on.
//!
//! The chunk counters live inside the job, not in the shared block. A
//! worker that wakes late and drains a job that newer dispatches have
//! already replaced can only ever touch that stale job's own counters, so
//! per-job claim uniqueness holds without any coordination beyond the
//! token.

use crate::error::SimError;
use crate::phase::RangeTaskFn;
use crate::worker::WorkerPool;
use crossbeam_channel::{Receiver, Sender};
use rhythmos_core::{log_error, log_trace, Logger};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Report of a panic caught inside a range-task chunk.
pub(crate) struct TaskFault {
    pub frame: u64,
    pub chunk: usize,
    pub detail: String,
}

/// State shared between the driver and the worker set.
pub(crate) struct DispatchShared {
    /// Monotonic counter; a change tells idle workers to adopt the slot.
    pub token: AtomicU64,
    /// One-shot request for workers to exit their loop.
    pub shutdown: AtomicBool,
    /// The currently published job. Locked once per adoption, never on the
    /// chunk path.
    pub slot: Mutex<Option<Arc<RangeJob>>>,
    pub faults: Sender<TaskFault>,
    pub logger: Logger,
    pub log_chunks: AtomicBool,
}

/// One published range task: the callback, its domain, and the claim and
/// completion counters for this dispatch.
pub(crate) struct RangeJob {
    task: RangeTaskFn,
    element_count: usize,
    chunk_size: usize,
    total_chunks: usize,
    frame: u64,
    dt: f64,
    next_chunk: AtomicUsize,
    remaining: AtomicUsize,
}

impl RangeJob {
    fn new(
        task: RangeTaskFn,
        element_count: usize,
        chunk_size: usize,
        frame: u64,
        dt: f64,
    ) -> Self {
        let total_chunks = element_count.div_ceil(chunk_size);
        Self {
            task,
            element_count,
            chunk_size,
            total_chunks,
            frame,
            dt,
            next_chunk: AtomicUsize::new(0),
            remaining: AtomicUsize::new(total_chunks),
        }
    }

    pub fn complete(&self) -> bool {
        self.remaining.load(Ordering::Acquire) == 0
    }

    /// Claims and executes chunks until the claim space is exhausted or the
    /// last chunk of the job finishes. Runs on workers and, when the driver
    /// helps, on the driver itself.
    pub fn drain(&self, shared: &DispatchShared) {
        loop {
            let idx = self.next_chunk.fetch_add(1, Ordering::Relaxed);
            if idx >= self.total_chunks {
                break;
            }
            let begin = idx * self.chunk_size;
            let end = (begin + self.chunk_size).min(self.element_count);
            if shared.log_chunks.load(Ordering::Relaxed) {
                log_trace!(
                    shared.logger,
                    "ChunkStart frame={} idx={} begin={} end={}",
                    self.frame,
                    idx,
                    begin,
                    end
                );
            }
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                (*self.task)(begin, end, self.frame, self.dt)
            }));
            if let Err(payload) = outcome {
                let fault = TaskFault {
                    frame: self.frame,
                    chunk: idx,
                    detail: panic_detail(payload),
                };
                // A full channel means a fault is already pending; the run
                // ends on the first one either way.
                let _ = shared.faults.try_send(fault);
            }
            let rem = self.remaining.fetch_sub(1, Ordering::AcqRel) - 1;
            if shared.log_chunks.load(Ordering::Relaxed) {
                log_trace!(
                    shared.logger,
                    "ChunkDone frame={} idx={} remaining={}",
                    self.frame,
                    idx,
                    rem
                );
            }
            if rem == 0 {
                break;
            }
        }
    }
}

fn panic_detail(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "opaque panic payload".to_owned()
    }
}

/// Driver-side handle over the worker set and the publication protocol.
pub(crate) struct Dispatcher {
    shared: Arc<DispatchShared>,
    fault_rx: Receiver<TaskFault>,
    workers: WorkerPool,
}

impl Dispatcher {
    pub fn new(threads: usize, logger: Logger, log_chunks: bool) -> Self {
        let (fault_tx, fault_rx) = crossbeam_channel::bounded(64);
        let shared = Arc::new(DispatchShared {
            token: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
            slot: Mutex::new(None),
            faults: fault_tx,
            logger,
            log_chunks: AtomicBool::new(log_chunks),
        });
        let workers = WorkerPool::spawn(threads, Arc::clone(&shared));
        Self {
            shared,
            fault_rx,
            workers,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Publishes one range task and blocks until every chunk has executed,
    /// then surfaces any chunk panic as an error.
    pub fn run_range(
        &self,
        task: &RangeTaskFn,
        element_count: usize,
        chunk_size: usize,
        frame: u64,
        dt: f64,
        main_helps: bool,
    ) -> Result<(), SimError> {
        let job = Arc::new(RangeJob::new(
            Arc::clone(task),
            element_count,
            chunk_size,
            frame,
            dt,
        ));
        *self.shared.slot.lock().unwrap() = Some(Arc::clone(&job));
        self.shared.token.fetch_add(1, Ordering::AcqRel);

        if main_helps {
            job.drain(&self.shared);
        }
        while !job.complete() {
            std::thread::yield_now();
        }
        self.surface_faults()
    }

    fn surface_faults(&self) -> Result<(), SimError> {
        let mut first: Option<SimError> = None;
        while let Ok(fault) = self.fault_rx.try_recv() {
            log_error!(
                self.shared.logger,
                "Range task panicked frame={} chunk={}: {}",
                fault.frame,
                fault.chunk,
                fault.detail
            );
            if first.is_none() {
                first = Some(SimError::TaskPanicked {
                    frame: fault.frame,
                    chunk: fault.chunk,
                    detail: fault.detail,
                });
            }
        }
        match first {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub fn shutdown(&mut self) {
        self.workers.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn driver_only_dispatcher() -> Dispatcher {
        // No workers: the driver drains every chunk itself, which makes the
        // claim accounting easy to observe.
        Dispatcher::new(0, Logger::new(), false)
    }

    #[test]
    fn chunk_count_rounds_up() {
        let task: RangeTaskFn = Arc::new(|_, _, _, _| {});
        assert_eq!(RangeJob::new(Arc::clone(&task), 10, 4, 0, 0.1).total_chunks, 3);
        assert_eq!(RangeJob::new(Arc::clone(&task), 12, 4, 0, 0.1).total_chunks, 3);
        assert_eq!(RangeJob::new(Arc::clone(&task), 1, 4, 0, 0.1).total_chunks, 1);
        assert_eq!(RangeJob::new(task, 0, 4, 0, 0.1).total_chunks, 0);
    }

    #[test]
    fn driver_drain_covers_the_domain_once() {
        let dispatcher = driver_only_dispatcher();
        let touched = Arc::new(
            (0..100).map(|_| AtomicUsize::new(0)).collect::<Vec<_>>(),
        );
        let seen = Arc::clone(&touched);
        let task: RangeTaskFn = Arc::new(move |begin, end, _, _| {
            for i in begin..end {
                seen[i].fetch_add(1, Ordering::Relaxed);
            }
        });
        dispatcher
            .run_range(&task, 100, 7, 3, 0.01, true)
            .expect("no faults");
        for counter in touched.iter() {
            assert_eq!(counter.load(Ordering::Relaxed), 1);
        }
    }

    #[test]
    fn last_chunk_can_be_short() {
        let dispatcher = driver_only_dispatcher();
        let ranges = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&ranges);
        let task: RangeTaskFn = Arc::new(move |begin, end, _, _| {
            log.lock().unwrap().push((begin, end));
        });
        dispatcher.run_range(&task, 10, 4, 0, 0.01, true).expect("no faults");
        let mut got = ranges.lock().unwrap().clone();
        got.sort_unstable();
        assert_eq!(got, vec![(0, 4), (4, 8), (8, 10)]);
    }

    #[test]
    fn task_arguments_pass_through() {
        let dispatcher = driver_only_dispatcher();
        let seen = Arc::new(Mutex::new((0u64, 0.0f64)));
        let out = Arc::clone(&seen);
        let task: RangeTaskFn = Arc::new(move |_, _, frame, dt| {
            *out.lock().unwrap() = (frame, dt);
        });
        dispatcher.run_range(&task, 4, 8, 41, 0.25, true).expect("no faults");
        assert_eq!(*seen.lock().unwrap(), (41, 0.25));
    }

    #[test]
    fn chunk_panic_surfaces_as_error() {
        let dispatcher = driver_only_dispatcher();
        let task: RangeTaskFn = Arc::new(|begin, _, _, _| {
            if begin == 8 {
                panic!("boom at {begin}");
            }
        });
        let err = dispatcher
            .run_range(&task, 16, 4, 7, 0.01, true)
            .expect_err("fault expected");
        match err {
            SimError::TaskPanicked { frame, chunk, detail } => {
                assert_eq!(frame, 7);
                assert_eq!(chunk, 2);
                assert!(detail.contains("boom"));
            }
        }
    }

    #[test]
    fn panic_still_counts_chunk_completion() {
        let dispatcher = driver_only_dispatcher();
        let executed = Arc::new(AtomicUsize::new(0));
        let count = Arc::clone(&executed);
        let task: RangeTaskFn = Arc::new(move |_, _, _, _| {
            count.fetch_add(1, Ordering::Relaxed);
            panic!("every chunk fails");
        });
        // Completion must reach zero even though every chunk panicked,
        // otherwise this call would never return.
        let _ = dispatcher.run_range(&task, 12, 4, 0, 0.01, true);
        assert_eq!(executed.load(Ordering::Relaxed), 3);
    }
}
