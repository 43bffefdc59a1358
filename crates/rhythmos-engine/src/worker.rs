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

//! Persistent worker set consuming dispatched ranges.

use crate::dispatch::DispatchShared;
use rhythmos_core::log_debug;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::JoinHandle;

/// Fixed population of worker threads created up front and joined at
/// shutdown. Workers own nothing that outlives their thread; all shared
/// state lives in [`DispatchShared`].
pub(crate) struct WorkerPool {
    shared: Arc<DispatchShared>,
    handles: Vec<JoinHandle<()>>,
    count: usize,
}

impl WorkerPool {
    pub fn spawn(count: usize, shared: Arc<DispatchShared>) -> Self {
        let mut handles = Vec::with_capacity(count);
        for index in 0..count {
            let shared = Arc::clone(&shared);
            handles.push(std::thread::spawn(move || worker_loop(index, shared)));
        }
        Self {
            shared,
            handles,
            count,
        }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    /// Flags shutdown, wakes every idle worker, and joins them. Safe to
    /// call more than once.
    pub fn shutdown(&mut self) {
        if self.handles.is_empty() {
            return;
        }
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.token.fetch_add(1, Ordering::AcqRel);
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(index: usize, shared: Arc<DispatchShared>) {
    log_debug!(shared.logger, "Worker {} started", index);
    // The sentinel never matches a real token, forcing one adoption pass up
    // front: a dispatch racing thread creation must not be waited past.
    let mut local_token = u64::MAX;
    loop {
        while shared.token.load(Ordering::Acquire) == local_token
            && !shared.shutdown.load(Ordering::Acquire)
        {
            std::thread::yield_now();
        }
        if shared.shutdown.load(Ordering::Acquire) {
            break;
        }
        local_token = shared.token.load(Ordering::Acquire);
        // One uncontended lock per adoption; chunk claiming below never
        // takes it.
        let job = shared.slot.lock().unwrap().clone();
        if let Some(job) = job {
            job.drain(&shared);
        }
    }
    log_debug!(shared.logger, "Worker {} exited", index);
}
