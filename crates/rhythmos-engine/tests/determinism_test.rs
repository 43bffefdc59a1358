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

//! State fingerprints must not depend on the worker count: range tasks
//! write per-element data, reductions fold it sequentially on the driver.

use rhythmos_core::hash::Fnv1a64;
use rhythmos_core::SimConfig;
use rhythmos_engine::{Sim, SliceCell};
use std::sync::Arc;

const ELEMENTS: usize = 5000;
const FRAMES: u64 = 1500;

/// Integrates a velocity/position system for [`FRAMES`] steps and returns
/// the FNV-1a fingerprint of the final velocities.
fn run_fingerprint(threads: usize) -> u64 {
    let mut sim = Sim::new(SimConfig {
        hz: 1000.0,
        max_frames: Some(FRAMES),
        threads,
        adaptive: false,
        drift_log_interval: 0,
        spin_micros: 200,
        ..SimConfig::default()
    });

    let phase = sim.add_phase("Phys", ELEMENTS);
    let vel = Arc::new(SliceCell::new(ELEMENTS, 10.0f64));
    let pos = Arc::new(SliceCell::new(ELEMENTS, 0.0f64));

    let vel_writer = Arc::clone(&vel);
    sim.add_parallel_range_task(phase, move |begin, end, _, dt| {
        // SAFETY: the dispatcher hands out `[begin, end)` exactly once per
        // task, so no other live view overlaps this interval.
        let v = unsafe { vel_writer.slice_mut(begin, end) };
        for item in v {
            *item += 0.001 * dt;
        }
    });

    let vel_reader = Arc::clone(&vel);
    let pos_writer = Arc::clone(&pos);
    sim.add_parallel_range_task(phase, move |begin, end, _, dt| {
        // SAFETY: same interval discipline as above; the previous range
        // task has fully completed, so reading `vel` cannot race.
        let p = unsafe { pos_writer.slice_mut(begin, end) };
        for (offset, item) in p.iter_mut().enumerate() {
            *item += vel_reader.get(begin + offset) * dt;
        }
    });

    let hash_slot = sim.hash_slot();
    let vel_final = Arc::clone(&vel);
    sim.add_reduction_task(phase, move |frame, _| {
        if frame == FRAMES - 1 {
            let mut hasher = Fnv1a64::new();
            for i in 0..vel_final.len() {
                hasher.write_f64(vel_final.get(i));
            }
            hash_slot.store(hasher.finish());
        }
    });

    sim.run().expect("run");
    sim.deterministic_hash()
}

#[test]
fn fingerprint_is_identical_across_worker_counts() {
    let h2 = run_fingerprint(2);
    let h8 = run_fingerprint(8);
    assert_ne!(h2, 0, "the reduction must have produced a fingerprint");
    assert_eq!(h2, h8);
}

#[test]
fn single_worker_matches_the_parallel_fingerprint() {
    let h1 = run_fingerprint(1);
    let h4 = run_fingerprint(4);
    assert_eq!(h1, h4);
}
