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

//! Named-scope wall-clock profiling.
//!
//! A [`Profiler`] accumulates, per scope name, the invocation count and the
//! total, minimum and maximum duration in nanoseconds. Scopes are opened
//! with [`Profiler::scope`] and closed by dropping the returned guard.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Accumulated timings for one named scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileEntry {
    /// Scope name.
    pub name: String,
    /// Number of recorded invocations.
    pub count: u64,
    /// Sum of all invocation durations, in nanoseconds.
    pub total_ns: u64,
    /// Shortest invocation, in nanoseconds.
    pub min_ns: u64,
    /// Longest invocation, in nanoseconds.
    pub max_ns: u64,
}

#[derive(Default)]
struct Accumulator {
    count: u64,
    total_ns: u64,
    min_ns: u64,
    max_ns: u64,
}

/// Clonable handle to a shared profiling accumulator.
#[derive(Clone, Default)]
pub struct Profiler {
    entries: Arc<Mutex<HashMap<String, Accumulator>>>,
}

impl Profiler {
    /// Creates an empty profiler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a timed scope; the measurement is recorded when the returned
    /// guard is dropped.
    pub fn scope<'a>(&'a self, name: &'a str) -> ProfileScope<'a> {
        ProfileScope {
            profiler: self,
            name,
            start: Instant::now(),
        }
    }

    /// Records one invocation of `name` lasting `ns` nanoseconds.
    pub fn record(&self, name: &str, ns: u64) {
        let mut entries = self.entries.lock().unwrap();
        match entries.get_mut(name) {
            Some(acc) => {
                acc.count += 1;
                acc.total_ns += ns;
                acc.min_ns = acc.min_ns.min(ns);
                acc.max_ns = acc.max_ns.max(ns);
            }
            None => {
                entries.insert(
                    name.to_owned(),
                    Accumulator {
                        count: 1,
                        total_ns: ns,
                        min_ns: ns,
                        max_ns: ns,
                    },
                );
            }
        }
    }

    /// Returns the accumulated entries sorted by scope name.
    pub fn summary(&self) -> Vec<ProfileEntry> {
        let entries = self.entries.lock().unwrap();
        let mut out: Vec<ProfileEntry> = entries
            .iter()
            .map(|(name, acc)| ProfileEntry {
                name: name.clone(),
                count: acc.count,
                total_ns: acc.total_ns,
                min_ns: acc.min_ns,
                max_ns: acc.max_ns,
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    /// Renders the summary as an aligned text table. Returns an empty string
    /// when nothing was recorded.
    pub fn render_summary(&self) -> String {
        let rows = self.summary();
        if rows.is_empty() {
            return String::new();
        }
        let mut out = String::new();
        let _ = writeln!(out, "==== Profiler Summary ====");
        let _ = writeln!(
            out,
            "{:<40}{:>12}{:>14}{:>15}{:>14}{:>14}",
            "Section", "Count", "Avg (us)", "Total (ms)", "Min (us)", "Max (us)"
        );
        for e in rows {
            let avg_us = e.total_ns as f64 / e.count.max(1) as f64 / 1000.0;
            let _ = writeln!(
                out,
                "{:<40}{:>12}{:>14.3}{:>15.3}{:>14.3}{:>14.3}",
                e.name,
                e.count,
                avg_us,
                e.total_ns as f64 / 1.0e6,
                e.min_ns as f64 / 1000.0,
                e.max_ns as f64 / 1000.0
            );
        }
        let _ = writeln!(out, "==========================");
        out
    }
}

impl std::fmt::Debug for Profiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Profiler")
            .field("scopes", &self.entries.lock().unwrap().len())
            .finish()
    }
}

/// Guard measuring one scope invocation; records on drop.
#[derive(Debug)]
pub struct ProfileScope<'a> {
    profiler: &'a Profiler,
    name: &'a str,
    start: Instant,
}

impl Drop for ProfileScope<'_> {
    fn drop(&mut self) {
        let ns = self.start.elapsed().as_nanos() as u64;
        self.profiler.record(self.name, ns);
    }
}
