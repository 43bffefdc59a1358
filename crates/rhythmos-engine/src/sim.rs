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

//! The fixed-timestep driver.
//!
//! [`Sim`] owns the phase registry, the worker set and the pacing loop. One
//! call to [`Sim::run`] advances the logical clock one step at a time:
//! every step executes each enabled phase (serial subsystems, then each
//! parallel range task to completion, then reductions), after which the
//! loop sleeps and spins to the next wall-clock deadline. When configured
//! as adaptive, a bounded burst of extra steps absorbs accumulated lag.

use crate::dispatch::Dispatcher;
use crate::error::SimError;
use crate::phase::{PhaseId, PhaseRegistry};
use rhythmos_core::{
    log_debug, log_info, log_trace, log_warn, Level, LogSink, Logger, Profiler, SimConfig,
    TimingModel,
};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Interval between sleeps while waiting out the bulk of a deadline.
const DEADLINE_NAP: Duration = Duration::from_micros(50);

/// Clonable handle requesting the run to stop. The request is one-shot and
/// observed at the top of the next step.
#[derive(Debug, Clone)]
pub struct ExitHandle {
    flag: Arc<AtomicBool>,
}

impl ExitHandle {
    /// Requests the run to stop.
    pub fn request(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    /// Whether a stop has been requested.
    pub fn is_requested(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Clonable handle to the 64-bit state fingerprint slot. Reductions write
/// it; equivalence tests read it back after the run.
#[derive(Debug, Clone)]
pub struct HashSlot {
    value: Arc<AtomicU64>,
}

impl HashSlot {
    /// Stores a fingerprint.
    pub fn store(&self, value: u64) {
        self.value.store(value, Ordering::Relaxed);
    }

    /// Reads the fingerprint.
    pub fn load(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Fixed-timestep simulation driver.
pub struct Sim {
    config: SimConfig,
    repairs: Vec<String>,
    timing: TimingModel,
    registry: PhaseRegistry,
    dispatcher: Dispatcher,
    logger: Logger,
    profiler: Option<Profiler>,
    frame: u64,
    exit: Arc<AtomicBool>,
    hash: Arc<AtomicU64>,
    start_real: Instant,
    next_target: Instant,
    last_drift_ms: f64,
    last_drift_log_frame: u64,
    bursts: u64,
    extra_steps: u64,
    recovered_ms: f64,
}

impl Sim {
    /// Builds a driver from a configuration, repairing degenerate values
    /// and spawning the worker set. Repairs are logged once [`Sim::run`]
    /// starts, when sinks are usually attached.
    pub fn new(mut config: SimConfig) -> Self {
        let repairs = config.sanitize();
        let timing = TimingModel::from_hz(config.hz);
        let logger = Logger::new();
        let dispatcher = Dispatcher::new(config.threads, logger.clone(), config.log_range_tasks);
        let now = Instant::now();
        Self {
            config,
            repairs,
            timing,
            registry: PhaseRegistry::default(),
            dispatcher,
            logger,
            profiler: None,
            frame: 0,
            exit: Arc::new(AtomicBool::new(false)),
            hash: Arc::new(AtomicU64::new(0)),
            start_real: now,
            next_target: now,
            last_drift_ms: 0.0,
            last_drift_log_frame: 0,
            bursts: 0,
            extra_steps: 0,
            recovered_ms: 0.0,
        }
    }

    // ---- telemetry wiring -------------------------------------------------

    /// Registers a log sink with the driver's logger.
    pub fn attach_log_sink(&self, sink: Arc<dyn LogSink>) {
        self.logger.add_sink(sink);
    }

    /// Sets the log level filter.
    pub fn set_log_level(&self, level: Level) {
        self.logger.set_level(level);
    }

    /// Clone of the driver's logger handle. Also usable as a `log::Log`
    /// backend for the global facade.
    pub fn logger(&self) -> Logger {
        self.logger.clone()
    }

    /// Attaches a profiler; scopes are recorded per step, per phase, per
    /// range-task invocation and per reduction.
    pub fn attach_profiler(&mut self, profiler: Profiler) {
        self.profiler = Some(profiler);
    }

    /// The attached profiler, if any.
    pub fn profiler(&self) -> Option<&Profiler> {
        self.profiler.as_ref()
    }

    // ---- registration -----------------------------------------------------

    /// Appends a phase and returns its stable identifier. Phases execute in
    /// registration order on every step.
    pub fn add_phase(&mut self, name: &str, element_count: usize) -> PhaseId {
        let id = self.registry.add(name, element_count);
        log_debug!(self.logger, "AddPhase '{}' elements={}", name, element_count);
        id
    }

    /// Resizes the element domain shared by the phase's range tasks.
    pub fn set_phase_element_count(&mut self, id: PhaseId, count: usize) {
        let phase = self.registry.phase_mut(id);
        phase.element_count = count;
        log_debug!(
            self.logger,
            "Phase '{}' elements={}",
            phase.name,
            count
        );
    }

    /// Enables or disables a phase; disabled phases are skipped entirely.
    pub fn set_phase_enabled(&mut self, id: PhaseId, enabled: bool) {
        self.registry.phase_mut(id).enabled = enabled;
    }

    /// Adds a serial subsystem to the phase. Serial subsystems run on the
    /// driver thread, in insertion order, before any range task.
    pub fn add_serial_subsystem<F>(&mut self, id: PhaseId, f: F)
    where
        F: FnMut(u64, f64) + Send + 'static,
    {
        let phase = self.registry.phase_mut(id);
        phase.serial.push(Box::new(f));
        log_trace!(
            self.logger,
            "Add serial subsystem to phase '{}'",
            phase.name
        );
    }

    /// Adds a parallel range task to the phase. The callback receives
    /// disjoint `[begin, end)` intervals of `[0, element_count)` and must be
    /// re-entrant across workers.
    pub fn add_parallel_range_task<F>(&mut self, id: PhaseId, f: F)
    where
        F: Fn(usize, usize, u64, f64) + Send + Sync + 'static,
    {
        let phase = self.registry.phase_mut(id);
        phase.push_range_task(Arc::new(f));
        log_trace!(
            self.logger,
            "Add parallel range task to phase '{}'",
            phase.name
        );
    }

    /// Adds a reduction to the phase. Reductions run on the driver thread,
    /// in insertion order, after every range task of the phase completed.
    pub fn add_reduction_task<F>(&mut self, id: PhaseId, f: F)
    where
        F: FnMut(u64, f64) + Send + 'static,
    {
        let phase = self.registry.phase_mut(id);
        phase.reductions.push(Box::new(f));
        log_trace!(
            self.logger,
            "Add reduction task to phase '{}'",
            phase.name
        );
    }

    // ---- shared state handles --------------------------------------------

    /// Stores the state fingerprint.
    pub fn set_deterministic_hash(&self, value: u64) {
        self.hash.store(value, Ordering::Relaxed);
    }

    /// Reads the state fingerprint.
    pub fn deterministic_hash(&self) -> u64 {
        self.hash.load(Ordering::Relaxed)
    }

    /// Clonable handle to the fingerprint slot, for reduction closures.
    pub fn hash_slot(&self) -> HashSlot {
        HashSlot {
            value: Arc::clone(&self.hash),
        }
    }

    /// Requests the run to stop before the next step.
    pub fn request_exit(&self) {
        self.exit.store(true, Ordering::Relaxed);
    }

    /// Clonable handle to the exit flag, for callbacks and signal handlers.
    pub fn exit_handle(&self) -> ExitHandle {
        ExitHandle {
            flag: Arc::clone(&self.exit),
        }
    }

    // ---- observers --------------------------------------------------------

    /// Completed steps so far.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Per-step duration in seconds.
    pub fn dt_seconds(&self) -> f64 {
        self.timing.dt
    }

    /// The repaired configuration in effect.
    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Most recent signed drift between simulated and real time, in
    /// milliseconds. Positive values mean the simulation is ahead.
    pub fn last_drift_ms(&self) -> f64 {
        self.last_drift_ms
    }

    /// Catch-up bursts that exceeded the configured threshold.
    pub fn bursts(&self) -> u64 {
        self.bursts
    }

    /// Total catch-up steps performed.
    pub fn extra_steps(&self) -> u64 {
        self.extra_steps
    }

    /// Simulated time recovered by catch-up steps, in milliseconds.
    pub fn recovered_ms(&self) -> f64 {
        self.recovered_ms
    }

    // ---- the loop ---------------------------------------------------------

    /// Runs the pacing loop until the frame budget is spent, an exit is
    /// requested, or a range task faults.
    pub fn run(&mut self) -> Result<(), SimError> {
        for repair in &self.repairs {
            log_warn!(self.logger, "Config repaired: {}", repair);
        }
        log_info!(
            self.logger,
            "Config hz={} frames={:?} threads={} mainHelps={} chunk={} adaptive={} maxCatchUp={} driftInterval={} spinMicros={}",
            self.config.hz,
            self.config.max_frames,
            self.config.threads,
            self.config.main_helps,
            self.config.chunk_size,
            self.config.adaptive,
            self.config.max_catch_up,
            self.config.drift_log_interval,
            self.config.spin_micros
        );
        log_info!(self.logger, "Run loop start phases={}", self.registry.len());

        self.start_real = Instant::now();
        self.next_target = self.start_real;
        self.last_drift_log_frame = self.frame;

        while !self.exit.load(Ordering::Relaxed) && !self.budget_exhausted() {
            self.advance()?;
        }

        log_info!(self.logger, "Run loop end frame={}", self.frame);
        Ok(())
    }

    fn budget_exhausted(&self) -> bool {
        self.config
            .max_frames
            .is_some_and(|budget| self.frame >= budget)
    }

    /// One pacing iteration: a group of steps, the deadline wait, then the
    /// optional catch-up burst.
    fn advance(&mut self) -> Result<(), SimError> {
        for _ in 0..self.timing.sub_steps {
            if self.exit.load(Ordering::Relaxed) || self.budget_exhausted() {
                break;
            }
            self.do_step()?;
        }
        self.next_target += self.timing.outer_duration();

        let now = self.wait_for_deadline();
        self.observe_drift(now);
        if self.config.adaptive {
            self.catch_up(now)?;
        }
        Ok(())
    }

    /// Sleeps in short naps while the deadline is far, then yield-spins the
    /// final stretch, so the OS is never asked for a wait below its timer
    /// resolution. Returns the time observed at the deadline.
    fn wait_for_deadline(&self) -> Instant {
        let spin_budget = Duration::from_micros(u64::from(self.config.spin_micros));
        loop {
            let now = Instant::now();
            if now + spin_budget >= self.next_target {
                let mut now = now;
                while now < self.next_target {
                    std::thread::yield_now();
                    now = Instant::now();
                }
                return now;
            }
            std::thread::sleep(DEADLINE_NAP);
        }
    }

    fn observe_drift(&mut self, now: Instant) {
        let sim_t = self.frame as f64 * self.timing.dt;
        let real_t = now.duration_since(self.start_real).as_secs_f64();
        self.last_drift_ms = (sim_t - real_t) * 1000.0;

        let interval = self.config.drift_log_interval;
        if interval > 0 && self.frame - self.last_drift_log_frame >= interval {
            self.last_drift_log_frame = self.frame;
            log_info!(
                self.logger,
                "Drift frame={} simT={:.3}s realT={:.3}s drift={:.2}ms",
                self.frame,
                sim_t,
                real_t,
                self.last_drift_ms
            );
        }
    }

    /// Runs up to `max_catch_up` extra steps without advancing the deadline
    /// when the loop finds itself behind it.
    fn catch_up(&mut self, now: Instant) -> Result<(), SimError> {
        let behind = now
            .saturating_duration_since(self.next_target)
            .as_secs_f64();
        let extra = ((behind / self.timing.dt) as u64).min(u64::from(self.config.max_catch_up));
        if extra == 0 {
            return Ok(());
        }
        let mut ran = 0u64;
        for _ in 0..extra {
            if self.exit.load(Ordering::Relaxed) || self.budget_exhausted() {
                break;
            }
            self.do_step()?;
            ran += 1;
        }
        if ran > 0 {
            self.extra_steps += ran;
            self.recovered_ms += ran as f64 * self.timing.dt * 1000.0;
            if ran > u64::from(self.config.catch_up_threshold_frames) {
                self.bursts += 1;
            }
            log_debug!(
                self.logger,
                "CatchUp extra={} behind={:.3}ms",
                ran,
                behind * 1000.0
            );
        }
        Ok(())
    }

    /// Executes one step: every enabled phase in order, serial subsystems
    /// first, then each range task to completion, then reductions.
    fn do_step(&mut self) -> Result<(), SimError> {
        let profiler = self.profiler.clone();
        let _frame_scope = profiler.as_ref().map(|p| p.scope("Frame"));
        let frame = self.frame;
        let dt = self.timing.dt;
        let worker_count = self.dispatcher.worker_count();

        for phase in self.registry.phases_mut() {
            if !phase.enabled {
                continue;
            }
            if self.config.log_phases {
                log_debug!(self.logger, "PhaseBegin '{}' frame={}", phase.name, frame);
            }
            let _phase_scope = profiler.as_ref().map(|p| p.scope(&phase.phase_scope));

            for subsystem in phase.serial.iter_mut() {
                subsystem(frame, dt);
            }

            // An empty domain means the range tasks have nothing to see
            // this step; they are not invoked at all.
            if !phase.range_tasks.is_empty() && phase.element_count > 0 {
                if worker_count > 1 {
                    for (i, task) in phase.range_tasks.iter().enumerate() {
                        let _scope = profiler.as_ref().map(|p| p.scope(&phase.range_scopes[i]));
                        self.dispatcher.run_range(
                            task,
                            phase.element_count,
                            self.config.chunk_size,
                            frame,
                            dt,
                            self.config.main_helps,
                        )?;
                    }
                } else {
                    for (i, task) in phase.range_tasks.iter().enumerate() {
                        let _scope = profiler.as_ref().map(|p| p.scope(&phase.range_scopes[i]));
                        (**task)(0, phase.element_count, frame, dt);
                    }
                }
            }

            for reduction in phase.reductions.iter_mut() {
                let _scope = profiler.as_ref().map(|p| p.scope(&phase.reduction_scope));
                reduction(frame, dt);
            }

            if self.config.log_phases {
                log_debug!(self.logger, "PhaseEnd '{}' frame={}", phase.name, frame);
            }
        }

        self.frame += 1;
        if self.frame & 0x3FF == 0 {
            log_info!(self.logger, "Progress frame={}", self.frame);
        }
        Ok(())
    }
}

impl Drop for Sim {
    fn drop(&mut self) {
        self.dispatcher.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet_config() -> SimConfig {
        SimConfig {
            hz: 2000.0,
            max_frames: Some(10),
            threads: 1,
            drift_log_interval: 0,
            ..SimConfig::default()
        }
    }

    #[test]
    fn degenerate_config_is_repaired() {
        let sim = Sim::new(SimConfig {
            hz: -3.0,
            threads: 0,
            chunk_size: 0,
            max_frames: Some(0),
            ..SimConfig::default()
        });
        assert_eq!(sim.config().hz, 1.0);
        assert_eq!(sim.config().threads, 1);
        assert_eq!(sim.config().chunk_size, 1);
    }

    #[test]
    fn zero_frame_budget_runs_nothing() {
        let mut sim = Sim::new(SimConfig {
            max_frames: Some(0),
            ..quiet_config()
        });
        sim.run().expect("run");
        assert_eq!(sim.frame(), 0);
    }

    #[test]
    fn hash_slot_is_shared_with_the_sim() {
        let sim = Sim::new(quiet_config());
        let slot = sim.hash_slot();
        slot.store(0xDEAD_BEEF);
        assert_eq!(sim.deterministic_hash(), 0xDEAD_BEEF);
        sim.set_deterministic_hash(7);
        assert_eq!(slot.load(), 7);
    }

    #[test]
    fn exit_handle_is_shared_with_the_sim() {
        let sim = Sim::new(quiet_config());
        let handle = sim.exit_handle();
        assert!(!handle.is_requested());
        handle.request();
        assert!(handle.is_requested());
    }

    #[test]
    fn empty_element_domain_skips_range_tasks() {
        let mut sim = Sim::new(quiet_config());
        let phase = sim.add_phase("Empty", 0);
        let invoked = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&invoked);
        sim.add_parallel_range_task(phase, move |_, _, _, _| {
            flag.store(true, Ordering::Relaxed);
        });
        sim.run().expect("run");
        assert_eq!(sim.frame(), 10);
        assert!(!invoked.load(Ordering::Relaxed));
    }

    #[test]
    fn single_worker_invokes_whole_domain_once() {
        let mut sim = Sim::new(SimConfig {
            max_frames: Some(3),
            ..quiet_config()
        });
        let phase = sim.add_phase("Whole", 1000);
        let calls = Arc::new(std::sync::Mutex::new(Vec::new()));
        let log = Arc::clone(&calls);
        sim.add_parallel_range_task(phase, move |begin, end, frame, _| {
            log.lock().unwrap().push((begin, end, frame));
        });
        sim.run().expect("run");
        assert_eq!(
            *calls.lock().unwrap(),
            vec![(0, 1000, 0), (0, 1000, 1), (0, 1000, 2)]
        );
    }

    #[test]
    fn disabled_phase_is_skipped() {
        let mut sim = Sim::new(quiet_config());
        let phase = sim.add_phase("Gated", 0);
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        sim.add_serial_subsystem(phase, move |_, _| {
            flag.store(true, Ordering::Relaxed);
        });
        sim.set_phase_enabled(phase, false);
        sim.run().expect("run");
        assert!(!ran.load(Ordering::Relaxed));
    }
}
